//!
//! PEM certificate bundle parsing
//!
use pem::Pem;
use tracing::trace;

use crate::{Result, cert::Certificate, error::Error};

const PEM_BEGIN: &[u8] = b"-----BEGIN ";
const PEM_END: &[u8] = b"-----END ";
const PEM_DASHES: &[u8] = b"-----";
const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Ordered sequence of certificates parsed from one transport blob.
///
/// The order is the encounter order in the source and is never changed. By convention the first
/// certificate is the leaf and each following one is the issuer of its predecessor, but nothing here
/// verifies that.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateBundle {
    certs: Vec<Certificate>,
}

impl CertificateBundle {
    /// Create a bundle from already parsed certificates, keeping their order
    pub fn new<I>(certs: I) -> Self
    where
        I: IntoIterator<Item = Certificate>,
    {
        Self {
            certs: certs.into_iter().collect(),
        }
    }

    /// Parse a concatenation of zero or more PEM `CERTIFICATE` blocks.
    ///
    /// Text outside of the blocks is ignored. A blob without blocks yields an empty bundle.
    /// The zero-based position of a block which cannot be parsed is reported in
    /// [Error::CertificateParse].
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let mut certs = Vec::new();
        let mut rest = blob;

        while let Some(start) = find(rest, PEM_BEGIN) {
            let index = certs.len();
            let block = &rest[start..];
            let end = block_end(block).ok_or_else(|| Error::CertificateParse {
                index,
                reason: "missing END line".to_owned(),
            })?;

            certs.push(parse_block(index, &block[..end])?);
            rest = &block[end..];
        }

        trace!(count = certs.len(), "parsed certificate bundle");

        Ok(Self { certs })
    }

    /// Build a bundle from DER-encoded certificates
    pub fn from_der_certificates<I, D>(certs: I) -> Result<Self>
    where
        I: IntoIterator<Item = D>,
        D: AsRef<[u8]>,
    {
        let certs = certs
            .into_iter()
            .enumerate()
            .map(|(index, der)| {
                Certificate::from_der(der.as_ref()).map_err(|e| Error::CertificateParse {
                    index,
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { certs })
    }

    /// Get the first certificate, if any
    pub fn leaf(&self) -> Option<&Certificate> {
        self.certs.first()
    }

    /// Get all certificates in order
    pub fn certs(&self) -> &[Certificate] {
        &self.certs
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Encode the bundle back into concatenated PEM blocks
    pub fn to_pem(&self) -> String {
        let blocks = self
            .certs
            .iter()
            .map(|c| Pem::new(CERTIFICATE_LABEL, c.as_der()))
            .collect::<Vec<_>>();
        pem::encode_many(&blocks)
    }
}

impl IntoIterator for CertificateBundle {
    type Item = Certificate;
    type IntoIter = std::vec::IntoIter<Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.certs.into_iter()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// Offset just past the closing dashes of the END line
fn block_end(block: &[u8]) -> Option<usize> {
    let end_line = find(block, PEM_END)? + PEM_END.len();
    let closing = find(&block[end_line..], PEM_DASHES)?;
    Some(end_line + closing + PEM_DASHES.len())
}

fn parse_block(index: usize, block: &[u8]) -> Result<Certificate> {
    let pem = pem::parse(block).map_err(|e| Error::CertificateParse {
        index,
        reason: e.to_string(),
    })?;

    if pem.tag() != CERTIFICATE_LABEL {
        return Err(Error::CertificateParse {
            index,
            reason: format!("unexpected PEM label {}", pem.tag()),
        });
    }

    Certificate::from_der(pem.contents()).map_err(|e| Error::CertificateParse {
        index,
        reason: e.to_string(),
    })
}
