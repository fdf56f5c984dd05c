//!
//! X.509 certificate wrapper
//!
use std::fmt;

use der::{
    Decode, Sequence,
    asn1::{AnyRef, BitStringRef},
};

use crate::error::CodecError;

// Outer Certificate SEQUENCE, used to get at the signature bits without re-encoding
#[derive(Sequence)]
struct SignedParts<'a> {
    tbs_certificate: AnyRef<'a>,
    signature_algorithm: AnyRef<'a>,
    signature: BitStringRef<'a>,
}

/// X.509 certificate wrapper
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    pub(crate) data: Vec<u8>,
    pub(crate) subject: String,
    pub(crate) public_key: Vec<u8>,
    pub(crate) signature: Vec<u8>,
    pub(crate) not_before: i64,
}

impl Certificate {
    /// Create certificate from DER encoding
    pub fn from_der(der: &[u8]) -> Result<Self, CodecError> {
        let (rest, cert) = x509_parser::parse_x509_certificate(der)?;
        if !rest.is_empty() {
            return Err(CodecError::InvalidData);
        }
        let parts = SignedParts::from_der(der)?;
        Ok(Self {
            data: der.to_vec(),
            subject: cert.subject.to_string(),
            public_key: cert.public_key().raw.to_vec(),
            signature: parts.signature.raw_bytes().to_vec(),
            not_before: cert.validity().not_before.timestamp(),
        })
    }

    /// Get certificate subject
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the DER-encoded SubjectPublicKeyInfo
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key
    }

    /// Get the raw signature value
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Start of the validity period in seconds since the Unix epoch
    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    /// Get certificate data in DER encoding
    pub fn as_der(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("data", &"<X.509>")
            .field("subject", &self.subject)
            .finish()
    }
}
