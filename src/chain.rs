//!
//! Trust chain composition
//!
use tracing::debug;

use crate::{Result, bundle::CertificateBundle, cert::Certificate, error::Error};

/// Leaf certificate with the CA chain that accompanies it in a keystore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedChain {
    pub(crate) leaf: Certificate,
    pub(crate) ca_chain: Vec<Certificate>,
}

impl ComposedChain {
    /// Get the leaf (entity) certificate
    pub fn leaf(&self) -> &Certificate {
        &self.leaf
    }

    /// Get the ordered CA chain, possibly empty
    pub fn ca_chain(&self) -> &[Certificate] {
        &self.ca_chain
    }

    pub fn into_parts(self) -> (Certificate, Vec<Certificate>) {
        (self.leaf, self.ca_chain)
    }
}

/// Split `primary` into its leaf and intermediates, then append every certificate of `supplied`.
///
/// The result is `primary[1..]` followed by `supplied`, each in its original order. Duplicates are kept
/// and no issuer or signature relationship is checked. Fails with [Error::EmptyChain] when `primary`
/// holds no certificates.
pub fn compose(primary: CertificateBundle, supplied: CertificateBundle) -> Result<ComposedChain> {
    let mut certs = primary.into_iter();
    let leaf = certs.next().ok_or(Error::EmptyChain)?;

    let mut ca_chain: Vec<Certificate> = certs.collect();
    let intermediates = ca_chain.len();
    ca_chain.extend(supplied);

    debug!(
        leaf = leaf.subject(),
        intermediates,
        supplied = ca_chain.len() - intermediates,
        "composed trust chain"
    );

    Ok(ComposedChain { leaf, ca_chain })
}
