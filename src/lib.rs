//!
//! Assemble a private key with its certificate trust chain and serialize both into a password-protected
//! keystore, written in pure Rust.
//!
//! The crate is organized as a strictly one-directional pipeline:
//!
//! * [PrivateKey::decode] turns unencrypted PKCS#1 or PKCS#8 DER into a typed key
//! * [CertificateBundle::parse] turns a concatenation of PEM certificates into an ordered bundle
//! * [chain::compose] splits the primary bundle into a leaf and merges its intermediates with a
//!   separately supplied trust chain
//! * a [KeystoreEncoder] serializes the resulting [KeystoreRequest] into one of the [KeystoreFormat]s
//!
//! The composed CA chain is always the primary bundle's non-leaf certificates followed by the supplied
//! trust chain, exactly in the order given. No deduplication or trust validation takes place.
//!
//! Supported keystore formats:
//!
//! * [KeystoreFormat::Jks] - Java KeyStore, version 2. Does not permit empty passwords
//! * [KeystoreFormat::Pkcs12] - PKCS#12/PFX with PBES2 AES-256 encryption and HMAC-SHA256 integrity
//!   by default, legacy PBES1 schemes available with the `pbes1` feature
//!
//! Both formats can be read back with [KeystoreFormat::decode], which is mostly useful for verification.
//!

pub mod bundle;
mod cert;
pub mod chain;
mod codec;
pub mod error;
pub mod jks;
mod key;
mod oid;
#[cfg(feature = "pbes1")]
mod pbes1;
pub mod pfx;
mod request;

use std::fmt;

use tracing::debug;

/// Result type for keystore operations
pub type Result<T> = std::result::Result<T, error::Error>;

pub use bundle::CertificateBundle;
pub use cert::Certificate;
pub use chain::ComposedChain;
pub use jks::JksEncoder;
pub use key::{KeyAlgorithm, KeyEncoding, PrivateKey};
pub use pfx::{EncryptionAlgorithm, MacAlgorithm, Pkcs12Encoder};
pub use request::{DecodedKeystore, KeystoreEncoder, KeystoreFormat, KeystoreRequest};

/// Local key identifier binding a PKCS#12 key bag to its certificate bag
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct LocalKeyId(pub(crate) Vec<u8>);

impl From<Vec<u8>> for LocalKeyId {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for LocalKeyId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for LocalKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LocalKeyId").field(&hex::encode(&self.0)).finish()
    }
}

/// Encode a keystore in one call from raw inputs.
///
/// * `raw_key` - unencrypted private key, PKCS#1 or PKCS#8 DER (a single PEM block is also accepted)
/// * `cert_pem` - PEM bundle, leaf certificate first
/// * `ca_pem` - optional PEM trust chain appended after the bundle's own intermediates
pub fn encode_keystore(
    format: KeystoreFormat,
    password: &str,
    raw_key: &[u8],
    cert_pem: &[u8],
    ca_pem: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let key = PrivateKey::decode(raw_key)?;
    let primary = CertificateBundle::parse(cert_pem)?;
    let supplied = match ca_pem {
        Some(ca_pem) => CertificateBundle::parse(ca_pem)?,
        None => CertificateBundle::default(),
    };

    let composed = chain::compose(primary, supplied)?;

    debug!(
        %format,
        algorithm = ?key.algorithm(),
        chain_len = composed.ca_chain().len(),
        "encoding keystore"
    );

    KeystoreRequest::new(format, password, key, composed).encode()
}
