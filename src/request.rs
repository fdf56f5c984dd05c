//!
//! Keystore requests and format dispatch
//!
use std::fmt;

use zeroize::Zeroizing;

use crate::{
    JksEncoder, Pkcs12Encoder, Result,
    cert::Certificate,
    chain::ComposedChain,
    error::{CodecError, CodecResult, Error},
    jks,
    key::PrivateKey,
    pfx,
};

/// Keystore container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeystoreFormat {
    /// Java KeyStore, version 2
    Jks,
    /// PKCS#12 / PFX, version 3
    Pkcs12,
}

impl KeystoreFormat {
    /// Whether the format accepts an empty store password.
    /// JVM tooling refuses to open password-less JKS files, so they are never produced.
    pub fn permits_empty_password(&self) -> bool {
        match self {
            KeystoreFormat::Jks => false,
            KeystoreFormat::Pkcs12 => true,
        }
    }

    /// Encoder with default settings for this format
    pub fn encoder(&self) -> Box<dyn KeystoreEncoder> {
        match self {
            KeystoreFormat::Jks => Box::new(JksEncoder::new()),
            KeystoreFormat::Pkcs12 => Box::new(Pkcs12Encoder::new()),
        }
    }

    /// Read back a keystore produced in this format
    pub fn decode(&self, data: &[u8], password: &str) -> Result<DecodedKeystore> {
        match self {
            KeystoreFormat::Jks => jks::decode(data, password),
            KeystoreFormat::Pkcs12 => pfx::decode(data, password),
        }
    }
}

impl fmt::Display for KeystoreFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeystoreFormat::Jks => f.write_str("JKS"),
            KeystoreFormat::Pkcs12 => f.write_str("PKCS#12"),
        }
    }
}

/// Everything needed to produce one keystore.
///
/// The request owns the key material and the password. It is consumed by [KeystoreRequest::encode],
/// and both secrets are zeroed when it is dropped, whether encoding succeeded or not.
pub struct KeystoreRequest {
    format: KeystoreFormat,
    password: Zeroizing<String>,
    key: PrivateKey,
    leaf: Certificate,
    chain: Vec<Certificate>,
}

impl KeystoreRequest {
    pub fn new<P>(format: KeystoreFormat, password: P, key: PrivateKey, composed: ComposedChain) -> Self
    where
        P: Into<String>,
    {
        let (leaf, chain) = composed.into_parts();
        Self {
            format,
            password: Zeroizing::new(password.into()),
            key,
            leaf,
            chain,
        }
    }

    pub fn format(&self) -> KeystoreFormat {
        self.format
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn key(&self) -> &PrivateKey {
        &self.key
    }

    pub fn leaf(&self) -> &Certificate {
        &self.leaf
    }

    /// Ordered CA chain. Empty means no CA structure is written at all.
    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    // Checked by every encoder before anything is written
    pub(crate) fn check_identity(&self) -> CodecResult<()> {
        if self.key.public_key_der() != self.leaf.public_key_der() {
            return Err(CodecError::KeyCertificateMismatch);
        }
        Ok(())
    }

    /// Encode with the default encoder of the requested format
    pub fn encode(self) -> Result<Vec<u8>> {
        let encoder = self.format.encoder();
        encoder.encode(&self)
    }

    /// Encode with a customized encoder, which must produce the requested format
    pub fn encode_with(self, encoder: &dyn KeystoreEncoder) -> Result<Vec<u8>> {
        if encoder.format() != self.format {
            return Err(Error::FormatMismatch {
                requested: self.format,
                encoder: encoder.format(),
            });
        }
        encoder.encode(&self)
    }
}

impl fmt::Debug for KeystoreRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeystoreRequest")
            .field("format", &self.format)
            .field("password", &"<secret>")
            .field("key", &self.key)
            .field("leaf", &self.leaf)
            .field("chain", &self.chain)
            .finish()
    }
}

/// Serializes a [KeystoreRequest] into one keystore format
pub trait KeystoreEncoder {
    /// Format produced by this encoder
    fn format(&self) -> KeystoreFormat;

    /// Produce a complete keystore, or fail without output
    fn encode(&self, request: &KeystoreRequest) -> Result<Vec<u8>>;
}

/// Identity and CA chain recovered from a keystore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKeystore {
    pub key: PrivateKey,
    pub leaf: Certificate,
    /// `None` when the keystore carries no CA structure at all
    pub ca_chain: Option<Vec<Certificate>>,
}
