//!
//! [Error] and [CodecError] enum definitions
//!
use std::io;

use der::oid::ObjectIdentifier;
use hmac::digest::MacError;
use x509_parser::error::X509Error;

use crate::KeystoreFormat;

/// Possible errors for keystore assembly operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Private key is neither PKCS#1 nor PKCS#8 DER: {0}")]
    KeyDecode(String),

    #[error("Unsupported private key algorithm: {0}")]
    UnsupportedKeyAlgorithm(ObjectIdentifier),

    #[error("Invalid certificate block #{index}: {reason}")]
    CertificateParse { index: usize, reason: String },

    #[error("Certificate bundle is empty, no leaf certificate")]
    EmptyChain,

    #[error("Cannot encode {format} keystore: {source}")]
    KeystoreEncode {
        format: KeystoreFormat,
        #[source]
        source: CodecError,
    },

    #[error("Cannot decode {format} keystore: {source}")]
    KeystoreDecode {
        format: KeystoreFormat,
        #[source]
        source: CodecError,
    },

    #[error("Request for {requested} keystore given to {encoder} encoder")]
    FormatMismatch {
        requested: KeystoreFormat,
        encoder: KeystoreFormat,
    },
}

pub(crate) type CodecResult<T> = std::result::Result<T, CodecError>;

/// Format-level failures raised by the JKS and PKCS#12 codecs
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    IoError(#[from] io::Error),

    #[error(transparent)]
    DerError(#[from] der::Error),

    #[error(transparent)]
    X509Error(#[from] x509_parser::nom::Err<X509Error>),

    #[error("Invalid keystore version")]
    InvalidVersion,

    #[error("Invalid JKS magic number")]
    InvalidMagic,

    #[error("Unsupported ContentType")]
    UnsupportedContentType,

    #[error("Unsupported certiticate type")]
    UnsupportedCertificateType,

    #[error("Unsupported JKS entry tag {0}")]
    UnsupportedEntryTag(u32),

    #[error("Invalid length")]
    InvalidLength,

    #[error("Unpad error")]
    UnpadError,

    #[error("Invalid parameters")]
    InvalidParameters,

    #[error("Invalid data")]
    InvalidData,

    #[error("Unsupported encryption scheme")]
    UnsupportedEncryptionScheme,

    #[error("Unsupported MAC algorithm")]
    UnsupportedMacAlgorithm,

    #[error("{0}")]
    Pkcs5Error(String),

    #[error(transparent)]
    MacError(#[from] MacError),

    #[error("Keystore integrity check failed")]
    IntegrityCheckFailed,

    #[error("Private key decryption check failed")]
    DecryptionCheckFailed,

    #[error("Empty password is not permitted by this format")]
    EmptyPassword,

    #[error("Private key does not match the public key of the leaf certificate")]
    KeyCertificateMismatch,

    #[error("No private key entry with a certificate found")]
    MissingIdentity,

    #[error("Invalid private key")]
    InvalidPrivateKey,
}
