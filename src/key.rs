//!
//! Private key decoding
//!
use std::fmt;

use der::oid::ObjectIdentifier;
use pkcs8::PrivateKeyInfo;
use rsa::{
    RsaPrivateKey,
    pkcs1::DecodeRsaPrivateKey,
    pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey},
};
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::{Result, error::Error, oid};

/// Unencrypted DER private key encodings understood by [PrivateKey::decode]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyEncoding {
    /// RSAPrivateKey structure from RFC 8017
    Pkcs1,
    /// PrivateKeyInfo structure from RFC 5208
    Pkcs8,
}

impl KeyEncoding {
    /// The order in which encodings are attempted. The first one that parses and carries a supported
    /// algorithm wins.
    pub const DECODE_ORDER: [KeyEncoding; 2] = [KeyEncoding::Pkcs1, KeyEncoding::Pkcs8];

    fn try_decode(self, der: &[u8]) -> std::result::Result<PrivateKey, Rejection> {
        match self {
            KeyEncoding::Pkcs1 => {
                let key = RsaPrivateKey::from_pkcs1_der(der).map_err(|e| Rejection::Malformed(e.to_string()))?;
                let pkcs8 = key.to_pkcs8_der().map_err(|e| Rejection::Malformed(e.to_string()))?;
                PrivateKey::from_rsa(&key, Zeroizing::new(pkcs8.as_bytes().to_vec()), self)
            }
            KeyEncoding::Pkcs8 => {
                let info = PrivateKeyInfo::try_from(der).map_err(|e| Rejection::Malformed(e.to_string()))?;
                match info.algorithm.oid {
                    oid::RSA_ENCRYPTION_OID => {
                        let key =
                            RsaPrivateKey::from_pkcs8_der(der).map_err(|e| Rejection::Malformed(e.to_string()))?;
                        PrivateKey::from_rsa(&key, Zeroizing::new(der.to_vec()), self)
                    }
                    oid::EC_PUBLIC_KEY_OID => {
                        let curve = info
                            .algorithm
                            .parameters_oid()
                            .map_err(|e| Rejection::Malformed(e.to_string()))?;
                        if curve != oid::SECP256R1_OID {
                            return Err(Rejection::Unsupported(curve));
                        }
                        let key = p256::SecretKey::from_pkcs8_der(der)
                            .map_err(|e| Rejection::Malformed(e.to_string()))?;
                        let public_key = key
                            .public_key()
                            .to_public_key_der()
                            .map_err(|e| Rejection::Malformed(e.to_string()))?;
                        Ok(PrivateKey {
                            data: Zeroizing::new(der.to_vec()),
                            encoding: self,
                            algorithm: KeyAlgorithm::EcdsaP256,
                            public_key: public_key.as_bytes().to_vec(),
                        })
                    }
                    other => Err(Rejection::Unsupported(other)),
                }
            }
        }
    }
}

enum Rejection {
    Malformed(String),
    Unsupported(ObjectIdentifier),
}

/// Private key algorithms accepted for keystore identities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum KeyAlgorithm {
    Rsa,
    EcdsaP256,
}

/// Decoded private key together with its public counterpart.
///
/// The key is kept in canonical PKCS#8 DER form regardless of the input encoding, and is zeroed on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    pub(crate) data: Zeroizing<Vec<u8>>,
    pub(crate) encoding: KeyEncoding,
    pub(crate) algorithm: KeyAlgorithm,
    pub(crate) public_key: Vec<u8>,
}

impl PrivateKey {
    /// Decode an unencrypted private key whose encoding is not known in advance.
    ///
    /// Each of [KeyEncoding::DECODE_ORDER] is tried in turn. A single PEM block wrapping the DER is
    /// unwrapped first; its label is ignored.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let der = unarmor(raw)?;
        let mut unsupported = None;
        let mut last_error = String::from("empty input");

        for encoding in KeyEncoding::DECODE_ORDER {
            match encoding.try_decode(&der) {
                Ok(key) => {
                    debug!(?encoding, algorithm = ?key.algorithm, "decoded private key");
                    return Ok(key);
                }
                Err(Rejection::Unsupported(oid)) => {
                    trace!(?encoding, %oid, "unsupported key algorithm");
                    unsupported = Some(oid);
                }
                Err(Rejection::Malformed(reason)) => {
                    trace!(?encoding, %reason, "key encoding did not match");
                    last_error = reason;
                }
            }
        }

        match unsupported {
            Some(oid) => Err(Error::UnsupportedKeyAlgorithm(oid)),
            None => Err(Error::KeyDecode(last_error)),
        }
    }

    /// Decode a PKCS#8 key recovered from a keystore
    pub(crate) fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        KeyEncoding::Pkcs8.try_decode(der).map_err(|e| match e {
            Rejection::Malformed(reason) => Error::KeyDecode(reason),
            Rejection::Unsupported(oid) => Error::UnsupportedKeyAlgorithm(oid),
        })
    }

    fn from_rsa(
        key: &RsaPrivateKey,
        data: Zeroizing<Vec<u8>>,
        encoding: KeyEncoding,
    ) -> std::result::Result<Self, Rejection> {
        let public_key = key
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| Rejection::Malformed(e.to_string()))?;
        Ok(Self {
            data,
            encoding,
            algorithm: KeyAlgorithm::Rsa,
            public_key: public_key.as_bytes().to_vec(),
        })
    }

    /// Returns the private key in PKCS#8 DER-encoded format.
    pub fn as_der(&self) -> &[u8] {
        &self.data
    }

    /// Returns the encoding the key was detected in.
    pub fn encoding(&self) -> KeyEncoding {
        self.encoding
    }

    /// Returns the key algorithm.
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Returns the DER-encoded SubjectPublicKeyInfo of the matching public key.
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("data", &"<PKCS#8>")
            .field("encoding", &self.encoding)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

fn unarmor(raw: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if raw.trim_ascii_start().starts_with(b"-----BEGIN") {
        let block = pem::parse(raw).map_err(|e| Error::KeyDecode(format!("invalid PEM armor: {e}")))?;
        Ok(Zeroizing::new(block.into_contents()))
    } else {
        Ok(Zeroizing::new(raw.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use rsa::{RsaPrivateKey, pkcs1::EncodeRsaPrivateKey, pkcs8::EncodePrivateKey, rand_core::OsRng};

    use super::*;

    fn rsa_key() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut OsRng, 1024).unwrap()
    }

    #[test]
    fn test_decode_order_is_pkcs1_then_pkcs8() {
        assert_eq!(KeyEncoding::DECODE_ORDER, [KeyEncoding::Pkcs1, KeyEncoding::Pkcs8]);
    }

    #[test]
    fn test_decode_pkcs1_rsa() {
        let rsa = rsa_key();
        let der = rsa.to_pkcs1_der().unwrap();

        let key = PrivateKey::decode(der.as_bytes()).unwrap();
        assert_eq!(key.encoding(), KeyEncoding::Pkcs1);
        assert_eq!(key.algorithm(), KeyAlgorithm::Rsa);

        // canonical form is PKCS#8
        let reparsed = RsaPrivateKey::from_pkcs8_der(key.as_der()).unwrap();
        assert_eq!(reparsed, rsa);
        assert_eq!(
            key.public_key_der(),
            rsa.to_public_key().to_public_key_der().unwrap().as_bytes()
        );
    }

    #[test]
    fn test_decode_pkcs8_rsa_keeps_input_bytes() {
        let der = rsa_key().to_pkcs8_der().unwrap();

        let key = PrivateKey::decode(der.as_bytes()).unwrap();
        assert_eq!(key.encoding(), KeyEncoding::Pkcs8);
        assert_eq!(key.algorithm(), KeyAlgorithm::Rsa);
        assert_eq!(key.as_der(), der.as_bytes());
    }

    #[test]
    fn test_decode_pkcs8_p256() {
        let key_pair = rcgen::KeyPair::generate().unwrap();

        let key = PrivateKey::decode(&key_pair.serialize_der()).unwrap();
        assert_eq!(key.encoding(), KeyEncoding::Pkcs8);
        assert_eq!(key.algorithm(), KeyAlgorithm::EcdsaP256);
        assert!(key.public_key_der().ends_with(key_pair.public_key_raw()));
    }

    #[test]
    fn test_decode_pem_armored_key() {
        let key_pair = rcgen::KeyPair::generate().unwrap();

        let key = PrivateKey::decode(key_pair.serialize_pem().as_bytes()).unwrap();
        assert_eq!(key.as_der(), key_pair.serialize_der());
    }

    #[test]
    fn test_decode_unsupported_algorithm() {
        let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519).unwrap();

        match PrivateKey::decode(&key_pair.serialize_der()) {
            Err(Error::UnsupportedKeyAlgorithm(oid)) => assert_eq!(oid.to_string(), "1.3.101.112"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(PrivateKey::decode(b"not a key"), Err(Error::KeyDecode(_))));
        assert!(matches!(PrivateKey::decode(&[]), Err(Error::KeyDecode(_))));
    }

    #[test]
    fn test_debug_hides_key_material() {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let key = PrivateKey::decode(&key_pair.serialize_der()).unwrap();

        let debug = format!("{key:?}");
        assert!(debug.contains("<PKCS#8>"));
        assert!(!debug.contains(&format!("{:?}", key.as_der())));
    }
}
