//!
//! Java KeyStore (JKS, version 2) encoding and decoding
//!
//! The identity is stored as a private key entry named [IDENTITY_ALIAS] whose certificate chain is the
//! leaf followed by the CA chain. When the CA chain is not empty, its trust anchor (the last, most
//! root-ward certificate) is also stored as a trusted certificate entry named [CA_ALIAS].
//!
//! cert-manager's JKS writer stores the first certificate of the supplied CA bundle under `ca` instead,
//! and writes no `ca` entry when only the leaf bundle carries intermediates.
//!
use std::io::{Read, Write};

use cms::cert::x509::spki::AlgorithmIdentifierOwned;
use der::{
    Any, Decode, Encode,
    asn1::{Null, OctetString},
};
use pkcs12::pbe_params::EncryptedPrivateKeyInfo;
use rand::random;
use sha1::{Digest, Sha1};
use tracing::debug;
use zeroize::Zeroizing;

use crate::{
    Result,
    cert::Certificate,
    error::{CodecError, CodecResult, Error},
    key::PrivateKey,
    oid,
    request::{DecodedKeystore, KeystoreEncoder, KeystoreFormat, KeystoreRequest},
};

/// Alias of the private key entry
pub const IDENTITY_ALIAS: &str = "certificate";
/// Alias of the trusted certificate entry
pub const CA_ALIAS: &str = "ca";

const MAGIC: u32 = 0xFEED_FEED;
const VERSION: u32 = 2;
const TAG_PRIVATE_KEY: u32 = 1;
const TAG_TRUSTED_CERT: u32 = 2;
const CERT_TYPE: &str = "X.509";
const WHITENER: &[u8] = b"Mighty Aphrodite";
const DIGEST_LEN: usize = 20;

/// JKS encoder.
///
/// Entry creation dates default to the leaf certificate's notBefore, which keeps the output a function of
/// the inputs. Only the key protection salt is random.
#[derive(Debug, Clone, Default)]
pub struct JksEncoder {
    creation_time: Option<i64>,
}

impl JksEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set entry creation time in milliseconds since the Unix epoch
    pub fn creation_time(mut self, millis: i64) -> Self {
        self.creation_time = Some(millis);
        self
    }

    fn write(&self, request: &KeystoreRequest) -> CodecResult<Vec<u8>> {
        if request.password().is_empty() {
            return Err(CodecError::EmptyPassword);
        }
        request.check_identity()?;

        let password = password_bytes(request.password());
        let timestamp = self
            .creation_time
            .unwrap_or_else(|| request.leaf().not_before().saturating_mul(1000));
        let anchor = request.chain().last();

        let mut buf = Vec::new();
        write_u32(&mut buf, MAGIC)?;
        write_u32(&mut buf, VERSION)?;
        write_u32(&mut buf, if anchor.is_some() { 2 } else { 1 })?;

        write_u32(&mut buf, TAG_PRIVATE_KEY)?;
        write_utf(&mut buf, IDENTITY_ALIAS)?;
        write_i64(&mut buf, timestamp)?;
        write_bytes(&mut buf, &protect_key(request.key().as_der(), &password)?)?;

        write_u32(&mut buf, len_u32(1 + request.chain().len())?)?;
        for cert in std::iter::once(request.leaf()).chain(request.chain()) {
            write_utf(&mut buf, CERT_TYPE)?;
            write_bytes(&mut buf, cert.as_der())?;
        }

        if let Some(anchor) = anchor {
            write_u32(&mut buf, TAG_TRUSTED_CERT)?;
            write_utf(&mut buf, CA_ALIAS)?;
            write_i64(&mut buf, timestamp)?;
            write_utf(&mut buf, CERT_TYPE)?;
            write_bytes(&mut buf, anchor.as_der())?;
        }

        let digest = integrity_digest(&password, &buf);
        buf.extend_from_slice(&digest);

        debug!(chain_len = request.chain().len(), size = buf.len(), "wrote JKS keystore");

        Ok(buf)
    }
}

impl KeystoreEncoder for JksEncoder {
    fn format(&self) -> KeystoreFormat {
        KeystoreFormat::Jks
    }

    fn encode(&self, request: &KeystoreRequest) -> Result<Vec<u8>> {
        self.write(request).map_err(|source| Error::KeystoreEncode {
            format: KeystoreFormat::Jks,
            source,
        })
    }
}

/// Private key entry read from a JKS file
#[derive(Debug, Clone)]
pub struct JksPrivateKeyEntry {
    pub alias: String,
    pub timestamp: i64,
    pub key: PrivateKey,
    pub certs: Vec<Certificate>,
}

/// Trusted certificate entry read from a JKS file
#[derive(Debug, Clone)]
pub struct JksTrustedCertEntry {
    pub alias: String,
    pub timestamp: i64,
    pub cert: Certificate,
}

/// All entries of a JKS file, in file order
#[derive(Debug, Clone, Default)]
pub struct JksKeystore {
    pub private_keys: Vec<JksPrivateKeyEntry>,
    pub trusted_certs: Vec<JksTrustedCertEntry>,
}

impl JksKeystore {
    /// Parse a JKS file, verifying the store integrity digest and every key check value
    pub fn from_jks(data: &[u8], password: &str) -> Result<Self> {
        Self::read(data, password).map_err(|source| Error::KeystoreDecode {
            format: KeystoreFormat::Jks,
            source,
        })
    }

    /// Get a trusted certificate entry by alias
    pub fn trusted_cert(&self, alias: &str) -> Option<&JksTrustedCertEntry> {
        self.trusted_certs.iter().find(|e| e.alias == alias)
    }

    fn read(data: &[u8], password: &str) -> CodecResult<Self> {
        if data.len() < 12 + DIGEST_LEN {
            return Err(CodecError::InvalidLength);
        }

        let password = password_bytes(password);
        let (body, digest) = data.split_at(data.len() - DIGEST_LEN);
        if integrity_digest(&password, body).as_slice() != digest {
            return Err(CodecError::IntegrityCheckFailed);
        }

        let mut cursor = body;
        if read_u32(&mut cursor)? != MAGIC {
            return Err(CodecError::InvalidMagic);
        }
        if read_u32(&mut cursor)? != VERSION {
            return Err(CodecError::InvalidVersion);
        }

        let mut keystore = Self::default();

        for _ in 0..read_u32(&mut cursor)? {
            match read_u32(&mut cursor)? {
                TAG_PRIVATE_KEY => {
                    let alias = read_utf(&mut cursor)?;
                    let timestamp = read_i64(&mut cursor)?;
                    let plain = unprotect_key(&read_bytes(&mut cursor)?, &password)?;
                    let key = PrivateKey::from_pkcs8_der(&plain).map_err(|_| CodecError::InvalidPrivateKey)?;

                    let count = read_u32(&mut cursor)?;
                    let mut certs = Vec::new();
                    for _ in 0..count {
                        certs.push(read_certificate(&mut cursor)?);
                    }

                    keystore.private_keys.push(JksPrivateKeyEntry {
                        alias,
                        timestamp,
                        key,
                        certs,
                    });
                }
                TAG_TRUSTED_CERT => {
                    let alias = read_utf(&mut cursor)?;
                    let timestamp = read_i64(&mut cursor)?;
                    let cert = read_certificate(&mut cursor)?;
                    keystore.trusted_certs.push(JksTrustedCertEntry { alias, timestamp, cert });
                }
                tag => return Err(CodecError::UnsupportedEntryTag(tag)),
            }
        }

        Ok(keystore)
    }
}

/// Read back the identity and CA chain of a JKS file.
///
/// The CA chain is taken from the identity's certificate chain. It is `None` when the identity carries
/// only its leaf and no [CA_ALIAS] entry exists.
pub fn decode(data: &[u8], password: &str) -> Result<DecodedKeystore> {
    let mut keystore = JksKeystore::from_jks(data, password)?;
    let missing_identity = || Error::KeystoreDecode {
        format: KeystoreFormat::Jks,
        source: CodecError::MissingIdentity,
    };

    let position = keystore
        .private_keys
        .iter()
        .position(|e| e.alias == IDENTITY_ALIAS)
        .or_else(|| (!keystore.private_keys.is_empty()).then_some(0))
        .ok_or_else(missing_identity)?;
    let identity = keystore.private_keys.swap_remove(position);

    let mut certs = identity.certs.into_iter();
    let leaf = certs.next().ok_or_else(missing_identity)?;
    let ca_chain: Vec<Certificate> = certs.collect();

    let ca_chain = if !ca_chain.is_empty() {
        Some(ca_chain)
    } else {
        keystore.trusted_cert(CA_ALIAS).map(|e| vec![e.cert.clone()])
    };

    Ok(DecodedKeystore {
        key: identity.key,
        leaf,
        ca_chain,
    })
}

// JVM passwords are char arrays, hashed as UTF-16BE
fn password_bytes(password: &str) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(password.encode_utf16().flat_map(u16::to_be_bytes).collect())
}

fn integrity_digest(password: &[u8], body: &[u8]) -> [u8; DIGEST_LEN] {
    Sha1::new()
        .chain_update(password)
        .chain_update(WHITENER)
        .chain_update(body)
        .finalize()
        .into()
}

// Sun KeyProtector: XOR with a SHA-1 chain seeded by the salt, followed by a SHA-1 check value
fn apply_keystream(password: &[u8], salt: &[u8; DIGEST_LEN], data: &mut [u8]) {
    let mut block = *salt;
    for chunk in data.chunks_mut(DIGEST_LEN) {
        block = Sha1::new().chain_update(password).chain_update(block).finalize().into();
        chunk.iter_mut().zip(block.iter()).for_each(|(b, k)| *b ^= k);
    }
}

fn key_check(password: &[u8], plain: &[u8]) -> [u8; DIGEST_LEN] {
    Sha1::new().chain_update(password).chain_update(plain).finalize().into()
}

fn protect_key(plain: &[u8], password: &[u8]) -> CodecResult<Vec<u8>> {
    let salt: [u8; DIGEST_LEN] = random();

    let mut protected = Vec::with_capacity(plain.len() + 2 * DIGEST_LEN);
    protected.extend_from_slice(&salt);
    protected.extend_from_slice(plain);
    apply_keystream(password, &salt, &mut protected[DIGEST_LEN..]);
    protected.extend_from_slice(&key_check(password, plain));

    let info = EncryptedPrivateKeyInfo {
        encryption_algorithm: AlgorithmIdentifierOwned {
            oid: oid::SUN_JKS_KEY_PROTECTOR_OID,
            parameters: Some(Any::from_der(&Null.to_der()?)?),
        },
        encrypted_data: OctetString::new(protected)?,
    };

    Ok(info.to_der()?)
}

fn unprotect_key(data: &[u8], password: &[u8]) -> CodecResult<Zeroizing<Vec<u8>>> {
    let info = EncryptedPrivateKeyInfo::from_der(data)?;
    if info.encryption_algorithm.oid != oid::SUN_JKS_KEY_PROTECTOR_OID {
        return Err(CodecError::UnsupportedEncryptionScheme);
    }

    let protected = info.encrypted_data.as_bytes();
    if protected.len() < 2 * DIGEST_LEN {
        return Err(CodecError::InvalidLength);
    }

    let (salt, rest) = protected.split_at(DIGEST_LEN);
    let (encrypted, check) = rest.split_at(rest.len() - DIGEST_LEN);
    let salt: &[u8; DIGEST_LEN] = salt.try_into().map_err(|_| CodecError::InvalidLength)?;

    let mut plain = Zeroizing::new(encrypted.to_vec());
    apply_keystream(password, salt, &mut plain);

    if key_check(password, &plain).as_slice() != check {
        return Err(CodecError::DecryptionCheckFailed);
    }

    Ok(plain)
}

fn len_u32(len: usize) -> CodecResult<u32> {
    u32::try_from(len).map_err(|_| CodecError::InvalidLength)
}

fn write_u32(w: &mut Vec<u8>, value: u32) -> CodecResult<()> {
    w.write_all(&value.to_be_bytes())?;
    Ok(())
}

fn write_i64(w: &mut Vec<u8>, value: i64) -> CodecResult<()> {
    w.write_all(&value.to_be_bytes())?;
    Ok(())
}

fn write_utf(w: &mut Vec<u8>, value: &str) -> CodecResult<()> {
    let len = u16::try_from(value.len()).map_err(|_| CodecError::InvalidLength)?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(value.as_bytes())?;
    Ok(())
}

fn write_bytes(w: &mut Vec<u8>, data: &[u8]) -> CodecResult<()> {
    write_u32(w, len_u32(data.len())?)?;
    w.write_all(data)?;
    Ok(())
}

fn read_u32(r: &mut &[u8]) -> CodecResult<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_i64(r: &mut &[u8]) -> CodecResult<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

fn read_utf(r: &mut &[u8]) -> CodecResult<String> {
    let mut len = [0u8; 2];
    r.read_exact(&mut len)?;
    let mut buf = vec![0u8; u16::from_be_bytes(len) as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| CodecError::InvalidData)
}

fn read_bytes(r: &mut &[u8]) -> CodecResult<Vec<u8>> {
    let len = read_u32(r)? as usize;
    if len > r.len() {
        return Err(CodecError::InvalidLength);
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_certificate(r: &mut &[u8]) -> CodecResult<Certificate> {
    if read_utf(r)? != CERT_TYPE {
        return Err(CodecError::UnsupportedCertificateType);
    }
    Certificate::from_der(&read_bytes(r)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWORD: &[u8] = b"\0c\0h\0a\0n\0g\0e\0i\0t";

    #[test]
    fn test_password_is_utf16_big_endian() {
        assert_eq!(password_bytes("changeit").as_slice(), PASSWORD);
        assert_eq!(password_bytes("\u{e9}").as_slice(), &[0x00, 0xe9]);
    }

    #[test]
    fn test_key_protection_round_trip() {
        let plain = (0u8..=100).collect::<Vec<_>>();

        let protected = protect_key(&plain, PASSWORD).unwrap();
        let info = EncryptedPrivateKeyInfo::from_der(&protected).unwrap();
        assert_eq!(info.encryption_algorithm.oid, oid::SUN_JKS_KEY_PROTECTOR_OID);
        assert_eq!(info.encrypted_data.as_bytes().len(), plain.len() + 2 * DIGEST_LEN);

        assert_eq!(unprotect_key(&protected, PASSWORD).unwrap().as_slice(), plain.as_slice());
    }

    #[test]
    fn test_key_protection_uses_random_salt() {
        let plain = [7u8; 32];

        assert_ne!(protect_key(&plain, PASSWORD).unwrap(), protect_key(&plain, PASSWORD).unwrap());
    }

    #[test]
    fn test_key_protection_wrong_password() {
        let protected = protect_key(&[1, 2, 3], PASSWORD).unwrap();

        assert!(matches!(
            unprotect_key(&protected, &password_bytes("wrong")),
            Err(CodecError::DecryptionCheckFailed)
        ));
    }

    #[test]
    fn test_read_rejects_truncated_store() {
        assert!(matches!(
            JksKeystore::read(&MAGIC.to_be_bytes(), "changeit"),
            Err(CodecError::InvalidLength)
        ));
    }

    #[test]
    fn test_read_rejects_bad_magic() {
        let mut body = Vec::new();
        write_u32(&mut body, 0xCECE_CECE).unwrap();
        write_u32(&mut body, VERSION).unwrap();
        write_u32(&mut body, 0).unwrap();
        let digest = integrity_digest(PASSWORD, &body);
        body.extend_from_slice(&digest);

        assert!(matches!(JksKeystore::read(&body, "changeit"), Err(CodecError::InvalidMagic)));
    }

    #[test]
    fn test_read_empty_store() {
        let mut body = Vec::new();
        write_u32(&mut body, MAGIC).unwrap();
        write_u32(&mut body, VERSION).unwrap();
        write_u32(&mut body, 0).unwrap();
        let digest = integrity_digest(PASSWORD, &body);
        body.extend_from_slice(&digest);

        let keystore = JksKeystore::read(&body, "changeit").unwrap();
        assert!(keystore.private_keys.is_empty());
        assert!(keystore.trusted_certs.is_empty());
    }
}
