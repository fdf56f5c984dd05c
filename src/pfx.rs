//!
//! PKCS#12 (PFX) encoding and decoding
//!
//! Layout of the produced authenticated safe:
//!
//! 1. encrypted safe with the leaf certificate bag
//! 2. plain safe with the shrouded private key bag
//! 3. encrypted safe with one certificate bag per CA certificate, in chain order. Only present when the
//!    CA chain is not empty
//!
//! The key and leaf bags are linked by a local key id, which is the SHA-1 of the leaf certificate.
//!
use cms::content_info::ContentInfo;
use der::{Any, Decode, Encode, asn1::OctetString, oid::ObjectIdentifier};
use pkcs12::{
    authenticated_safe::AuthenticatedSafe,
    pfx::{Pfx, Version},
};
use sha1::{Digest, Sha1};
use tracing::{debug, trace};

use crate::{
    LocalKeyId, Result,
    codec::{self, ParsedAuthSafe},
    error::{CodecError, CodecResult, Error},
    key::PrivateKey,
    oid,
    request::{DecodedKeystore, KeystoreEncoder, KeystoreFormat, KeystoreRequest},
};

/// Friendly name of the identity key and leaf certificate bags
pub const IDENTITY_FRIENDLY_NAME: &str = "certificate";

/// Encryption algorithm to use when creating the PKCS#12 file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum EncryptionAlgorithm {
    PbeWithHmacSha256AndAes256,
    PbeWithShaAnd40BitRc2Cbc,
    PbeWithShaAnd3KeyTripleDesCbc,
}

impl EncryptionAlgorithm {
    pub(crate) fn as_oid(&self) -> ObjectIdentifier {
        match self {
            EncryptionAlgorithm::PbeWithHmacSha256AndAes256 => oid::PBES2_OID,
            EncryptionAlgorithm::PbeWithShaAnd40BitRc2Cbc => oid::PBE_WITH_SHA_AND_40BIT_RC2_CBC_OID,
            EncryptionAlgorithm::PbeWithShaAnd3KeyTripleDesCbc => oid::PBE_WITH_SHA_AND3_KEY_TRIPLE_DES_CBC_OID,
        }
    }
}

/// MAC algorithm to use when creating the PKCS#12 file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum MacAlgorithm {
    HmacSha1,
    HmacSha256,
}

/// PKCS#12 encoder
#[derive(Debug, Clone)]
pub struct Pkcs12Encoder {
    encryption_algorithm: EncryptionAlgorithm,
    encryption_iterations: u64,
    mac_algorithm: MacAlgorithm,
    mac_iterations: u64,
}

impl Default for Pkcs12Encoder {
    // default values are taken from JVM java.security config file
    fn default() -> Self {
        Self {
            encryption_algorithm: EncryptionAlgorithm::PbeWithHmacSha256AndAes256,
            encryption_iterations: 10000,
            mac_algorithm: MacAlgorithm::HmacSha256,
            mac_iterations: 10000,
        }
    }
}

impl Pkcs12Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set encryption algorithm. Default is [EncryptionAlgorithm::PbeWithHmacSha256AndAes256]
    pub fn encryption_algorithm(mut self, algorithm: EncryptionAlgorithm) -> Self {
        self.encryption_algorithm = algorithm;
        self
    }

    /// Set encryption iterations. Default is 10000
    pub fn encryption_iterations(mut self, iterations: u64) -> Self {
        self.encryption_iterations = iterations;
        self
    }

    /// Set MAC algorithm. Default is [MacAlgorithm::HmacSha256]
    pub fn mac_algorithm(mut self, algorithm: MacAlgorithm) -> Self {
        self.mac_algorithm = algorithm;
        self
    }

    /// Set MAC iterations. Default is 10000
    pub fn mac_iterations(mut self, iterations: u64) -> Self {
        self.mac_iterations = iterations;
        self
    }

    fn write(&self, request: &KeystoreRequest) -> CodecResult<Vec<u8>> {
        request.check_identity()?;

        let password = request.password();
        let local_key_id = LocalKeyId::from(Sha1::digest(request.leaf().as_der()).to_vec());

        let leaf_bag = codec::certificate_to_safe_bag(request.leaf(), IDENTITY_FRIENDLY_NAME, Some(&local_key_id))?;
        let key_bag = codec::private_key_to_safe_bag(
            request.key().as_der(),
            &local_key_id,
            IDENTITY_FRIENDLY_NAME,
            self.encryption_algorithm,
            self.encryption_iterations,
            password,
        )?;

        let mut safes = vec![
            codec::cert_bags_to_auth_safe(
                vec![leaf_bag],
                self.encryption_algorithm,
                self.encryption_iterations,
                password,
            )?,
            codec::key_bags_to_auth_safe(vec![key_bag])?,
        ];

        if !request.chain().is_empty() {
            let ca_bags = request
                .chain()
                .iter()
                .map(|cert| codec::certificate_to_safe_bag(cert, cert.subject(), None))
                .collect::<CodecResult<Vec<_>>>()?;

            safes.push(codec::cert_bags_to_auth_safe(
                ca_bags,
                self.encryption_algorithm,
                self.encryption_iterations,
                password,
            )?);
        }

        let safe_bags = OctetString::new(safes.to_der()?)?;
        let auth_safe = ContentInfo {
            content_type: oid::CONTENT_TYPE_DATA_OID,
            content: Any::from_der(&safe_bags.to_der()?)?,
        };

        let mac_data = codec::compute_mac(
            auth_safe.content.value(),
            self.mac_algorithm,
            self.mac_iterations,
            password,
        )?;

        let pfx = Pfx {
            version: Version::V3,
            auth_safe,
            mac_data: Some(mac_data),
        };

        let data = pfx.to_der()?;

        debug!(
            local_key_id = ?local_key_id,
            chain_len = request.chain().len(),
            size = data.len(),
            "wrote PKCS#12 keystore"
        );

        Ok(data)
    }
}

impl KeystoreEncoder for Pkcs12Encoder {
    fn format(&self) -> KeystoreFormat {
        KeystoreFormat::Pkcs12
    }

    fn encode(&self, request: &KeystoreRequest) -> Result<Vec<u8>> {
        self.write(request).map_err(|source| Error::KeystoreEncode {
            format: KeystoreFormat::Pkcs12,
            source,
        })
    }
}

/// Read back the identity and CA chain of a PKCS#12 file.
///
/// The MAC is verified before anything is decrypted. The identity is the first key bag, preferring the
/// one named [IDENTITY_FRIENDLY_NAME], and its leaf is the certificate bag with the same local key id.
/// All other certificate bags form the CA chain in file order; it is `None` when there are none.
pub fn decode(data: &[u8], password: &str) -> Result<DecodedKeystore> {
    read(data, password).map_err(|source| Error::KeystoreDecode {
        format: KeystoreFormat::Pkcs12,
        source,
    })
}

fn read(data: &[u8], password: &str) -> CodecResult<DecodedKeystore> {
    let pfx = Pfx::from_der(data)?;

    if pfx.version != Version::V3 {
        return Err(CodecError::InvalidVersion);
    }

    if let Some(mac_data) = pfx.mac_data {
        codec::verify_mac(&mac_data, password, pfx.auth_safe.content.value())?;
    }

    let safes: AuthenticatedSafe = if pfx.auth_safe.content_type == oid::CONTENT_TYPE_DATA_OID {
        AuthenticatedSafe::from_der(&OctetString::from_der(&pfx.auth_safe.content.to_der()?)?.into_bytes())?
    } else {
        return Err(CodecError::UnsupportedContentType);
    };

    let mut parsed = ParsedAuthSafe::default();
    for safe in safes.iter() {
        codec::parse_auth_safe(safe, password, &mut parsed)?;
    }

    let ParsedAuthSafe { mut keys, mut certs } = parsed;

    let position = keys
        .iter()
        .position(|k| k.friendly_name.as_deref() == Some(IDENTITY_FRIENDLY_NAME))
        .or_else(|| (!keys.is_empty()).then_some(0))
        .ok_or(CodecError::MissingIdentity)?;
    let identity = keys.swap_remove(position);
    let local_key_id = identity.local_key_id.as_deref().ok_or(CodecError::MissingIdentity)?;

    let leaf_position = certs
        .iter()
        .position(|c| c.local_key_id.as_deref() == Some(local_key_id))
        .ok_or(CodecError::MissingIdentity)?;
    let leaf = certs.remove(leaf_position);

    trace!(
        leaf = leaf.friendly_name.as_deref().unwrap_or_default(),
        ca_certs = certs.len(),
        "parsed PKCS#12 bags"
    );

    let ca_chain = if certs.is_empty() {
        None
    } else {
        Some(certs.into_iter().map(|c| c.cert).collect())
    };

    Ok(DecodedKeystore {
        key: PrivateKey::from_pkcs8_der(&identity.key).map_err(|_| CodecError::InvalidPrivateKey)?,
        leaf: leaf.cert,
        ca_chain,
    })
}
