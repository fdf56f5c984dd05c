//!
//! PKCS#12 safe bags, password-based encryption and MAC
//!
use cms::{
    cert::x509::{
        attr::{Attribute, AttributeValue, Attributes},
        spki::AlgorithmIdentifierOwned,
    },
    content_info::{CmsVersion, ContentInfo},
    encrypted_data::EncryptedData,
    enveloped_data::EncryptedContentInfo,
};
use der::{
    Any, Decode, Encode,
    asn1::{BmpString, ContextSpecific, ObjectIdentifier, OctetString, OctetStringRef, SetOfVec},
};
use hmac::{Mac, digest::Digest};
use pkcs5::pbes2;
use pkcs12::{
    cert_type::CertBag,
    digest_info::DigestInfo,
    kdf,
    mac_data::MacData,
    pbe_params::EncryptedPrivateKeyInfo,
    safe_bag::{SafeBag, SafeContents},
};
use rand::random;
use sha1::Sha1;
use sha2::Sha256;
use zeroize::Zeroizing;
#[cfg(feature = "pbes1")]
use {
    crate::pbes1::{PbeMode, Pbes1},
    der::{Reader, SliceReader, SliceWriter},
};

use crate::{
    LocalKeyId,
    cert::Certificate,
    error::{CodecError, CodecResult},
    oid,
    pfx::{EncryptionAlgorithm, MacAlgorithm},
};

pub struct ParsedKey {
    pub friendly_name: Option<String>,
    pub local_key_id: Option<Vec<u8>>,
    pub key: Zeroizing<Vec<u8>>,
}

pub struct ParsedCertificate {
    pub friendly_name: Option<String>,
    pub local_key_id: Option<Vec<u8>>,
    pub cert: Certificate,
}

#[derive(Default)]
pub struct ParsedAuthSafe {
    pub keys: Vec<ParsedKey>,
    pub certs: Vec<ParsedCertificate>,
}

pub fn verify_mac(mac_data: &MacData, password: &str, data: &[u8]) -> CodecResult<()> {
    match mac_data.mac.algorithm.oid {
        oid::SHA1_OID => {
            let key = kdf::derive_key_utf8::<Sha1>(
                password,
                mac_data.mac_salt.as_bytes(),
                kdf::Pkcs12KeyType::Mac,
                mac_data.iterations as _,
                Sha1::output_size(),
            )?;
            let mut hmac = hmac::Hmac::<Sha1>::new_from_slice(&key).map_err(|_| CodecError::InvalidLength)?;
            hmac.update(data);
            hmac.verify_slice(mac_data.mac.digest.as_bytes())?;
            Ok(())
        }
        oid::SHA256_OID => {
            let key = kdf::derive_key_utf8::<Sha256>(
                password,
                mac_data.mac_salt.as_bytes(),
                kdf::Pkcs12KeyType::Mac,
                mac_data.iterations as _,
                Sha256::output_size(),
            )?;
            let mut hmac = hmac::Hmac::<Sha256>::new_from_slice(&key).map_err(|_| CodecError::InvalidLength)?;
            hmac.update(data);
            hmac.verify_slice(mac_data.mac.digest.as_bytes())?;
            Ok(())
        }
        _ => Err(CodecError::UnsupportedMacAlgorithm),
    }
}

pub fn parse_auth_safe(safe: &ContentInfo, password: &str, parsed: &mut ParsedAuthSafe) -> CodecResult<()> {
    let data = match safe.content_type {
        oid::CONTENT_TYPE_DATA_OID => OctetString::from_der(&safe.content.to_der()?)?.as_bytes().to_vec(),
        oid::CONTENT_TYPE_ENCRYPTED_DATA_OID => {
            let enc_data = EncryptedData::from_der(&safe.content.to_der()?)?;
            if enc_data.version != CmsVersion::V0 {
                return Err(CodecError::InvalidVersion);
            }
            if let Some(data) = enc_data
                .enc_content_info
                .encrypted_content
                .as_ref()
                .map(|os| os.as_bytes())
            {
                decrypt(&enc_data.enc_content_info.content_enc_alg, data, password)?
            } else {
                Vec::new()
            }
        }
        _ => {
            return Err(CodecError::UnsupportedContentType);
        }
    };

    parse_bags(SafeContents::from_der(&data)?, password, parsed)
}

fn decrypt(alg: &AlgorithmIdentifierOwned, data: &[u8], password: &str) -> CodecResult<Vec<u8>> {
    match alg.oid {
        oid::PBES2_OID => {
            let params = alg.parameters.as_ref().ok_or(CodecError::InvalidParameters)?.to_der()?;

            let params = pbes2::Parameters::from_der(&params)?;

            params
                .decrypt(password.as_bytes(), data)
                .map_err(|e| CodecError::Pkcs5Error(format!("{e}")))
        }
        #[cfg(feature = "pbes1")]
        oid::PBE_WITH_SHA_AND_40BIT_RC2_CBC_OID | oid::PBE_WITH_SHA_AND3_KEY_TRIPLE_DES_CBC_OID => {
            let params = alg.parameters.as_ref().ok_or(CodecError::InvalidParameters)?.to_der()?;

            let mut reader = SliceReader::new(&params)?;
            let (salt, iterations) = reader.sequence(|reader| {
                let salt = OctetString::decode(reader)?.as_bytes().to_vec();
                let iterations: u64 = reader.decode()?;
                Ok((salt, iterations))
            })?;

            Pbes1::new(alg.oid, &salt, iterations, PbeMode::Decrypt).encrypt_decrypt(data, password)
        }
        _ => Err(CodecError::UnsupportedEncryptionScheme),
    }
}

fn encrypt(
    alg: EncryptionAlgorithm,
    iterations: u64,
    data: &[u8],
    password: &str,
) -> CodecResult<(AlgorithmIdentifierOwned, Vec<u8>)> {
    match alg {
        EncryptionAlgorithm::PbeWithHmacSha256AndAes256 => {
            let salt: [u8; 32] = random();
            let iv: [u8; 16] = random();
            let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(iterations as _, &salt, &iv)
                .map_err(|e| CodecError::Pkcs5Error(e.to_string()))?;

            let encrypted = params
                .encrypt(password.as_bytes(), data)
                .map_err(|e| CodecError::Pkcs5Error(format!("{e}")))?;

            let alg_id = AlgorithmIdentifierOwned {
                oid: alg.as_oid(),
                parameters: Some(Any::from_der(&params.to_der()?)?),
            };

            Ok((alg_id, encrypted))
        }
        #[cfg(feature = "pbes1")]
        EncryptionAlgorithm::PbeWithShaAnd40BitRc2Cbc | EncryptionAlgorithm::PbeWithShaAnd3KeyTripleDesCbc => {
            let salt: [u8; 20] = random();
            let encrypted =
                Pbes1::new(alg.as_oid(), &salt, iterations, PbeMode::Encrypt).encrypt_decrypt(data, password)?;

            let mut buf = vec![0u8; 64];
            let mut writer = SliceWriter::new(&mut buf);
            let salt = OctetStringRef::new(&salt)?;

            writer.sequence((salt.encoded_len()? + iterations.encoded_len()?)?, |writer| {
                salt.encode(writer)?;
                iterations.encode(writer)?;
                Ok(())
            })?;
            let params = writer.finish()?;

            let alg_id = AlgorithmIdentifierOwned {
                oid: alg.as_oid(),
                parameters: Some(Any::from_der(params)?),
            };
            Ok((alg_id, encrypted))
        }
        #[cfg(not(feature = "pbes1"))]
        _ => Err(CodecError::UnsupportedEncryptionScheme),
    }
}

fn get_bag_attribute(oid: &ObjectIdentifier, bag: &SafeBag) -> Option<Vec<u8>> {
    if let Some(ref attrs) = bag.bag_attributes {
        attrs.iter().find_map(|a| {
            if a.oid == *oid {
                a.values.iter().next().and_then(|a| a.to_der().ok())
            } else {
                None
            }
        })
    } else {
        None
    }
}

fn parse_bags(bags: SafeContents, password: &str, parsed: &mut ParsedAuthSafe) -> CodecResult<()> {
    for bag in bags {
        let local_key_id = get_bag_attribute(&oid::LOCAL_KEY_ID_OID, &bag)
            .and_then(|a| OctetString::from_der(&a).ok().map(|a| a.as_bytes().to_vec()));

        let friendly_name = get_bag_attribute(&oid::FRIENDLY_NAME_OID, &bag)
            .and_then(|n| BmpString::from_der(&n).ok().map(|a| a.to_string()));

        match bag.bag_id {
            oid::PKCS_12_CERT_BAG_OID => {
                let cs: ContextSpecific<CertBag> = ContextSpecific::from_der(&bag.bag_value)?;
                if cs.value.cert_id != oid::CERT_TYPE_X509_CERTIFICATE_OID {
                    return Err(CodecError::UnsupportedCertificateType);
                }
                let cert = Certificate::from_der(cs.value.cert_value.as_bytes())?;
                parsed.certs.push(ParsedCertificate {
                    friendly_name,
                    local_key_id,
                    cert,
                });
            }
            oid::PKCS_12_PKCS8_SHROUDED_KEY_BAG_OID => {
                let cs: ContextSpecific<EncryptedPrivateKeyInfo> = ContextSpecific::from_der(&bag.bag_value)?;

                let decrypted = decrypt(
                    &cs.value.encryption_algorithm,
                    cs.value.encrypted_data.as_bytes(),
                    password,
                )?;

                parsed.keys.push(ParsedKey {
                    friendly_name,
                    local_key_id,
                    key: Zeroizing::new(decrypted),
                });
            }
            _ => {}
        }
    }

    Ok(())
}

fn bag_attributes(friendly_name: &str, local_key_id: Option<&[u8]>) -> CodecResult<Attributes> {
    let mut bag_attributes = Attributes::new();

    let friendly_name =
        SetOfVec::<AttributeValue>::from_iter([Any::from_der(&BmpString::from_utf8(friendly_name)?.to_der()?)?])?;

    bag_attributes.insert(Attribute {
        oid: oid::FRIENDLY_NAME_OID,
        values: friendly_name,
    })?;

    if let Some(local_key_id) = local_key_id {
        let local_key_id =
            SetOfVec::<AttributeValue>::from_iter([Any::from_der(&OctetStringRef::new(local_key_id)?.to_der()?)?])?;

        bag_attributes.insert(Attribute {
            oid: oid::LOCAL_KEY_ID_OID,
            values: local_key_id,
        })?;
    }

    Ok(bag_attributes)
}

pub fn certificate_to_safe_bag(
    certificate: &Certificate,
    friendly_name: &str,
    local_key_id: Option<&LocalKeyId>,
) -> CodecResult<SafeBag> {
    let cert_bag = CertBag {
        cert_id: oid::CERT_TYPE_X509_CERTIFICATE_OID,
        cert_value: OctetString::new(certificate.data.clone())?,
    };
    Ok(SafeBag {
        bag_id: oid::PKCS_12_CERT_BAG_OID,
        bag_value: cert_bag.to_der()?,
        bag_attributes: Some(bag_attributes(friendly_name, local_key_id.map(|id| id.as_ref()))?),
    })
}

pub fn private_key_to_safe_bag(
    key_der: &[u8],
    local_key_id: &LocalKeyId,
    friendly_name: &str,
    algorithm: EncryptionAlgorithm,
    iterations: u64,
    password: &str,
) -> CodecResult<SafeBag> {
    let (alg_id, encrypted) = encrypt(algorithm, iterations, key_der, password)?;

    let pk_info = EncryptedPrivateKeyInfo {
        encryption_algorithm: alg_id,
        encrypted_data: OctetString::new(encrypted)?,
    }
    .to_der()?;

    Ok(SafeBag {
        bag_id: oid::PKCS_12_PKCS8_SHROUDED_KEY_BAG_OID,
        bag_value: pk_info,
        bag_attributes: Some(bag_attributes(friendly_name, Some(local_key_id.as_ref()))?),
    })
}

pub fn cert_bags_to_auth_safe(
    bags: Vec<SafeBag>,
    algorithm: EncryptionAlgorithm,
    iterations: u64,
    password: &str,
) -> CodecResult<ContentInfo> {
    let data = bags.to_der()?;
    let (alg_id, encrypted) = encrypt(algorithm, iterations, &data, password)?;

    let encrypted_data = EncryptedData {
        version: CmsVersion::V0,
        enc_content_info: EncryptedContentInfo {
            content_type: oid::CONTENT_TYPE_DATA_OID,
            content_enc_alg: alg_id,
            encrypted_content: Some(OctetString::new(encrypted)?),
        },
        unprotected_attrs: None,
    };

    Ok(ContentInfo {
        content_type: oid::CONTENT_TYPE_ENCRYPTED_DATA_OID,
        content: Any::from_der(&encrypted_data.to_der()?)?,
    })
}

pub fn key_bags_to_auth_safe(bags: Vec<SafeBag>) -> CodecResult<ContentInfo> {
    Ok(ContentInfo {
        content_type: oid::CONTENT_TYPE_DATA_OID,
        content: Any::from_der(&OctetString::new(bags.to_der()?)?.to_der()?)?,
    })
}

pub fn compute_mac(data: &[u8], algorithm: MacAlgorithm, iterations: u64, password: &str) -> CodecResult<MacData> {
    let (oid, salt, digest) = match algorithm {
        MacAlgorithm::HmacSha1 => {
            let salt: [u8; 20] = random();
            let key = kdf::derive_key_utf8::<Sha1>(
                password,
                &salt,
                kdf::Pkcs12KeyType::Mac,
                iterations as _,
                Sha1::output_size(),
            )?;
            let mut hmac = hmac::Hmac::<Sha1>::new_from_slice(&key).map_err(|_| CodecError::InvalidLength)?;
            hmac.update(data);
            (oid::SHA1_OID, salt.to_vec(), hmac.finalize().into_bytes().to_vec())
        }
        MacAlgorithm::HmacSha256 => {
            let salt: [u8; 32] = random();
            let key = kdf::derive_key_utf8::<Sha256>(
                password,
                &salt,
                kdf::Pkcs12KeyType::Mac,
                iterations as _,
                Sha256::output_size(),
            )?;
            let mut hmac = hmac::Hmac::<Sha256>::new_from_slice(&key).map_err(|_| CodecError::InvalidLength)?;
            hmac.update(data);
            (oid::SHA256_OID, salt.to_vec(), hmac.finalize().into_bytes().to_vec())
        }
    };

    Ok(MacData {
        mac: DigestInfo {
            algorithm: AlgorithmIdentifierOwned { oid, parameters: None },
            digest: OctetString::new(digest)?,
        },
        mac_salt: OctetString::new(salt)?,
        iterations: iterations as _,
    })
}

#[cfg(test)]
mod tests {
    use der::{Decode, Encode};
    use pkcs12::safe_bag::SafeBag;

    use super::*;

    const PASSWORD: &str = "changeit";

    fn certificate() -> Certificate {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec!["bag.example.com".to_owned()]).unwrap();
        Certificate::from_der(params.self_signed(&key_pair).unwrap().der()).unwrap()
    }

    #[test]
    fn test_certificate_bag_attributes() {
        let cert = certificate();
        let local_key_id = LocalKeyId::from(vec![1, 2, 3]);

        let bag = certificate_to_safe_bag(&cert, "certificate", Some(&local_key_id)).unwrap();
        let bag = SafeBag::from_der(&bag.to_der().unwrap()).unwrap();

        let mut parsed = ParsedAuthSafe::default();
        parse_bags(vec![bag], PASSWORD, &mut parsed).unwrap();

        assert_eq!(parsed.certs.len(), 1);
        assert_eq!(parsed.certs[0].friendly_name.as_deref(), Some("certificate"));
        assert_eq!(parsed.certs[0].local_key_id.as_deref(), Some(&[1u8, 2, 3][..]));
        assert_eq!(parsed.certs[0].cert, cert);
    }

    #[test]
    fn test_ca_bag_has_no_local_key_id() {
        let cert = certificate();

        let bag = certificate_to_safe_bag(&cert, cert.subject(), None).unwrap();

        let mut parsed = ParsedAuthSafe::default();
        parse_bags(vec![bag], PASSWORD, &mut parsed).unwrap();
        assert!(parsed.certs[0].local_key_id.is_none());
    }

    #[test]
    fn test_key_bag_round_trip() {
        let key = b"not really a PKCS#8 key, but the bag does not care".to_vec();
        let local_key_id = LocalKeyId::from(vec![9; 20]);

        let bag = private_key_to_safe_bag(
            &key,
            &local_key_id,
            "certificate",
            EncryptionAlgorithm::PbeWithHmacSha256AndAes256,
            1000,
            PASSWORD,
        )
        .unwrap();

        let mut parsed = ParsedAuthSafe::default();
        parse_bags(vec![bag], PASSWORD, &mut parsed).unwrap();

        assert_eq!(parsed.keys.len(), 1);
        assert_eq!(parsed.keys[0].key.as_slice(), key.as_slice());
        assert_eq!(parsed.keys[0].local_key_id.as_deref(), Some(local_key_id.as_ref()));
    }

    #[test]
    fn test_mac_round_trip_and_wrong_password() {
        for alg in [MacAlgorithm::HmacSha1, MacAlgorithm::HmacSha256] {
            let mac = compute_mac(b"auth safe", alg, 1000, PASSWORD).unwrap();

            verify_mac(&mac, PASSWORD, b"auth safe").unwrap();
            assert!(matches!(
                verify_mac(&mac, "wrong", b"auth safe"),
                Err(CodecError::MacError(_))
            ));
        }
    }
}
