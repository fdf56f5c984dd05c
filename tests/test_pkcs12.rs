use der::{Decode, asn1::OctetString};
use keystore_bundle::{
    CertificateBundle, EncryptionAlgorithm, KeyAlgorithm, KeystoreEncoder, KeystoreFormat, KeystoreRequest,
    MacAlgorithm, Pkcs12Encoder, PrivateKey, chain, encode_keystore,
    error::{CodecError, Error},
    pfx,
};
use p12_keystore::KeyStore;
use pkcs12::{authenticated_safe::AuthenticatedSafe, pfx::Pfx};

mod common;

use common::{
    INTERMEDIATE_PEM, Issued, LEAF_KEY_PKCS1, LEAF_PEM, OPENSSL_PKCS12, PASSWORD, Pki, ROOT_PEM, bundle, ders,
    pem_to_der,
};

fn request(pki: &Pki, primary: &str, supplied: Option<&str>) -> KeystoreRequest {
    let key = PrivateKey::decode(&pki.leaf.key_der()).unwrap();
    let primary = CertificateBundle::parse(primary.as_bytes()).unwrap();
    let supplied = supplied
        .map(|pem| CertificateBundle::parse(pem.as_bytes()).unwrap())
        .unwrap_or_default();

    KeystoreRequest::new(
        KeystoreFormat::Pkcs12,
        PASSWORD,
        key,
        chain::compose(primary, supplied).unwrap(),
    )
}

fn safe_count(data: &[u8]) -> usize {
    let pfx = Pfx::from_der(data).unwrap();
    let content = OctetString::from_der(&der::Encode::to_der(&pfx.auth_safe.content).unwrap()).unwrap();
    AuthenticatedSafe::from_der(content.as_bytes()).unwrap().len()
}

#[test]
fn test_default_encoder() {
    assert_eq!(Pkcs12Encoder::default().format(), KeystoreFormat::Pkcs12);
    assert_eq!(KeystoreFormat::Pkcs12.encoder().format(), KeystoreFormat::Pkcs12);
}

#[test]
fn test_ca_safe_only_with_chain() {
    let pki = Pki::new();

    let data = request(&pki, &pki.leaf.pem(), None).encode().unwrap();
    assert_eq!(safe_count(&data), 2);

    let data = request(&pki, &pki.leaf.pem(), Some(&pki.root.pem())).encode().unwrap();
    assert_eq!(safe_count(&data), 3);
}

fn round_trip(encoder: Pkcs12Encoder) {
    let pki = Pki::new();
    let data = request(&pki, &bundle(&[&pki.leaf, &pki.intermediate]), Some(&pki.root.pem()))
        .encode_with(&encoder)
        .unwrap();

    let decoded = pfx::decode(&data, PASSWORD).unwrap();

    assert_eq!(decoded.leaf.as_der(), pki.leaf.der());
    assert_eq!(decoded.key.as_der(), pki.leaf.key_der());
    assert_eq!(
        ders(&decoded.ca_chain.unwrap()),
        vec![pki.intermediate.der().to_vec(), pki.root.der().to_vec()]
    );
}

#[test]
fn test_pbes2_sha1_mac() {
    round_trip(
        Pkcs12Encoder::new()
            .encryption_iterations(2048)
            .mac_algorithm(MacAlgorithm::HmacSha1)
            .mac_iterations(2048),
    );
}

#[cfg(feature = "pbes1")]
#[test]
fn test_legacy_triple_des() {
    round_trip(
        Pkcs12Encoder::new()
            .encryption_algorithm(EncryptionAlgorithm::PbeWithShaAnd3KeyTripleDesCbc)
            .encryption_iterations(2048)
            .mac_algorithm(MacAlgorithm::HmacSha1),
    );
}

#[cfg(feature = "pbes1")]
#[test]
fn test_legacy_rc2() {
    round_trip(
        Pkcs12Encoder::new()
            .encryption_algorithm(EncryptionAlgorithm::PbeWithShaAnd40BitRc2Cbc)
            .mac_algorithm(MacAlgorithm::HmacSha1),
    );
}

#[test]
fn test_truncated_file() {
    let pki = Pki::new();
    let data = request(&pki, &pki.leaf.pem(), None).encode().unwrap();

    assert!(matches!(
        pfx::decode(&data[..data.len() / 2], PASSWORD),
        Err(Error::KeystoreDecode {
            format: KeystoreFormat::Pkcs12,
            source: CodecError::DerError(_)
        })
    ));
}

#[test]
fn test_encoder_format_mismatch() {
    let pki = Pki::new();

    assert!(matches!(
        request(&pki, &pki.leaf.pem(), None).encode_with(&keystore_bundle::JksEncoder::new()),
        Err(Error::FormatMismatch {
            requested: KeystoreFormat::Pkcs12,
            encoder: KeystoreFormat::Jks
        })
    ));
}

#[test]
fn test_read_openssl_keystore() {
    let decoded = pfx::decode(OPENSSL_PKCS12, PASSWORD).unwrap();

    assert_eq!(decoded.leaf.as_der(), pem_to_der(LEAF_PEM));
    assert_eq!(
        ders(&decoded.ca_chain.unwrap()),
        vec![pem_to_der(INTERMEDIATE_PEM), pem_to_der(ROOT_PEM)]
    );
    assert_eq!(decoded.key.algorithm(), KeyAlgorithm::Rsa);
    assert_eq!(
        decoded.key.public_key_der(),
        PrivateKey::decode(LEAF_KEY_PKCS1).unwrap().public_key_der()
    );
}

#[test]
fn test_read_openssl_keystore_wrong_password() {
    assert!(matches!(
        pfx::decode(OPENSSL_PKCS12, "wrong"),
        Err(Error::KeystoreDecode {
            source: CodecError::MacError(_),
            ..
        })
    ));
}

#[test]
fn test_output_readable_by_p12_keystore() {
    // D is the root, each following certificate is issued by its predecessor
    let d = Issued::root("D");
    let c = d.intermediate("C");
    let b = c.intermediate("B");
    let a = b.intermediate("A");
    let leaf = a.leaf("leaf");

    let data = encode_keystore(
        KeystoreFormat::Pkcs12,
        PASSWORD,
        &leaf.key_der(),
        bundle(&[&leaf, &a, &b]).as_bytes(),
        Some(bundle(&[&c, &d]).as_bytes()),
    )
    .unwrap();

    let keystore = KeyStore::from_pkcs12(&data, PASSWORD).unwrap();
    let (alias, key_chain) = keystore.private_key_chain().unwrap();

    assert_eq!(alias, pfx::IDENTITY_FRIENDLY_NAME);
    assert_eq!(key_chain.key().as_der(), leaf.key_der());
    assert_eq!(
        key_chain.certs().iter().map(|c| c.as_der().to_vec()).collect::<Vec<_>>(),
        vec![
            leaf.der().to_vec(),
            a.der().to_vec(),
            b.der().to_vec(),
            c.der().to_vec(),
            d.der().to_vec()
        ]
    );
}

#[test]
fn test_leaf_only_output_readable_by_p12_keystore() {
    let pki = Pki::new();
    let data = request(&pki, &pki.leaf.pem(), None).encode().unwrap();

    let keystore = KeyStore::from_pkcs12(&data, PASSWORD).unwrap();
    let (_, key_chain) = keystore.private_key_chain().unwrap();

    assert_eq!(key_chain.certs().len(), 1);
    assert_eq!(key_chain.certs()[0].as_der(), pki.leaf.der());
    assert_eq!(keystore.entries_count(), 1);
}

#[test]
fn test_rewritten_openssl_identity_readable_by_p12_keystore() {
    let primary = format!("{LEAF_PEM}{INTERMEDIATE_PEM}");
    let data = encode_keystore(
        KeystoreFormat::Pkcs12,
        PASSWORD,
        LEAF_KEY_PKCS1,
        primary.as_bytes(),
        Some(ROOT_PEM.as_bytes()),
    )
    .unwrap();

    let written = KeyStore::from_pkcs12(&data, PASSWORD).unwrap();
    let reference = KeyStore::from_pkcs12(OPENSSL_PKCS12, PASSWORD).unwrap();

    let chain_ders = |keystore: &KeyStore| {
        let (_, key_chain) = keystore.private_key_chain().unwrap();
        key_chain
            .certs()
            .iter()
            .map(|c| c.as_der().to_vec())
            .collect::<Vec<_>>()
    };

    assert_eq!(chain_ders(&written), chain_ders(&reference));
}
