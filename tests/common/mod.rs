#![allow(dead_code)]

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};

pub const PASSWORD: &str = "changeit";

// RSA chain generated with keytool, plus the same identity written by keytool (JKS) and openssl (PKCS#12)
pub const LEAF_PEM: &str = include_str!("../assets/leaf.pem");
pub const INTERMEDIATE_PEM: &str = include_str!("../assets/intermediate.pem");
pub const ROOT_PEM: &str = include_str!("../assets/root.pem");
pub const LEAF_KEY_PKCS1: &[u8] = include_bytes!("../assets/leaf-key-pkcs1.der");
pub const KEYTOOL_JKS: &[u8] = include_bytes!("../assets/keystore.jks");
pub const OPENSSL_PKCS12: &[u8] = include_bytes!("../assets/keystore.p12");

/// Certificate together with the key that signed it
pub struct Issued {
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
}

fn params(name: &str, is_ca: bool) -> CertificateParams {
    let mut params = CertificateParams::new(vec![format!("{name}.example.com")]).unwrap();
    params.distinguished_name.push(DnType::CommonName, name);
    if is_ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    }
    params
}

impl Issued {
    pub fn root(name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let cert = params(name, true).self_signed(&key).unwrap();
        Self { cert, key }
    }

    pub fn intermediate(&self, name: &str) -> Self {
        self.issue(name, true)
    }

    pub fn leaf(&self, name: &str) -> Self {
        self.issue(name, false)
    }

    fn issue(&self, name: &str, is_ca: bool) -> Self {
        let key = KeyPair::generate().unwrap();
        let cert = params(name, is_ca).signed_by(&key, &self.cert, &self.key).unwrap();
        Self { cert, key }
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    pub fn der(&self) -> &[u8] {
        self.cert.der()
    }

    /// Unencrypted PKCS#8 DER of the certificate key
    pub fn key_der(&self) -> Vec<u8> {
        self.key.serialize_der()
    }
}

/// root -> intermediate -> leaf
pub struct Pki {
    pub root: Issued,
    pub intermediate: Issued,
    pub leaf: Issued,
}

impl Pki {
    pub fn new() -> Self {
        let root = Issued::root("Test Root CA");
        let intermediate = root.intermediate("Test Intermediate CA");
        let leaf = intermediate.leaf("server");
        Self {
            root,
            intermediate,
            leaf,
        }
    }
}

pub fn bundle(certs: &[&Issued]) -> String {
    certs.iter().map(|c| c.pem()).collect()
}

pub fn ders(certs: &[keystore_bundle::Certificate]) -> Vec<Vec<u8>> {
    certs.iter().map(|c| c.as_der().to_vec()).collect()
}

pub fn pem_to_der(pem: &str) -> Vec<u8> {
    keystore_bundle::CertificateBundle::parse(pem.as_bytes())
        .unwrap()
        .leaf()
        .unwrap()
        .as_der()
        .to_vec()
}
