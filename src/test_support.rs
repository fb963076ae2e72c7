//! Key material for unit tests
//!
//! Identities are generated once per test binary and shared, since RSA generation
//! dominates test time otherwise.

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::Rsa;
use openssl::symm::Cipher;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Name, X509Req, X509};
use secrecy::SecretString;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use crate::secure_key::{Password, SigningKey};

const X509_VERSION_3: i32 = 2;
const TEST_RSA_BITS: u32 = 2048;

pub(crate) struct TestIdentity {
    pub key: PKey<Private>,
    pub cert: X509,
}

pub(crate) fn alice() -> &'static TestIdentity {
    static ALICE: OnceLock<TestIdentity> = OnceLock::new();
    ALICE.get_or_init(|| TestIdentity::generate("alice"))
}

pub(crate) fn bob() -> &'static TestIdentity {
    static BOB: OnceLock<TestIdentity> = OnceLock::new();
    BOB.get_or_init(|| TestIdentity::generate("bob"))
}

pub(crate) fn password(value: &str) -> Password {
    SecretString::from(value.to_string())
}

fn subject(common_name: &str) -> X509Name {
    let mut name = X509Name::builder().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, "Docsign Test")
        .unwrap();
    name.append_entry_by_nid(Nid::COUNTRYNAME, "US").unwrap();
    name.build()
}

impl TestIdentity {
    /// Self-signed end-entity certificate for a fresh RSA key
    pub fn generate(common_name: &str) -> Self {
        let key = PKey::from_rsa(Rsa::generate(TEST_RSA_BITS).unwrap()).unwrap();

        let mut builder = X509::builder().unwrap();
        builder.set_version(X509_VERSION_3).unwrap();

        let mut serial = BigNum::new().unwrap();
        serial.rand(128, MsbOption::MAYBE_ZERO, false).unwrap();
        builder
            .set_serial_number(&serial.to_asn1_integer().unwrap())
            .unwrap();

        let name = subject(common_name);
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.set_pubkey(&key).unwrap();

        builder
            .append_extension(BasicConstraints::new().critical().build().unwrap())
            .unwrap();
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .digital_signature()
                    .non_repudiation()
                    .build()
                    .unwrap(),
            )
            .unwrap();

        builder.sign(&key, MessageDigest::sha256()).unwrap();

        Self {
            key,
            cert: builder.build(),
        }
    }

    pub fn signing_key(&self) -> SigningKey {
        SigningKey::new(&self.key).unwrap()
    }

    pub fn public_key(&self) -> PKey<Public> {
        self.cert.public_key().unwrap()
    }

    pub fn p12_der(&self, password: &str) -> Vec<u8> {
        let mut builder = Pkcs12::builder();
        builder.name("signing key");
        builder.pkey(&self.key);
        builder.cert(&self.cert);
        builder.build2(password).unwrap().to_der().unwrap()
    }

    pub fn write_p12(&self, path: &Path, password: &str) {
        fs::write(path, self.p12_der(password)).unwrap();
    }

    pub fn write_p12_without_key(&self, path: &Path, password: &str) {
        let mut builder = Pkcs12::builder();
        builder.cert(&self.cert);
        fs::write(path, builder.build2(password).unwrap().to_der().unwrap()).unwrap();
    }

    pub fn write_encrypted_pem(&self, path: &Path, password: &str) {
        let pem = self
            .key
            .private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), password.as_bytes())
            .unwrap();
        fs::write(path, pem).unwrap();
    }

    pub fn write_encrypted_der(&self, path: &Path, password: &str) {
        let der = self
            .key
            .private_key_to_pkcs8_passphrase(Cipher::aes_256_cbc(), password.as_bytes())
            .unwrap();
        fs::write(path, der).unwrap();
    }

    pub fn write_cert_pem(&self, path: &Path) {
        fs::write(path, self.cert.to_pem().unwrap()).unwrap();
    }

    pub fn write_cert_der(&self, path: &Path) {
        fs::write(path, self.cert.to_der().unwrap()).unwrap();
    }

    pub fn write_csr_pem(&self, path: &Path) {
        let mut builder = X509Req::builder().unwrap();
        builder.set_version(0).unwrap();
        builder
            .set_subject_name(self.cert.subject_name())
            .unwrap();
        builder.set_pubkey(&self.key).unwrap();
        builder.sign(&self.key, MessageDigest::sha256()).unwrap();
        fs::write(path, builder.build().to_pem().unwrap()).unwrap();
    }
}
