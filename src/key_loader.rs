//! Key Loader Module
//!
//! Opens password-protected key containers and certificate files found by the
//! [`key_locator`](crate::key_locator).
//!
//! # Supported private key containers
//!
//! - **PKCS#12** (`.p12`, `.pfx`, or any file that parses as a PKCS#12 bundle)
//! - **PEM**: encrypted PKCS#8 (`ENCRYPTED PRIVATE KEY`), traditional encrypted keys
//!   (`Proc-Type: 4,ENCRYPTED`), or unencrypted `PRIVATE KEY` / `RSA PRIVATE KEY` blocks
//! - **DER**: encrypted PKCS#8 or unencrypted PKCS#8 / PKCS#1 structures
//!
//! When a container holds more than one private key, the first one enumerated is used:
//! the key bag OpenSSL returns for PKCS#12, the first private key block for PEM.
//!
//! # Supported certificate files
//!
//! PEM or DER X.509 certificates (the first certificate of a PEM chain is the leaf) and
//! PEM or DER certificate signing requests, whose self-signature must verify.

use openssl::base64;
use openssl::error::ErrorStack;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private, Public};
use openssl::x509::{X509NameRef, X509Req, X509};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, SignatureError};
use crate::secure_key::{Password, SigningKey};

const PEM_BEGIN: &str = "-----BEGIN ";
const PEM_ENCRYPTED_PKCS8_LABEL: &str = "ENCRYPTED PRIVATE KEY";
const PEM_LEGACY_ENCRYPTED: &str = "Proc-Type: 4,ENCRYPTED";
const PEM_PRIVATE_KEY_SUFFIX: &str = "PRIVATE KEY-----";
const PEM_CERTIFICATE: &str = "-----BEGIN CERTIFICATE-----";
const PEM_CERTIFICATE_REQUEST: &str = "CERTIFICATE REQUEST-----";

const DER_TAG_SEQUENCE: u8 = 0x30;
const DER_TAG_INTEGER: u8 = 0x02;
const DER_TAG_OID: u8 = 0x06;

/// OpenSSL reasons meaning the password did not decrypt the container
const WRONG_PASSWORD_REASONS: [&str; 2] = ["mac verify failure", "bad decrypt"];
/// OpenSSL reasons meaning the container's cipher is not available in this build
const UNSUPPORTED_CIPHER_REASONS: [&str; 4] = [
    "unsupported cipher",
    "unknown cipher",
    "unsupported algorithm",
    "pkcs12 algor cipherinit error",
];
const EVP_LIBRARY: &str = "digital envelope routines";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerFormat {
    Pkcs12,
    Pem,
    Der,
}

/// Load the private key held in the container at `path`
///
/// The password is consumed and dropped before this returns.
///
/// # Errors
///
/// - [`SignatureError::InvalidPassword`] if decryption or the integrity check fails
/// - [`SignatureError::KeyContainerCorrupt`] if the container cannot be parsed, or is
///   encrypted with a cipher this OpenSSL build does not provide (legacy RC2 PKCS#12)
/// - [`SignatureError::KeyNotFound`] if the container parses but holds no private key
/// - [`SignatureError::PermissionDenied`] if the file cannot be opened for reading
pub fn load_private_key<P: AsRef<Path>>(path: P, password: Password) -> Result<SigningKey> {
    let path = path.as_ref();
    let data = read_file(path)?;
    let format = detect_format(path, &data);
    debug!(path = %path.display(), ?format, "Opening key container");

    let pkey = match format {
        ContainerFormat::Pkcs12 => open_pkcs12(path, &data, &password)?,
        ContainerFormat::Pem => open_pem(path, &data, &password)?,
        ContainerFormat::Der => open_der(path, &data, &password)?,
    };
    drop(password);

    let key = SigningKey::new(&pkey)?;
    debug!(
        path = %path.display(),
        algorithm = ?key.algorithm(),
        bits = key.bits(),
        "Private key loaded"
    );
    Ok(key)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::PermissionDenied => SignatureError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => SignatureError::KeyContainerCorrupt {
            path: path.to_path_buf(),
            reason: format!("Failed to read file: {}", e),
        },
    })
}

fn detect_format(path: &Path, data: &[u8]) -> ContainerFormat {
    if looks_like_pem(data) {
        return ContainerFormat::Pem;
    }

    let pkcs12_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("p12") || e.eq_ignore_ascii_case("pfx"))
        .unwrap_or(false);
    if pkcs12_extension || Pkcs12::from_der(data).is_ok() {
        ContainerFormat::Pkcs12
    } else {
        ContainerFormat::Der
    }
}

fn looks_like_pem(data: &[u8]) -> bool {
    let head = &data[..data.len().min(4096)];
    String::from_utf8_lossy(head).contains(PEM_BEGIN)
}

fn corrupt(path: &Path, reason: impl std::fmt::Display) -> SignatureError {
    SignatureError::KeyContainerCorrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn open_pkcs12(path: &Path, data: &[u8], password: &Password) -> Result<PKey<Private>> {
    let pkcs12 =
        Pkcs12::from_der(data).map_err(|e| corrupt(path, format!("Not a PKCS#12 bundle: {}", e)))?;

    // parse2 verifies the MAC before decrypting, so a wrong password fails there
    let parsed = pkcs12
        .parse2(password.expose_secret())
        .map_err(|e| decryption_error(path, e, Undiagnosed::Corrupt))?;

    parsed.pkey.ok_or_else(|| SignatureError::KeyNotFound {
        path: path.to_path_buf(),
    })
}

fn open_pem(path: &Path, data: &[u8], password: &Password) -> Result<PKey<Private>> {
    let text = String::from_utf8_lossy(data);
    if !text.contains(PEM_PRIVATE_KEY_SUFFIX) {
        return Err(SignatureError::KeyNotFound {
            path: path.to_path_buf(),
        });
    }

    if let Some(body) = pem_body(&text, PEM_ENCRYPTED_PKCS8_LABEL) {
        let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let der = base64::decode_block(&compact)
            .map_err(|e| corrupt(path, format!("Invalid base64 in PEM block: {}", e)))?;
        return match classify_der(&der) {
            Some(DerShape::EncryptedPkcs8) => open_encrypted_pkcs8(path, &der, password),
            _ => Err(corrupt(path, "PEM block is not an encrypted PKCS#8 key")),
        };
    }

    if text.contains(PEM_LEGACY_ENCRYPTED) {
        PKey::private_key_from_pem_passphrase(data, password.expose_secret().as_bytes())
            .map_err(|e| decryption_error(path, e, Undiagnosed::Corrupt))
    } else {
        PKey::private_key_from_pem(data).map_err(|e| corrupt(path, e))
    }
}

/// Text between the BEGIN and END lines of the first `label` block
fn pem_body<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    let begin = format!("-----BEGIN {}-----", label);
    let end = format!("-----END {}-----", label);
    let start = text.find(&begin)? + begin.len();
    let len = text[start..].find(&end)?;
    Some(&text[start..start + len])
}

/// Decrypt an `EncryptedPrivateKeyInfo` whose outer structure has already been checked
fn open_encrypted_pkcs8(path: &Path, der: &[u8], password: &Password) -> Result<PKey<Private>> {
    PKey::private_key_from_pkcs8_passphrase(der, password.expose_secret().as_bytes())
        .map_err(|e| decryption_error(path, e, Undiagnosed::WrongPassword))
}

/// What to report when OpenSSL names neither a wrong password nor a missing cipher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Undiagnosed {
    /// The structure was validated first, so the password produced garbage plaintext
    WrongPassword,
    Corrupt,
}

fn decryption_error(path: &Path, errors: ErrorStack, fallback: Undiagnosed) -> SignatureError {
    let reasons = || errors.errors().iter().filter_map(|e| e.reason().map(|r| (e.library(), r)));

    if reasons().any(|(_, reason)| WRONG_PASSWORD_REASONS.contains(&reason)) {
        return SignatureError::InvalidPassword {
            path: path.to_path_buf(),
        };
    }

    let unsupported = reasons().any(|(library, reason)| {
        UNSUPPORTED_CIPHER_REASONS.contains(&reason)
            || (reason == "unsupported" && library == Some(EVP_LIBRARY))
    });
    if unsupported {
        return corrupt(
            path,
            format!("Encryption algorithm is not supported by this OpenSSL build: {}", errors),
        );
    }

    match fallback {
        Undiagnosed::WrongPassword => SignatureError::InvalidPassword {
            path: path.to_path_buf(),
        },
        Undiagnosed::Corrupt => corrupt(path, errors),
    }
}

fn open_der(path: &Path, data: &[u8], password: &Password) -> Result<PKey<Private>> {
    match classify_der(data) {
        Some(DerShape::EncryptedPkcs8) => open_encrypted_pkcs8(path, data, password),
        Some(DerShape::PlainKey) => PKey::private_key_from_der(data).map_err(|e| corrupt(path, e)),
        Some(DerShape::OtherSequence)
            if X509::from_der(data).is_ok() || X509Req::from_der(data).is_ok() =>
        {
            Err(SignatureError::KeyNotFound {
                path: path.to_path_buf(),
            })
        }
        _ => Err(corrupt(path, "Unrecognised DER structure")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DerShape {
    /// SEQUENCE { SEQUENCE { OID, ... }, OCTET STRING }: EncryptedPrivateKeyInfo
    EncryptedPkcs8,
    /// SEQUENCE { INTEGER version, ... }: PKCS#8 PrivateKeyInfo or a bare PKCS#1/SEC1 key
    PlainKey,
    /// SEQUENCE { SEQUENCE { non-OID, ... } }: a certificate, request, or something else
    OtherSequence,
}

/// Read one DER tag-length header, returning `(tag, header_len, content_len)`
fn der_header(data: &[u8]) -> Option<(u8, usize, usize)> {
    let tag = *data.first()?;
    let first_len = *data.get(1)?;
    if first_len & 0x80 == 0 {
        return Some((tag, 2, first_len as usize));
    }
    let len_bytes = (first_len & 0x7f) as usize;
    if len_bytes == 0 || len_bytes > 4 {
        return None;
    }
    let encoded = data.get(2..2 + len_bytes)?;
    let content_len = encoded
        .iter()
        .fold(0usize, |acc, byte| (acc << 8) | *byte as usize);
    Some((tag, 2 + len_bytes, content_len))
}

/// Shape of a DER blob whose outer SEQUENCE spans exactly the whole input
fn classify_der(data: &[u8]) -> Option<DerShape> {
    let (outer_tag, outer_header, outer_len) = der_header(data)?;
    if outer_tag != DER_TAG_SEQUENCE || outer_header.checked_add(outer_len)? != data.len() {
        return None;
    }
    let inner = &data[outer_header..];
    let (inner_tag, inner_header, _) = der_header(inner)?;
    match inner_tag {
        DER_TAG_INTEGER => Some(DerShape::PlainKey),
        DER_TAG_SEQUENCE => {
            let (first_field, _, _) = der_header(&inner[inner_header..])?;
            if first_field == DER_TAG_OID {
                Some(DerShape::EncryptedPkcs8)
            } else {
                Some(DerShape::OtherSequence)
            }
        }
        _ => None,
    }
}

/// Where the verifying public key came from
enum CertificateSource {
    Certificate(X509),
    Request(X509Req),
}

/// A parsed leaf certificate (or certificate signing request)
pub struct LeafCertificate {
    path: PathBuf,
    source: CertificateSource,
}

impl LeafCertificate {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The public key used to verify signatures
    pub fn public_key(&self) -> Result<PKey<Public>> {
        let key = match &self.source {
            CertificateSource::Certificate(cert) => cert.public_key(),
            CertificateSource::Request(req) => req.public_key(),
        };
        key.map_err(|e| SignatureError::CertificateParseError {
            path: self.path.clone(),
            reason: format!("Failed to extract public key: {}", e),
        })
    }

    /// Subject distinguished name, e.g. `CN=alice, O=Example`
    pub fn subject(&self) -> String {
        match &self.source {
            CertificateSource::Certificate(cert) => format_name(cert.subject_name()),
            CertificateSource::Request(req) => format_name(req.subject_name()),
        }
    }

    /// True when the public key came from a certificate signing request
    pub fn is_request(&self) -> bool {
        matches!(self.source, CertificateSource::Request(_))
    }

    /// The X.509 certificate, unless this was loaded from a signing request
    pub fn x509(&self) -> Option<&X509> {
        match &self.source {
            CertificateSource::Certificate(cert) => Some(cert),
            CertificateSource::Request(_) => None,
        }
    }

    /// `notAfter` of the certificate as printed by OpenSSL
    pub fn not_after(&self) -> Option<String> {
        self.x509().map(|cert| cert.not_after().to_string())
    }

    /// SHA-256 over the DER encoding, hex encoded
    pub fn fingerprint_sha256(&self) -> Result<String> {
        let der = match &self.source {
            CertificateSource::Certificate(cert) => cert.to_der(),
            CertificateSource::Request(req) => req.to_der(),
        }
        .map_err(|e| SignatureError::CertificateParseError {
            path: self.path.clone(),
            reason: format!("Failed to encode DER: {}", e),
        })?;
        Ok(hex::encode(Sha256::digest(&der)))
    }
}

impl std::fmt::Debug for LeafCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafCertificate")
            .field("path", &self.path)
            .field("subject", &self.subject())
            .field("is_request", &self.is_request())
            .finish()
    }
}

fn format_name(name: &X509NameRef) -> String {
    name.entries()
        .map(|entry| {
            let field = entry.object().nid().short_name().unwrap_or("?");
            let value = entry
                .data()
                .as_utf8()
                .map(|v| v.to_string())
                .unwrap_or_default();
            format!("{}={}", field, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse the single leaf certificate in `path`
///
/// # Errors
///
/// [`SignatureError::CertificateParseError`] on unreadable or malformed input.
pub fn load_certificate<P: AsRef<Path>>(path: P) -> Result<LeafCertificate> {
    let path = path.as_ref();
    let parse_error = |reason: String| SignatureError::CertificateParseError {
        path: path.to_path_buf(),
        reason,
    };

    let data = fs::read(path).map_err(|e| parse_error(format!("Failed to read file: {}", e)))?;

    let source = if looks_like_pem(&data) {
        let text = String::from_utf8_lossy(&data);
        if text.contains(PEM_CERTIFICATE) {
            let chain = X509::stack_from_pem(&data)
                .map_err(|e| parse_error(format!("Invalid PEM certificate: {}", e)))?;
            if chain.len() > 1 {
                debug!(path = %path.display(), count = chain.len(), "Using leaf of certificate chain");
            }
            let leaf = chain
                .into_iter()
                .next()
                .ok_or_else(|| parse_error("No certificate in PEM file".to_string()))?;
            CertificateSource::Certificate(leaf)
        } else if text.contains(PEM_CERTIFICATE_REQUEST) {
            let req = X509Req::from_pem(&data)
                .map_err(|e| parse_error(format!("Invalid PEM certificate request: {}", e)))?;
            CertificateSource::Request(req)
        } else {
            return Err(parse_error(
                "PEM file holds no certificate or certificate request".to_string(),
            ));
        }
    } else if let Ok(cert) = X509::from_der(&data) {
        CertificateSource::Certificate(cert)
    } else if let Ok(req) = X509Req::from_der(&data) {
        CertificateSource::Request(req)
    } else {
        return Err(parse_error(
            "Not a DER or PEM certificate or certificate request".to_string(),
        ));
    };

    if let CertificateSource::Request(req) = &source {
        let key = req
            .public_key()
            .map_err(|e| parse_error(format!("Failed to extract public key: {}", e)))?;
        let self_signed = req
            .verify(&key)
            .map_err(|e| parse_error(format!("Failed to check request signature: {}", e)))?;
        if !self_signed {
            return Err(parse_error(
                "Certificate request signature does not verify".to_string(),
            ));
        }
    }

    let certificate = LeafCertificate {
        path: path.to_path_buf(),
        source,
    };
    debug!(
        path = %path.display(),
        subject = %certificate.subject(),
        request = certificate.is_request(),
        "Certificate loaded"
    );
    Ok(certificate)
}
