//! Cryptographic backend used by the signer and verifier
//!
//! The backend is handed to [`StreamingSigner`](crate::signer::StreamingSigner) and
//! [`StreamingVerifier`](crate::verifier::StreamingVerifier) at construction. Nothing is
//! registered process-wide; two workflows can run with different backends side by side.

use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKeyRef, Private, Public};
use openssl::rsa::Padding;
use openssl::sign::{Signer, Verifier};
use serde::Deserialize;
use std::fmt;

use crate::configs::DEFAULT_MIN_RSA_BITS;
use crate::error::{Result, SignatureError};

/// Digest used in the hash-then-sign construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn message_digest(self) -> MessageDigest {
        match self {
            DigestAlgorithm::Sha256 => MessageDigest::sha256(),
            DigestAlgorithm::Sha384 => MessageDigest::sha384(),
            DigestAlgorithm::Sha512 => MessageDigest::sha512(),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Sha256 => f.write_str("SHA256withRSA"),
            DigestAlgorithm::Sha384 => f.write_str("SHA384withRSA"),
            DigestAlgorithm::Sha512 => f.write_str("SHA512withRSA"),
        }
    }
}

/// Incremental signing state for one document pass
pub trait SignContext {
    fn update(&mut self, chunk: &[u8]) -> Result<()>;
    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}

/// Incremental verification state for one document pass
pub trait VerifyContext {
    fn update(&mut self, chunk: &[u8]) -> Result<()>;
    /// `Ok(false)` for a signature that does not match; errors are reserved for the
    /// primitive itself failing
    fn finish(self: Box<Self>, signature: &[u8]) -> Result<bool>;
}

/// A signature scheme able to start incremental sign and verify passes
pub trait CryptoBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> String;

    fn sign_context<'k>(&self, key: &'k PKeyRef<Private>) -> Result<Box<dyn SignContext + 'k>>;

    fn verify_context<'k>(&self, key: &'k PKeyRef<Public>)
        -> Result<Box<dyn VerifyContext + 'k>>;
}

/// RSA PKCS#1 v1.5 signatures over an OpenSSL message digest
#[derive(Debug, Clone)]
pub struct OpensslBackend {
    digest: DigestAlgorithm,
    min_rsa_bits: u32,
}

impl Default for OpensslBackend {
    fn default() -> Self {
        Self::new(DigestAlgorithm::Sha256, DEFAULT_MIN_RSA_BITS)
    }
}

impl OpensslBackend {
    pub fn new(digest: DigestAlgorithm, min_rsa_bits: u32) -> Self {
        Self {
            digest,
            min_rsa_bits,
        }
    }

    pub fn digest(&self) -> DigestAlgorithm {
        self.digest
    }
}

impl CryptoBackend for OpensslBackend {
    fn name(&self) -> String {
        format!("openssl/{}", self.digest)
    }

    fn sign_context<'k>(&self, key: &'k PKeyRef<Private>) -> Result<Box<dyn SignContext + 'k>> {
        if key.id() != Id::RSA {
            return Err(SignatureError::SigningFailure(format!(
                "{} requires an RSA key, got {:?}",
                self.digest,
                key.id()
            )));
        }
        if key.bits() < self.min_rsa_bits {
            return Err(SignatureError::SigningFailure(format!(
                "RSA key of {} bits is below the minimum of {} bits",
                key.bits(),
                self.min_rsa_bits
            )));
        }

        let mut signer = Signer::new(self.digest.message_digest(), key)
            .map_err(|e| SignatureError::SigningFailure(format!("Failed to create signer: {}", e)))?;
        signer.set_rsa_padding(Padding::PKCS1).map_err(|e| {
            SignatureError::SigningFailure(format!("Failed to set RSA padding: {}", e))
        })?;

        Ok(Box::new(OpensslSignContext { signer }))
    }

    fn verify_context<'k>(
        &self,
        key: &'k PKeyRef<Public>,
    ) -> Result<Box<dyn VerifyContext + 'k>> {
        if key.id() != Id::RSA {
            return Err(SignatureError::UnsupportedPublicKey(format!(
                "{} requires an RSA public key, got {:?}",
                self.digest,
                key.id()
            )));
        }

        let mut verifier = Verifier::new(self.digest.message_digest(), key).map_err(|e| {
            SignatureError::UnsupportedPublicKey(format!("Failed to create verifier: {}", e))
        })?;
        verifier.set_rsa_padding(Padding::PKCS1).map_err(|e| {
            SignatureError::UnsupportedPublicKey(format!("Failed to set RSA padding: {}", e))
        })?;

        Ok(Box::new(OpensslVerifyContext { verifier }))
    }
}

struct OpensslSignContext<'k> {
    signer: Signer<'k>,
}

impl SignContext for OpensslSignContext<'_> {
    fn update(&mut self, chunk: &[u8]) -> Result<()> {
        self.signer
            .update(chunk)
            .map_err(|e| SignatureError::SigningFailure(format!("Digest update failed: {}", e)))
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        let signature = self
            .signer
            .sign_to_vec()
            .map_err(|e| SignatureError::SigningFailure(format!("Failed to sign: {}", e)))?;
        if signature.is_empty() {
            return Err(SignatureError::SigningFailure(
                "Signing primitive produced an empty signature".to_string(),
            ));
        }
        Ok(signature)
    }
}

struct OpensslVerifyContext<'k> {
    verifier: Verifier<'k>,
}

impl VerifyContext for OpensslVerifyContext<'_> {
    fn update(&mut self, chunk: &[u8]) -> Result<()> {
        self.verifier.update(chunk).map_err(|e| {
            SignatureError::VerificationFailure(format!("Digest update failed: {}", e))
        })
    }

    // OpenSSL returns 0 for any mismatch, malformed signatures included; only a negative
    // return, which rust-openssl surfaces as Err, means the check itself broke
    fn finish(self: Box<Self>, signature: &[u8]) -> Result<bool> {
        self.verifier.verify(signature).map_err(|e| {
            SignatureError::VerificationFailure(format!("Verification primitive failed: {}", e))
        })
    }
}
