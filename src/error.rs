//! Error taxonomy for the signing workflow
//!
//! Every failure a stage can report has its own variant so callers can tell a bad password
//! apart from a corrupt container, or an unreadable document apart from a signature that
//! simply does not match. A signature mismatch is *not* an error; it is reported as
//! [`Verdict::Invalid`](crate::verifier::Verdict::Invalid).

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Which kind of key material a locator or selection error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    PrivateKey,
    Certificate,
}

impl std::fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateKind::PrivateKey => f.write_str("private key"),
            CandidateKind::Certificate => f.write_str("certificate"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Key directory {path:?} could not be read: {source}")]
    DirectoryUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied while reading key directory {path:?}")]
    PermissionDenied { path: PathBuf },

    #[error("No private key found in {directory:?}. Make sure the signing key is installed")]
    NoKeyCandidate { directory: PathBuf },

    #[error(
        "No certificate found in {directory:?}. Make sure the certificate matching the private key is installed"
    )]
    NoCertificateCandidate { directory: PathBuf },

    #[error("Found {count} {kind} candidates but exactly one is required: {candidates:?}")]
    AmbiguousCandidates {
        kind: CandidateKind,
        count: usize,
        candidates: Vec<PathBuf>,
    },

    #[error("A password is required to open the private key")]
    MissingPassword,

    #[error("Key container {path:?} is corrupt or in an unsupported format: {reason}")]
    KeyContainerCorrupt { path: PathBuf, reason: String },

    #[error("Wrong password for key container {path:?}")]
    InvalidPassword { path: PathBuf },

    #[error("Key container {path:?} holds no private key")]
    KeyNotFound { path: PathBuf },

    #[error("Certificate {path:?} could not be parsed: {reason}")]
    CertificateParseError { path: PathBuf, reason: String },

    #[error("Document {document} could not be read: {source}")]
    DocumentUnreadable {
        document: String,
        #[source]
        source: io::Error,
    },

    #[error("Signing failed: {0}")]
    SigningFailure(String),

    #[error("Reading document {document} failed during verification: {source}")]
    VerificationIOFailure {
        document: String,
        #[source]
        source: io::Error,
    },

    #[error("Signature could not be checked: {0}")]
    VerificationFailure(String),

    #[error("The certificate's public key cannot be used for verification: {0}")]
    UnsupportedPublicKey(String),

    #[error("Document {document} changed between signing and verification")]
    DocumentChanged { document: String },

    #[error("Operation was cancelled")]
    Cancelled,
}

impl SignatureError {
    /// Stable short code for the failure, suitable for status lines and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            SignatureError::DirectoryUnreadable { .. } => "directory_unreadable",
            SignatureError::PermissionDenied { .. } => "permission_denied",
            SignatureError::NoKeyCandidate { .. } => "no_key_candidate",
            SignatureError::NoCertificateCandidate { .. } => "no_certificate_candidate",
            SignatureError::AmbiguousCandidates { .. } => "ambiguous_candidates",
            SignatureError::MissingPassword => "missing_password",
            SignatureError::KeyContainerCorrupt { .. } => "key_container_corrupt",
            SignatureError::InvalidPassword { .. } => "invalid_password",
            SignatureError::KeyNotFound { .. } => "key_not_found",
            SignatureError::CertificateParseError { .. } => "certificate_parse_error",
            SignatureError::DocumentUnreadable { .. } => "document_unreadable",
            SignatureError::SigningFailure(_) => "signing_failure",
            SignatureError::VerificationIOFailure { .. } => "verification_io_failure",
            SignatureError::VerificationFailure(_) => "verification_failure",
            SignatureError::UnsupportedPublicKey(_) => "unsupported_public_key",
            SignatureError::DocumentChanged { .. } => "document_changed",
            SignatureError::Cancelled => "cancelled",
        }
    }

    /// True when the failure means "nothing to work with" rather than "something broke"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SignatureError::NoKeyCandidate { .. } | SignatureError::NoCertificateCandidate { .. }
        )
    }
}

pub type Result<T, E = SignatureError> = std::result::Result<T, E>;
