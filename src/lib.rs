//! docsign - Detached Document Signing Library
//!
//! Signs arbitrary documents with a pre-provisioned, password-protected private key and
//! verifies the resulting detached signature against the paired certificate. Documents are
//! streamed in fixed-size chunks, so their size is not limited by memory.
//!
//! # Overview
//!
//! ```text
//! key directory ──► key_locator ──► key_loader ──► signer ──► verifier
//!                   (find files)    (decrypt key,   (stream    (stream again,
//!                                    parse cert)     + sign)    check signature)
//! ```
//!
//! The [`workflow`] module sequences these steps and reports which stage failed and why.
//!
//! # Features
//!
//! - **Key containers**: PKCS#12 bundles, encrypted or plain PEM and DER private keys
//! - **Certificates**: PEM/DER X.509 certificates (leaf of a chain) and certificate requests
//! - **Streaming**: chunked hash-then-sign with SHA-256/384/512 and RSA PKCS#1 v1.5
//! - **Typed failures**: wrong password, corrupt container, missing key, unreadable document
//!   and signature mismatch are all distinguishable
//! - **Key hygiene**: decrypted keys and passwords live in `secrecy` containers, are zeroized
//!   on drop, and never appear in logs or `Debug` output
//!
//! # Quick Start
//!
//! ```no_run
//! use docsign::configs::AppConfig;
//! use docsign::document::FileDocument;
//! use docsign::workflow::Workflow;
//! use secrecy::SecretString;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = AppConfig::load()?;
//! let workflow = Workflow::from_config(&config);
//!
//! let report = workflow.run(
//!     &FileDocument::new("contract.pdf"),
//!     SecretString::from("secret".to_string()),
//!     &CancellationToken::new(),
//! );
//! println!("{}", report.summary());
//! assert!(report.verified());
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! # Module Overview
//!
//! ## [`key_locator`]
//!
//! Non-recursive, case-insensitive extension scan of the key directory, plus the
//! deterministic selection policy used when several candidates exist.
//!
//! ## [`key_loader`]
//!
//! Opens a key container with a password and parses the leaf certificate.
//!
//! ```no_run
//! use docsign::key_loader::{load_certificate, load_private_key};
//! use secrecy::SecretString;
//!
//! let key = load_private_key("keys/alice.p12", SecretString::from("secret".to_string()))?;
//! let cert = load_certificate("keys/alice.cer")?;
//! println!("Signing as {}", cert.subject());
//! # Ok::<(), docsign::error::SignatureError>(())
//! ```
//!
//! ## [`signer`] and [`verifier`]
//!
//! Streaming sign and verify passes over a [`document::DocumentSource`], driven by a
//! [`backend::CryptoBackend`] passed in at construction.
//!
//! # Error Handling
//!
//! Library APIs return [`error::Result`] with a [`error::SignatureError`] whose variants name
//! the exact failure. A signature that does not match is not an error: verification returns
//! [`verifier::Verdict::Invalid`].

pub mod backend;
pub mod configs;
pub mod document;
pub mod error;
pub mod key_loader;
pub mod key_locator;
pub mod secure_key;
pub mod signer;
pub mod verifier;
pub mod workflow;

#[cfg(test)]
mod test_support;

pub use error::{Result, SignatureError};
pub use workflow::{Workflow, WorkflowReport};
