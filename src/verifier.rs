//! Streaming Verifier
//!
//! Re-reads a document from its handle and checks a detached signature against a public
//! key. The outcome is three-way: [`Verdict::Valid`], [`Verdict::Invalid`], or an error
//! when the check could not be carried out at all.

use openssl::pkey::{PKeyRef, Public};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::CryptoBackend;
use crate::configs::DEFAULT_CHUNK_SIZE;
use crate::document::{stream_chunks, DocumentDigest, DocumentSource, StreamError};
use crate::error::{Result, SignatureError};
use crate::signer::Signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid,
}

impl Verdict {
    pub fn is_valid(self) -> bool {
        self == Verdict::Valid
    }
}

/// Result of a completed verification pass
#[derive(Debug, Clone)]
pub struct VerifiedDocument {
    pub verdict: Verdict,
    pub digest: DocumentDigest,
    pub bytes_read: u64,
}

#[derive(Debug, Clone)]
pub struct StreamingVerifier {
    backend: Arc<dyn CryptoBackend>,
    chunk_size: usize,
}

impl StreamingVerifier {
    pub fn new(backend: Arc<dyn CryptoBackend>, chunk_size: usize) -> Self {
        Self {
            backend,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn with_default_chunk_size(backend: Arc<dyn CryptoBackend>) -> Self {
        Self::new(backend, DEFAULT_CHUNK_SIZE)
    }

    /// Verify `signature` over the current content of `document`
    ///
    /// A signature that does not match is `Ok` with [`Verdict::Invalid`].
    ///
    /// # Errors
    ///
    /// - [`SignatureError::DocumentUnreadable`] if the document cannot be opened
    /// - [`SignatureError::VerificationIOFailure`] if reading fails part way through
    /// - [`SignatureError::UnsupportedPublicKey`] if the backend cannot use `public_key`
    /// - [`SignatureError::VerificationFailure`] if the primitive fails instead of deciding
    /// - [`SignatureError::Cancelled`] if `cancel` fires between chunks
    pub fn verify(
        &self,
        document: &dyn DocumentSource,
        signature: &Signature,
        public_key: &PKeyRef<Public>,
        cancel: &CancellationToken,
    ) -> Result<VerifiedDocument> {
        let name = document.describe();
        debug!(document = %name, backend = %self.backend.name(), "Starting verification pass");

        let mut context = self.backend.verify_context(public_key)?;
        let mut reader = document
            .open()
            .map_err(|source| SignatureError::DocumentUnreadable {
                document: name.clone(),
                source,
            })?;

        let summary = stream_chunks(&mut reader, self.chunk_size, cancel, |chunk| {
            context.update(chunk)
        })
        .map_err(|e| match e {
            StreamError::Read(source) => SignatureError::VerificationIOFailure {
                document: name.clone(),
                source,
            },
            StreamError::Consumer(err) => err,
        })?;
        drop(reader);

        let verdict = if context.finish(signature.as_bytes())? {
            info!(document = %name, bytes = summary.bytes_read, "Signature is valid");
            Verdict::Valid
        } else {
            warn!(document = %name, bytes = summary.bytes_read, "Signature does not match");
            Verdict::Invalid
        };

        Ok(VerifiedDocument {
            verdict,
            digest: summary.digest,
            bytes_read: summary.bytes_read,
        })
    }
}
