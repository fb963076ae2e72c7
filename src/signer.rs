//! Streaming Signer
//!
//! Produces a detached signature over a document by streaming it through the backend's
//! incremental signing context. The whole document is never held in memory.

use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::CryptoBackend;
use crate::configs::DEFAULT_CHUNK_SIZE;
use crate::document::{stream_chunks, DocumentDigest, DocumentSource, StreamError};
use crate::error::{Result, SignatureError};
use crate::secure_key::SigningKey;

/// Detached signature bytes
///
/// Only produced by a successful signing pass, or from caller-supplied bytes via
/// `TryFrom<Vec<u8>>`, which rejects an empty value.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl TryFrom<Vec<u8>> for Signature {
    type Error = SignatureError;

    fn try_from(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(SignatureError::SigningFailure(
                "An empty byte sequence is not a signature".to_string(),
            ));
        }
        Ok(Signature(bytes))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({} bytes)", self.0.len())
    }
}

/// Result of a successful signing pass
#[derive(Debug, Clone)]
pub struct SignedDocument {
    pub signature: Signature,
    pub digest: DocumentDigest,
    pub bytes_read: u64,
}

#[derive(Debug, Clone)]
pub struct StreamingSigner {
    backend: Arc<dyn CryptoBackend>,
    chunk_size: usize,
}

impl StreamingSigner {
    pub fn new(backend: Arc<dyn CryptoBackend>, chunk_size: usize) -> Self {
        Self {
            backend,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn with_default_chunk_size(backend: Arc<dyn CryptoBackend>) -> Self {
        Self::new(backend, DEFAULT_CHUNK_SIZE)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Sign `document` with `key`
    ///
    /// The key is consumed: it is dropped, and its secure storage zeroized, before this
    /// returns. The document is opened fresh for this pass and released on every path.
    ///
    /// # Errors
    ///
    /// - [`SignatureError::DocumentUnreadable`] if the document cannot be opened or read
    /// - [`SignatureError::SigningFailure`] if the backend rejects the key or fails
    /// - [`SignatureError::Cancelled`] if `cancel` fires between chunks
    pub fn sign(
        &self,
        document: &dyn DocumentSource,
        key: SigningKey,
        cancel: &CancellationToken,
    ) -> Result<SignedDocument> {
        let name = document.describe();
        debug!(document = %name, backend = %self.backend.name(), "Starting signing pass");

        let mut reader = document
            .open()
            .map_err(|source| SignatureError::DocumentUnreadable {
                document: name.clone(),
                source,
            })?;

        let (signature, summary) = key.with_pkey(|pkey| {
            let mut context = self.backend.sign_context(pkey)?;
            let summary = stream_chunks(&mut reader, self.chunk_size, cancel, |chunk| {
                context.update(chunk)
            })
            .map_err(|e| match e {
                StreamError::Read(source) => SignatureError::DocumentUnreadable {
                    document: name.clone(),
                    source,
                },
                StreamError::Consumer(err) => err,
            })?;
            let signature = context.finish()?;
            Ok((signature, summary))
        })?;
        drop(key);

        info!(
            document = %name,
            bytes = summary.bytes_read,
            signature_len = signature.len(),
            "Document signed"
        );

        Ok(SignedDocument {
            signature: Signature::try_from(signature)?,
            digest: summary.digest,
            bytes_read: summary.bytes_read,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::OpensslBackend;
    use crate::document::{BytesDocument, FileDocument};
    use crate::test_support::alice;
    use openssl::hash::MessageDigest;
    use openssl::sign::Signer;

    fn signer(chunk_size: usize) -> StreamingSigner {
        StreamingSigner::new(Arc::new(OpensslBackend::default()), chunk_size)
    }

    #[test]
    fn test_streaming_matches_single_shot() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i * 31 % 256) as u8).collect();
        let doc = BytesDocument::new("large.bin", data.clone());

        let signed = signer(1024)
            .sign(&doc, alice().signing_key(), &CancellationToken::new())
            .unwrap();
        assert_eq!(signed.bytes_read, data.len() as u64);

        let mut oneshot = Signer::new(MessageDigest::sha256(), &alice().key).unwrap();
        let expected = oneshot.sign_oneshot_to_vec(&data).unwrap();
        assert_eq!(signed.signature.as_bytes(), expected.as_slice());

        let other_chunking = signer(7).sign(&doc, alice().signing_key(), &CancellationToken::new());
        assert_eq!(other_chunking.unwrap().signature, signed.signature);
    }

    #[test]
    fn test_unreadable_document() {
        let doc = FileDocument::new("/nonexistent/docsign/contract.pdf");
        let err = signer(1024)
            .sign(&doc, alice().signing_key(), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, SignatureError::DocumentUnreadable { .. }));
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let doc = BytesDocument::new("memo", b"hello world".to_vec());
        let err = signer(1024)
            .sign(&doc, alice().signing_key(), &cancel)
            .unwrap_err();
        assert!(matches!(err, SignatureError::Cancelled));
    }

    #[test]
    fn test_empty_bytes_are_not_a_signature() {
        assert!(Signature::try_from(Vec::new()).is_err());
        let sig = Signature::try_from(vec![1, 2, 3]).unwrap();
        assert_eq!(format!("{:?}", sig), "Signature(3 bytes)");
        assert_eq!(sig.to_hex(), "010203");
    }
}
