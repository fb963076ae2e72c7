//! Re-openable document handles and chunked streaming
//!
//! A document is never loaded into memory by the signer or verifier. Each pass calls
//! [`DocumentSource::open`] for a fresh reader and consumes it chunk by chunk. Alongside the
//! signature primitive every pass also computes a SHA-256 digest of the bytes it saw, so the
//! workflow can tell whether both passes read identical content.

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::SignatureError;

/// Anything that can be opened for a fresh read from the first byte, any number of times
pub trait DocumentSource: Send + Sync {
    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>>;

    /// Human-readable name used in status messages and logs
    fn describe(&self) -> String;
}

/// A document on the local filesystem
#[derive(Debug, Clone)]
pub struct FileDocument {
    path: PathBuf,
}

impl FileDocument {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentSource for FileDocument {
    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A document whose bytes the caller already holds
#[derive(Debug, Clone)]
pub struct BytesDocument {
    name: String,
    bytes: Arc<[u8]>,
}

impl BytesDocument {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

impl DocumentSource for BytesDocument {
    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(io::Cursor::new(&self.bytes[..])))
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// SHA-256 of the exact bytes consumed by one pass
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DocumentDigest([u8; 32]);

impl DocumentDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for DocumentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentDigest({})", self.to_hex())
    }
}

impl fmt::Display for DocumentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// What a completed pass over a document saw
#[derive(Debug, Clone, Copy)]
pub struct StreamSummary {
    pub bytes_read: u64,
    pub digest: DocumentDigest,
}

/// Why a streaming pass stopped early
#[derive(Debug)]
pub(crate) enum StreamError {
    /// The reader failed
    Read(io::Error),
    /// The chunk consumer failed, or the pass was cancelled
    Consumer(SignatureError),
}

/// Feed `reader` to `consume` in chunks of at most `chunk_size` bytes
///
/// Cancellation is checked before every read.
pub(crate) fn stream_chunks<R, F>(
    reader: &mut R,
    chunk_size: usize,
    cancel: &CancellationToken,
    mut consume: F,
) -> Result<StreamSummary, StreamError>
where
    R: Read + ?Sized,
    F: FnMut(&[u8]) -> Result<(), SignatureError>,
{
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut hasher = Sha256::new();
    let mut bytes_read = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(StreamError::Consumer(SignatureError::Cancelled));
        }

        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StreamError::Read(e)),
        };

        let chunk = &buffer[..n];
        hasher.update(chunk);
        consume(chunk).map_err(StreamError::Consumer)?;
        bytes_read += n as u64;
    }

    Ok(StreamSummary {
        bytes_read,
        digest: DocumentDigest(hasher.finalize().into()),
    })
}
