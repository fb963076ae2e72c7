//! Key Locator Module
//!
//! Finds private-key containers and certificates in a single key directory by file
//! extension. The scan is non-recursive and read-only.
//!
//! Checking that the directory is accessible ([`check_access`]) is kept apart from the scan
//! itself ([`locate`]): acquiring the permission is the caller's job, the locator only
//! reports what it finds.
//!
//! # Example
//!
//! ```no_run
//! use docsign::error::CandidateKind;
//! use docsign::key_locator::{locate, select, ExtensionSet, SelectionPolicy};
//!
//! let private_keys = ExtensionSet::new(["key", "pem", "der", "p12"]);
//! let candidates = locate("keys", &private_keys)?;
//! let chosen = select(candidates, SelectionPolicy::Lexicographic, CandidateKind::PrivateKey)?;
//! # Ok::<(), docsign::error::SignatureError>(())
//! ```

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{CandidateKind, Result, SignatureError};

/// Case-insensitive set of file extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionSet {
    extensions: Vec<String>,
}

impl ExtensionSet {
    /// Build a set from extensions with or without a leading dot; empty entries are dropped
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        normalized.sort();
        normalized.dedup();
        Self {
            extensions: normalized,
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }
}

/// Result of the capability check on the key directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryAccess {
    Readable,
    /// The directory does not exist or is not a directory
    Missing,
}

/// How to pick one path when the locator returns several
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Sort candidates by path and take the first
    #[default]
    Lexicographic,
    /// Refuse to choose when more than one candidate exists
    RequireUnique,
}

/// Check that `directory` can be listed without scanning it
pub fn check_access<P: AsRef<Path>>(directory: P) -> Result<DirectoryAccess> {
    let directory = directory.as_ref();
    match fs::metadata(directory) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Ok(DirectoryAccess::Missing),
        Err(e) => return classify_open_error(directory, e).map(|_| DirectoryAccess::Missing),
    }

    match fs::read_dir(directory) {
        Ok(_) => Ok(DirectoryAccess::Readable),
        Err(e) => classify_open_error(directory, e).map(|_| DirectoryAccess::Missing),
    }
}

/// List the regular files directly inside `directory` whose extension is in `extensions`
///
/// Paths come back in directory-listing order, which is platform-defined. A missing
/// directory or one without matches yields an empty vector. Lack of permission is reported
/// as [`SignatureError::PermissionDenied`] so it is never confused with "nothing found".
pub fn locate<P: AsRef<Path>>(directory: P, extensions: &ExtensionSet) -> Result<Vec<PathBuf>> {
    let directory = directory.as_ref();

    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => return classify_open_error(directory, e),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(directory = %directory.display(), error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        let path = entry.path();
        if path.is_file() && extensions.matches(&path) {
            found.push(path);
        }
    }

    debug!(
        directory = %directory.display(),
        count = found.len(),
        "Located key material candidates"
    );
    Ok(found)
}

/// Map an error from opening the directory onto the locator's contract
fn classify_open_error(directory: &Path, error: io::Error) -> Result<Vec<PathBuf>> {
    match error.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => Ok(Vec::new()),
        io::ErrorKind::PermissionDenied => Err(SignatureError::PermissionDenied {
            path: directory.to_path_buf(),
        }),
        _ => Err(SignatureError::DirectoryUnreadable {
            path: directory.to_path_buf(),
            source: error,
        }),
    }
}

/// Choose a single `kind` candidate according to `policy`
///
/// Returns `Ok(None)` when there are no candidates.
pub fn select(
    mut candidates: Vec<PathBuf>,
    policy: SelectionPolicy,
    kind: CandidateKind,
) -> Result<Option<PathBuf>> {
    candidates.sort();
    match (candidates.len(), policy) {
        (0, _) => Ok(None),
        (1, _) => Ok(candidates.pop()),
        (count, SelectionPolicy::RequireUnique) => Err(SignatureError::AmbiguousCandidates {
            kind,
            count,
            candidates,
        }),
        (count, SelectionPolicy::Lexicographic) => {
            let chosen = candidates.swap_remove(0);
            warn!(
                %kind,
                count,
                chosen = %chosen.display(),
                "Multiple candidates found, using the first in path order"
            );
            Ok(Some(chosen))
        }
    }
}
