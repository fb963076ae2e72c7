//! Workflow Orchestrator
//!
//! Runs one sign-then-verify round trip:
//!
//! ```text
//! check directory → locate key → locate certificate → unlock key
//!     → load certificate → sign document → verify signature
//! ```
//!
//! Every stage ends up in the [`WorkflowReport`] as skipped, not found, failed (with the
//! typed reason) or succeeded. The first stage that does not succeed aborts the run; nothing
//! after it executes with partial state.

use secrecy::ExposeSecret;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backend::{CryptoBackend, OpensslBackend};
use crate::configs::{AppConfig, KeystoreConfig};
use crate::document::{DocumentDigest, DocumentSource};
use crate::error::{CandidateKind, Result, SignatureError};
use crate::key_loader::{load_certificate, load_private_key};
use crate::key_locator::{self, DirectoryAccess, ExtensionSet, SelectionPolicy};
use crate::secure_key::Password;
use crate::signer::{Signature, StreamingSigner};
use crate::verifier::{StreamingVerifier, Verdict};

/// Workflow stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    CheckDirectory = 0,
    LocateKey,
    LocateCertificate,
    UnlockKey,
    LoadCertificate,
    Sign,
    Verify,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::CheckDirectory,
        Stage::LocateKey,
        Stage::LocateCertificate,
        Stage::UnlockKey,
        Stage::LoadCertificate,
        Stage::Sign,
        Stage::Verify,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::CheckDirectory => "Check key directory",
            Stage::LocateKey => "Locate private key",
            Stage::LocateCertificate => "Locate certificate",
            Stage::UnlockKey => "Unlock private key",
            Stage::LoadCertificate => "Load certificate",
            Stage::Sign => "Sign document",
            Stage::Verify => "Verify signature",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum StageStatus {
    Skipped,
    NotFound(SignatureError),
    Failed(SignatureError),
    Succeeded,
}

impl StageStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Succeeded)
    }

    pub fn error(&self) -> Option<&SignatureError> {
        match self {
            StageStatus::NotFound(e) | StageStatus::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Skipped => f.write_str("skipped"),
            StageStatus::NotFound(e) => write!(f, "not found: {}", e),
            StageStatus::Failed(e) => write!(f, "failed: {}", e),
            StageStatus::Succeeded => f.write_str("ok"),
        }
    }
}

/// Everything one workflow invocation found out
#[derive(Debug)]
pub struct WorkflowReport {
    pub document: String,
    stages: [StageStatus; 7],
    pub key_path: Option<PathBuf>,
    pub certificate_path: Option<PathBuf>,
    pub certificate_subject: Option<String>,
    pub signature: Option<Signature>,
    pub digest: Option<DocumentDigest>,
    pub verdict: Option<Verdict>,
}

impl WorkflowReport {
    fn new(document: String) -> Self {
        Self {
            document,
            stages: Stage::ALL.map(|_| StageStatus::Skipped),
            key_path: None,
            certificate_path: None,
            certificate_subject: None,
            signature: None,
            digest: None,
            verdict: None,
        }
    }

    fn set(&mut self, stage: Stage, status: StageStatus) {
        self.stages[stage as usize] = status;
    }

    fn succeed(&mut self, stage: Stage) {
        debug!(%stage, "Stage succeeded");
        self.set(stage, StageStatus::Succeeded);
    }

    fn fail(&mut self, stage: Stage, error: SignatureError) {
        let status = if error.is_not_found() {
            StageStatus::NotFound(error)
        } else {
            StageStatus::Failed(error)
        };
        self.set(stage, status);
    }

    /// Final answer: was the document's authenticity verified
    pub fn verified(&self) -> bool {
        self.verdict == Some(Verdict::Valid)
    }

    pub fn status(&self, stage: Stage) -> &StageStatus {
        &self.stages[stage as usize]
    }

    /// Stages in execution order
    pub fn stages(&self) -> impl Iterator<Item = (Stage, &StageStatus)> {
        Stage::ALL.into_iter().zip(self.stages.iter())
    }

    /// The stage that stopped the workflow, if any
    pub fn failure(&self) -> Option<(Stage, &SignatureError)> {
        self.stages()
            .find_map(|(stage, status)| status.error().map(|e| (stage, e)))
    }

    /// Human-readable one-line outcome
    pub fn summary(&self) -> String {
        if let Some((stage, error)) = self.failure() {
            return format!("{} failed: {}", stage, error);
        }
        match self.verdict {
            Some(Verdict::Valid) => format!(
                "Document {} signed and verified successfully{}",
                self.document,
                self.certificate_subject
                    .as_ref()
                    .map(|s| format!(" ({})", s))
                    .unwrap_or_default()
            ),
            Some(Verdict::Invalid) => format!(
                "Document {} was signed, but the signature does not verify against the certificate; \
                 the certificate does not match the private key",
                self.document
            ),
            None => format!("Document {} was not processed", self.document),
        }
    }
}

/// Paths picked from the key directory for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub key_path: PathBuf,
    pub certificate_path: PathBuf,
}

/// Sign-and-verify orchestrator
///
/// Holds only immutable configuration and a shared backend, so one `Workflow` can serve
/// concurrent invocations on different documents.
#[derive(Debug, Clone)]
pub struct Workflow {
    directory: PathBuf,
    private_keys: ExtensionSet,
    certificates: ExtensionSet,
    selection: SelectionPolicy,
    signer: StreamingSigner,
    verifier: StreamingVerifier,
}

type StageResult<T> = std::result::Result<T, (Stage, SignatureError)>;

fn at<T>(stage: Stage, result: Result<T>) -> StageResult<T> {
    result.map_err(|e| (stage, e))
}

impl Workflow {
    pub fn new(keystore: &KeystoreConfig, backend: Arc<dyn CryptoBackend>, chunk_size: usize) -> Self {
        Self {
            directory: keystore.directory.clone(),
            private_keys: keystore.private_key_set(),
            certificates: keystore.certificate_set(),
            selection: keystore.selection,
            signer: StreamingSigner::new(backend.clone(), chunk_size),
            verifier: StreamingVerifier::new(backend, chunk_size),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let backend = OpensslBackend::new(config.signing.digest, config.signing.min_rsa_bits);
        Self::new(&config.keystore, Arc::new(backend), config.signing.chunk_size)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Locate and select the private key and certificate for one invocation
    pub fn locate_material(&self) -> Result<KeyMaterial> {
        self.locate_material_staged(None).map_err(|(_, e)| e)
    }

    fn locate_material_staged(
        &self,
        mut report: Option<&mut WorkflowReport>,
    ) -> StageResult<KeyMaterial> {
        let access = at(Stage::CheckDirectory, key_locator::check_access(&self.directory))?;
        if access == DirectoryAccess::Missing {
            return Err((
                Stage::CheckDirectory,
                SignatureError::NoKeyCandidate {
                    directory: self.directory.clone(),
                },
            ));
        }
        if let Some(r) = report.as_deref_mut() {
            r.succeed(Stage::CheckDirectory);
        }

        let key_path = self.pick(Stage::LocateKey, &self.private_keys, CandidateKind::PrivateKey)?;
        if let Some(r) = report.as_deref_mut() {
            r.key_path = Some(key_path.clone());
            r.succeed(Stage::LocateKey);
        }

        let certificate_path = self.pick(
            Stage::LocateCertificate,
            &self.certificates,
            CandidateKind::Certificate,
        )?;
        if let Some(r) = report.as_deref_mut() {
            r.certificate_path = Some(certificate_path.clone());
            r.succeed(Stage::LocateCertificate);
        }

        Ok(KeyMaterial {
            key_path,
            certificate_path,
        })
    }

    fn pick(
        &self,
        stage: Stage,
        extensions: &ExtensionSet,
        kind: CandidateKind,
    ) -> StageResult<PathBuf> {
        let candidates = at(stage, key_locator::locate(&self.directory, extensions))?;
        let chosen = at(
            stage,
            key_locator::select(candidates, self.selection, kind),
        )?;
        chosen.ok_or_else(|| {
            let directory = self.directory.clone();
            let error = match kind {
                CandidateKind::PrivateKey => SignatureError::NoKeyCandidate { directory },
                CandidateKind::Certificate => SignatureError::NoCertificateCandidate { directory },
            };
            (stage, error)
        })
    }

    /// Sign `document` with the key found in the key directory and verify the result
    /// against the paired certificate
    pub fn run(
        &self,
        document: &dyn DocumentSource,
        password: Password,
        cancel: &CancellationToken,
    ) -> WorkflowReport {
        let mut report = WorkflowReport::new(document.describe());

        match self.execute(document, password, cancel, &mut report) {
            Ok(()) => info!(
                document = %report.document,
                verified = report.verified(),
                "Workflow finished"
            ),
            Err((stage, err)) => {
                error!(
                    document = %report.document,
                    %stage,
                    kind = err.kind(),
                    error = %err,
                    "Workflow aborted"
                );
                report.fail(stage, err);
            }
        }

        report
    }

    fn execute(
        &self,
        document: &dyn DocumentSource,
        password: Password,
        cancel: &CancellationToken,
        report: &mut WorkflowReport,
    ) -> StageResult<()> {
        let material = self.locate_material_staged(Some(&mut *report))?;

        if password.expose_secret().is_empty() {
            return Err((Stage::UnlockKey, SignatureError::MissingPassword));
        }
        let key = at(
            Stage::UnlockKey,
            load_private_key(&material.key_path, password),
        )?;
        report.succeed(Stage::UnlockKey);

        let certificate = at(
            Stage::LoadCertificate,
            load_certificate(&material.certificate_path),
        )?;
        let public_key = at(Stage::LoadCertificate, certificate.public_key())?;
        report.certificate_subject = Some(certificate.subject());
        report.succeed(Stage::LoadCertificate);

        let signed = at(Stage::Sign, self.signer.sign(document, key, cancel))?;
        report.signature = Some(signed.signature.clone());
        report.digest = Some(signed.digest);
        report.succeed(Stage::Sign);

        let verified = at(
            Stage::Verify,
            self.verifier
                .verify(document, &signed.signature, &public_key, cancel),
        )?;
        if verified.digest != signed.digest || verified.bytes_read != signed.bytes_read {
            return Err((
                Stage::Verify,
                SignatureError::DocumentChanged {
                    document: document.describe(),
                },
            ));
        }
        report.verdict = Some(verified.verdict);
        report.succeed(Stage::Verify);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{BytesDocument, FileDocument};
    use crate::test_support::{alice, bob, password};
    use std::fs;
    use std::io::{self, Read};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn workflow(dir: &Path, selection: SelectionPolicy) -> Workflow {
        let keystore = KeystoreConfig {
            directory: dir.to_path_buf(),
            selection,
            ..KeystoreConfig::default()
        };
        Workflow::new(&keystore, Arc::new(OpensslBackend::default()), 1024)
    }

    fn alice_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        alice().write_p12(&dir.path().join("alice.p12"), "secret");
        alice().write_cert_pem(&dir.path().join("alice.cer"));
        dir
    }

    fn hello() -> BytesDocument {
        BytesDocument::new("hello.txt", b"hello world".to_vec())
    }

    #[test]
    fn test_alice_signs_and_verifies_bob_does_not() {
        let dir = alice_dir();
        let report = workflow(dir.path(), SelectionPolicy::Lexicographic).run(
            &hello(),
            password("secret"),
            &CancellationToken::new(),
        );

        assert!(report.verified(), "{}", report.summary());
        assert!(report.stages().all(|(_, status)| status.is_success()));
        assert_eq!(report.key_path, Some(dir.path().join("alice.p12")));
        assert!(report.summary().contains("verified successfully"));

        let signature = report.signature.expect("signature");
        let bob_cert = dir.path().join("bob.cer");
        bob().write_cert_pem(&bob_cert);
        let bob_key = load_certificate(&bob_cert).unwrap().public_key().unwrap();
        let verifier = StreamingVerifier::new(Arc::new(OpensslBackend::default()), 1024);
        let result = verifier
            .verify(&hello(), &signature, &bob_key, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.verdict, Verdict::Invalid);
    }

    #[test]
    fn test_mismatched_certificate_reports_invalid() {
        let dir = TempDir::new().unwrap();
        alice().write_p12(&dir.path().join("alice.p12"), "secret");
        bob().write_cert_pem(&dir.path().join("bob.cer"));

        let report = workflow(dir.path(), SelectionPolicy::Lexicographic).run(
            &hello(),
            password("secret"),
            &CancellationToken::new(),
        );
        assert!(!report.verified());
        assert_eq!(report.verdict, Some(Verdict::Invalid));
        assert!(report.failure().is_none());
        assert!(report.summary().contains("does not verify"));
    }

    #[test]
    fn test_wrong_password_aborts_before_signing() {
        let dir = alice_dir();
        let report = workflow(dir.path(), SelectionPolicy::Lexicographic).run(
            &hello(),
            password("not-the-password"),
            &CancellationToken::new(),
        );

        assert!(!report.verified());
        assert!(report.signature.is_none());
        assert!(matches!(
            report.status(Stage::UnlockKey),
            StageStatus::Failed(SignatureError::InvalidPassword { .. })
        ));
        assert!(matches!(report.status(Stage::Sign), StageStatus::Skipped));
        assert!(matches!(report.status(Stage::Verify), StageStatus::Skipped));
        assert!(report.summary().starts_with("Unlock private key failed"));
    }

    #[test]
    fn test_empty_password_is_rejected() {
        let dir = alice_dir();
        let report = workflow(dir.path(), SelectionPolicy::Lexicographic).run(
            &hello(),
            password(""),
            &CancellationToken::new(),
        );
        assert!(matches!(
            report.failure(),
            Some((Stage::UnlockKey, SignatureError::MissingPassword))
        ));
    }

    #[test]
    fn test_missing_material_is_not_found() {
        let dir = TempDir::new().unwrap();
        alice().write_cert_pem(&dir.path().join("alice.cer"));
        let report = workflow(dir.path(), SelectionPolicy::Lexicographic).run(
            &hello(),
            password("secret"),
            &CancellationToken::new(),
        );
        assert!(matches!(
            report.status(Stage::LocateKey),
            StageStatus::NotFound(SignatureError::NoKeyCandidate { .. })
        ));
        assert!(matches!(
            report.status(Stage::LocateCertificate),
            StageStatus::Skipped
        ));

        let dir = TempDir::new().unwrap();
        alice().write_p12(&dir.path().join("alice.p12"), "secret");
        let report = workflow(dir.path(), SelectionPolicy::Lexicographic).run(
            &hello(),
            password("secret"),
            &CancellationToken::new(),
        );
        assert!(matches!(
            report.failure(),
            Some((Stage::LocateCertificate, SignatureError::NoCertificateCandidate { .. }))
        ));

        let missing = dir.path().join("nowhere");
        let report = workflow(&missing, SelectionPolicy::Lexicographic).run(
            &hello(),
            password("secret"),
            &CancellationToken::new(),
        );
        assert!(matches!(
            report.status(Stage::CheckDirectory),
            StageStatus::NotFound(_)
        ));
    }

    #[test]
    fn test_selection_policies() {
        let dir = alice_dir();
        bob().write_p12(&dir.path().join("zed.p12"), "other");

        let report = workflow(dir.path(), SelectionPolicy::Lexicographic).run(
            &hello(),
            password("secret"),
            &CancellationToken::new(),
        );
        assert!(report.verified(), "{}", report.summary());
        assert_eq!(report.key_path, Some(dir.path().join("alice.p12")));

        let report = workflow(dir.path(), SelectionPolicy::RequireUnique).run(
            &hello(),
            password("secret"),
            &CancellationToken::new(),
        );
        assert!(matches!(
            report.failure(),
            Some((
                Stage::LocateKey,
                SignatureError::AmbiguousCandidates {
                    kind: CandidateKind::PrivateKey,
                    count: 2,
                    ..
                }
            ))
        ));
    }

    #[test]
    fn test_unreadable_document() {
        let dir = alice_dir();
        let report = workflow(dir.path(), SelectionPolicy::Lexicographic).run(
            &FileDocument::new(dir.path().join("missing.pdf")),
            password("secret"),
            &CancellationToken::new(),
        );
        assert!(matches!(
            report.failure(),
            Some((Stage::Sign, SignatureError::DocumentUnreadable { .. }))
        ));
        assert!(report.signature.is_none());
    }

    /// Returns different content on every open
    struct ShiftingDocument {
        opens: AtomicUsize,
    }

    impl DocumentSource for ShiftingDocument {
        fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
            let n = self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(io::Cursor::new(format!("revision {}", n).into_bytes())))
        }

        fn describe(&self) -> String {
            "shifting.txt".to_string()
        }
    }

    #[test]
    fn test_document_changed_between_passes() {
        let dir = alice_dir();
        let doc = ShiftingDocument {
            opens: AtomicUsize::new(0),
        };
        let report = workflow(dir.path(), SelectionPolicy::Lexicographic).run(
            &doc,
            password("secret"),
            &CancellationToken::new(),
        );
        assert!(!report.verified());
        assert!(matches!(
            report.failure(),
            Some((Stage::Verify, SignatureError::DocumentChanged { .. }))
        ));
    }

    #[test]
    fn test_file_document_round_trip() {
        let dir = alice_dir();
        let doc_path = dir.path().join("contract.pdf");
        let content: Vec<u8> = (0..50_000u32).map(|i| (i % 253) as u8).collect();
        fs::write(&doc_path, &content).unwrap();

        let report = workflow(dir.path(), SelectionPolicy::Lexicographic).run(
            &FileDocument::new(&doc_path),
            password("secret"),
            &CancellationToken::new(),
        );
        assert!(report.verified(), "{}", report.summary());
        assert_eq!(report.signature.as_ref().map(|s| s.len()), Some(256));
    }

    #[test]
    fn test_concurrent_invocations() {
        let dir = alice_dir();
        let workflow = workflow(dir.path(), SelectionPolicy::Lexicographic);

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let workflow = &workflow;
                    scope.spawn(move || {
                        let doc = BytesDocument::new(format!("doc-{}", i), vec![i as u8; 4096]);
                        workflow.run(&doc, password("secret"), &CancellationToken::new())
                    })
                })
                .collect();
            for handle in handles {
                assert!(handle.join().unwrap().verified());
            }
        });
    }

    #[test]
    fn test_locate_material() {
        let dir = alice_dir();
        let material = workflow(dir.path(), SelectionPolicy::Lexicographic)
            .locate_material()
            .unwrap();
        assert_eq!(material.key_path, dir.path().join("alice.p12"));
        assert_eq!(material.certificate_path, dir.path().join("alice.cer"));
    }
}
