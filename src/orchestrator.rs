//! Drives a batch of files through duplicate detection, upload and ledger
//! recording, strictly one file at a time.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::fingerprint::Fingerprinter;
use crate::history::HistoryStore;
use crate::metadata::MetadataSource;
use crate::transfer::{TransferEngine, VideoService};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOptions {
    /// Skip files whose exact path is already in the ledger without hashing.
    pub simple_check: bool,
    /// Report what would happen without uploading or writing the ledger.
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    DuplicatePath,
    DuplicateContent { hash: String },
    WouldUpload { hash: String },
    Uploaded { video_id: String, hash: String },
    Failed { error: String },
    QuotaExhausted { error: String },
}

impl FileOutcome {
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            FileOutcome::DuplicatePath | FileOutcome::DuplicateContent { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FileOutcome::Failed { .. } | FileOutcome::QuotaExhausted { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub path: PathBuf,
    pub outcome: FileOutcome,
}

impl fmt::Display for FileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = display_name(&self.path);
        match &self.outcome {
            FileOutcome::DuplicatePath => write!(f, "Skipping duplicate (by path): {name}"),
            FileOutcome::DuplicateContent { .. } => write!(f, "Skipping duplicate: {name}"),
            FileOutcome::WouldUpload { .. } => write!(f, "[Dry Run] Would upload: {name}"),
            FileOutcome::Uploaded { video_id, .. } => write!(f, "Uploaded {name} ({video_id})"),
            FileOutcome::Failed { error } => write!(f, "Error processing {name}: {error}"),
            FileOutcome::QuotaExhausted { error } => {
                write!(f, "Quota exhausted while uploading {name}: {error}")
            }
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
    /// Files left untouched after the batch stopped on a quota rejection.
    pub not_attempted: Vec<PathBuf>,
    pub quota_exhausted: bool,
}

impl BatchReport {
    pub fn successes(&self) -> usize {
        self.files
            .iter()
            .filter(|report| matches!(report.outcome, FileOutcome::Uploaded { .. }))
            .count()
    }

    pub fn failures(&self) -> usize {
        self.files
            .iter()
            .filter(|report| report.outcome.is_failure())
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.files
            .iter()
            .filter(|report| report.outcome.is_skip())
            .count()
    }

    pub fn would_upload(&self) -> usize {
        self.files
            .iter()
            .filter(|report| matches!(report.outcome, FileOutcome::WouldUpload { .. }))
            .count()
    }

    /// `"<n> success, <m> failed"`, followed by skip, dry-run and
    /// not-attempted counts when any are non-zero.
    pub fn summary(&self) -> String {
        let mut summary = format!("{} success, {} failed", self.successes(), self.failures());
        let skipped = self.skipped();
        if skipped > 0 {
            summary.push_str(&format!(", {skipped} skipped"));
        }
        let would_upload = self.would_upload();
        if would_upload > 0 {
            summary.push_str(&format!(", {would_upload} would upload"));
        }
        if !self.not_attempted.is_empty() {
            summary.push_str(&format!(", {} not attempted", self.not_attempted.len()));
        }
        summary
    }
}

pub struct UploadOrchestrator<'a, S> {
    history: &'a HistoryStore,
    engine: &'a TransferEngine<S>,
    metadata: &'a dyn MetadataSource,
    fingerprinter: Arc<dyn Fingerprinter>,
}

impl<'a, S: VideoService> UploadOrchestrator<'a, S> {
    pub fn new(
        history: &'a HistoryStore,
        engine: &'a TransferEngine<S>,
        metadata: &'a dyn MetadataSource,
        fingerprinter: Arc<dyn Fingerprinter>,
    ) -> Self {
        Self {
            history,
            engine,
            metadata,
            fingerprinter,
        }
    }

    /// Processes `paths` in order. Per-file failures are recorded and the
    /// batch moves on; a quota rejection records the file and stops. Ledger
    /// errors abort the whole batch.
    pub async fn process_batch(
        &self,
        paths: &[PathBuf],
        options: BatchOptions,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        for (index, path) in paths.iter().enumerate() {
            let outcome = self.process_file(path, options).await?;
            let stop = matches!(outcome, FileOutcome::QuotaExhausted { .. });
            report.files.push(FileReport {
                path: path.clone(),
                outcome,
            });
            if stop {
                report.quota_exhausted = true;
                report.not_attempted = paths[index + 1..].to_vec();
                error!(
                    remaining = report.not_attempted.len(),
                    "upload quota exhausted, stopping batch"
                );
                break;
            }
        }

        info!(summary = %report.summary(), "batch finished");
        Ok(report)
    }

    async fn process_file(&self, path: &Path, options: BatchOptions) -> Result<FileOutcome> {
        let path_key = path.to_string_lossy();

        if options.simple_check && self.history.is_uploaded_by_path(&path_key).await? {
            info!(path = %path.display(), "skipping duplicate (by path)");
            return Ok(FileOutcome::DuplicatePath);
        }

        let fingerprinter = Arc::clone(&self.fingerprinter);
        let source = path.to_path_buf();
        let hashed = tokio::task::spawn_blocking(move || fingerprinter.fingerprint(&source))
            .await
            .context("fingerprint worker stopped")?;
        let hash = match hashed {
            Ok(hash) => hash,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not fingerprint file");
                return Ok(FileOutcome::Failed {
                    error: format!("fingerprinting failed: {err}"),
                });
            }
        };

        if self.history.is_uploaded(&hash).await? {
            info!(path = %path.display(), hash = %hash, "skipping duplicate");
            return Ok(FileOutcome::DuplicateContent { hash });
        }

        if options.dry_run {
            info!(path = %path.display(), "dry run, would upload");
            return Ok(FileOutcome::WouldUpload { hash });
        }

        let metadata = match self.metadata.generate(path) {
            Ok(metadata) => metadata,
            Err(err) => {
                let error = format!("metadata generation failed: {err:#}");
                warn!(path = %path.display(), error = %error, "skipping upload");
                self.history.add_failure(&path_key, &hash, &error).await?;
                return Ok(FileOutcome::Failed { error });
            }
        };

        info!(path = %path.display(), title = %metadata.title, "uploading");
        match self.engine.upload_video(path, &metadata).await {
            Ok(Some(video_id)) => {
                self.history
                    .add_record(&path_key, &hash, &video_id, &metadata.to_json(), None)
                    .await?;
                Ok(FileOutcome::Uploaded { video_id, hash })
            }
            Ok(None) => {
                let error = "upload finished without a video id".to_string();
                self.history.add_failure(&path_key, &hash, &error).await?;
                Ok(FileOutcome::Failed { error })
            }
            Err(err) if err.is_quota_exhausted() => {
                let error = err.to_string();
                self.history.add_failure(&path_key, &hash, &error).await?;
                Ok(FileOutcome::QuotaExhausted { error })
            }
            Err(err) => {
                let error = err.to_string();
                warn!(path = %path.display(), error = %error, "upload failed");
                self.history.add_failure(&path_key, &hash, &error).await?;
                Ok(FileOutcome::Failed { error })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Blake3Fingerprinter;
    use crate::history::UploadStatus;
    use crate::metadata::{FileNameMetadata, VideoMetadata};
    use crate::transfer::testing::{QUOTA_BODY, ScriptedService, Step, fast_policy};
    use serde_json::json;
    use std::fs;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, mpsc};
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    struct CountingFingerprinter {
        calls: AtomicUsize,
    }

    impl Fingerprinter for CountingFingerprinter {
        fn fingerprint(&self, path: &Path) -> io::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            crate::fingerprint::fingerprint_file(path)
        }
    }

    /// Hashes only once the test opens the gate.
    struct GatedFingerprinter {
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl Fingerprinter for GatedFingerprinter {
        fn fingerprint(&self, path: &Path) -> io::Result<String> {
            self.gate
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "gate never opened"))?;
            crate::fingerprint::fingerprint_file(path)
        }
    }

    struct FailingMetadata;

    impl MetadataSource for FailingMetadata {
        fn generate(&self, _path: &Path) -> anyhow::Result<VideoMetadata> {
            anyhow::bail!("no title available")
        }
    }

    struct Fixture {
        dir: TempDir,
        history: HistoryStore,
    }

    impl Fixture {
        async fn new() -> Result<Self> {
            let dir = tempdir()?;
            let history = HistoryStore::open(&dir.path().join("history.db")).await?;
            Ok(Self { dir, history })
        }

        fn video(&self, name: &str, contents: &str) -> PathBuf {
            let folder = self.dir.path().join("clips");
            fs::create_dir_all(&folder).unwrap();
            let path = folder.join(name);
            fs::write(&path, contents).unwrap();
            path
        }
    }

    #[tokio::test]
    async fn quota_stops_the_rest_of_the_batch() -> Result<()> {
        let fixture = Fixture::new().await?;
        let files = vec![
            fixture.video("v1.mp4", "one"),
            fixture.video("v2.mp4", "two"),
            fixture.video("v3.mp4", "three"),
        ];
        let service = ScriptedService::new().script("v2.mp4", vec![Step::Fail(403, QUOTA_BODY)]);
        let metadata = FileNameMetadata::default();
        let engine = TransferEngine::new(service, fast_policy(3));
        let orchestrator = UploadOrchestrator::new(
            &fixture.history,
            &engine,
            &metadata,
            Arc::new(Blake3Fingerprinter),
        );

        let report = orchestrator
            .process_batch(&files, BatchOptions::default())
            .await?;

        assert!(report.quota_exhausted);
        assert_eq!(report.files.len(), 2);
        assert!(matches!(report.files[0].outcome, FileOutcome::Uploaded { .. }));
        assert!(matches!(
            report.files[1].outcome,
            FileOutcome::QuotaExhausted { .. }
        ));
        assert_eq!(report.not_attempted, vec![files[2].clone()]);
        assert_eq!(engine.service().inserts(), 2);

        let records = fixture.history.get_all_records(0).await?;
        assert_eq!(records.len(), 2);
        let v2 = fixture
            .history
            .get_record_by_path(&files[1].to_string_lossy())
            .await?
            .expect("v2 recorded");
        assert_eq!(v2.status, UploadStatus::Failed);
        assert!(
            fixture
                .history
                .get_record_by_path(&files[2].to_string_lossy())
                .await?
                .is_none()
        );
        Ok(())
    }

    #[tokio::test]
    async fn partial_batch_records_one_success_and_one_failure() -> Result<()> {
        let fixture = Fixture::new().await?;
        let files = vec![fixture.video("v1.mp4", "one"), fixture.video("v2.mp4", "two")];
        let service =
            ScriptedService::new().script("v2.mp4", vec![Step::Fail(400, "Upload failed")]);
        let metadata = FileNameMetadata::default();
        let engine = TransferEngine::new(service, fast_policy(3));
        let orchestrator = UploadOrchestrator::new(
            &fixture.history,
            &engine,
            &metadata,
            Arc::new(Blake3Fingerprinter),
        );

        let report = orchestrator
            .process_batch(&files, BatchOptions::default())
            .await?;

        assert_eq!(report.summary(), "1 success, 1 failed");
        assert!(!report.quota_exhausted);
        assert_eq!(fixture.history.get_upload_count().await?, 2);
        assert_eq!(fixture.history.get_failed_records().await?.len(), 1);

        let uploaded = fixture
            .history
            .get_record_by_video_id("vid-v1")
            .await?
            .expect("success recorded");
        assert_eq!(uploaded.title(), Some("v1"));
        assert_eq!(uploaded.playlist_name.as_deref(), Some("clips"));
        Ok(())
    }

    #[tokio::test]
    async fn simple_check_skips_hashing_for_known_paths() -> Result<()> {
        let fixture = Fixture::new().await?;
        let file = fixture.video("v1.mp4", "one");
        fixture
            .history
            .add_failure(&file.to_string_lossy(), "old-hash", "earlier failure")
            .await?;

        let metadata = FileNameMetadata::default();
        let engine = TransferEngine::new(ScriptedService::new(), fast_policy(3));
        let fingerprinter = Arc::new(CountingFingerprinter {
            calls: AtomicUsize::new(0),
        });
        let orchestrator = UploadOrchestrator::new(
            &fixture.history,
            &engine,
            &metadata,
            fingerprinter.clone(),
        );

        let report = orchestrator
            .process_batch(
                &[file.clone()],
                BatchOptions {
                    simple_check: true,
                    dry_run: false,
                },
            )
            .await?;
        assert_eq!(report.files[0].outcome, FileOutcome::DuplicatePath);
        assert_eq!(fingerprinter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.service().inserts(), 0);

        let report = orchestrator
            .process_batch(&[file], BatchOptions::default())
            .await?;
        assert!(matches!(report.files[0].outcome, FileOutcome::Uploaded { .. }));
        assert_eq!(fingerprinter.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn content_duplicates_are_skipped_under_any_name() -> Result<()> {
        let fixture = Fixture::new().await?;
        let original = fixture.video("original.mp4", "same bytes");
        let copy = fixture.video("renamed.mov", "same bytes");
        let metadata = FileNameMetadata::default();
        let engine = TransferEngine::new(ScriptedService::new(), fast_policy(3));
        let orchestrator = UploadOrchestrator::new(
            &fixture.history,
            &engine,
            &metadata,
            Arc::new(Blake3Fingerprinter),
        );

        let report = orchestrator
            .process_batch(&[original, copy], BatchOptions::default())
            .await?;
        assert!(matches!(report.files[0].outcome, FileOutcome::Uploaded { .. }));
        assert!(matches!(
            report.files[1].outcome,
            FileOutcome::DuplicateContent { .. }
        ));
        assert_eq!(report.summary(), "1 success, 0 failed, 1 skipped");
        assert_eq!(engine.service().inserts(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn dry_run_leaves_ledger_and_platform_alone() -> Result<()> {
        let fixture = Fixture::new().await?;
        let files = vec![fixture.video("v1.mp4", "one"), fixture.video("v2.mp4", "two")];
        let engine = TransferEngine::new(ScriptedService::new(), fast_policy(3));
        let orchestrator = UploadOrchestrator::new(
            &fixture.history,
            &engine,
            &FailingMetadata,
            Arc::new(Blake3Fingerprinter),
        );

        let report = orchestrator
            .process_batch(
                &files,
                BatchOptions {
                    simple_check: false,
                    dry_run: true,
                },
            )
            .await?;
        assert!(report
            .files
            .iter()
            .all(|file| matches!(file.outcome, FileOutcome::WouldUpload { .. })));
        assert_eq!(report.summary(), "0 success, 0 failed, 2 would upload");
        assert_eq!(fixture.history.get_upload_count().await?, 0);
        assert_eq!(engine.service().inserts(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_id_and_metadata_errors_are_recorded_as_failures() -> Result<()> {
        let fixture = Fixture::new().await?;
        let file = fixture.video("odd.mp4", "odd");
        let service =
            ScriptedService::new().script("odd.mp4", vec![Step::Done(json!({"kind": "odd"}))]);
        let metadata = FileNameMetadata::default();
        let engine = TransferEngine::new(service, fast_policy(3));
        let orchestrator = UploadOrchestrator::new(
            &fixture.history,
            &engine,
            &metadata,
            Arc::new(Blake3Fingerprinter),
        );

        let report = orchestrator
            .process_batch(&[file.clone()], BatchOptions::default())
            .await?;
        assert_eq!(
            report.files[0].outcome,
            FileOutcome::Failed {
                error: "upload finished without a video id".into()
            }
        );

        let broken = UploadOrchestrator::new(
            &fixture.history,
            &engine,
            &FailingMetadata,
            Arc::new(Blake3Fingerprinter),
        );
        let report = broken
            .process_batch(&[file], BatchOptions::default())
            .await?;
        assert!(report.files[0].outcome.is_failure());
        assert_eq!(fixture.history.get_failed_records().await?.len(), 2);
        assert_eq!(engine.service().inserts(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_files_fail_without_a_ledger_row() -> Result<()> {
        let fixture = Fixture::new().await?;
        let ghost = fixture.dir.path().join("ghost.mp4");
        let metadata = FileNameMetadata::default();
        let engine = TransferEngine::new(ScriptedService::new(), fast_policy(3));
        let orchestrator = UploadOrchestrator::new(
            &fixture.history,
            &engine,
            &metadata,
            Arc::new(Blake3Fingerprinter),
        );

        let report = orchestrator
            .process_batch(&[ghost], BatchOptions::default())
            .await?;
        assert_eq!(report.summary(), "0 success, 1 failed");
        assert_eq!(fixture.history.get_upload_count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn hashing_runs_off_the_async_thread() -> Result<()> {
        let fixture = Fixture::new().await?;
        let files = [fixture.video("v1.mp4", "one")];
        let (open, gate) = mpsc::channel();
        let metadata = FileNameMetadata::default();
        let engine = TransferEngine::new(ScriptedService::new(), fast_policy(3));
        let orchestrator = UploadOrchestrator::new(
            &fixture.history,
            &engine,
            &metadata,
            Arc::new(GatedFingerprinter {
                gate: Mutex::new(gate),
            }),
        );

        // The gate is opened by a sibling future on the same current-thread
        // runtime, which only gets polled if hashing is not inline.
        let (report, ()) = tokio::join!(
            orchestrator.process_batch(&files, BatchOptions::default()),
            async {
                tokio::task::yield_now().await;
                open.send(()).unwrap();
            }
        );
        assert!(matches!(
            report?.files[0].outcome,
            FileOutcome::Uploaded { .. }
        ));
        Ok(())
    }

    #[test]
    fn reports_render_operator_lines() {
        let report = FileReport {
            path: PathBuf::from("/clips/v1.mp4"),
            outcome: FileOutcome::DuplicatePath,
        };
        assert_eq!(report.to_string(), "Skipping duplicate (by path): v1.mp4");

        let report = FileReport {
            path: PathBuf::from("/clips/v1.mp4"),
            outcome: FileOutcome::Failed {
                error: "boom".into(),
            },
        };
        assert_eq!(report.to_string(), "Error processing v1.mp4: boom");
    }
}
