//! Resumable, chunked uploads with per-request retry.
//!
//! [`VideoService`] opens an upload session and hands back a
//! [`ResumableRequest`]; [`TransferEngine`] pulls chunks from it until the
//! platform returns the created resource. Every request (the session POST and
//! each chunk) is retried on its own, so a blip late in a large file only
//! re-sends the chunk that failed.

pub mod classify;
pub mod retry;
pub mod youtube;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metadata::VideoMetadata;
use crate::progress::{NoProgress, ProgressSink};

pub use classify::{ErrorClass, QuotaSignature, api_error_message, classify};
pub use retry::RetryPolicy;
pub use youtube::YouTubeUploader;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {message}")]
    Api {
        status: u16,
        message: String,
        class: ErrorClass,
    },
    #[error("quota exhausted (HTTP {status}): {message}")]
    QuotaExhausted { status: u16, message: String },
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<TransferError>,
    },
    #[error("reading upload source: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl TransferError {
    /// Builds the error for a non-success HTTP status.
    pub fn from_status(status: u16, body: &str, quota: &QuotaSignature) -> Self {
        let message = api_error_message(body);
        match classify(status, body, quota) {
            ErrorClass::QuotaExhausted => TransferError::QuotaExhausted { status, message },
            class => TransferError::Api {
                status,
                message,
                class,
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::Network(_) => true,
            TransferError::Api { class, .. } => *class == ErrorClass::Transient,
            _ => false,
        }
    }

    pub fn is_quota_exhausted(&self) -> bool {
        match self {
            TransferError::QuotaExhausted { .. } => true,
            TransferError::RetriesExhausted { source, .. } => source.is_quota_exhausted(),
            _ => false,
        }
    }
}

/// Result of one chunk request.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkStatus {
    /// Fraction of the file the platform has acknowledged so far.
    Progress(f64),
    /// The created video resource.
    Complete(Value),
}

pub trait ResumableRequest: Send {
    /// Sends the next chunk. Calling again after an error re-sends from the
    /// last acknowledged offset.
    fn next_chunk(&mut self) -> impl Future<Output = Result<ChunkStatus, TransferError>> + Send;
}

pub trait VideoService: Send + Sync {
    type Request: ResumableRequest;

    /// Opens an upload session for `path` with `metadata` attached.
    fn insert(
        &self,
        path: &Path,
        metadata: &VideoMetadata,
    ) -> impl Future<Output = Result<Self::Request, TransferError>> + Send;
}

pub struct TransferEngine<S> {
    service: S,
    policy: RetryPolicy,
    progress: Arc<dyn ProgressSink>,
}

impl<S: VideoService> TransferEngine<S> {
    pub fn new(service: S, policy: RetryPolicy) -> Self {
        Self {
            service,
            policy,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Uploads one file and returns the id the platform assigned.
    ///
    /// `Ok(None)` means the upload finished but the final response carried no
    /// id; callers treat that as a failed upload.
    pub async fn upload_video(
        &self,
        path: &Path,
        metadata: &VideoMetadata,
    ) -> Result<Option<String>, TransferError> {
        let mut request = self.open_session(path, metadata).await?;
        self.progress.on_progress(path, 0.0);

        loop {
            match self.send_chunk(&mut request, path).await? {
                ChunkStatus::Progress(fraction) => {
                    debug!(path = %path.display(), fraction, "chunk acknowledged");
                    self.progress.on_progress(path, fraction);
                }
                ChunkStatus::Complete(resource) => {
                    let video_id = resource
                        .get("id")
                        .and_then(Value::as_str)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string);
                    match &video_id {
                        Some(id) => {
                            self.progress.on_progress(path, 1.0);
                            info!(path = %path.display(), video_id = %id, "upload complete");
                        }
                        None => warn!(
                            path = %path.display(),
                            response = %resource,
                            "upload finished without a video id"
                        ),
                    }
                    return Ok(video_id);
                }
            }
        }
    }

    async fn open_session(
        &self,
        path: &Path,
        metadata: &VideoMetadata,
    ) -> Result<S::Request, TransferError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.service.insert(path, metadata).await {
                Ok(request) => return Ok(request),
                Err(err) => err,
            };
            let Some(delay) = self.policy.retry_delay(attempt, &err) else {
                return Err(self.policy.give_up(attempt, err));
            };
            warn!(
                path = %path.display(),
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "opening upload session failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn send_chunk(
        &self,
        request: &mut S::Request,
        path: &Path,
    ) -> Result<ChunkStatus, TransferError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match request.next_chunk().await {
                Ok(status) => return Ok(status),
                Err(err) => err,
            };
            let Some(delay) = self.policy.retry_delay(attempt, &err) else {
                return Err(self.policy.give_up(attempt, err));
            };
            warn!(
                path = %path.display(),
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "chunk upload failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted stand-in for the platform, keyed by file name.

    use std::collections::{HashMap, VecDeque};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::{Value, json};

    use super::{
        ChunkStatus, QuotaSignature, ResumableRequest, RetryPolicy, TransferError, VideoService,
    };
    use crate::metadata::VideoMetadata;
    use crate::progress::ProgressSink;

    pub const QUOTA_BODY: &str =
        r#"{"error":{"code":403,"message":"quota","errors":[{"reason":"quotaExceeded"}]}}"#;

    #[derive(Debug, Clone)]
    pub enum Step {
        /// Fails the session POST; only honored at the front of a script.
        RejectInsert(u16, &'static str),
        Progress(f64),
        Done(Value),
        Fail(u16, &'static str),
        Network,
    }

    #[derive(Default)]
    pub struct ScriptedService {
        scripts: Mutex<HashMap<String, VecDeque<Step>>>,
        pub inserts: AtomicUsize,
        pub chunk_calls: Arc<AtomicUsize>,
        quota: QuotaSignature,
    }

    impl ScriptedService {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script(self, file_name: &str, steps: Vec<Step>) -> Self {
            if let Ok(mut scripts) = self.scripts.lock() {
                scripts.insert(file_name.to_string(), steps.into());
            }
            self
        }

        pub fn inserts(&self) -> usize {
            self.inserts.load(Ordering::SeqCst)
        }

        pub fn chunk_calls(&self) -> usize {
            self.chunk_calls.load(Ordering::SeqCst)
        }
    }

    pub struct ScriptedRequest {
        steps: VecDeque<Step>,
        calls: Arc<AtomicUsize>,
        quota: QuotaSignature,
    }

    impl VideoService for ScriptedService {
        type Request = ScriptedRequest;

        async fn insert(
            &self,
            path: &Path,
            _metadata: &VideoMetadata,
        ) -> Result<ScriptedRequest, TransferError> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry(name.clone()).or_insert_with(|| {
                let stem = name.split('.').next().unwrap_or_default().to_string();
                VecDeque::from([Step::Done(json!({ "id": format!("vid-{stem}") }))])
            });
            if let Some(Step::RejectInsert(status, body)) = script.front().cloned() {
                script.pop_front();
                return Err(TransferError::from_status(status, body, &self.quota));
            }
            Ok(ScriptedRequest {
                steps: std::mem::take(script),
                calls: self.chunk_calls.clone(),
                quota: self.quota.clone(),
            })
        }
    }

    impl ResumableRequest for ScriptedRequest {
        async fn next_chunk(&mut self) -> Result<ChunkStatus, TransferError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.steps.pop_front() {
                Some(Step::Progress(fraction)) => Ok(ChunkStatus::Progress(fraction)),
                Some(Step::Done(resource)) => Ok(ChunkStatus::Complete(resource)),
                Some(Step::Fail(status, body)) => {
                    Err(TransferError::from_status(status, body, &self.quota))
                }
                Some(Step::Network) => Err(TransferError::Network("connection reset".into())),
                Some(Step::RejectInsert(..)) | None => {
                    Err(TransferError::Protocol("script exhausted".into()))
                }
            }
        }
    }

    #[derive(Default)]
    pub struct RecordingProgress {
        pub seen: Mutex<Vec<f64>>,
    }

    impl ProgressSink for RecordingProgress {
        fn on_progress(&self, _path: &Path, fraction: f64) {
            self.seen.lock().unwrap().push(fraction);
        }
    }

    pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts)
            .with_delays(Duration::from_millis(1), Duration::from_millis(4))
    }
}
