//! YouTube Data API v3 resumable upload over `ureq`.
//!
//! `ureq` is blocking, so every exchange runs on tokio's blocking pool and
//! the engine only ever awaits the finished reply.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use super::{ChunkStatus, QuotaSignature, ResumableRequest, TransferError, VideoService};
use crate::config::RuntimeConfig;
use crate::credentials::Credential;
use crate::metadata::VideoMetadata;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const IO_TIMEOUT: Duration = Duration::from_secs(300);
const UPLOAD_PARTS: &str = "snippet,status,recordingDetails";
/// Status the resumable protocol uses for "chunk stored, send more".
const RESUME_INCOMPLETE: u16 = 308;

/// Status, interesting headers and body of a finished HTTP exchange.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    pub status: u16,
    pub location: Option<String>,
    pub range: Option<String>,
    pub body: String,
}

impl Reply {
    /// Reads the whole response. A connection that drops mid-body is a
    /// network failure, never an empty body.
    fn from_response(response: ureq::Response) -> Result<Self, TransferError> {
        let status = response.status();
        let location = response.header("Location").map(str::to_string);
        let range = response.header("Range").map(str::to_string);
        let body = response.into_string().map_err(|err| {
            TransferError::Network(format!("reading HTTP {status} response body: {err}"))
        })?;
        Ok(Self {
            status,
            location,
            range,
            body,
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

/// Agent that never follows redirects, so the protocol's 308 reaches us.
pub(crate) fn build_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .redirects(0)
        .timeout_connect(CONNECT_TIMEOUT)
        .timeout_read(IO_TIMEOUT)
        .timeout_write(IO_TIMEOUT)
        .build()
}

/// Runs a blocking `ureq` call on the blocking pool. HTTP error statuses come
/// back as a [`Reply`]; only transport failures become errors.
pub(crate) async fn send_blocking<F>(call: F) -> Result<Reply, TransferError>
where
    F: FnOnce() -> Result<ureq::Response, ureq::Error> + Send + 'static,
{
    let outcome = tokio::task::spawn_blocking(move || match call() {
        Ok(response) | Err(ureq::Error::Status(_, response)) => Reply::from_response(response),
        Err(ureq::Error::Transport(transport)) => {
            Err(TransferError::Network(transport.to_string()))
        }
    })
    .await;
    match outcome {
        Ok(result) => result,
        Err(err) => Err(TransferError::Protocol(format!("HTTP worker stopped: {err}"))),
    }
}

/// Offset following the last byte the server acknowledged in a
/// `Range: bytes=0-N` header. No header means nothing was stored.
pub(crate) fn next_offset(range: Option<&str>) -> u64 {
    range
        .and_then(|value| value.trim().strip_prefix("bytes="))
        .and_then(|span| span.split('-').nth(1))
        .and_then(|last| last.trim().parse::<u64>().ok())
        .map(|last| last + 1)
        .unwrap_or(0)
}

pub struct YouTubeUploader {
    agent: ureq::Agent,
    api_base: String,
    bearer: String,
    chunk_size: usize,
    quota: QuotaSignature,
}

impl YouTubeUploader {
    pub fn new(config: &RuntimeConfig, credential: &Credential) -> Self {
        Self {
            agent: build_agent(),
            api_base: config.api_base.clone(),
            bearer: credential.bearer(),
            chunk_size: config.chunk_size,
            quota: QuotaSignature::from_config(config),
        }
    }

    fn session_url(&self) -> String {
        format!(
            "{}/upload/youtube/v3/videos?uploadType=resumable&part={UPLOAD_PARTS}",
            self.api_base
        )
    }
}

impl VideoService for YouTubeUploader {
    type Request = ResumableUpload;

    async fn insert(
        &self,
        path: &Path,
        metadata: &VideoMetadata,
    ) -> Result<ResumableUpload, TransferError> {
        let file = File::open(path).await?;
        let total = file.metadata().await?.len();
        if total == 0 {
            return Err(TransferError::Protocol(format!(
                "{} is empty",
                path.display()
            )));
        }

        let content_type = mime_guess::from_path(path).first_or_octet_stream().to_string();
        let body = metadata.to_resource().to_string();
        let agent = self.agent.clone();
        let url = self.session_url();
        let bearer = self.bearer.clone();
        let reply = send_blocking(move || {
            agent
                .post(&url)
                .set("Authorization", &bearer)
                .set("Content-Type", "application/json; charset=UTF-8")
                .set("X-Upload-Content-Length", &total.to_string())
                .set("X-Upload-Content-Type", &content_type)
                .send_string(&body)
        })
        .await?;

        if !reply.is_success() {
            return Err(TransferError::from_status(reply.status, &reply.body, &self.quota));
        }
        let session_uri = reply.location.ok_or_else(|| {
            TransferError::Protocol("upload session response had no Location header".into())
        })?;
        debug!(path = %path.display(), total, "opened resumable upload session");

        Ok(ResumableUpload {
            agent: self.agent.clone(),
            bearer: self.bearer.clone(),
            session_uri,
            path: path.to_path_buf(),
            file,
            offset: 0,
            total,
            chunk_size: self.chunk_size.max(1) as u64,
            quota: self.quota.clone(),
        })
    }
}

/// One open resumable session. The offset only moves when the server
/// acknowledges bytes, so a retried chunk re-sends the same range.
pub struct ResumableUpload {
    agent: ureq::Agent,
    bearer: String,
    session_uri: String,
    path: PathBuf,
    file: File,
    offset: u64,
    total: u64,
    chunk_size: u64,
    quota: QuotaSignature,
}

impl ResumableUpload {
    async fn read_chunk(&mut self, end: u64) -> Result<Vec<u8>, TransferError> {
        let mut buf = vec![0u8; (end - self.offset) as usize];
        self.file.seek(SeekFrom::Start(self.offset)).await?;
        self.file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

impl ResumableRequest for ResumableUpload {
    async fn next_chunk(&mut self) -> Result<ChunkStatus, TransferError> {
        let (content_range, payload) = if self.offset >= self.total {
            (format!("bytes */{}", self.total), Vec::new())
        } else {
            let end = (self.offset + self.chunk_size).min(self.total);
            let payload = self.read_chunk(end).await?;
            (
                format!("bytes {}-{}/{}", self.offset, end - 1, self.total),
                payload,
            )
        };

        debug!(path = %self.path.display(), range = %content_range, "sending chunk");
        let agent = self.agent.clone();
        let uri = self.session_uri.clone();
        let bearer = self.bearer.clone();
        let reply = send_blocking(move || {
            agent
                .put(&uri)
                .set("Authorization", &bearer)
                .set("Content-Range", &content_range)
                .send_bytes(&payload)
        })
        .await?;

        match reply.status {
            RESUME_INCOMPLETE => {
                self.offset = next_offset(reply.range.as_deref()).min(self.total);
                Ok(ChunkStatus::Progress(self.offset as f64 / self.total as f64))
            }
            200 | 201 => Ok(ChunkStatus::Complete(reply.json())),
            status => Err(TransferError::from_status(status, &reply.body, &self.quota)),
        }
    }
}
