//! Edits of videos already on the channel: privacy changes, snippet edits and
//! listings. Bulk runs go one video at a time and never stop on a failure.

use std::fmt;

use anyhow::{Result, bail};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::catalog::{CatalogApi, PlaylistCache};
use crate::metadata::{DEFAULT_CATEGORY_ID, PrivacyStatus};

/// Snippet fields to overwrite; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub category_id: Option<String>,
}

impl MetadataEdit {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.tags.is_none()
            && self.category_id.is_none()
    }

    /// Merges the edit over `current`. The update call replaces the whole
    /// snippet, so title and category are always present.
    pub fn apply(&self, current: &Value) -> Value {
        let kept = |key: &str| current.get(key).filter(|value| !value.is_null()).cloned();
        let mut snippet = Map::new();
        snippet.insert(
            "title".into(),
            self.title
                .as_ref()
                .map(|title| json!(title))
                .or_else(|| kept("title"))
                .unwrap_or_else(|| json!("")),
        );
        if let Some(description) = self
            .description
            .as_ref()
            .map(|description| json!(description))
            .or_else(|| kept("description"))
        {
            snippet.insert("description".into(), description);
        }
        if let Some(tags) = self
            .tags
            .as_ref()
            .map(|tags| json!(tags))
            .or_else(|| kept("tags"))
        {
            snippet.insert("tags".into(), tags);
        }
        snippet.insert(
            "categoryId".into(),
            self.category_id
                .as_ref()
                .map(|id| json!(id))
                .or_else(|| kept("categoryId"))
                .unwrap_or_else(|| json!(DEFAULT_CATEGORY_ID)),
        );
        Value::Object(snippet)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoEdit {
    Privacy(PrivacyStatus),
    Metadata(MetadataEdit),
}

/// Applies one edit to one video.
pub async fn apply_edit<C: CatalogApi>(api: &C, video_id: &str, edit: &VideoEdit) -> Result<()> {
    match edit {
        VideoEdit::Privacy(privacy) => api.set_video_privacy(video_id, *privacy).await,
        VideoEdit::Metadata(changes) => {
            let Some(current) = api.video_snippet(video_id).await? else {
                bail!("video {video_id} not found");
            };
            api.update_video_snippet(video_id, changes.apply(&current))
                .await
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditResult {
    pub video_id: String,
    pub error: Option<String>,
}

impl EditResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for EditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => write!(f, "Updated {}", self.video_id),
            Some(error) => write!(f, "Failed to update {}: {error}", self.video_id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub results: Vec<EditResult>,
}

impl BulkReport {
    pub fn successes(&self) -> usize {
        self.results.iter().filter(|result| result.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.results.len() - self.successes()
    }

    pub fn summary(&self) -> String {
        format!("{} success, {} failed", self.successes(), self.failures())
    }
}

/// Applies `edit` to each video in order, collecting failures.
pub async fn apply_bulk<C: CatalogApi>(
    api: &C,
    video_ids: Vec<String>,
    edit: &VideoEdit,
) -> BulkReport {
    let mut report = BulkReport::default();
    for video_id in video_ids {
        let error = match apply_edit(api, &video_id, edit).await {
            Ok(()) => None,
            Err(err) => {
                warn!(video_id = %video_id, error = %err, "video update failed");
                Some(format!("{err:#}"))
            }
        };
        report.results.push(EditResult { video_id, error });
    }
    info!(summary = %report.summary(), "bulk update finished");
    report
}

/// Video ids of the playlist found by title or id; empty when there is no
/// such playlist.
pub async fn playlist_targets<C: CatalogApi>(
    api: &C,
    cache: &mut PlaylistCache,
    playlist: &str,
) -> Result<Vec<String>> {
    match cache.find_id(api, playlist).await? {
        Some(id) => api.playlist_video_ids(&id).await,
        None => Ok(Vec::new()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoListing {
    pub id: String,
    pub title: String,
    pub privacy: String,
}

impl VideoListing {
    pub fn has_status(&self, status: PrivacyStatus) -> bool {
        self.privacy == status.as_str()
    }
}

impl fmt::Display for VideoListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) - {}", self.title, self.id, self.privacy)
    }
}

/// Every uploaded video with its privacy status, newest first.
pub async fn list_videos<C: CatalogApi>(api: &C) -> Result<Vec<VideoListing>> {
    let uploaded = api.uploaded_videos().await?;
    let ids: Vec<String> = uploaded.iter().map(|video| video.id.clone()).collect();
    let mut privacy = api.video_privacy(&ids).await?;
    Ok(uploaded
        .into_iter()
        .map(|video| VideoListing {
            privacy: privacy
                .remove(&video.id)
                .unwrap_or_else(|| "unknown".to_string()),
            id: video.id,
            title: video.title,
        })
        .collect())
}
