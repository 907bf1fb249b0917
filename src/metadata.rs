//! Video metadata submitted alongside each upload.
//!
//! The orchestrator treats [`VideoMetadata`] as opaque: it asks a
//! [`MetadataSource`] for one, passes it to the transfer engine and stores its
//! JSON form in the ledger.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const MAX_TITLE_CHARS: usize = 100;
/// "People & Blogs", the platform's catch-all category.
pub const DEFAULT_CATEGORY_ID: &str = "22";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    #[default]
    Private,
    Unlisted,
    Public,
}

impl PrivacyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PrivacyStatus::Private => "private",
            PrivacyStatus::Unlisted => "unlisted",
            PrivacyStatus::Public => "public",
        }
    }
}

impl fmt::Display for PrivacyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrivacyStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "private" => Ok(PrivacyStatus::Private),
            "unlisted" => Ok(PrivacyStatus::Unlisted),
            "public" => Ok(PrivacyStatus::Public),
            _ => bail!("unknown privacy status: {value}"),
        }
    }
}

/// Everything sent with the create call besides the bytes themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_category")]
    pub category_id: String,
    #[serde(default)]
    pub privacy_status: PrivacyStatus,
    /// RFC 3339 timestamp of when the footage was shot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_date: Option<String>,
    /// Generator-specific fields carried into the ledger untouched.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub extras: Value,
}

fn default_category() -> String {
    DEFAULT_CATEGORY_ID.to_string()
}

impl VideoMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            tags: Vec::new(),
            category_id: default_category(),
            privacy_status: PrivacyStatus::default(),
            recording_date: None,
            extras: Value::Null,
        }
    }

    /// JSON stored in the ledger's `metadata_json` column.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Video resource body for the platform's insert call.
    pub fn to_resource(&self) -> Value {
        let mut resource = json!({
            "snippet": {
                "title": self.title,
                "description": self.description,
                "tags": self.tags,
                "categoryId": self.category_id,
            },
            "status": {
                "privacyStatus": self.privacy_status.as_str(),
                "selfDeclaredMadeForKids": false,
            },
        });
        if let Some(date) = &self.recording_date {
            resource["recordingDetails"] = json!({ "recordingDate": date });
        }
        resource
    }
}

/// Produces the metadata for one file. Implementations may inspect the file
/// but must not modify it.
pub trait MetadataSource: Send + Sync {
    fn generate(&self, path: &Path) -> Result<VideoMetadata>;
}

/// Builds metadata from the file name and folder alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileNameMetadata {
    pub privacy_status: PrivacyStatus,
}

impl MetadataSource for FileNameMetadata {
    fn generate(&self, path: &Path) -> Result<VideoMetadata> {
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .with_context(|| format!("{} has no usable file name", path.display()))?;

        let mut metadata = VideoMetadata::new(sanitize_title(stem));
        metadata.privacy_status = self.privacy_status;

        if let Some(folder) = path
            .parent()
            .and_then(|parent| parent.file_name())
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
        {
            metadata.tags.push(folder.to_string());
        }

        let modified = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .with_context(|| format!("reading modification time of {}", path.display()))?;
        let modified: DateTime<Utc> = modified.into();
        metadata.recording_date = Some(modified.to_rfc3339_opts(SecondsFormat::Secs, true));

        Ok(metadata)
    }
}

/// Drops characters the platform rejects in titles and truncates to
/// [`MAX_TITLE_CHARS`]. Falls back to "Untitled" when nothing is left.
pub fn sanitize_title(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|ch| *ch != '<' && *ch != '>')
        .take(MAX_TITLE_CHARS)
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "Untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn file_name_metadata_uses_stem_and_folder() -> Result<()> {
        let dir = tempdir()?;
        let folder = dir.path().join("Summer Trip");
        fs::create_dir_all(&folder)?;
        let clip = folder.join("beach <day>.mp4");
        fs::write(&clip, b"bytes")?;

        let metadata = FileNameMetadata::default().generate(&clip)?;
        assert_eq!(metadata.title, "beach day");
        assert_eq!(metadata.tags, vec!["Summer Trip".to_string()]);
        assert_eq!(metadata.privacy_status, PrivacyStatus::Private);
        let date = metadata.recording_date.expect("recording date");
        assert!(DateTime::parse_from_rfc3339(&date).is_ok());
        Ok(())
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let result = FileNameMetadata::default().generate(&dir.path().join("ghost.mp4"));
        assert!(result.is_err());
    }

    #[test]
    fn titles_are_truncated_and_never_empty() {
        let long = "x".repeat(150);
        assert_eq!(sanitize_title(&long).chars().count(), MAX_TITLE_CHARS);
        assert_eq!(sanitize_title("<>"), "Untitled");
        assert_eq!(sanitize_title("  padded  "), "padded");
    }

    #[test]
    fn resource_carries_snippet_status_and_recording_details() {
        let mut metadata = VideoMetadata::new("Clip");
        metadata.tags = vec!["a".into()];
        metadata.privacy_status = PrivacyStatus::Unlisted;
        metadata.recording_date = Some("2024-05-01T10:00:00Z".into());

        let resource = metadata.to_resource();
        assert_eq!(resource["snippet"]["title"], "Clip");
        assert_eq!(resource["snippet"]["categoryId"], DEFAULT_CATEGORY_ID);
        assert_eq!(resource["status"]["privacyStatus"], "unlisted");
        assert_eq!(
            resource["recordingDetails"]["recordingDate"],
            "2024-05-01T10:00:00Z"
        );

        let bare = VideoMetadata::new("Bare").to_resource();
        assert!(bare.get("recordingDetails").is_none());
    }

    #[test]
    fn ledger_json_round_trips_with_defaults() {
        let stored = json!({"title": "Only a title"});
        let metadata: VideoMetadata = serde_json::from_value(stored).unwrap();
        assert_eq!(metadata.category_id, DEFAULT_CATEGORY_ID);
        assert_eq!(metadata.privacy_status, PrivacyStatus::Private);
        assert_eq!(metadata.to_json()["title"], "Only a title");
        assert!(metadata.to_json().get("extras").is_none());
    }

    #[test]
    fn privacy_parsing() {
        assert_eq!("PUBLIC".parse::<PrivacyStatus>().unwrap(), PrivacyStatus::Public);
        assert!("secret".parse::<PrivacyStatus>().is_err());
    }
}
