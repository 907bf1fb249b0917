//! Playlists and orphan repair.
//!
//! An orphan is an uploaded video that sits in none of the channel's
//! playlists. Repair looks the video up in the ledger and files it into the
//! playlist named after the folder it was uploaded from.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::credentials::Credential;
use crate::history::{HistoryStore, playlist_name_from_path};
use crate::metadata::PrivacyStatus;
use crate::transfer::api_error_message;
use crate::transfer::youtube::{Reply, build_agent, send_blocking};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    pub id: String,
    pub title: String,
    pub item_count: u64,
    pub privacy: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedVideo {
    pub id: String,
    pub title: String,
}

/// Remote catalog operations used by the playlist and orphan commands.
pub trait CatalogApi: Send + Sync {
    fn list_playlists(&self) -> impl Future<Output = Result<Vec<Playlist>>> + Send;

    fn create_playlist(
        &self,
        title: &str,
        privacy: PrivacyStatus,
    ) -> impl Future<Output = Result<Playlist>> + Send;

    fn rename_playlist(&self, id: &str, title: &str) -> impl Future<Output = Result<()>> + Send;

    fn playlist_video_ids(&self, playlist_id: &str)
    -> impl Future<Output = Result<Vec<String>>> + Send;

    fn add_to_playlist(
        &self,
        playlist_id: &str,
        video_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Every video on the authenticated channel, newest first.
    fn uploaded_videos(&self) -> impl Future<Output = Result<Vec<UploadedVideo>>> + Send;

    /// Privacy status of each listed video that still exists, keyed by id.
    fn video_privacy(
        &self,
        video_ids: &[String],
    ) -> impl Future<Output = Result<HashMap<String, String>>> + Send;

    fn set_video_privacy(
        &self,
        video_id: &str,
        privacy: PrivacyStatus,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Current snippet of a video, `None` when the id is unknown.
    fn video_snippet(&self, video_id: &str) -> impl Future<Output = Result<Option<Value>>> + Send;

    fn update_video_snippet(
        &self,
        video_id: &str,
        snippet: Value,
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete_video(&self, video_id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Title to id map of the channel's playlists, fetched on first use and
/// dropped whenever a playlist is created or renamed.
///
/// Playlists created through the cache are remembered across reloads, since
/// the listing can lag behind a create.
#[derive(Debug, Default)]
pub struct PlaylistCache {
    by_title: Option<HashMap<String, String>>,
    created: HashMap<String, String>,
}

impl PlaylistCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.by_title.is_some()
    }

    pub fn invalidate(&mut self) {
        self.by_title = None;
    }

    /// Loads the map if needed. A failed fetch leaves the cache unloaded so
    /// the next call tries again.
    pub async fn ensure<C: CatalogApi>(&mut self, api: &C) -> Result<&HashMap<String, String>> {
        if self.by_title.is_none() {
            let playlists = api.list_playlists().await.context("listing playlists")?;
            debug!(count = playlists.len(), "loaded playlist cache");
            let mut by_title: HashMap<String, String> = playlists
                .into_iter()
                .map(|playlist| (playlist.title, playlist.id))
                .collect();
            for (title, id) in &self.created {
                by_title.entry(title.clone()).or_insert_with(|| id.clone());
            }
            self.by_title = Some(by_title);
        }
        Ok(self.by_title.get_or_insert_with(HashMap::new))
    }

    /// Resolves a playlist title, or passes a known playlist id through.
    pub async fn find_id<C: CatalogApi>(
        &mut self,
        api: &C,
        title_or_id: &str,
    ) -> Result<Option<String>> {
        let map = self.ensure(api).await?;
        if let Some(id) = map.get(title_or_id) {
            return Ok(Some(id.clone()));
        }
        Ok(map
            .values()
            .find(|id| id.as_str() == title_or_id)
            .cloned())
    }

    pub async fn get_or_create<C: CatalogApi>(
        &mut self,
        api: &C,
        title: &str,
        privacy: PrivacyStatus,
    ) -> Result<String> {
        if let Some(id) = self.ensure(api).await?.get(title) {
            return Ok(id.clone());
        }
        let created = api
            .create_playlist(title, privacy)
            .await
            .with_context(|| format!("creating playlist {title}"))?;
        debug!(playlist = %title, id = %created.id, "created playlist");
        self.invalidate();
        self.created.insert(title.to_string(), created.id.clone());
        Ok(created.id)
    }

    /// Renames the playlist found by title or id. Returns false when no such
    /// playlist exists.
    pub async fn rename<C: CatalogApi>(&mut self, api: &C, old: &str, new: &str) -> Result<bool> {
        let Some(id) = self.find_id(api, old).await? else {
            return Ok(false);
        };
        api.rename_playlist(&id, new)
            .await
            .with_context(|| format!("renaming playlist {old}"))?;
        self.created.retain(|_, created| *created != id);
        self.invalidate();
        Ok(true)
    }
}

/// Ids of every video that appears in at least one playlist.
pub async fn playlist_members<C: CatalogApi>(api: &C) -> Result<HashSet<String>> {
    let mut members = HashSet::new();
    for playlist in api.list_playlists().await? {
        let ids = api
            .playlist_video_ids(&playlist.id)
            .await
            .with_context(|| format!("listing items of playlist {}", playlist.title))?;
        members.extend(ids);
    }
    Ok(members)
}

pub fn find_orphans(
    uploaded: Vec<UploadedVideo>,
    members: &HashSet<String>,
) -> Vec<UploadedVideo> {
    uploaded
        .into_iter()
        .filter(|video| !members.contains(&video.id))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairPlan {
    pub video: UploadedVideo,
    pub playlist: String,
}

/// Finds a target playlist for each orphan from its ledger record. Orphans
/// without a record, or whose record names no folder, come back unmatched.
pub async fn plan_repairs(
    history: &HistoryStore,
    orphans: Vec<UploadedVideo>,
) -> Result<(Vec<RepairPlan>, Vec<UploadedVideo>)> {
    let mut plans = Vec::new();
    let mut unmatched = Vec::new();
    for video in orphans {
        let record = history.get_record_by_video_id(&video.id).await?;
        let playlist = record.and_then(|record| {
            record
                .playlist_name
                .filter(|name| !name.is_empty())
                .or_else(|| record.file_path.as_deref().and_then(playlist_name_from_path))
        });
        match playlist {
            Some(playlist) => plans.push(RepairPlan { video, playlist }),
            None => unmatched.push(video),
        }
    }
    Ok((plans, unmatched))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairResult {
    Assigned(RepairPlan),
    PlaylistUnavailable { plan: RepairPlan, error: String },
    AddFailed { plan: RepairPlan, error: String },
}

impl RepairResult {
    pub fn is_fixed(&self) -> bool {
        matches!(self, RepairResult::Assigned(_))
    }
}

impl fmt::Display for RepairResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairResult::Assigned(plan) => {
                write!(f, "Assigned {} -> {}", plan.video.title, plan.playlist)
            }
            RepairResult::PlaylistUnavailable { plan, error } => write!(
                f,
                "Failed to get/create playlist {} for {}: {error}",
                plan.playlist, plan.video.title
            ),
            RepairResult::AddFailed { plan, error } => write!(
                f,
                "Failed to assign {} -> {}: {error}",
                plan.video.title, plan.playlist
            ),
        }
    }
}

/// Applies each plan in order, creating missing playlists with `privacy`.
/// Failures are collected rather than aborting the run.
pub async fn apply_repairs<C: CatalogApi>(
    api: &C,
    cache: &mut PlaylistCache,
    plans: Vec<RepairPlan>,
    privacy: PrivacyStatus,
) -> Vec<RepairResult> {
    let mut results = Vec::with_capacity(plans.len());
    for plan in plans {
        let playlist_id = match cache.get_or_create(api, &plan.playlist, privacy).await {
            Ok(id) => id,
            Err(err) => {
                warn!(playlist = %plan.playlist, error = %err, "playlist unavailable");
                results.push(RepairResult::PlaylistUnavailable {
                    plan,
                    error: format!("{err:#}"),
                });
                continue;
            }
        };
        match api.add_to_playlist(&playlist_id, &plan.video.id).await {
            Ok(()) => results.push(RepairResult::Assigned(plan)),
            Err(err) => {
                warn!(video_id = %plan.video.id, error = %err, "could not add video to playlist");
                results.push(RepairResult::AddFailed {
                    plan,
                    error: format!("{err:#}"),
                });
            }
        }
    }
    results
}

const PAGE_SIZE: &str = "50";
/// Most ids one `videos.list` call accepts.
const VIDEO_BATCH: usize = 50;

/// Data API implementation of [`CatalogApi`].
pub struct YouTubeCatalog {
    agent: ureq::Agent,
    api_base: String,
    bearer: String,
}

impl YouTubeCatalog {
    pub fn new(config: &RuntimeConfig, credential: &Credential) -> Self {
        Self {
            agent: build_agent(),
            api_base: config.api_base.clone(),
            bearer: credential.bearer(),
        }
    }

    async fn send(
        &self,
        method: &'static str,
        resource: &str,
        query: Vec<(&'static str, String)>,
        body: Option<Value>,
    ) -> Result<Value> {
        let agent = self.agent.clone();
        let url = format!("{}/youtube/v3/{resource}", self.api_base);
        let bearer = self.bearer.clone();
        let reply: Reply = send_blocking(move || {
            let mut request = agent.request(method, &url).set("Authorization", &bearer);
            for (key, value) in &query {
                request = request.query(key, value);
            }
            match body {
                Some(body) => request
                    .set("Content-Type", "application/json; charset=UTF-8")
                    .send_string(&body.to_string()),
                None => request.call(),
            }
        })
        .await?;

        if !reply.is_success() {
            bail!(
                "{method} {resource} failed with HTTP {}: {}",
                reply.status,
                api_error_message(&reply.body)
            );
        }
        Ok(reply.json())
    }

    /// Follows `nextPageToken` until the listing is exhausted.
    async fn list_all(
        &self,
        resource: &str,
        query: Vec<(&'static str, String)>,
    ) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut page_query = query.clone();
            page_query.push(("maxResults", PAGE_SIZE.to_string()));
            if let Some(token) = &page_token {
                page_query.push(("pageToken", token.clone()));
            }
            let page = self.send("GET", resource, page_query, None).await?;
            if let Some(page_items) = page.get("items").and_then(Value::as_array) {
                items.extend(page_items.iter().cloned());
            }
            match page.get("nextPageToken").and_then(Value::as_str) {
                Some(token) if !token.is_empty() => page_token = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(items)
    }
}

fn parse_playlist(item: &Value) -> Option<Playlist> {
    Some(Playlist {
        id: item.get("id")?.as_str()?.to_string(),
        title: item
            .pointer("/snippet/title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        item_count: item
            .pointer("/contentDetails/itemCount")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        privacy: item
            .pointer("/status/privacyStatus")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
    })
}

fn parse_item_video_id(item: &Value) -> Option<String> {
    item.pointer("/contentDetails/videoId")
        .or_else(|| item.pointer("/snippet/resourceId/videoId"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_uploaded_video(item: &Value) -> Option<UploadedVideo> {
    Some(UploadedVideo {
        id: parse_item_video_id(item)?,
        title: item
            .pointer("/snippet/title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

impl CatalogApi for YouTubeCatalog {
    async fn list_playlists(&self) -> Result<Vec<Playlist>> {
        let items = self
            .list_all(
                "playlists",
                vec![
                    ("part", "snippet,contentDetails,status".to_string()),
                    ("mine", "true".to_string()),
                ],
            )
            .await?;
        Ok(items.iter().filter_map(parse_playlist).collect())
    }

    async fn create_playlist(&self, title: &str, privacy: PrivacyStatus) -> Result<Playlist> {
        let body = json!({
            "snippet": { "title": title },
            "status": { "privacyStatus": privacy.as_str() },
        });
        let created = self
            .send(
                "POST",
                "playlists",
                vec![("part", "snippet,status".to_string())],
                Some(body),
            )
            .await?;
        parse_playlist(&created).context("playlist creation returned no id")
    }

    async fn rename_playlist(&self, id: &str, title: &str) -> Result<()> {
        let body = json!({ "id": id, "snippet": { "title": title } });
        self.send(
            "PUT",
            "playlists",
            vec![("part", "snippet".to_string())],
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn playlist_video_ids(&self, playlist_id: &str) -> Result<Vec<String>> {
        let items = self
            .list_all(
                "playlistItems",
                vec![
                    ("part", "contentDetails".to_string()),
                    ("playlistId", playlist_id.to_string()),
                ],
            )
            .await?;
        Ok(items.iter().filter_map(parse_item_video_id).collect())
    }

    async fn add_to_playlist(&self, playlist_id: &str, video_id: &str) -> Result<()> {
        let body = json!({
            "snippet": {
                "playlistId": playlist_id,
                "resourceId": { "kind": "youtube#video", "videoId": video_id },
            }
        });
        self.send(
            "POST",
            "playlistItems",
            vec![("part", "snippet".to_string())],
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn uploaded_videos(&self) -> Result<Vec<UploadedVideo>> {
        let channels = self
            .send(
                "GET",
                "channels",
                vec![
                    ("part", "contentDetails".to_string()),
                    ("mine", "true".to_string()),
                ],
                None,
            )
            .await?;
        let uploads = channels
            .pointer("/items/0/contentDetails/relatedPlaylists/uploads")
            .and_then(Value::as_str)
            .context("channel has no uploads playlist")?
            .to_string();
        let items = self
            .list_all(
                "playlistItems",
                vec![
                    ("part", "snippet,contentDetails".to_string()),
                    ("playlistId", uploads),
                ],
            )
            .await?;
        Ok(items.iter().filter_map(parse_uploaded_video).collect())
    }

    async fn video_privacy(&self, video_ids: &[String]) -> Result<HashMap<String, String>> {
        let mut privacy = HashMap::new();
        for batch in video_ids.chunks(VIDEO_BATCH) {
            let page = self
                .send(
                    "GET",
                    "videos",
                    vec![("part", "status".to_string()), ("id", batch.join(","))],
                    None,
                )
                .await?;
            let items = page.get("items").and_then(Value::as_array);
            for item in items.into_iter().flatten() {
                let id = item.get("id").and_then(Value::as_str);
                let status = item.pointer("/status/privacyStatus").and_then(Value::as_str);
                if let (Some(id), Some(status)) = (id, status) {
                    privacy.insert(id.to_string(), status.to_string());
                }
            }
        }
        Ok(privacy)
    }

    async fn set_video_privacy(&self, video_id: &str, privacy: PrivacyStatus) -> Result<()> {
        let body = json!({ "id": video_id, "status": { "privacyStatus": privacy.as_str() } });
        self.send("PUT", "videos", vec![("part", "status".to_string())], Some(body))
            .await?;
        Ok(())
    }

    async fn video_snippet(&self, video_id: &str) -> Result<Option<Value>> {
        let page = self
            .send(
                "GET",
                "videos",
                vec![("part", "snippet".to_string()), ("id", video_id.to_string())],
                None,
            )
            .await?;
        Ok(page.pointer("/items/0/snippet").cloned())
    }

    async fn update_video_snippet(&self, video_id: &str, snippet: Value) -> Result<()> {
        let body = json!({ "id": video_id, "snippet": snippet });
        self.send("PUT", "videos", vec![("part", "snippet".to_string())], Some(body))
            .await?;
        Ok(())
    }

    async fn delete_video(&self, video_id: &str) -> Result<()> {
        self.send("DELETE", "videos", vec![("id", video_id.to_string())], None)
            .await?;
        Ok(())
    }
}
