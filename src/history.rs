//! Upload history ledger.
//!
//! Every finished upload attempt (success or failure) becomes one row in the
//! `uploads` table of a per-profile SQLite database. The content hash is the
//! duplicate key; the file path and remote video id are secondary lookups used
//! by the retry, reupload and orphan-repair commands.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use libsql::{Builder, Connection, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Success,
    Failed,
}

impl UploadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Success => "success",
            UploadStatus::Failed => "failed",
        }
    }
}

impl FromStr for UploadStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(UploadStatus::Success),
            "failed" => Ok(UploadStatus::Failed),
            _ => bail!("unknown upload status: {value}"),
        }
    }
}

/// One upload attempt as stored in the ledger.
///
/// `video_id` is only set on success and `error` only on failure. Rows written
/// by older versions may lack a `file_path`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRecord {
    pub id: i64,
    pub file_path: Option<String>,
    pub file_hash: String,
    pub video_id: Option<String>,
    pub metadata: serde_json::Value,
    pub status: UploadStatus,
    pub error: Option<String>,
    pub playlist_name: Option<String>,
    pub timestamp: f64,
}

impl UploadRecord {
    pub fn is_success(&self) -> bool {
        self.status == UploadStatus::Success
    }

    /// Title submitted with the upload, when the metadata carried one.
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").and_then(|value| value.as_str())
    }
}

/// Name of the folder that directly contains `file_path`.
pub fn playlist_name_from_path(file_path: &str) -> Option<String> {
    let name = Path::new(file_path).parent()?.file_name()?.to_str()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn now_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS uploads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT,
            file_hash TEXT NOT NULL,
            video_id TEXT,
            metadata_json TEXT NOT NULL DEFAULT 'null',
            status TEXT NOT NULL DEFAULT 'success',
            error TEXT,
            playlist_name TEXT,
            timestamp REAL NOT NULL DEFAULT 0
        );
        "#,
    )
    .await?;

    add_playlist_column(conn).await?;

    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_uploads_hash ON uploads(file_hash);
        CREATE INDEX IF NOT EXISTS idx_uploads_path ON uploads(file_path);
        CREATE INDEX IF NOT EXISTS idx_uploads_video ON uploads(video_id);
        CREATE INDEX IF NOT EXISTS idx_uploads_timestamp ON uploads(timestamp);
        "#,
    )
    .await?;

    Ok(())
}

/// Ledgers created before folder playlists were tracked have no
/// `playlist_name` column.
async fn add_playlist_column(conn: &Connection) -> Result<()> {
    let mut rows = conn.query("PRAGMA table_info(uploads)", params![]).await?;
    while let Some(row) = rows.next().await? {
        let column: String = row.get(1)?;
        if column == "playlist_name" {
            return Ok(());
        }
    }

    info!("adding playlist_name column to upload history");
    conn.execute("ALTER TABLE uploads ADD COLUMN playlist_name TEXT", params![])
        .await?;
    Ok(())
}

const RECORD_COLUMNS: &str =
    "id, file_path, file_hash, video_id, metadata_json, status, error, playlist_name, timestamp";

/// Fields of a row about to be written; the timestamp is supplied separately.
struct NewRecord<'a> {
    file_path: &'a str,
    file_hash: &'a str,
    video_id: Option<&'a str>,
    metadata: &'a serde_json::Value,
    status: UploadStatus,
    error: Option<&'a str>,
    playlist_name: Option<String>,
}

/// Handle on the ledger database. Open once per invocation and drop (or
/// [`HistoryStore::close`]) when done.
#[derive(Debug)]
pub struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    /// Opens (and if necessary creates) the ledger, brings the schema up to
    /// date and backfills missing playlist names.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating history directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening upload history {}", path.display()))?;

        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn)
            .await
            .context("preparing upload history schema")?;

        let store = Self { conn };
        let migrated = store
            .migrate_playlist_names()
            .await
            .context("migrating upload history")?;
        if migrated > 0 {
            info!(migrated, "backfilled playlist names in upload history");
        }
        Ok(store)
    }

    /// Fills `playlist_name` for rows that lack it, using the parent folder of
    /// `file_path`. Rows without a usable path stay untouched, as do rows that
    /// already carry a name, so running this repeatedly is harmless. Returns
    /// the number of rows updated.
    pub async fn migrate_playlist_names(&self) -> Result<usize> {
        let mut pending = Vec::new();
        let mut rows = self
            .conn
            .query(
                "SELECT id, file_path FROM uploads WHERE playlist_name IS NULL",
                params![],
            )
            .await?;
        while let Some(row) = rows.next().await? {
            let id: i64 = row.get(0)?;
            let file_path: Option<String> = row.get(1)?;
            if let Some(name) = file_path.as_deref().and_then(playlist_name_from_path) {
                pending.push((id, name));
            }
        }

        if pending.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction().await?;
        for (id, name) in &pending {
            tx.execute(
                "UPDATE uploads SET playlist_name = ?1 WHERE id = ?2 AND playlist_name IS NULL",
                params![name.as_str(), *id],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(pending.len())
    }

    /// True when a successful upload with this content hash exists.
    pub async fn is_uploaded(&self, file_hash: &str) -> Result<bool> {
        self.exists(
            "SELECT 1 FROM uploads WHERE file_hash = ?1 AND status = 'success' LIMIT 1",
            file_hash,
        )
        .await
    }

    /// True when any attempt, successful or not, was recorded for this exact
    /// path. Cheaper than hashing but blind to renamed or edited files.
    pub async fn is_uploaded_by_path(&self, file_path: &str) -> Result<bool> {
        self.exists(
            "SELECT 1 FROM uploads WHERE file_path = ?1 LIMIT 1",
            file_path,
        )
        .await
    }

    async fn exists(&self, sql: &str, key: &str) -> Result<bool> {
        let mut rows = self.conn.query(sql, params![key]).await?;
        Ok(rows.next().await?.is_some())
    }

    /// Records a successful upload. When `playlist_name` is omitted it is
    /// derived from the file's parent folder.
    pub async fn add_record(
        &self,
        file_path: &str,
        file_hash: &str,
        video_id: &str,
        metadata: &serde_json::Value,
        playlist_name: Option<&str>,
    ) -> Result<()> {
        let playlist_name = playlist_name
            .map(str::to_string)
            .or_else(|| playlist_name_from_path(file_path));
        self.insert_record(
            &NewRecord {
                file_path,
                file_hash,
                video_id: Some(video_id),
                metadata,
                status: UploadStatus::Success,
                error: None,
                playlist_name,
            },
            now_timestamp(),
        )
        .await
    }

    pub async fn add_failure(&self, file_path: &str, file_hash: &str, error: &str) -> Result<()> {
        self.insert_record(
            &NewRecord {
                file_path,
                file_hash,
                video_id: None,
                metadata: &serde_json::Value::Null,
                status: UploadStatus::Failed,
                error: Some(error),
                playlist_name: playlist_name_from_path(file_path),
            },
            now_timestamp(),
        )
        .await
    }

    async fn insert_record(&self, record: &NewRecord<'_>, timestamp: f64) -> Result<()> {
        let metadata_json =
            serde_json::to_string(record.metadata).context("serializing upload metadata")?;
        self.conn
            .execute(
                r#"
                INSERT INTO uploads (
                    file_path, file_hash, video_id, metadata_json,
                    status, error, playlist_name, timestamp
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    record.file_path,
                    record.file_hash,
                    record.video_id,
                    metadata_json,
                    record.status.as_str(),
                    record.error,
                    record.playlist_name.as_deref(),
                    timestamp,
                ],
            )
            .await
            .with_context(|| format!("recording upload attempt for {}", record.file_path))?;
        debug!(
            file_path = record.file_path,
            status = record.status.as_str(),
            "recorded upload attempt"
        );
        Ok(())
    }

    /// Newest successful record for the hash, or the newest attempt of any
    /// status when the content never uploaded.
    pub async fn get_record(&self, file_hash: &str) -> Result<Option<UploadRecord>> {
        self.fetch_one(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM uploads WHERE file_hash = ?1 \
                 ORDER BY (status = 'success') DESC, timestamp DESC, id DESC LIMIT 1"
            ),
            file_hash,
        )
        .await
    }

    pub async fn get_record_by_video_id(&self, video_id: &str) -> Result<Option<UploadRecord>> {
        self.fetch_one(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM uploads WHERE video_id = ?1 \
                 ORDER BY timestamp DESC, id DESC LIMIT 1"
            ),
            video_id,
        )
        .await
    }

    pub async fn get_record_by_path(&self, file_path: &str) -> Result<Option<UploadRecord>> {
        self.fetch_one(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM uploads WHERE file_path = ?1 \
                 ORDER BY (status = 'success') DESC, timestamp DESC, id DESC LIMIT 1"
            ),
            file_path,
        )
        .await
    }

    async fn fetch_one(&self, sql: &str, key: &str) -> Result<Option<UploadRecord>> {
        let mut rows = self.conn.query(sql, params![key]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    /// All attempts, newest first. `limit == 0` returns everything.
    pub async fn get_all_records(&self, limit: usize) -> Result<Vec<UploadRecord>> {
        let mut sql =
            format!("SELECT {RECORD_COLUMNS} FROM uploads ORDER BY timestamp DESC, id DESC");
        if limit > 0 {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        self.fetch_many(&sql).await
    }

    pub async fn get_failed_records(&self) -> Result<Vec<UploadRecord>> {
        self.fetch_many(&format!(
            "SELECT {RECORD_COLUMNS} FROM uploads WHERE status = 'failed' \
             ORDER BY timestamp DESC, id DESC"
        ))
        .await
    }

    async fn fetch_many(&self, sql: &str) -> Result<Vec<UploadRecord>> {
        let mut rows = self.conn.query(sql, params![]).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    /// Removes every attempt for the hash so the content can be uploaded
    /// again. Returns whether anything was removed.
    pub async fn delete_record(&self, file_hash: &str) -> Result<bool> {
        self.delete_where("file_hash", file_hash).await
    }

    pub async fn delete_record_by_path(&self, file_path: &str) -> Result<bool> {
        self.delete_where("file_path", file_path).await
    }

    pub async fn delete_record_by_video_id(&self, video_id: &str) -> Result<bool> {
        self.delete_where("video_id", video_id).await
    }

    async fn delete_where(&self, column: &str, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute(
                &format!("DELETE FROM uploads WHERE {column} = ?1"),
                params![key],
            )
            .await
            .with_context(|| format!("deleting upload history by {column}"))?;
        Ok(removed > 0)
    }

    /// Number of recorded attempts across all statuses.
    pub async fn get_upload_count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM uploads", params![])
            .await?;
        let row = rows.next().await?.context("missing count row")?;
        let count: i64 = row.get(0)?;
        Ok(count.max(0) as u64)
    }

    pub fn close(self) {
        drop(self.conn);
    }
}

/// Column order must match [`RECORD_COLUMNS`].
fn row_to_record(row: &Row) -> Result<UploadRecord> {
    let metadata_json: Option<String> = row.get(4)?;
    let metadata = match metadata_json.as_deref() {
        Some(raw) => serde_json::from_str(raw).context("parsing stored upload metadata")?,
        None => serde_json::Value::Null,
    };
    let status: Option<String> = row.get(5)?;
    let status = match status.as_deref() {
        Some(raw) => raw.parse()?,
        None => UploadStatus::Success,
    };

    Ok(UploadRecord {
        id: row.get(0)?,
        file_path: row.get(1)?,
        file_hash: row.get(2)?,
        video_id: row.get(3)?,
        metadata,
        status,
        error: row.get(6)?,
        playlist_name: row.get(7)?,
        timestamp: row.get(8)?,
    })
}
