use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use uptube_tools::catalog::{
    CatalogApi, PlaylistCache, YouTubeCatalog, apply_repairs, find_orphans, plan_repairs,
    playlist_members,
};
use uptube_tools::config::{
    DEFAULT_ENV_PATH, RuntimeConfig, RuntimeOverrides, resolve_runtime_config, upsert_env_value,
    validate_profile_name,
};
use uptube_tools::credentials::{AuthError, Credential, provider_for};
use uptube_tools::fingerprint::{Blake3Fingerprinter, fingerprint_file};
use uptube_tools::history::{HistoryStore, UploadRecord, UploadStatus};
use uptube_tools::metadata::{FileNameMetadata, PrivacyStatus};
use uptube_tools::orchestrator::{BatchOptions, BatchReport, UploadOrchestrator};
use uptube_tools::progress::{ConsoleProgress, ProgressWriter};
use uptube_tools::transfer::{RetryPolicy, TransferEngine, YouTubeUploader};
use uptube_tools::videos::{
    MetadataEdit, VideoEdit, apply_bulk, apply_edit, list_videos, playlist_targets,
};

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "m4v", "mkv", "avi", "wmv", "flv", "webm", "mpg", "mpeg", "3gp", "mts",
    "m2ts",
];
const ERROR_COLUMN_CHARS: usize = 40;
/// Conventional exit status after SIGINT.
const INTERRUPTED: u8 = 130;

/// uptube: upload video folders without uploading anything twice.
#[derive(Parser)]
#[command(name = "uptube", version, about)]
struct Cli {
    /// State directory (profiles, ledgers, tokens)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Profile to use instead of the configured one
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Settings file read after the environment
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a video file or every video under a directory
    Upload {
        path: PathBuf,
        /// Skip files whose path is already in the history, without hashing
        #[arg(long)]
        simple_check: bool,
        /// Show what would be uploaded without uploading
        #[arg(long)]
        dry_run: bool,
        /// Mirror upload progress into this JSON file
        #[arg(long)]
        progress_file: Option<PathBuf>,
        /// Privacy of the uploaded videos
        #[arg(long, default_value = "private")]
        privacy: PrivacyStatus,
    },

    /// Retry every failed upload whose file still exists
    Retry {
        #[arg(long)]
        dry_run: bool,
    },

    /// Forget earlier uploads and upload the files again
    Reupload {
        /// Files to upload again
        paths: Vec<PathBuf>,
        /// Content hash of a recorded upload
        #[arg(long = "hash")]
        hashes: Vec<String>,
        /// Video id of a recorded upload
        #[arg(long = "video-id")]
        video_ids: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the upload history
    History {
        /// Number of records to show (0 for all)
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// Only show records with this status
        #[arg(long)]
        status: Option<UploadStatus>,
    },

    /// List uploaded videos that belong to no playlist
    Orphans {
        /// Add orphans to the playlist named after their source folder
        #[arg(long)]
        fix: bool,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Inspect and edit videos already on the channel
    Video {
        #[command(subcommand)]
        action: VideoAction,
    },

    /// Manage playlists
    Playlists {
        #[command(subcommand)]
        action: PlaylistAction,
    },

    /// Manage profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
}

#[derive(Subcommand)]
enum VideoAction {
    /// List uploaded videos with their privacy status
    List {
        /// Only show videos with this privacy status
        #[arg(long)]
        status: Option<PrivacyStatus>,
    },
    /// Change the privacy of a video, or of every video in a playlist
    UpdatePrivacy {
        /// Video id, or `all` together with --playlist
        target: String,
        privacy: PrivacyStatus,
        /// Apply to every video in this playlist (title or id)
        #[arg(long)]
        playlist: Option<String>,
    },
    /// Edit title, description, tags or category
    UpdateMeta {
        /// Video id, or `all` together with --playlist
        target: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Comma-separated tags; replaces the current tags
        #[arg(long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
        #[arg(long)]
        category_id: Option<String>,
        /// Apply to every video in this playlist (title or id)
        #[arg(long)]
        playlist: Option<String>,
    },
    /// Permanently delete a video
    DeleteVideo {
        video_id: String,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum PlaylistAction {
    /// List the channel's playlists
    List,
    /// Rename a playlist given its title or id
    Rename { old: String, new: String },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Show the active profile and its files
    Show,
    /// List known profiles
    List,
    /// Make a profile the default
    Use {
        name: String,
        /// Create the profile directory if it does not exist
        #[arg(long)]
        create: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            if let Some(auth) = err.downcast_ref::<AuthError>() {
                eprintln!("Auth Error: {auth}");
            } else {
                eprintln!("Error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let env_path = cli
        .env_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let config = resolve_runtime_config(RuntimeOverrides {
        home: cli.home,
        profile: cli.profile,
        env_path: Some(env_path.clone()),
        ..RuntimeOverrides::default()
    })?;

    match cli.command {
        Commands::Upload {
            path,
            simple_check,
            dry_run,
            progress_file,
            privacy,
        } => {
            println!("Scanning {}...", path.display());
            let files = collect_videos(&path)?;
            if files.is_empty() {
                println!("No video files found.");
                print_report(&BatchReport::default(), dry_run);
                return Ok(ExitCode::SUCCESS);
            }
            println!("Found {} video file(s)", files.len());
            let options = BatchOptions {
                simple_check,
                dry_run,
            };
            run_batch(&config, &files, options, privacy, progress_file).await
        }
        Commands::Retry { dry_run } => cmd_retry(&config, dry_run).await,
        Commands::Reupload {
            paths,
            hashes,
            video_ids,
            dry_run,
        } => cmd_reupload(&config, paths, hashes, video_ids, dry_run).await,
        Commands::History { limit, status } => cmd_history(&config, limit, status).await,
        Commands::Orphans { fix, yes } => cmd_orphans(&config, fix, yes).await,
        Commands::Video { action } => cmd_video(&config, action).await,
        Commands::Playlists { action } => cmd_playlists(&config, action).await,
        Commands::Profile { action } => cmd_profile(&config, &env_path, action),
    }
}

fn authenticate(config: &RuntimeConfig) -> Result<Credential> {
    Ok(provider_for(config).credential()?)
}

async fn run_batch(
    config: &RuntimeConfig,
    files: &[PathBuf],
    options: BatchOptions,
    privacy: PrivacyStatus,
    progress_file: Option<PathBuf>,
) -> Result<ExitCode> {
    let credential = authenticate(config)?;
    let history = HistoryStore::open(&config.history_path()).await?;

    let progress = Arc::new(ConsoleProgress::new(progress_file.map(ProgressWriter::new)));
    let engine = TransferEngine::new(
        YouTubeUploader::new(config, &credential),
        RetryPolicy::from_config(config),
    )
    .with_progress(progress);
    let metadata = FileNameMetadata {
        privacy_status: privacy,
    };
    let orchestrator =
        UploadOrchestrator::new(&history, &engine, &metadata, Arc::new(Blake3Fingerprinter));

    let report = tokio::select! {
        report = orchestrator.process_batch(files, options) => report?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted; the file in progress was not recorded.");
            // Exit now: a blocking chunk request may still be in flight.
            std::process::exit(i32::from(INTERRUPTED));
        }
    };

    print_report(&report, options.dry_run);
    history.close();
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &BatchReport, dry_run: bool) {
    for line in report_lines(report, dry_run) {
        println!("{line}");
    }
}

/// Per-file lines, the quota warning when the batch stopped early, and the
/// summary line, which is always present.
fn report_lines(report: &BatchReport, dry_run: bool) -> Vec<String> {
    let mut lines: Vec<String> = report.files.iter().map(ToString::to_string).collect();
    if report.quota_exhausted {
        lines.push(format!(
            "CRITICAL: YouTube upload quota exceeded; {} file(s) not attempted",
            report.not_attempted.len()
        ));
    }
    let prefix = if dry_run { "[Dry Run] " } else { "" };
    lines.push(format!("{prefix}Summary: {}", report.summary()));
    lines
}

async fn cmd_retry(config: &RuntimeConfig, dry_run: bool) -> Result<ExitCode> {
    let history = HistoryStore::open(&config.history_path()).await?;
    let failed = history.get_failed_records().await?;
    history.close();

    if failed.is_empty() {
        println!("No failed uploads to retry.");
        return Ok(ExitCode::SUCCESS);
    }
    println!("Found {} failed uploads", failed.len());

    let files = retry_candidates(&failed);
    if files.is_empty() {
        println!("None of the failed files exist anymore.");
        print_report(&BatchReport::default(), dry_run);
        return Ok(ExitCode::SUCCESS);
    }
    let options = BatchOptions {
        simple_check: false,
        dry_run,
    };
    run_batch(config, &files, options, PrivacyStatus::default(), None).await
}

/// Distinct paths of failed records that still exist, in ledger order.
fn retry_candidates(failed: &[UploadRecord]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    for record in failed {
        let Some(path) = record.file_path.as_deref().map(PathBuf::from) else {
            continue;
        };
        if path.is_file() && !files.contains(&path) {
            files.push(path);
        }
    }
    files
}

async fn cmd_reupload(
    config: &RuntimeConfig,
    paths: Vec<PathBuf>,
    hashes: Vec<String>,
    video_ids: Vec<String>,
    dry_run: bool,
) -> Result<ExitCode> {
    if paths.is_empty() && hashes.is_empty() && video_ids.is_empty() {
        println!("No files, hashes, or video IDs provided.");
        return Ok(ExitCode::SUCCESS);
    }

    let history = HistoryStore::open(&config.history_path()).await?;
    let targets = ReuploadTargets {
        paths,
        hashes,
        video_ids,
    };
    let cleared = clear_history(&history, targets, dry_run).await?;
    history.close();
    for line in &cleared.lines {
        println!("{line}");
    }

    if dry_run {
        return Ok(ExitCode::SUCCESS);
    }
    if cleared.files.is_empty() {
        println!("No files left to upload.");
        return Ok(ExitCode::SUCCESS);
    }
    run_batch(
        config,
        &cleared.files,
        BatchOptions::default(),
        PrivacyStatus::default(),
        None,
    )
    .await
}

struct ReuploadTargets {
    paths: Vec<PathBuf>,
    hashes: Vec<String>,
    video_ids: Vec<String>,
}

#[derive(Debug, Default)]
struct ClearedHistory {
    lines: Vec<String>,
    /// Existing files to upload again, sorted and distinct.
    files: Vec<PathBuf>,
}

/// Forgets the ledger rows behind each target. A dry run only reports what
/// would be cleared; unknown hashes and ids are reported in both modes.
async fn clear_history(
    history: &HistoryStore,
    targets: ReuploadTargets,
    dry_run: bool,
) -> Result<ClearedHistory> {
    let mut cleared = ClearedHistory::default();
    let cleared_line = |label: &str| {
        if dry_run {
            format!("[Dry Run] Would clear history for: {label}")
        } else {
            format!("Cleared history for: {label}")
        }
    };

    for path in targets.paths {
        let resolved = fs::canonicalize(&path)
            .with_context(|| format!("resolving {}", path.display()))?;
        let source = resolved.clone();
        let hash = tokio::task::spawn_blocking(move || fingerprint_file(&source))
            .await
            .context("fingerprint worker stopped")?
            .with_context(|| format!("fingerprinting {}", resolved.display()))?;
        if !dry_run {
            history.delete_record(&hash).await?;
            history
                .delete_record_by_path(&resolved.to_string_lossy())
                .await?;
        }
        cleared.lines.push(cleared_line(&display_name(&path)));
        cleared.files.push(resolved);
    }

    for hash in targets.hashes {
        let Some(record) = history.get_record(&hash).await? else {
            cleared.lines.push(format!("No history found for hash {hash}"));
            continue;
        };
        if !dry_run {
            history.delete_record(&hash).await?;
        }
        let stored = record.file_path.map(PathBuf::from);
        let label = stored.as_deref().map(display_name).unwrap_or(hash);
        cleared.lines.push(cleared_line(&label));
        cleared.files.extend(stored.filter(|path| path.is_file()));
    }

    for video_id in targets.video_ids {
        let Some(record) = history.get_record_by_video_id(&video_id).await? else {
            cleared.lines.push(format!("No history found for video {video_id}"));
            continue;
        };
        if !dry_run {
            history.delete_record(&record.file_hash).await?;
        }
        let stored = record.file_path.map(PathBuf::from);
        let label = stored.as_deref().map(display_name).unwrap_or(video_id);
        cleared.lines.push(cleared_line(&label));
        cleared.files.extend(stored.filter(|path| path.is_file()));
    }

    cleared.files.sort();
    cleared.files.dedup();
    Ok(cleared)
}

async fn cmd_history(
    config: &RuntimeConfig,
    limit: usize,
    status: Option<UploadStatus>,
) -> Result<ExitCode> {
    let history = HistoryStore::open(&config.history_path()).await?;
    let records = history.get_all_records(0).await?;
    history.close();

    let success = records.iter().filter(|record| record.is_success()).count();
    println!(
        "Total: {} | Success: {} | Failed: {}",
        records.len(),
        success,
        records.len() - success
    );

    let mut shown: Vec<&UploadRecord> = records
        .iter()
        .filter(|record| status.is_none_or(|status| record.status == status))
        .collect();
    if limit > 0 {
        shown.truncate(limit);
    }
    if shown.is_empty() {
        println!("No upload history found (matching filter).");
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{:<16}  {:<7}  {:<30}  {:<40}  File",
        "Date", "Status", "Title", "Video ID / Error"
    );
    for record in shown {
        let [date, status, title, detail, file] = history_row(record);
        println!("{date:<16}  {status:<7}  {title:<30}  {detail:<40}  {file}");
    }
    Ok(ExitCode::SUCCESS)
}

fn history_row(record: &UploadRecord) -> [String; 5] {
    let date = DateTime::from_timestamp(record.timestamp as i64, 0)
        .filter(|_| record.timestamp > 0.0)
        .map(|date| date.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let file = record
        .file_path
        .as_deref()
        .map(|path| display_name(Path::new(path)))
        .unwrap_or_default();

    match record.status {
        UploadStatus::Success => [
            date,
            "Success".to_string(),
            record.title().unwrap_or("N/A").to_string(),
            record.video_id.clone().unwrap_or_else(|| "N/A".to_string()),
            file,
        ],
        UploadStatus::Failed => [
            date,
            "Failed".to_string(),
            file.clone(),
            truncate_error(record.error.as_deref().unwrap_or("Unknown Error")),
            file,
        ],
    }
}

fn truncate_error(error: &str) -> String {
    if error.chars().count() > ERROR_COLUMN_CHARS {
        let head: String = error.chars().take(ERROR_COLUMN_CHARS - 3).collect();
        format!("{head}...")
    } else {
        error.to_string()
    }
}

async fn cmd_orphans(config: &RuntimeConfig, fix: bool, yes: bool) -> Result<ExitCode> {
    let credential = authenticate(config)?;
    let catalog = YouTubeCatalog::new(config, &credential);

    let uploaded = catalog.uploaded_videos().await?;
    if uploaded.is_empty() {
        println!("No uploaded videos found.");
        return Ok(ExitCode::SUCCESS);
    }
    let members = playlist_members(&catalog).await?;
    let orphans = find_orphans(uploaded, &members);
    if orphans.is_empty() {
        println!("No orphan videos found.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("Orphan Videos: {}", orphans.len());
    for video in &orphans {
        println!("- {} ({})", video.title, video.id);
    }
    if !fix {
        return Ok(ExitCode::SUCCESS);
    }
    if !yes && !confirm("Assign orphans to playlists from the upload history?")? {
        println!("Aborted.");
        return Ok(ExitCode::FAILURE);
    }

    let history = HistoryStore::open(&config.history_path()).await?;
    let (plans, unmatched) = plan_repairs(&history, orphans).await?;
    history.close();
    for video in &unmatched {
        println!("Skipping {} (no history/playlist found)", video.title);
    }

    println!("Assigning Orphans...");
    let mut cache = PlaylistCache::new();
    let results = apply_repairs(&catalog, &mut cache, plans, PrivacyStatus::Private).await;
    for result in &results {
        println!("{result}");
    }
    let fixed = results.iter().filter(|result| result.is_fixed()).count();
    println!("{fixed} fixed, {} failed", results.len() - fixed);
    Ok(ExitCode::SUCCESS)
}

/// `all` plus a playlist edits every video in it; anything else is one id.
const ALL_TARGET: &str = "all";

async fn cmd_video(config: &RuntimeConfig, action: VideoAction) -> Result<ExitCode> {
    let credential = authenticate(config)?;
    let catalog = YouTubeCatalog::new(config, &credential);

    let (target, playlist, edit) = match action {
        VideoAction::List { status } => {
            let listings = list_videos(&catalog).await?;
            if listings.is_empty() {
                println!("No uploaded videos found.");
                return Ok(ExitCode::SUCCESS);
            }
            let shown: Vec<_> = listings
                .iter()
                .filter(|listing| status.is_none_or(|status| listing.has_status(status)))
                .collect();
            if let Some(status) = status
                && shown.is_empty()
            {
                println!("No videos found with status: {status}");
                return Ok(ExitCode::SUCCESS);
            }
            for listing in shown {
                println!("{listing}");
            }
            return Ok(ExitCode::SUCCESS);
        }
        VideoAction::DeleteVideo { video_id, yes } => {
            if !yes && !confirm(&format!("Permanently delete video {video_id}?"))? {
                println!("Aborted.");
                return Ok(ExitCode::FAILURE);
            }
            return match catalog.delete_video(&video_id).await {
                Ok(()) => {
                    println!("Deleted video {video_id}");
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    println!("Failed to delete video {video_id}: {err:#}");
                    Ok(ExitCode::FAILURE)
                }
            };
        }
        VideoAction::UpdatePrivacy {
            target,
            privacy,
            playlist,
        } => (target, playlist, VideoEdit::Privacy(privacy)),
        VideoAction::UpdateMeta {
            target,
            title,
            description,
            tags,
            category_id,
            playlist,
        } => {
            let changes = MetadataEdit {
                title,
                description,
                tags,
                category_id,
            };
            if changes.is_empty() {
                println!("Nothing to update: pass --title, --description, --tags or --category-id");
                return Ok(ExitCode::FAILURE);
            }
            (target, playlist, VideoEdit::Metadata(changes))
        }
    };

    let Some(playlist) = playlist else {
        if target == ALL_TARGET {
            println!("Use --playlist to choose the videos for '{ALL_TARGET}'");
            return Ok(ExitCode::FAILURE);
        }
        return match apply_edit(&catalog, &target, &edit).await {
            Ok(()) => {
                println!("{}", edit_done_line(&target, &edit));
                Ok(ExitCode::SUCCESS)
            }
            Err(err) => {
                println!("{}: {err:#}", edit_failed_line(&target, &edit));
                Ok(ExitCode::FAILURE)
            }
        };
    };

    if target != ALL_TARGET {
        println!("Warning: 'target' argument is ignored when --playlist is set");
    }
    let mut cache = PlaylistCache::new();
    let video_ids = playlist_targets(&catalog, &mut cache, &playlist).await?;
    if video_ids.is_empty() {
        println!("No videos found in playlist {playlist}");
        return Ok(ExitCode::FAILURE);
    }
    let report = apply_bulk(&catalog, video_ids, &edit).await;
    for result in &report.results {
        println!("{result}");
    }
    println!("Bulk Update Complete: {}", report.summary());
    Ok(if report.failures() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn edit_done_line(video_id: &str, edit: &VideoEdit) -> String {
    match edit {
        VideoEdit::Privacy(privacy) => format!("Updated privacy of {video_id} to {privacy}"),
        VideoEdit::Metadata(_) => format!("Updated metadata of {video_id}"),
    }
}

fn edit_failed_line(video_id: &str, edit: &VideoEdit) -> String {
    match edit {
        VideoEdit::Privacy(_) => format!("Failed to update privacy status for {video_id}"),
        VideoEdit::Metadata(_) => format!("Failed to update metadata for {video_id}"),
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

async fn cmd_playlists(config: &RuntimeConfig, action: PlaylistAction) -> Result<ExitCode> {
    let credential = authenticate(config)?;
    let catalog = YouTubeCatalog::new(config, &credential);

    match action {
        PlaylistAction::List => {
            let playlists = catalog.list_playlists().await?;
            if playlists.is_empty() {
                println!("No playlists found.");
            }
            for playlist in playlists {
                println!(
                    "{} ({}) - {} videos, {}",
                    playlist.title, playlist.id, playlist.item_count, playlist.privacy
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        PlaylistAction::Rename { old, new } => {
            let mut cache = PlaylistCache::new();
            if cache.rename(&catalog, &old, &new).await? {
                println!("Renamed playlist '{old}' to '{new}'");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("Playlist '{old}' not found");
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn cmd_profile(
    config: &RuntimeConfig,
    env_path: &Path,
    action: ProfileAction,
) -> Result<ExitCode> {
    match action {
        ProfileAction::Show => {
            println!("Active Profile: {}", config.profile);
            println!("Home: {}", config.home.display());
            println!("History: {}", config.history_path().display());
            let token = config.token_path();
            let state = if token.exists() { "present" } else { "missing" };
            println!("Token: {} ({state})", token.display());
        }
        ProfileAction::List => {
            let profiles = list_profiles(config)?;
            if profiles.is_empty() {
                println!("No profiles found under {}", config.home.display());
            }
            for name in profiles {
                let marker = if name == config.profile { "*" } else { " " };
                println!("{marker} {name}");
            }
        }
        ProfileAction::Use { name, create } => {
            validate_profile_name(&name)?;
            let mut target = config.clone();
            target.profile = name.clone();
            let dir = target.profile_dir();
            if !dir.is_dir() {
                if !create {
                    println!("Profile '{name}' not found");
                    return Ok(ExitCode::FAILURE);
                }
                fs::create_dir_all(&dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
            upsert_env_value(env_path, "UPTUBE_PROFILE", &name)?;
            println!("Switched to profile: {name}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn list_profiles(config: &RuntimeConfig) -> Result<Vec<String>> {
    let Some(root) = config.profile_dir().parent().map(Path::to_path_buf) else {
        return Ok(Vec::new());
    };
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(&root).with_context(|| format!("reading {}", root.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// A single video file, or every video below a directory in sorted order.
/// Hidden files and directories are skipped.
fn collect_videos(path: &Path) -> Result<Vec<PathBuf>> {
    let root = fs::canonicalize(path).with_context(|| format!("resolving {}", path.display()))?;
    if root.is_file() {
        if !is_video(&root) {
            bail!("{} is not a recognized video file", root.display());
        }
        return Ok(vec![root]);
    }

    let mut files: Vec<PathBuf> = WalkDir::new(&root)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_video(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    Ok(files)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
