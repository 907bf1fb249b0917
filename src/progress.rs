//! Upload progress reporting.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Receives the completed fraction (0.0..=1.0) of the file being uploaded.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, path: &Path, fraction: f64);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _path: &Path, _fraction: f64) {}
}

/// Shape of the JSON progress file, readable by any watcher polling it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub progress: u8,
    pub message: String,
}

/// Mirrors progress into a JSON file, replacing it atomically on each write.
#[derive(Debug, Clone)]
pub struct ProgressWriter {
    path: PathBuf,
}

impl ProgressWriter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn write(&self, progress: u8, message: &str) {
        let report = ProgressReport {
            progress: progress.min(100),
            message: message.to_string(),
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(err) = fs::create_dir_all(parent)
        {
            warn!(path = %parent.display(), error = %err, "could not create progress dir");
            return;
        }

        let tmp_path = self.path.with_extension("tmp");
        match serde_json::to_vec(&report) {
            Ok(payload) => {
                if let Err(err) = fs::write(&tmp_path, payload) {
                    warn!(error = %err, "could not write progress file");
                    return;
                }
                if let Err(err) = fs::rename(&tmp_path, &self.path) {
                    warn!(error = %err, "could not finalize progress file");
                }
            }
            Err(err) => warn!(error = %err, "could not serialize progress report"),
        }
    }
}

pub fn read_progress_report(path: &Path) -> Option<ProgressReport> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Prints whole-percent steps to stderr and optionally mirrors them to a
/// progress file. Repeated fractions within the same percent are dropped.
#[derive(Debug, Default)]
pub struct ConsoleProgress {
    writer: Option<ProgressWriter>,
    last: Mutex<Option<(PathBuf, u8)>>,
}

impl ConsoleProgress {
    pub fn new(writer: Option<ProgressWriter>) -> Self {
        Self {
            writer,
            last: Mutex::new(None),
        }
    }
}

pub fn percent(fraction: f64) -> u8 {
    (fraction.clamp(0.0, 1.0) * 100.0).floor() as u8
}

impl ProgressSink for ConsoleProgress {
    fn on_progress(&self, path: &Path, fraction: f64) {
        let pct = percent(fraction);
        {
            let Ok(mut last) = self.last.lock() else {
                return;
            };
            if matches!(&*last, Some((seen, seen_pct)) if seen == path && *seen_pct == pct) {
                return;
            }
            *last = Some((path.to_path_buf(), pct));
        }

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        eprintln!("Uploading {name}: {pct}%");
        if let Some(writer) = &self.writer {
            writer.write(pct, &format!("Uploading {name}"));
        }
    }
}
