#![forbid(unsafe_code)]

//! Runtime configuration shared by every `uptube` command.
//!
//! Values are resolved from explicit overrides first, then the process
//! environment, then a `.env`-style file, then built-in defaults. The active
//! profile ends up as a plain field on [`RuntimeConfig`] and is handed to the
//! ledger and credential constructors from there.

use anyhow::{Context, Result, anyhow, bail};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com";
pub const DEFAULT_HOME_DIR: &str = ".uptube";
/// Resumable chunks must be a multiple of this many bytes.
pub const CHUNK_GRANULARITY: usize = 256 * 1024;
pub const DEFAULT_CHUNK_SIZE: usize = 32 * CHUNK_GRANULARITY;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_QUOTA_MARKERS: &str = "quotaExceeded,uploadLimitExceeded";

const PROFILES_SUBDIR: &str = "profiles";
const HISTORY_DB_FILE: &str = "history.db";
const TOKEN_FILE: &str = "token.json";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub home: PathBuf,
    pub profile: String,
    pub api_base: String,
    pub chunk_size: usize,
    pub max_attempts: u32,
    pub quota_markers: Vec<String>,
}

impl RuntimeConfig {
    pub fn profile_dir(&self) -> PathBuf {
        self.home.join(PROFILES_SUBDIR).join(&self.profile)
    }

    /// Location of the upload ledger for the active profile.
    pub fn history_path(&self) -> PathBuf {
        self.profile_dir().join(HISTORY_DB_FILE)
    }

    pub fn token_path(&self) -> PathBuf {
        self.profile_dir().join(TOKEN_FILE)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub home: Option<PathBuf>,
    pub profile: Option<String>,
    pub api_base: Option<String>,
    pub chunk_size: Option<usize>,
    pub max_attempts: Option<u32>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeConfig> {
    build_runtime_config_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeConfig> {
    let home = match overrides.home {
        Some(home) => home,
        None => lookup_value("UPTUBE_HOME", file_vars, &env_lookup)
            .map(PathBuf::from)
            .or_else(|| env_lookup("HOME").map(|home| PathBuf::from(home).join(DEFAULT_HOME_DIR)))
            .ok_or_else(|| anyhow!("UPTUBE_HOME not set and HOME is unavailable"))?,
    };
    let profile = overrides
        .profile
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value("UPTUBE_PROFILE", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
    validate_profile_name(&profile)?;
    let api_base = overrides
        .api_base
        .or_else(|| lookup_value("UPTUBE_API_BASE", file_vars, &env_lookup))
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
    let chunk_size = overrides
        .chunk_size
        .or_else(|| {
            lookup_value("UPTUBE_CHUNK_SIZE", file_vars, &env_lookup)
                .and_then(|value| value.parse::<usize>().ok())
        })
        .map(normalize_chunk_size)
        .unwrap_or(DEFAULT_CHUNK_SIZE);
    let max_attempts = overrides
        .max_attempts
        .or_else(|| {
            lookup_value("UPTUBE_MAX_ATTEMPTS", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u32>().ok())
        })
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_ATTEMPTS);
    let quota_markers = parse_markers(
        &lookup_value("UPTUBE_QUOTA_MARKERS", file_vars, &env_lookup)
            .unwrap_or_else(|| DEFAULT_QUOTA_MARKERS.to_string()),
    );

    Ok(RuntimeConfig {
        home,
        profile,
        api_base,
        chunk_size,
        max_attempts,
        quota_markers,
    })
}

/// Rounds down to the chunk granularity, never below one granule.
fn normalize_chunk_size(value: usize) -> usize {
    (value / CHUNK_GRANULARITY).max(1) * CHUNK_GRANULARITY
}

fn parse_markers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|marker| !marker.is_empty())
        .map(str::to_string)
        .collect()
}

/// Profile names become directory names, so only plain segments are allowed.
pub fn validate_profile_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || !name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
    {
        bail!("invalid profile name: {name:?}");
    }
    Ok(())
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// Updates or appends a single env var inside the target file while preserving
/// unrelated lines and comments.
pub fn upsert_env_value(path: &Path, key: &str, value: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("Creating {}", parent.display()))?;
    }

    let raw = fs::read_to_string(path).unwrap_or_default();
    let mut lines = Vec::new();
    let mut updated = false;
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");

    for line in raw.lines() {
        let trimmed = line.trim_start();
        let indent = &line[..line.len() - trimmed.len()];
        let (prefix, rest) = match trimmed.strip_prefix("export ") {
            Some(stripped) => ("export ", stripped),
            None => ("", trimmed),
        };
        match rest.split_once('=') {
            Some((candidate, _)) if candidate.trim() == key => {
                lines.push(format!("{indent}{prefix}{key}=\"{escaped}\""));
                updated = true;
            }
            _ => lines.push(line.to_string()),
        }
    }

    if !updated {
        lines.push(format!("{key}=\"{escaped}\""));
    }

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, lines.join("\n") + "\n")
        .with_context(|| format!("Writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("Replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn config_from(contents: &str) -> RuntimeConfig {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_config(&vars, |_| None).unwrap()
    }

    #[test]
    fn defaults_apply_when_only_home_is_set() {
        let config = config_from("UPTUBE_HOME=\"/data/uptube\"\n");
        assert_eq!(config.home, PathBuf::from("/data/uptube"));
        assert_eq!(config.profile, DEFAULT_PROFILE);
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(
            config.quota_markers,
            vec!["quotaExceeded".to_string(), "uploadLimitExceeded".to_string()]
        );
    }

    #[test]
    fn home_falls_back_to_user_home() {
        let config = build_runtime_config(&HashMap::new(), |key| {
            (key == "HOME").then(|| "/home/alice".to_string())
        })
        .unwrap();
        assert_eq!(config.home, PathBuf::from("/home/alice/.uptube"));
    }

    #[test]
    fn missing_home_is_an_error() {
        let err = build_runtime_config(&HashMap::new(), |_| None).unwrap_err();
        assert!(err.to_string().contains("UPTUBE_HOME"));
    }

    #[test]
    fn profile_paths_are_scoped_per_profile() {
        let config = config_from("UPTUBE_HOME=\"/u\"\nUPTUBE_PROFILE=\"work\"\n");
        assert_eq!(config.profile_dir(), PathBuf::from("/u/profiles/work"));
        assert_eq!(
            config.history_path(),
            PathBuf::from("/u/profiles/work/history.db")
        );
        assert_eq!(
            config.token_path(),
            PathBuf::from("/u/profiles/work/token.json")
        );
    }

    #[test]
    fn chunk_size_is_rounded_to_granularity() {
        let config = config_from("UPTUBE_HOME=\"/u\"\nUPTUBE_CHUNK_SIZE=\"600000\"\n");
        assert_eq!(config.chunk_size, 2 * CHUNK_GRANULARITY);

        let tiny = config_from("UPTUBE_HOME=\"/u\"\nUPTUBE_CHUNK_SIZE=\"10\"\n");
        assert_eq!(tiny.chunk_size, CHUNK_GRANULARITY);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config_from(
            "UPTUBE_HOME=\"/u\"\nUPTUBE_CHUNK_SIZE=\"lots\"\nUPTUBE_MAX_ATTEMPTS=\"0\"\n",
        );
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn quota_markers_are_split_and_trimmed() {
        let config =
            config_from("UPTUBE_HOME=\"/u\"\nUPTUBE_QUOTA_MARKERS=\" dailyLimit , ,quota \"\n");
        assert_eq!(
            config.quota_markers,
            vec!["dailyLimit".to_string(), "quota".to_string()]
        );
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(
            make_config("UPTUBE_HOME=\"/file\"\nUPTUBE_PROFILE=\"file-profile\"\n").path(),
        )
        .unwrap();
        let config = build_runtime_config(&vars, |key| {
            (key == "UPTUBE_PROFILE").then(|| "env-profile".to_string())
        })
        .unwrap();
        assert_eq!(config.home, PathBuf::from("/file"));
        assert_eq!(config.profile, "env-profile");
    }

    #[test]
    fn overrides_win_over_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert("UPTUBE_HOME".to_string(), "/file-home".to_string());
        vars.insert("UPTUBE_API_BASE".to_string(), "http://file".to_string());

        let overrides = RuntimeOverrides {
            home: Some(PathBuf::from("/override-home")),
            profile: Some("override".into()),
            api_base: Some("http://127.0.0.1:9000/".into()),
            chunk_size: Some(CHUNK_GRANULARITY * 3),
            max_attempts: Some(2),
            env_path: None,
        };
        let config = build_runtime_config_with_overrides(
            &vars,
            |key| (key == "UPTUBE_PROFILE").then(|| "env".to_string()),
            overrides,
        )
        .unwrap();

        assert_eq!(config.home, PathBuf::from("/override-home"));
        assert_eq!(config.profile, "override");
        assert_eq!(config.api_base, "http://127.0.0.1:9000");
        assert_eq!(config.chunk_size, CHUNK_GRANULARITY * 3);
        assert_eq!(config.max_attempts, 2);
    }

    #[test]
    fn blank_profile_override_is_ignored() {
        let config = build_runtime_config_with_overrides(
            &HashMap::new(),
            |key| (key == "UPTUBE_HOME").then(|| "/u".to_string()),
            RuntimeOverrides {
                profile: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.profile, DEFAULT_PROFILE);
    }

    #[test]
    fn unsafe_profile_names_are_rejected() {
        for name in ["", "..", "a/b", "with space"] {
            assert!(validate_profile_name(name).is_err(), "{name:?} accepted");
        }
        assert!(validate_profile_name("work_2024-main").is_ok());
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export UPTUBE_HOME="/home/x/.uptube"
            UPTUBE_PROFILE='work'
            UPTUBE_API_BASE =  "http://localhost"
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("UPTUBE_HOME").unwrap(), "/home/x/.uptube");
        assert_eq!(vars.get("UPTUBE_PROFILE").unwrap(), "work");
        assert_eq!(vars.get("UPTUBE_API_BASE").unwrap(), "http://localhost");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn upsert_env_value_replaces_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "# settings\nexport UPTUBE_PROFILE=\"old\"\nOTHER=1\n").unwrap();

        upsert_env_value(&path, "UPTUBE_PROFILE", "new").unwrap();
        upsert_env_value(&path, "UPTUBE_HOME", "/srv/uptube").unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("# settings\n"));
        assert!(raw.contains("export UPTUBE_PROFILE=\"new\""));
        assert!(raw.contains("OTHER=1"));
        let vars = read_env_file(&path).unwrap();
        assert_eq!(vars.get("UPTUBE_PROFILE").unwrap(), "new");
        assert_eq!(vars.get("UPTUBE_HOME").unwrap(), "/srv/uptube");
    }
}
