//! Access tokens for the video platform.
//!
//! No OAuth flow lives here: a token is either handed in through the
//! environment or read from the profile's `token.json`, which some other tool
//! keeps fresh.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

use crate::config::RuntimeConfig;

pub const ACCESS_TOKEN_ENV: &str = "UPTUBE_ACCESS_TOKEN";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credentials found; set UPTUBE_ACCESS_TOKEN or create {}", .0.display())]
    Missing(PathBuf),
    #[error("cannot read token file {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("token file {} is malformed: {reason}", .path.display())]
    Invalid { path: PathBuf, reason: String },
    #[error("access token expired at {expires_at}; refresh {}", .path.display())]
    Expired { path: PathBuf, expires_at: i64 },
}

/// Bearer token ready to put in an `Authorization` header.
#[derive(Clone)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential").field("token", &"<redacted>").finish()
    }
}

pub trait CredentialProvider {
    fn credential(&self) -> Result<Credential, AuthError>;
}

#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl CredentialProvider for StaticToken {
    fn credential(&self) -> Result<Credential, AuthError> {
        Ok(Credential::new(self.0.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenFileContents {
    access_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Reads `{"access_token": "...", "expires_at": <unix seconds>}`.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialProvider for TokenFile {
    fn credential(&self) -> Result<Credential, AuthError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthError::Missing(self.path.clone()));
            }
            Err(source) => {
                return Err(AuthError::Unreadable {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let contents: TokenFileContents =
            serde_json::from_str(&raw).map_err(|err| AuthError::Invalid {
                path: self.path.clone(),
                reason: err.to_string(),
            })?;
        if contents.access_token.trim().is_empty() {
            return Err(AuthError::Invalid {
                path: self.path.clone(),
                reason: "access_token is empty".to_string(),
            });
        }
        if let Some(expires_at) = contents.expires_at {
            if expires_at <= Utc::now().timestamp() {
                return Err(AuthError::Expired {
                    path: self.path.clone(),
                    expires_at,
                });
            }
        }

        Ok(Credential::new(contents.access_token.trim()))
    }
}

/// Picks the environment token when present, otherwise the profile's token
/// file.
pub fn provider_for(config: &RuntimeConfig) -> Box<dyn CredentialProvider> {
    provider_from(std::env::var(ACCESS_TOKEN_ENV).ok(), config)
}

fn provider_from(env_token: Option<String>, config: &RuntimeConfig) -> Box<dyn CredentialProvider> {
    match env_token.map(|token| token.trim().to_string()) {
        Some(token) if !token.is_empty() => Box::new(StaticToken(token)),
        _ => Box::new(TokenFile::new(config.token_path())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_ATTEMPTS};
    use tempfile::tempdir;

    fn config_in(home: &Path) -> RuntimeConfig {
        RuntimeConfig {
            home: home.to_path_buf(),
            profile: "work".to_string(),
            api_base: "http://localhost".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            quota_markers: vec!["quotaExceeded".to_string()],
        }
    }

    #[test]
    fn token_file_yields_bearer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(&path, r#"{"access_token": " abc ", "expires_at": 99999999999}"#).unwrap();

        let credential = TokenFile::new(&path).credential().unwrap();
        assert_eq!(credential.bearer(), "Bearer abc");
        assert!(!format!("{credential:?}").contains("abc"));
    }

    #[test]
    fn missing_token_file_is_reported_as_missing() {
        let dir = tempdir().unwrap();
        let err = TokenFile::new(dir.path().join("token.json"))
            .credential()
            .unwrap_err();
        assert!(matches!(err, AuthError::Missing(_)));
        assert!(err.to_string().contains(ACCESS_TOKEN_ENV));
    }

    #[test]
    fn malformed_and_expired_tokens_fail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token.json");

        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            TokenFile::new(&path).credential(),
            Err(AuthError::Invalid { .. })
        ));

        fs::write(&path, r#"{"access_token": ""}"#).unwrap();
        assert!(matches!(
            TokenFile::new(&path).credential(),
            Err(AuthError::Invalid { .. })
        ));

        fs::write(&path, r#"{"access_token": "abc", "expires_at": 1}"#).unwrap();
        assert!(matches!(
            TokenFile::new(&path).credential(),
            Err(AuthError::Expired { expires_at: 1, .. })
        ));
    }

    #[test]
    fn environment_token_wins_over_profile_file() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());

        let provider = provider_from(Some("env-token".to_string()), &config);
        assert_eq!(provider.credential().unwrap().bearer(), "Bearer env-token");

        let provider = provider_from(Some("   ".to_string()), &config);
        match provider.credential() {
            Err(AuthError::Missing(path)) => assert_eq!(path, config.token_path()),
            other => panic!("expected missing token file, got {other:?}"),
        }
    }
}
