//! Token record and its on-disk store
//!
//! The token file holds a long-lived refresh token, so both the directory
//! and the file are created with owner-only permissions explicitly instead
//! of relying on the process umask.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AppError, AppResult};

/// Tokens are treated as expired this long before their real expiry
pub const EXPIRY_BUFFER_MS: i64 = 5 * 60 * 1000;

/// Persisted OAuth token bundle
///
/// Serialized with the provider's field names so the file stays
/// interchangeable with other clients of the same account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiry as epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    /// Space-separated granted scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expiry_date", &self.expiry_date)
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .finish()
    }
}

impl TokenRecord {
    /// Whether the access token must be refreshed at `now_ms`
    ///
    /// A record without an expiry is never considered expired.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        match self.expiry_date {
            Some(expiry) => now_ms >= expiry.saturating_sub(EXPIRY_BUFFER_MS),
            None => false,
        }
    }

    /// Merge a refresh response into this record
    ///
    /// Access token and expiry are replaced. The stored refresh token is kept
    /// unless the provider rotated it.
    pub fn apply_refresh(&mut self, refreshed: TokenRecord) {
        self.access_token = refreshed.access_token;
        self.expiry_date = refreshed.expiry_date;
        if refreshed.refresh_token.is_some() {
            self.refresh_token = refreshed.refresh_token;
        }
        if refreshed.scope.is_some() {
            self.scope = refreshed.scope;
        }
        if refreshed.token_type.is_some() {
            self.token_type = refreshed.token_type;
        }
    }

    /// Granted scopes as a list
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default()
    }
}

/// Check token freshness against the current wall clock
pub fn is_token_expired(record: &TokenRecord) -> bool {
    record.is_expired_at(now_ms())
}

/// Current time as epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// File-backed token store at a fixed path
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted record, `None` if no token file exists
    ///
    /// # Errors
    ///
    /// - `Internal` if the file cannot be read
    /// - `InvalidInput` if the file is not a valid token record
    pub fn load(&self) -> AppResult<Option<TokenRecord>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::Internal(format!(
                    "failed to read token file {}: {e}",
                    self.path.display()
                )));
            }
        };
        let record = serde_json::from_str(&raw).map_err(|e| {
            AppError::invalid(format!(
                "token file {} is corrupt ({e}); delete it and re-run authorization",
                self.path.display()
            ))
        })?;
        Ok(Some(record))
    }

    /// Write `record` with owner-only permissions
    ///
    /// Creates the parent directory with mode `0700`, writes a sibling
    /// temporary file with mode `0600`, then renames it over the target.
    pub fn persist(&self, record: &TokenRecord) -> AppResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(parent)?;
        }

        let serialized = serde_json::to_vec_pretty(record)
            .map_err(|e| AppError::Internal(format!("failed to serialize token: {e}")))?;
        let tmp_path = self.path.with_extension("json.tmp");
        write_private_file(&tmp_path, &serialized)?;
        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            AppError::Internal(format!(
                "failed to move token file into place at {}: {e}",
                self.path.display()
            ))
        })?;
        debug!(path = %self.path.display(), "persisted token record");
        Ok(())
    }

    /// Remove the token file; returns whether one existed
    pub fn clear(&self) -> AppResult<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Internal(format!(
                "failed to remove token file {}: {e}",
                self.path.display()
            ))),
        }
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> AppResult<()> {
    use std::os::unix::fs::DirBuilderExt;

    // an existing directory is left with the mode it already has
    if dir.exists() {
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .map_err(|e| AppError::Internal(format!("failed to create {}: {e}", dir.display())))
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> AppResult<()> {
    fs::create_dir_all(dir)
        .map_err(|e| AppError::Internal(format!("failed to create {}: {e}", dir.display())))
}

#[cfg(unix)]
fn write_private_file(path: &Path, contents: &[u8]) -> AppResult<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let io_err =
        |e: std::io::Error| AppError::Internal(format!("failed to write {}: {e}", path.display()));
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(io_err)?;
    // mode() only applies on creation; tighten a pre-existing file too
    file.set_permissions(fs::Permissions::from_mode(0o600))
        .map_err(io_err)?;
    file.write_all(contents).map_err(io_err)?;
    file.sync_all().map_err(io_err)
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, contents: &[u8]) -> AppResult<()> {
    fs::write(path, contents)
        .map_err(|e| AppError::Internal(format!("failed to write {}: {e}", path.display())))
}
