//! Configuration for the authorizer and the mail API client
//!
//! All configuration is loaded from environment variables prefixed with
//! `MAIL_GMAIL_`. File locations default to a per-user directory under the
//! home directory's `.config` root. The resulting structs are passed
//! explicitly to the components that need them so tests can point them at
//! temporary paths and mock endpoints.

use std::env;
use std::env::VarError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{AppError, AppResult};

/// Provider authorization endpoint
pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// Provider token endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Mail REST API root
pub const DEFAULT_API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";
/// Directory name under the user's configuration root
const CONFIG_DIR_NAME: &str = "mail-gmail-cli";

/// Authorization settings
///
/// Owns every path and endpoint the authorizer touches. Nothing in the
/// authorization flow reads ambient globals.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Provisioned OAuth client credentials (read-only)
    pub credentials_path: PathBuf,
    /// Persisted token record
    pub token_path: PathBuf,
    /// Port for the loopback callback listener when the redirect URI has none
    pub callback_port: u16,
    /// Maximum wait for the browser callback
    pub auth_timeout: Duration,
    /// Whether to launch the system browser during authorization
    pub open_browser: bool,
    /// Authorization endpoint
    pub auth_url: String,
    /// Token endpoint (code exchange and refresh)
    pub token_url: String,
    /// HTTP timeout for token endpoint calls
    pub http_timeout: Duration,
}

/// Mail API client settings
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// REST API root, without trailing slash
    pub base_url: String,
    /// Per-request HTTP timeout
    pub http_timeout: Duration,
    /// Maximum in-flight detail lookups for list/search
    pub fetch_concurrency: usize,
}

/// Complete process configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub auth: AuthConfig,
    pub api: ApiConfig,
}

impl AppConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a variable is set to a malformed value, or
    /// `Internal` if no home directory can be resolved and
    /// `MAIL_GMAIL_CONFIG_DIR` is unset.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// MAIL_GMAIL_CONFIG_DIR=/home/me/.config/mail-gmail-cli
    /// MAIL_GMAIL_CALLBACK_PORT=3000
    /// MAIL_GMAIL_AUTH_TIMEOUT_SECONDS=300
    /// MAIL_GMAIL_OPEN_BROWSER=false
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let config_dir = match optional_env("MAIL_GMAIL_CONFIG_DIR")? {
            Some(dir) => PathBuf::from(dir),
            None => default_config_dir()?,
        };
        let credentials_path = optional_env("MAIL_GMAIL_CREDENTIALS_PATH")?
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir.join("credentials.json"));
        let token_path = optional_env("MAIL_GMAIL_TOKEN_PATH")?
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir.join("token.json"));
        let http_timeout =
            Duration::from_millis(parse_number_env("MAIL_GMAIL_HTTP_TIMEOUT_MS", 30_000u64)?);

        let fetch_concurrency = parse_number_env("MAIL_GMAIL_FETCH_CONCURRENCY", 10usize)?;
        if !(1..=50).contains(&fetch_concurrency) {
            return Err(AppError::invalid(
                "MAIL_GMAIL_FETCH_CONCURRENCY must be in range 1..50",
            ));
        }

        let auth_timeout_secs = parse_number_env("MAIL_GMAIL_AUTH_TIMEOUT_SECONDS", 300u64)?;
        if auth_timeout_secs == 0 {
            return Err(AppError::invalid(
                "MAIL_GMAIL_AUTH_TIMEOUT_SECONDS must be greater than zero",
            ));
        }

        Ok(Self {
            auth: AuthConfig {
                credentials_path,
                token_path,
                callback_port: parse_number_env("MAIL_GMAIL_CALLBACK_PORT", 3000u16)?,
                auth_timeout: Duration::from_secs(auth_timeout_secs),
                open_browser: parse_bool_env("MAIL_GMAIL_OPEN_BROWSER", true)?,
                auth_url: string_env("MAIL_GMAIL_AUTH_URL", DEFAULT_AUTH_URL)?,
                token_url: string_env("MAIL_GMAIL_TOKEN_URL", DEFAULT_TOKEN_URL)?,
                http_timeout,
            },
            api: ApiConfig {
                base_url: string_env("MAIL_GMAIL_API_BASE_URL", DEFAULT_API_BASE_URL)?
                    .trim_end_matches('/')
                    .to_owned(),
                http_timeout,
                fetch_concurrency,
            },
        })
    }
}

/// Resolve `~/.config/mail-gmail-cli`
fn default_config_dir() -> AppResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".config").join(CONFIG_DIR_NAME))
        .ok_or_else(|| {
            AppError::Internal(
                "cannot determine home directory; set MAIL_GMAIL_CONFIG_DIR".to_owned(),
            )
        })
}

/// Read an optional environment variable; blank values count as unset
fn optional_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v.trim().to_owned())),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Read a string environment variable with default fallback
fn string_env(key: &str, default: &str) -> AppResult<String> {
    Ok(optional_env(key)?.unwrap_or_else(|| default.to_owned()))
}

/// Parse a boolean environment variable with flexible values
///
/// Accepts: `1`, `true`, `yes`, `y`, `on` (truthy) or `0`, `false`, `no`,
/// `n`, `off` (falsy). Case-insensitive. Returns `default` if unset.
fn parse_bool_env(key: &str, default: bool) -> AppResult<bool> {
    match optional_env(key)? {
        Some(v) => parse_bool_value(&v).ok_or_else(|| {
            AppError::InvalidInput(format!("invalid boolean environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a numeric environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but does not parse as `T`.
fn parse_number_env<T: FromStr>(key: &str, default: T) -> AppResult<T> {
    match optional_env(key)? {
        Some(v) => v.parse::<T>().map_err(|_| {
            AppError::InvalidInput(format!("invalid numeric environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_bool_value;

    #[test]
    fn parse_bool_value_accepts_common_truthy_and_falsy_values() {
        for truthy in ["1", "true", "TRUE", " yes ", "Y", "on"] {
            assert_eq!(parse_bool_value(truthy), Some(true));
        }

        for falsy in ["0", "false", "FALSE", " no ", "N", "off"] {
            assert_eq!(parse_bool_value(falsy), Some(false));
        }
    }

    #[test]
    fn parse_bool_value_rejects_unrecognized_values() {
        for invalid in ["", "2", "maybe", "enabled", "disabled"] {
            assert_eq!(parse_bool_value(invalid), None);
        }
    }
}
