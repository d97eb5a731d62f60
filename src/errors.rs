//! Application error model with exit-code and remediation mapping
//!
//! Defines a typed error hierarchy using `thiserror`. Authorization failures
//! carry their own variants so the CLI can print a targeted hint, and mail
//! API failures are normalized to fixed human-readable messages keyed by
//! HTTP status code.

use std::path::Path;

use thiserror::Error;

/// Application error type
///
/// Covers every failure the CLI can surface. Decoding problems in message
/// payloads are deliberately absent: the payload codec degrades to empty
/// values instead of failing.
#[derive(Debug, Error)]
pub enum AppError {
    /// OAuth client credentials file is absent
    #[error("OAuth client credentials not found at {0}")]
    MissingCredentials(String),
    /// No persisted token record exists
    #[error("not authenticated: no saved token")]
    NotAuthenticated,
    /// Callback `state` did not match the value generated for the session
    #[error("authorization callback state mismatch; authorization aborted")]
    CsrfMismatch,
    /// User rejected consent or the provider returned an error
    #[error("authorization denied: {0}")]
    ProviderDenied(String),
    /// Operation timeout (authorization callback wait, HTTP request)
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Local callback listener port is taken
    #[error("callback port {0} is already in use")]
    PortInUse(u16),
    /// Refresh of a stale access token failed
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    /// Invalid user input (validation failed, malformed configuration)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Mail API returned a non-success status
    #[error("{message}")]
    Api { status: u16, message: String },
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Convenience constructor for `MissingCredentials`
    pub fn missing_credentials(path: &Path) -> Self {
        Self::MissingCredentials(path.display().to_string())
    }

    /// Map a mail API status code to a fixed user-facing message
    ///
    /// `detail` is the provider's error message and is only surfaced for
    /// statuses without a fixed mapping.
    ///
    /// # Mappings
    ///
    /// - `401` → re-authenticate
    /// - `403` → scope/permission issue
    /// - `404` → message gone
    /// - `429` → back off and retry manually
    pub fn from_api_status(status: u16, detail: &str) -> Self {
        let message = match status {
            401 => "authentication expired or was revoked".to_owned(),
            403 => "permission denied: the granted scopes do not allow this operation".to_owned(),
            404 => "not found: the message may have been deleted".to_owned(),
            429 => "rate limit exceeded: wait a moment and retry".to_owned(),
            _ if detail.trim().is_empty() => format!("mail API request failed with status {status}"),
            _ => format!("mail API request failed with status {status}: {}", detail.trim()),
        };
        Self::Api { status, message }
    }

    /// Remediation hint printed under the error message
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::MissingCredentials(_) => Some(
                "download OAuth client credentials (Desktop app) and save them to the credentials path",
            ),
            Self::NotAuthenticated | Self::RefreshFailed(_) => {
                Some("run `mail-gmail-cli auth login` to re-run authorization")
            }
            Self::CsrfMismatch | Self::ProviderDenied(_) | Self::Timeout(_) => {
                Some("run `mail-gmail-cli auth login` again")
            }
            Self::PortInUse(_) => {
                Some("free the port or set MAIL_GMAIL_CALLBACK_PORT to an unused port")
            }
            Self::Api { status: 401, .. } => {
                Some("run `mail-gmail-cli auth login` to re-authenticate")
            }
            Self::Api { status: 403, .. } => {
                Some("re-run `mail-gmail-cli auth login` to grant the required scopes")
            }
            Self::Api { status: 429, .. } => Some("retry the command after a short pause"),
            _ => None,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidInput(_) => 2,
            _ => 1,
        }
    }
}

/// Type alias for fallible return values
pub type AppResult<T> = Result<T, AppError>;
