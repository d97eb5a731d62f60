//! OAuth client credential bundle
//!
//! Loads the user-provisioned client credentials JSON downloaded from the
//! provider console. The file is never written by this program.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::errors::{AppError, AppResult};

/// Callback path used when the provisioned redirect URI has none
pub const DEFAULT_CALLBACK_PATH: &str = "/oauth2callback";

/// Immutable OAuth client identity
#[derive(Debug, Clone)]
pub struct CredentialBundle {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uris: Vec<String>,
}

#[derive(Deserialize)]
struct CredentialsFile {
    installed: Option<ClientSection>,
    web: Option<ClientSection>,
}

#[derive(Deserialize)]
struct ClientSection {
    client_id: Option<String>,
    client_secret: Option<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

impl CredentialBundle {
    /// Load the bundle from `path`
    ///
    /// # Errors
    ///
    /// - `MissingCredentials` if the file does not exist
    /// - `InvalidInput` if the JSON is malformed or lacks client id/secret
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AppError::missing_credentials(path));
            }
            Err(e) => {
                return Err(AppError::Internal(format!(
                    "failed to read credentials {}: {e}",
                    path.display()
                )));
            }
        };
        Self::parse(&raw)
    }

    /// Parse the provider's `installed` or `web` credentials document
    pub fn parse(raw: &str) -> AppResult<Self> {
        let file: CredentialsFile = serde_json::from_str(raw)
            .map_err(|e| AppError::invalid(format!("malformed credentials file: {e}")))?;
        let section = file.installed.or(file.web).ok_or_else(|| {
            AppError::invalid("credentials file must contain an 'installed' or 'web' object")
        })?;

        let client_id = section
            .client_id
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::invalid("credentials file is missing client_id"))?;
        let client_secret = section
            .client_secret
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::invalid("credentials file is missing client_secret"))?;

        Ok(Self {
            client_id,
            client_secret: SecretString::new(client_secret.into()),
            redirect_uris: section.redirect_uris,
        })
    }

    /// Pick the loopback redirect URL for the callback listener
    ///
    /// Uses the first `http` redirect URI on `localhost`/`127.0.0.1`. A URI
    /// without a port gets `default_port`; a URI without a path gets
    /// [`DEFAULT_CALLBACK_PATH`]. Without a loopback URI the redirect names
    /// `127.0.0.1`, the address the callback listener binds.
    pub fn redirect_url(&self, default_port: u16) -> AppResult<Url> {
        let loopback = self
            .redirect_uris
            .iter()
            .filter_map(|uri| Url::parse(uri).ok())
            .find(|url| {
                url.scheme() == "http"
                    && matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"))
            });

        let mut url = match loopback {
            Some(url) => url,
            None => Url::parse(&format!("http://127.0.0.1:{default_port}"))
                .map_err(|e| AppError::Internal(format!("invalid redirect url: {e}")))?,
        };

        if url.port().is_none() {
            url.set_port(Some(default_port))
                .map_err(|_| AppError::Internal("cannot set redirect port".to_owned()))?;
        }
        if url.path().is_empty() || url.path() == "/" {
            url.set_path(DEFAULT_CALLBACK_PATH);
        }
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }
}
