//! Authorization flow and token lifecycle
//!
//! The [`Authorizer`] owns every path and endpoint it touches through
//! [`AuthConfig`]. It hands out an authenticated [`GmailClient`] backed by a
//! fresh access token, refreshing a stale one exactly once, and runs the
//! interactive browser flow on request.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{SecondsFormat, TimeZone, Utc};
use secrecy::SecretString;
use serde::Serialize;
use tracing::{info, warn};

use crate::callback::CallbackListener;
use crate::config::{ApiConfig, AuthConfig};
use crate::credentials::CredentialBundle;
use crate::errors::{AppError, AppResult};
use crate::gmail::GmailClient;
use crate::oauth::{OAuthClient, TokenExchanger};
use crate::token::{TokenRecord, TokenStore, is_token_expired};

/// Snapshot of the persisted authorization state
#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    pub token_path: String,
    pub authenticated: bool,
    /// Access token is outside the refresh buffer
    pub fresh: bool,
    /// RFC 3339 expiry, when known
    pub expires_at: Option<String>,
    pub has_refresh_token: bool,
    pub scopes: Vec<String>,
}

pub struct Authorizer {
    config: AuthConfig,
    store: TokenStore,
    exchanger: Option<Arc<dyn TokenExchanger>>,
}

impl Authorizer {
    pub fn new(config: AuthConfig) -> Self {
        let store = TokenStore::new(config.token_path.clone());
        Self {
            config,
            store,
            exchanger: None,
        }
    }

    /// Use `exchanger` for code exchange and refresh instead of the provider
    #[cfg(test)]
    pub fn with_exchanger(config: AuthConfig, exchanger: Arc<dyn TokenExchanger>) -> Self {
        Self {
            exchanger: Some(exchanger),
            ..Self::new(config)
        }
    }

    /// Authenticated API handle with a fresh access token
    ///
    /// # Errors
    ///
    /// - `MissingCredentials` if the credential bundle is absent
    /// - `NotAuthenticated` if no token has been saved
    /// - `RefreshFailed` if a stale token cannot be refreshed
    pub async fn obtain_authorized_client(&self, api: &ApiConfig) -> AppResult<GmailClient> {
        let record = self.obtain_token().await?;
        GmailClient::new(api, SecretString::from(record.access_token))
    }

    /// Current token record, refreshed first if inside the expiry buffer
    ///
    /// A stale token is never returned: refresh failure is an error.
    pub async fn obtain_token(&self) -> AppResult<TokenRecord> {
        let credentials = CredentialBundle::load(&self.config.credentials_path)?;
        let mut record = self.store.load()?.ok_or(AppError::NotAuthenticated)?;
        if !is_token_expired(&record) {
            return Ok(record);
        }

        info!("access token expired, refreshing");
        let refresh_token = record.refresh_token.clone().ok_or_else(|| {
            AppError::RefreshFailed("no refresh token saved with the expired access token".to_owned())
        })?;
        let exchanger = self.exchanger(&credentials)?;
        let refreshed = exchanger.refresh(&refresh_token).await?;
        record.apply_refresh(refreshed);
        self.persist_token(&record)?;
        info!("access token refreshed");
        Ok(record)
    }

    /// Run the browser-based authorization-code flow and persist the result
    ///
    /// # Errors
    ///
    /// `MissingCredentials`, `PortInUse`, `CsrfMismatch`, `ProviderDenied`,
    /// or `Timeout`. The callback listener is closed in every case.
    pub async fn run_interactive_authorization(&self) -> AppResult<TokenRecord> {
        let credentials = CredentialBundle::load(&self.config.credentials_path)?;
        let redirect_url = credentials.redirect_url(self.config.callback_port)?;
        let oauth = OAuthClient::new(&credentials, &self.config, redirect_url.clone())?;
        let request = oauth.authorization_request();
        let exchanger: Arc<dyn TokenExchanger> = match &self.exchanger {
            Some(exchanger) => exchanger.clone(),
            None => Arc::new(oauth),
        };

        let port = redirect_url.port().unwrap_or(self.config.callback_port);
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener =
            CallbackListener::bind(addr, redirect_url.path(), request.state(), exchanger).await?;

        info!(addr = %listener.local_addr(), "starting interactive authorization");
        eprintln!("Open this URL in your browser to authorize access:\n\n  {}\n", request.url);
        if self.config.open_browser
            && let Err(e) = open::that(request.url.as_str())
        {
            warn!(error = %e, "could not open browser; use the URL above");
        }

        let record = listener.wait(self.config.auth_timeout).await?;
        self.persist_token(&record)?;
        info!("authorization complete");
        Ok(record)
    }

    /// Write `record` to the token path with owner-only permissions
    pub fn persist_token(&self, record: &TokenRecord) -> AppResult<()> {
        self.store.persist(record)
    }

    /// Describe the saved token without contacting the provider
    pub fn status(&self) -> AppResult<AuthStatus> {
        let token_path = self.store.path().display().to_string();
        let Some(record) = self.store.load()? else {
            return Ok(AuthStatus {
                token_path,
                authenticated: false,
                fresh: false,
                expires_at: None,
                has_refresh_token: false,
                scopes: Vec::new(),
            });
        };

        let expires_at = record
            .expiry_date
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true));
        Ok(AuthStatus {
            token_path,
            authenticated: true,
            fresh: !is_token_expired(&record),
            expires_at,
            has_refresh_token: record.refresh_token.is_some(),
            scopes: record.scopes(),
        })
    }

    /// Delete the saved token; returns whether one existed
    pub fn logout(&self) -> AppResult<bool> {
        let removed = self.store.clear()?;
        if removed {
            info!(path = %self.store.path().display(), "removed saved token");
        }
        Ok(removed)
    }

    fn exchanger(&self, credentials: &CredentialBundle) -> AppResult<Arc<dyn TokenExchanger>> {
        if let Some(exchanger) = &self.exchanger {
            return Ok(exchanger.clone());
        }
        let redirect_url = credentials.redirect_url(self.config.callback_port)?;
        Ok(Arc::new(OAuthClient::new(
            credentials,
            &self.config,
            redirect_url,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::Authorizer;
    use crate::config::AuthConfig;
    use crate::errors::AppError;
    use crate::oauth::testing::RecordingExchanger;
    use crate::token::{TokenRecord, TokenStore, now_ms};

    const CREDENTIALS: &str =
        r#"{"installed":{"client_id":"client-123","client_secret":"secret-456"}}"#;

    fn config(dir: &Path, port: u16) -> AuthConfig {
        AuthConfig {
            credentials_path: dir.join("credentials.json"),
            token_path: dir.join("cfg").join("token.json"),
            callback_port: port,
            auth_timeout: Duration::from_secs(10),
            open_browser: false,
            auth_url: "https://accounts.example.com/o/oauth2/v2/auth".to_owned(),
            token_url: "https://oauth2.example.com/token".to_owned(),
            http_timeout: Duration::from_secs(5),
        }
    }

    fn write_credentials(dir: &Path) {
        std::fs::write(dir.join("credentials.json"), CREDENTIALS).expect("write credentials");
    }

    fn saved(dir: &Path, expiry_date: i64) {
        TokenStore::new(dir.join("cfg").join("token.json"))
            .persist(&TokenRecord {
                access_token: "ya29.saved".to_owned(),
                refresh_token: Some("1//saved".to_owned()),
                expiry_date: Some(expiry_date),
                scope: Some("https://www.googleapis.com/auth/gmail.readonly".to_owned()),
                token_type: Some("Bearer".to_owned()),
            })
            .expect("seed token");
    }

    #[tokio::test]
    async fn missing_credentials_is_reported_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        saved(dir.path(), now_ms() + 3_600_000);
        let authorizer = Authorizer::new(config(dir.path(), 3000));

        let err = authorizer.obtain_token().await.expect_err("must fail");
        assert!(matches!(err, AppError::MissingCredentials(_)));
    }

    #[tokio::test]
    async fn missing_token_is_not_authenticated() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_credentials(dir.path());
        let authorizer = Authorizer::new(config(dir.path(), 3000));

        let err = authorizer.obtain_token().await.expect_err("must fail");
        assert!(matches!(err, AppError::NotAuthenticated));
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_refresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_credentials(dir.path());
        saved(dir.path(), now_ms() + 3_600_000);
        let exchanger = Arc::new(RecordingExchanger::default());
        let authorizer = Authorizer::with_exchanger(config(dir.path(), 3000), exchanger.clone());

        let record = authorizer.obtain_token().await.expect("token");
        assert_eq!(record.access_token, "ya29.saved");
        assert_eq!(exchanger.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_token_is_refreshed_and_persisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_credentials(dir.path());
        saved(dir.path(), now_ms() + 60_000);
        let exchanger = Arc::new(RecordingExchanger::default());
        let cfg = config(dir.path(), 3000);
        let token_path = cfg.token_path.clone();
        let authorizer = Authorizer::with_exchanger(cfg, exchanger.clone());

        let record = authorizer.obtain_token().await.expect("token");
        assert_eq!(record.access_token, "ya29.refreshed");
        assert_eq!(record.refresh_token.as_deref(), Some("1//saved"));
        assert_eq!(exchanger.refresh_calls.load(Ordering::SeqCst), 1);

        let persisted = TokenStore::new(token_path)
            .load()
            .expect("load")
            .expect("record present");
        assert_eq!(persisted, record);
    }

    #[tokio::test]
    async fn refresh_failure_never_returns_stale_token() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_credentials(dir.path());
        saved(dir.path(), now_ms() - 1_000);
        let exchanger = Arc::new(RecordingExchanger::failing_refresh());
        let authorizer = Authorizer::with_exchanger(config(dir.path(), 3000), exchanger.clone());

        let err = authorizer.obtain_token().await.expect_err("must fail");
        assert!(matches!(err, AppError::RefreshFailed(_)));
        assert_eq!(exchanger.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn status_and_logout_reflect_token_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let authorizer = Authorizer::new(config(dir.path(), 3000));
        assert!(!authorizer.status().expect("status").authenticated);

        saved(dir.path(), now_ms() + 3_600_000);
        let status = authorizer.status().expect("status");
        assert!(status.authenticated);
        assert!(status.fresh);
        assert!(status.has_refresh_token);
        assert_eq!(status.scopes.len(), 1);

        assert!(authorizer.logout().expect("logout"));
        assert!(!authorizer.logout().expect("second logout"));
    }

    #[tokio::test]
    async fn csrf_mismatch_aborts_before_token_exchange() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_credentials(dir.path());
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("probe");
            probe.local_addr().expect("addr").port()
        };
        let exchanger = Arc::new(RecordingExchanger::default());
        let cfg = config(dir.path(), port);
        let token_path = cfg.token_path.clone();
        let authorizer = Authorizer::with_exchanger(cfg, exchanger.clone());

        let flow = tokio::spawn(async move { authorizer.run_interactive_authorization().await });

        let url = format!("http://127.0.0.1:{port}/oauth2callback?code=stolen&state=forged");
        let mut response = None;
        for _ in 0..50 {
            match reqwest::get(&url).await {
                Ok(r) => {
                    response = Some(r);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
        let response = response.expect("callback listener reachable");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let err = flow
            .await
            .expect("join")
            .expect_err("authorization must fail");
        assert!(matches!(err, AppError::CsrfMismatch));
        assert_eq!(exchanger.code_calls.load(Ordering::SeqCst), 0);
        assert!(!token_path.exists());
    }
}
