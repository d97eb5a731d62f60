//! OAuth2 authorization-code client
//!
//! Builds the consent URL and talks to the provider token endpoint using the
//! `oauth2` crate over `reqwest`. Token endpoint access sits behind the
//! [`TokenExchanger`] trait so the authorizer and callback listener can be
//! driven by a test double.

use std::time::Duration;

use async_trait::async_trait;
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use secrecy::ExposeSecret;
use tracing::debug;
use url::Url;

use crate::config::AuthConfig;
use crate::credentials::CredentialBundle;
use crate::errors::{AppError, AppResult};
use crate::token::{TokenRecord, now_ms};

/// Minimal scope set: read, send, and label modification
pub const SCOPES: [&str; 3] = [
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/gmail.modify",
];

type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Token endpoint capability
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Exchange an authorization code for a new token record
    async fn exchange_code(&self, code: &str) -> AppResult<TokenRecord>;

    /// Obtain a fresh access token from a refresh token
    async fn refresh(&self, refresh_token: &str) -> AppResult<TokenRecord>;
}

/// Consent URL plus the CSRF state bound to it
pub struct AuthorizationRequest {
    pub url: Url,
    state: CsrfToken,
}

impl AuthorizationRequest {
    /// The opaque state value to verify on callback
    pub fn state(&self) -> &str {
        self.state.secret()
    }
}

impl std::fmt::Debug for AuthorizationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationRequest")
            .field("url", &"[REDACTED]")
            .field("state", &"[REDACTED]")
            .finish()
    }
}

/// Provider OAuth client for one credential bundle
#[derive(Debug, Clone)]
pub struct OAuthClient {
    client: ConfiguredClient,
    http: reqwest::Client,
}

impl OAuthClient {
    /// Configure the client against the endpoints in `config`
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if an endpoint URL does not parse
    /// - `Internal` if the HTTP client cannot be built
    pub fn new(
        credentials: &CredentialBundle,
        config: &AuthConfig,
        redirect_url: Url,
    ) -> AppResult<Self> {
        let auth_url = AuthUrl::new(config.auth_url.clone())
            .map_err(|e| AppError::invalid(format!("invalid authorization URL: {e}")))?;
        let token_url = TokenUrl::new(config.token_url.clone())
            .map_err(|e| AppError::invalid(format!("invalid token URL: {e}")))?;

        let client = BasicClient::new(ClientId::new(credentials.client_id.clone()))
            .set_client_secret(ClientSecret::new(
                credentials.client_secret.expose_secret().to_owned(),
            ))
            .set_auth_type(AuthType::RequestBody)
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(RedirectUrl::from_url(redirect_url));

        Ok(Self {
            client,
            http: http_client(config.http_timeout)?,
        })
    }

    /// Build the consent URL with a fresh random CSRF state
    ///
    /// Requests offline access and forces the consent prompt so the
    /// provider issues a refresh token even on repeat grants.
    pub fn authorization_request(&self) -> AuthorizationRequest {
        let (url, state) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(SCOPES.iter().map(|s| Scope::new((*s).to_owned())))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .url();
        AuthorizationRequest { url, state }
    }
}

#[async_trait]
impl TokenExchanger for OAuthClient {
    async fn exchange_code(&self, code: &str) -> AppResult<TokenRecord> {
        debug!("exchanging authorization code");
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_owned()))
            .request_async(&self.http)
            .await
            .map_err(|e| {
                AppError::ProviderDenied(format!("code exchange failed: {}", describe(e)))
            })?;
        Ok(record_from_response(&response, now_ms()))
    }

    async fn refresh(&self, refresh_token: &str) -> AppResult<TokenRecord> {
        debug!("refreshing access token");
        let token = RefreshToken::new(refresh_token.to_owned());
        let response = self
            .client
            .exchange_refresh_token(&token)
            .request_async(&self.http)
            .await
            .map_err(|e| AppError::RefreshFailed(describe(e)))?;
        Ok(record_from_response(&response, now_ms()))
    }
}

/// Token endpoint client; redirects are disabled as `oauth2` requires
fn http_client(timeout: Duration) -> AppResult<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))
}

fn record_from_response(response: &BasicTokenResponse, issued_at_ms: i64) -> TokenRecord {
    let expiry_date = response.expires_in().map(|lifetime| {
        issued_at_ms.saturating_add(i64::try_from(lifetime.as_millis()).unwrap_or(i64::MAX))
    });
    let scope = response.scopes().map(|scopes| {
        scopes
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    });

    TokenRecord {
        access_token: response.access_token().secret().to_owned(),
        refresh_token: response.refresh_token().map(|t| t.secret().to_owned()),
        expiry_date,
        scope,
        token_type: Some(response.token_type().as_ref().to_owned()),
    }
}

/// Render a token endpoint failure, preferring the provider's own wording
fn describe<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> String
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => match response.error_description() {
            Some(description) => format!("{}: {description}", response.error()),
            None => response.error().to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::TokenExchanger;
    use crate::errors::{AppError, AppResult};
    use crate::token::{TokenRecord, now_ms};

    /// Exchanger double that counts calls and returns canned records
    #[derive(Debug, Default)]
    pub struct RecordingExchanger {
        pub code_calls: AtomicUsize,
        pub refresh_calls: AtomicUsize,
        pub fail_refresh: bool,
    }

    impl RecordingExchanger {
        pub fn failing_refresh() -> Self {
            Self {
                fail_refresh: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl TokenExchanger for RecordingExchanger {
        async fn exchange_code(&self, _code: &str) -> AppResult<TokenRecord> {
            self.code_calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenRecord {
                access_token: "ya29.exchanged".to_owned(),
                refresh_token: Some("1//issued".to_owned()),
                expiry_date: Some(now_ms() + 3_600_000),
                scope: Some(super::SCOPES.join(" ")),
                token_type: Some("Bearer".to_owned()),
            })
        }

        async fn refresh(&self, _refresh_token: &str) -> AppResult<TokenRecord> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_refresh {
                return Err(AppError::RefreshFailed(
                    "invalid_grant: Token has been expired or revoked.".to_owned(),
                ));
            }
            Ok(TokenRecord {
                access_token: "ya29.refreshed".to_owned(),
                refresh_token: None,
                expiry_date: Some(now_ms() + 3_600_000),
                scope: None,
                token_type: Some("Bearer".to_owned()),
            })
        }
    }
}
