//! Loopback HTTP listener for the authorization-code callback
//!
//! Serves a single route with `axum`, verifies the CSRF state before looking
//! at anything else in the query, performs the code exchange, and reports the
//! first outcome to the waiting authorizer. The listener is torn down on
//! every exit path: success, state mismatch, provider error, and timeout.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::oauth::TokenExchanger;
use crate::token::TokenRecord;

/// Time allowed for the final browser response to flush on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authorization complete</title></head>
<body style="font-family: system-ui; text-align: center; padding: 60px 20px;">
<h2>Authorization complete</h2>
<p>You can close this tab and return to the terminal.</p>
</body>
</html>"#;

const FAILURE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authorization failed</title></head>
<body style="font-family: system-ui; text-align: center; padding: 60px 20px;">
<h2>Authorization failed</h2>
<p>Return to the terminal for details and run the login command again.</p>
</body>
</html>"#;

const ALREADY_HANDLED_HTML: &str = r#"<!DOCTYPE html>
<html><body style="font-family: system-ui; text-align: center; padding: 60px 20px;">
<h2>This authorization request was already handled</h2>
</body></html>"#;

/// Result delivered by the callback handler
pub type CallbackOutcome = AppResult<TokenRecord>;

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<str>,
    exchanger: Arc<dyn TokenExchanger>,
    outcome_tx: mpsc::Sender<CallbackOutcome>,
    handled: Arc<AtomicBool>,
}

#[derive(Debug, Default, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Running callback listener for one authorization session
pub struct CallbackListener {
    local_addr: SocketAddr,
    outcome_rx: mpsc::Receiver<CallbackOutcome>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl CallbackListener {
    /// Bind `addr` and start serving `path`
    ///
    /// # Errors
    ///
    /// - `PortInUse` if the address is already bound
    /// - `Internal` for any other socket failure
    pub async fn bind(
        addr: SocketAddr,
        path: &str,
        expected_state: &str,
        exchanger: Arc<dyn TokenExchanger>,
    ) -> AppResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| match e.kind() {
            ErrorKind::AddrInUse => AppError::PortInUse(addr.port()),
            _ => AppError::Internal(format!("failed to bind callback listener on {addr}: {e}")),
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AppError::Internal(format!("callback listener has no address: {e}")))?;

        let (outcome_tx, outcome_rx) = mpsc::channel(1);
        let router = callback_router(
            path,
            CallbackState {
                expected_state: Arc::from(expected_state),
                exchanger,
                outcome_tx,
                handled: Arc::new(AtomicBool::new(false)),
            },
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "callback listener stopped with error");
            }
        });

        info!(addr = %local_addr, "listening for authorization callback");
        Ok(Self {
            local_addr,
            outcome_rx,
            shutdown_tx: Some(shutdown_tx),
            server: Some(server),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the first callback outcome, bounded by `timeout`
    ///
    /// The listener is closed before this returns, whatever the outcome.
    pub async fn wait(mut self, timeout: Duration) -> CallbackOutcome {
        let outcome = match tokio::time::timeout(timeout, self.outcome_rx.recv()).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => Err(AppError::Internal(
                "callback listener stopped before a callback arrived".to_owned(),
            )),
            Err(_) => Err(AppError::Timeout(format!(
                "no authorization callback received within {} seconds",
                timeout.as_secs()
            ))),
        };
        self.shutdown().await;
        outcome
    }

    async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut server) = self.server.take()
            && tokio::time::timeout(SHUTDOWN_GRACE, &mut server)
                .await
                .is_err()
        {
            server.abort();
        }
        debug!(addr = %self.local_addr, "callback listener closed");
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

fn callback_router(path: &str, state: CallbackState) -> Router {
    Router::new()
        .route(path, get(handle_callback))
        .with_state(state)
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if state.handled.swap(true, Ordering::SeqCst) {
        return page(StatusCode::CONFLICT, ALREADY_HANDLED_HTML);
    }

    let outcome = resolve_callback(&state, query).await;
    let response = match &outcome {
        Ok(_) => page(StatusCode::OK, SUCCESS_HTML),
        Err(_) => page(StatusCode::BAD_REQUEST, FAILURE_HTML),
    };
    let _ = state.outcome_tx.try_send(outcome);
    response
}

/// Decide the callback outcome
///
/// The state comparison runs first; nothing else in the query is read when
/// it fails, and the token endpoint is never contacted.
async fn resolve_callback(state: &CallbackState, query: CallbackQuery) -> CallbackOutcome {
    let received = query.state.as_deref().unwrap_or_default();
    if !constant_time_eq(received.as_bytes(), state.expected_state.as_bytes()) {
        warn!("authorization callback state mismatch");
        return Err(AppError::CsrfMismatch);
    }

    if let Some(error) = query.error {
        let detail = match query.error_description {
            Some(description) => format!("{error}: {description}"),
            None => error,
        };
        warn!(error = %detail, "provider returned an authorization error");
        return Err(AppError::ProviderDenied(detail));
    }

    let code = query.code.filter(|c| !c.is_empty()).ok_or_else(|| {
        AppError::ProviderDenied("callback did not include an authorization code".to_owned())
    })?;
    state.exchanger.exchange_code(&code).await
}

fn page(status: StatusCode, body: &'static str) -> Response {
    (status, [(header::CONNECTION, "close")], Html(body)).into_response()
}

/// Constant-time byte comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (&x, &y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use super::{CallbackListener, CallbackState, callback_router, constant_time_eq};
    use crate::errors::AppError;
    use crate::oauth::testing::RecordingExchanger;

    const STATE: &str = "expected-state-value";

    fn router_with(
        exchanger: Arc<RecordingExchanger>,
    ) -> (axum::Router, mpsc::Receiver<super::CallbackOutcome>) {
        let (outcome_tx, outcome_rx) = mpsc::channel(1);
        let router = callback_router(
            "/oauth2callback",
            CallbackState {
                expected_state: Arc::from(STATE),
                exchanger,
                outcome_tx,
                handled: Arc::new(AtomicBool::new(false)),
            },
        );
        (router, outcome_rx)
    }

    async fn call(router: axum::Router, uri: &str) -> StatusCode {
        router
            .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
            .await
            .expect("router responds")
            .status()
    }

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn state_mismatch_never_reaches_token_exchange() {
        let exchanger = Arc::new(RecordingExchanger::default());
        let (router, mut outcomes) = router_with(exchanger.clone());

        let status = call(router, "/oauth2callback?code=stolen-code&state=attacker").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let outcome = outcomes.recv().await.expect("outcome delivered");
        assert!(matches!(outcome, Err(AppError::CsrfMismatch)));
        assert_eq!(exchanger.code_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn state_is_checked_before_provider_error() {
        let exchanger = Arc::new(RecordingExchanger::default());
        let (router, mut outcomes) = router_with(exchanger.clone());

        call(router, "/oauth2callback?error=access_denied").await;

        let outcome = outcomes.recv().await.expect("outcome delivered");
        assert!(matches!(outcome, Err(AppError::CsrfMismatch)));
    }

    #[tokio::test]
    async fn provider_error_is_denied_without_exchange() {
        let exchanger = Arc::new(RecordingExchanger::default());
        let (router, mut outcomes) = router_with(exchanger.clone());

        let uri = format!("/oauth2callback?error=access_denied&state={STATE}");
        assert_eq!(call(router, &uri).await, StatusCode::BAD_REQUEST);

        let outcome = outcomes.recv().await.expect("outcome delivered");
        match outcome {
            Err(AppError::ProviderDenied(detail)) => assert_eq!(detail, "access_denied"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(exchanger.code_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn listener_exchanges_code_and_answers_browser() {
        let exchanger = Arc::new(RecordingExchanger::default());
        let listener = CallbackListener::bind(loopback(), "/oauth2callback", STATE, exchanger.clone())
            .await
            .expect("bind");
        let url = format!(
            "http://{}/oauth2callback?code=good-code&state={STATE}",
            listener.local_addr()
        );

        let browser = tokio::spawn(async move { reqwest::get(url).await });
        let record = listener
            .wait(Duration::from_secs(5))
            .await
            .expect("authorization succeeds");

        assert_eq!(record.access_token, "ya29.exchanged");
        assert_eq!(exchanger.code_calls.load(Ordering::SeqCst), 1);
        let response = browser.await.expect("join").expect("browser request");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn second_callback_is_ignored() {
        let exchanger = Arc::new(RecordingExchanger::default());
        let listener = CallbackListener::bind(loopback(), "/oauth2callback", STATE, exchanger.clone())
            .await
            .expect("bind");
        let url = format!(
            "http://{}/oauth2callback?code=good-code&state={STATE}",
            listener.local_addr()
        );

        let first = reqwest::get(&url).await.expect("first request");
        let second = reqwest::get(&url).await.expect("second request");
        assert_eq!(first.status(), reqwest::StatusCode::OK);
        assert_eq!(second.status(), reqwest::StatusCode::CONFLICT);

        listener
            .wait(Duration::from_secs(5))
            .await
            .expect("first outcome wins");
        assert_eq!(exchanger.code_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_closes_listener() {
        let exchanger = Arc::new(RecordingExchanger::default());
        let listener = CallbackListener::bind(loopback(), "/oauth2callback", STATE, exchanger)
            .await
            .expect("bind");
        let addr = listener.local_addr();

        let err = listener
            .wait(Duration::from_millis(50))
            .await
            .expect_err("must time out");
        assert!(matches!(err, AppError::Timeout(_)));

        tokio::net::TcpListener::bind(addr)
            .await
            .expect("port released after timeout");
    }

    #[tokio::test]
    async fn occupied_port_is_port_in_use() {
        let taken = std::net::TcpListener::bind(loopback()).expect("bind probe");
        let addr = taken.local_addr().expect("addr");
        let exchanger = Arc::new(RecordingExchanger::default());

        let err = CallbackListener::bind(addr, "/oauth2callback", STATE, exchanger)
            .await
            .err()
            .expect("bind must fail");
        assert!(matches!(err, AppError::PortInUse(port) if port == addr.port()));
    }

    #[test]
    fn constant_time_eq_compares_content_and_length() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
