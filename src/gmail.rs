//! Authenticated mail REST API client
//!
//! Thin wrapper over `reqwest` for the endpoints the commands need. Every
//! request carries the bearer token; non-success statuses are normalized
//! through [`AppError::from_api_status`]. Nothing here retries.

use futures::stream::{self, StreamExt, TryStreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ApiConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{Draft, Label, LabelList, Message, MessageList, MessageRef, Profile, Thread};

/// Headers requested for list and search rows
pub const SUMMARY_HEADERS: [&str; 4] = ["From", "Subject", "Date", "To"];

/// Upper bound accepted by the provider for `maxResults`
pub const MAX_RESULTS_LIMIT: u32 = 500;

/// Representation requested from the message and thread endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    /// Headers listed in [`SUMMARY_HEADERS`] plus labels and snippet
    Metadata,
    /// Complete payload tree with inline bodies
    Full,
}

impl MessageFormat {
    fn as_str(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Full => "full",
        }
    }

    fn query(self) -> Vec<(&'static str, String)> {
        let mut query = vec![("format", self.as_str().to_owned())];
        if self == Self::Metadata {
            query.extend(SUMMARY_HEADERS.iter().map(|h| ("metadataHeaders", (*h).to_owned())));
        }
        query
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage<'a> {
    raw: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<&'a str>,
}

#[derive(Serialize)]
struct DraftRequest<'a> {
    message: RawMessage<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest<'a> {
    add_label_ids: &'a [String],
    remove_label_ids: &'a [String],
}

/// Authenticated handle for one account
#[derive(Debug, Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
    access_token: SecretString,
    fetch_concurrency: usize,
}

impl GmailClient {
    pub fn new(config: &ApiConfig, access_token: SecretString) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            access_token,
            fetch_concurrency: config.fetch_concurrency.max(1),
        })
    }

    /// Mailbox owner's profile
    pub async fn profile(&self) -> AppResult<Profile> {
        self.get_json("profile", &[]).await
    }

    /// One page of message ids matching `query`
    pub async fn list_messages(
        &self,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> AppResult<MessageList> {
        let mut params = vec![("maxResults", max_results.clamp(1, MAX_RESULTS_LIMIT).to_string())];
        if !query.is_empty() {
            params.push(("q", query.to_owned()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_owned()));
        }
        self.get_json("messages", &params).await
    }

    pub async fn get_message(&self, id: &str, format: MessageFormat) -> AppResult<Message> {
        let path = format!("messages/{}", urlencoding::encode(id));
        self.get_json(&path, &format.query()).await
    }

    /// Fetch metadata for many messages with bounded concurrency
    ///
    /// Requests complete in any order; the result follows the order of `ids`.
    pub async fn get_messages_metadata(&self, ids: &[String]) -> AppResult<Vec<Message>> {
        stream::iter(ids)
            .map(|id| self.get_message(id, MessageFormat::Metadata))
            .buffered(self.fetch_concurrency)
            .try_collect()
            .await
    }

    pub async fn get_thread(&self, id: &str, format: MessageFormat) -> AppResult<Thread> {
        let path = format!("threads/{}", urlencoding::encode(id));
        self.get_json(&path, &format.query()).await
    }

    pub async fn list_labels(&self) -> AppResult<Vec<Label>> {
        let list: LabelList = self.get_json("labels", &[]).await?;
        Ok(list.labels)
    }

    /// Send a base64url-encoded RFC 2822 message
    pub async fn send_raw(&self, raw: &str, thread_id: Option<&str>) -> AppResult<MessageRef> {
        self.post_json("messages/send", &RawMessage { raw, thread_id })
            .await
    }

    pub async fn create_draft(&self, raw: &str, thread_id: Option<&str>) -> AppResult<Draft> {
        self.post_json(
            "drafts",
            &DraftRequest {
                message: RawMessage { raw, thread_id },
            },
        )
        .await
    }

    /// Add and remove label ids on one message
    pub async fn modify_labels(
        &self,
        id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> AppResult<Message> {
        let path = format!("messages/{}/modify", urlencoding::encode(id));
        self.post_json(
            &path,
            &ModifyRequest {
                add_label_ids,
                remove_label_ids,
            },
        )
        .await
    }

    pub async fn trash(&self, id: &str) -> AppResult<Message> {
        let path = format!("messages/{}/trash", urlencoding::encode(id));
        self.post_empty(&path).await
    }

    pub async fn untrash(&self, id: &str) -> AppResult<Message> {
        let path = format!("messages/{}/untrash", urlencoding::encode(id));
        self.post_empty(&path).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/users/me/{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> AppResult<T> {
        debug!(method = "GET", path, "mail API request");
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(self.access_token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> AppResult<T> {
        debug!(method = "POST", path, "mail API request");
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(self.access_token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        debug!(method = "POST", path, "mail API request");
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(self.access_token.expose_secret())
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> AppResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|b| b.error)
            .and_then(|e| e.message)
            .unwrap_or_default();
        debug!(status = status.as_u16(), "mail API request failed");
        return Err(AppError::from_api_status(status.as_u16(), &detail));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| AppError::Internal(format!("unexpected mail API response: {e}")))
}

fn transport_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Timeout("mail API request timed out".to_owned())
    } else {
        AppError::Internal(format!("mail API request failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{GmailClient, MessageFormat};
    use crate::config::ApiConfig;
    use crate::errors::AppError;

    fn client(server: &MockServer) -> GmailClient {
        let config = ApiConfig {
            base_url: server.uri(),
            http_timeout: Duration::from_secs(5),
            fetch_concurrency: 4,
        };
        GmailClient::new(&config, SecretString::from("ya29.test".to_owned())).expect("client")
    }

    #[tokio::test]
    async fn list_sends_query_and_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/messages"))
            .and(header("authorization", "Bearer ya29.test"))
            .and(query_param("q", "is:unread"))
            .and(query_param("maxResults", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"id": "m1", "threadId": "t1"}],
                "nextPageToken": "next",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let list = client(&server)
            .list_messages("is:unread", 10, None)
            .await
            .expect("list succeeds");
        assert_eq!(list.messages[0].id, "m1");
        assert_eq!(list.next_page_token.as_deref(), Some("next"));
    }

    #[tokio::test]
    async fn metadata_fetch_keeps_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/messages/slow"))
            .and(query_param("format", "metadata"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "slow", "threadId": "t"}))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/me/messages/fast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "fast", "threadId": "t"})))
            .mount(&server)
            .await;

        let ids = vec!["slow".to_owned(), "fast".to_owned()];
        let messages = client(&server)
            .get_messages_metadata(&ids)
            .await
            .expect("fetch succeeds");
        let order: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, ["slow", "fast"]);
    }

    #[tokio::test]
    async fn not_found_maps_to_fixed_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/messages/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": 404, "message": "Requested entity was not found."}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .get_message("gone", MessageFormat::Full)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Api { status: 404, .. }));
        assert_eq!(err.to_string(), "not found: the message may have been deleted");
    }

    #[tokio::test]
    async fn unmapped_status_carries_provider_detail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/labels"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "Invalid label"}
            })))
            .mount(&server)
            .await;

        let err = client(&server).list_labels().await.expect_err("must fail");
        assert!(err.to_string().contains("status 400: Invalid label"));
    }

    #[tokio::test]
    async fn modify_posts_label_changes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/me/messages/m1/modify"))
            .and(body_json(json!({
                "addLabelIds": ["STARRED"],
                "removeLabelIds": ["UNREAD"],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "m1", "threadId": "t1", "labelIds": ["INBOX", "STARRED"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let message = client(&server)
            .modify_labels("m1", &["STARRED".to_owned()], &["UNREAD".to_owned()])
            .await
            .expect("modify succeeds");
        assert!(message.has_label("STARRED"));
    }

    #[tokio::test]
    async fn send_posts_raw_with_thread() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/me/messages/send"))
            .and(body_json(json!({"raw": "cmF3", "threadId": "t9"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "sent", "threadId": "t9"})))
            .expect(1)
            .mount(&server)
            .await;

        let sent = client(&server)
            .send_raw("cmF3", Some("t9"))
            .await
            .expect("send succeeds");
        assert_eq!(sent.id, "sent");
    }
}
