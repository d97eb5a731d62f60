//! Provider wire types and command output DTOs
//!
//! Wire types mirror the mail REST API's JSON (camelCase) and are read-only
//! once deserialized. Output types are what commands emit, either rendered as
//! text or serialized inside a [`CommandEnvelope`].

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Name/value header pair as delivered by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Inline body or attachment reference of one payload node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePartBody {
    /// Present when the content must be fetched separately
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub size: u64,
    /// Base64url encoded content
    pub data: Option<String>,
}

/// One node of the multipart payload tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    pub part_id: Option<String>,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    pub body: Option<MessagePartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

/// Message resource (metadata or full form)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    pub snippet: Option<String>,
    /// Epoch milliseconds, serialized by the provider as a string
    pub internal_date: Option<String>,
    pub size_estimate: Option<u64>,
    pub payload: Option<MessagePart>,
}

impl Message {
    /// Top-level headers, empty when the payload is absent
    pub fn headers(&self) -> &[Header] {
        self.payload
            .as_ref()
            .map(|p| p.headers.as_slice())
            .unwrap_or_default()
    }

    pub fn has_label(&self, label_id: &str) -> bool {
        self.label_ids.iter().any(|l| l == label_id)
    }
}

/// Id-only reference returned by list and send calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
}

/// One page of a message listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageList {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
    pub next_page_token: Option<String>,
    pub result_size_estimate: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: String,
    pub name: String,
    /// `system` or `user`
    #[serde(rename = "type")]
    pub label_type: Option<String>,
    pub messages_total: Option<u64>,
    pub messages_unread: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelList {
    #[serde(default)]
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub email_address: String,
    pub messages_total: Option<u64>,
    pub threads_total: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: String,
    pub message: Option<MessageRef>,
}

/// Metadata included in all JSON responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Command execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard JSON envelope for all commands
#[derive(Debug, Clone, Serialize)]
pub struct CommandEnvelope<T> {
    /// Human-readable summary of the outcome
    pub summary: String,
    /// Command-specific payload
    pub data: T,
    pub meta: Meta,
}

/// Parsed mailbox address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedAddress {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Message row for list and search output
#[derive(Debug, Clone, Serialize)]
pub struct MessageSummary {
    pub id: String,
    pub thread_id: String,
    pub from: ParsedAddress,
    pub subject: Option<String>,
    pub date: Option<String>,
    pub snippet: Option<String>,
    pub unread: bool,
    pub starred: bool,
    pub labels: Vec<String>,
}

/// Attachment metadata; content is never downloaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentInfo {
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub attachment_id: Option<String>,
}

/// Full message view for `get`
#[derive(Debug, Clone, Serialize)]
pub struct MessageDetail {
    pub id: String,
    pub thread_id: String,
    pub from: ParsedAddress,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub subject: Option<String>,
    pub date: Option<String>,
    pub message_id_header: Option<String>,
    pub labels: Vec<String>,
    pub body: String,
    pub attachments: Vec<AttachmentInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadDetail {
    pub id: String,
    pub messages: Vec<MessageDetail>,
}

/// One page of list/search results
#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    pub query: Option<String>,
    pub messages: Vec<MessageSummary>,
    pub next_page_token: Option<String>,
    pub result_size_estimate: Option<u64>,
}

/// Result of `send`, with or without `--draft`
#[derive(Debug, Clone, Serialize)]
pub struct SendResult {
    pub draft: bool,
    pub id: String,
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
}

/// Result of `modify`
#[derive(Debug, Clone, Serialize)]
pub struct ModifyResult {
    pub id: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub trashed: Option<bool>,
    pub labels: Vec<String>,
}
