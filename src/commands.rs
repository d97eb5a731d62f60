//! Command implementations
//!
//! Each command validates its input, talks to the provider through an
//! authenticated [`GmailClient`], and returns a summary plus a typed payload.
//! [`finalize`] turns that into either rendered text or the JSON envelope;
//! nothing is printed until the whole command has succeeded.

use std::time::Instant;

use chrono::Local;
use serde::Serialize;

use crate::authorizer::Authorizer;
use crate::cli::{
    AuthAction, Cli, Command, GetArgs, ListArgs, ModifyArgs, OutputFormat, SearchArgs, SendArgs,
};
use crate::compose::{OutgoingMessage, ReplyContext, reply_subject};
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::format;
use crate::gmail::{GmailClient, MessageFormat};
use crate::mime::{collect_attachments, extract_plain_body, get_header_value, parse_address, sanitize_html};
use crate::models::{
    CommandEnvelope, Label, Message, MessageDetail, MessagePage, MessageSummary, Meta,
    ModifyResult, SendResult, ThreadDetail,
};
use crate::query::SearchFilters;

const LABEL_INBOX: &str = "INBOX";
const LABEL_UNREAD: &str = "UNREAD";
const LABEL_STARRED: &str = "STARRED";

#[derive(Debug, Serialize)]
struct LogoutResult {
    token_path: String,
    removed: bool,
}

/// Run the parsed command and return its rendered output
pub async fn run(cli: Cli, config: AppConfig) -> AppResult<String> {
    let started = Instant::now();
    let output = cli.format;
    let authorizer = Authorizer::new(config.auth);
    let connect = || authorizer.obtain_authorized_client(&config.api);
    let now = Local::now();

    match cli.command {
        Command::Auth { action } => auth(&authorizer, action, output, started).await,
        Command::List(args) => {
            let (summary, page) = list_impl(&connect().await?, args).await?;
            finalize(output, started, summary, page, |p| format::render_message_page(p, &now))
        }
        Command::Search(args) => {
            let (summary, page) = search_impl(&connect().await?, args).await?;
            finalize(output, started, summary, page, |p| format::render_message_page(p, &now))
        }
        Command::Get(args) if args.thread => {
            let (summary, thread) = get_thread_impl(&connect().await?, args).await?;
            finalize(output, started, summary, thread, format::render_thread)
        }
        Command::Get(args) => {
            let (summary, detail) = get_impl(&connect().await?, args).await?;
            finalize(output, started, summary, detail, format::render_message_detail)
        }
        Command::Send(args) => {
            let (summary, result) = send_impl(&connect().await?, args).await?;
            finalize(output, started, summary, result, format::render_send_result)
        }
        Command::Modify(args) => {
            let (summary, result) = modify_impl(&connect().await?, args).await?;
            finalize(output, started, summary, result, format::render_modify_result)
        }
        Command::Labels => {
            let labels = connect().await?.list_labels().await?;
            let summary = format!("{} label(s)", labels.len());
            finalize(output, started, summary, labels, |l| format::render_labels(l))
        }
    }
}

async fn auth(
    authorizer: &Authorizer,
    action: AuthAction,
    output: OutputFormat,
    started: Instant,
) -> AppResult<String> {
    let now = Local::now();
    match action {
        AuthAction::Login => {
            authorizer.run_interactive_authorization().await?;
            let status = authorizer.status()?;
            finalize(output, started, "authorization complete".to_owned(), status, |s| {
                format!("Authorization complete.\n{}", format::render_auth_status(s, &now))
            })
        }
        AuthAction::Status => {
            let status = authorizer.status()?;
            let summary = if status.authenticated {
                "authenticated"
            } else {
                "not authenticated"
            };
            finalize(output, started, summary.to_owned(), status, |s| {
                format::render_auth_status(s, &now)
            })
        }
        AuthAction::Logout => {
            let removed = authorizer.logout()?;
            let status = authorizer.status()?;
            let result = LogoutResult {
                token_path: status.token_path,
                removed,
            };
            let summary = if removed {
                "saved token removed"
            } else {
                "no saved token"
            };
            finalize(output, started, summary.to_owned(), result, |r| {
                if r.removed {
                    format!("Removed saved token at {}", r.token_path)
                } else {
                    format!("No saved token at {}", r.token_path)
                }
            })
        }
    }
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Render command output as text or as the JSON envelope
fn finalize<T, F>(
    output: OutputFormat,
    started: Instant,
    summary: String,
    data: T,
    render: F,
) -> AppResult<String>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match output {
        OutputFormat::Text => Ok(render(&data)),
        OutputFormat::Json => serde_json::to_string_pretty(&CommandEnvelope {
            summary,
            data,
            meta: Meta::now(duration_ms(started)),
        })
        .map_err(|e| AppError::Internal(format!("failed to serialize output: {e}"))),
    }
}

async fn list_impl(client: &GmailClient, args: ListArgs) -> AppResult<(String, MessagePage)> {
    let filters = SearchFilters {
        label: Some(args.label.unwrap_or_else(|| LABEL_INBOX.to_owned())),
        unread: args.unread,
        ..SearchFilters::default()
    };
    let query = filters.to_query()?;
    let page = fetch_page(client, query, args.max, args.page_token.as_deref()).await?;
    Ok((format!("{} message(s)", page.messages.len()), page))
}

async fn search_impl(client: &GmailClient, args: SearchArgs) -> AppResult<(String, MessagePage)> {
    let filters = SearchFilters {
        text: args.query,
        from: args.from,
        to: args.to,
        subject: args.subject,
        unread: args.unread,
        has_attachment: args.has_attachment,
        after: args.after,
        before: args.before,
        label: args.label,
        larger: args.larger,
        smaller: args.smaller,
        filename: args.filename,
    };
    if filters.is_empty() {
        return Err(AppError::invalid(
            "search requires a query or at least one filter",
        ));
    }
    let query = filters.to_query()?;
    let page = fetch_page(client, query, args.max, args.page_token.as_deref()).await?;
    Ok((
        format!("{} message(s) matched '{}'", page.messages.len(), page.query.as_deref().unwrap_or_default()),
        page,
    ))
}

/// List one page of ids, then fetch their metadata in result order
async fn fetch_page(
    client: &GmailClient,
    query: String,
    max: u32,
    page_token: Option<&str>,
) -> AppResult<MessagePage> {
    let list = client.list_messages(&query, max, page_token).await?;
    let ids: Vec<String> = list.messages.iter().map(|m| m.id.clone()).collect();
    let messages = client.get_messages_metadata(&ids).await?;
    Ok(MessagePage {
        query: Some(query),
        messages: messages.iter().map(summarize).collect(),
        next_page_token: list.next_page_token,
        result_size_estimate: list.result_size_estimate,
    })
}

fn summarize(message: &Message) -> MessageSummary {
    let headers = message.headers();
    MessageSummary {
        id: message.id.clone(),
        thread_id: message.thread_id.clone(),
        from: parse_address(get_header_value(headers, "From").unwrap_or_default()),
        subject: get_header_value(headers, "Subject").map(str::to_owned),
        date: message_date(message),
        snippet: message
            .snippet
            .as_deref()
            .map(sanitize_html)
            .filter(|s| !s.is_empty()),
        unread: message.has_label(LABEL_UNREAD),
        starred: message.has_label(LABEL_STARRED),
        labels: message.label_ids.clone(),
    }
}

/// `Date` header, falling back to the provider's receive timestamp
fn message_date(message: &Message) -> Option<String> {
    get_header_value(message.headers(), "Date")
        .map(str::to_owned)
        .or_else(|| message.internal_date.clone())
}

fn detail(message: &Message) -> MessageDetail {
    let headers = message.headers();
    let (body, attachments) = match &message.payload {
        Some(payload) => (extract_plain_body(payload), collect_attachments(payload)),
        None => (String::new(), Vec::new()),
    };
    MessageDetail {
        id: message.id.clone(),
        thread_id: message.thread_id.clone(),
        from: parse_address(get_header_value(headers, "From").unwrap_or_default()),
        to: get_header_value(headers, "To").map(str::to_owned),
        cc: get_header_value(headers, "Cc").map(str::to_owned),
        subject: get_header_value(headers, "Subject").map(str::to_owned),
        date: message_date(message),
        message_id_header: get_header_value(headers, "Message-ID").map(str::to_owned),
        labels: message.label_ids.clone(),
        body,
        attachments,
    }
}

async fn get_impl(client: &GmailClient, args: GetArgs) -> AppResult<(String, MessageDetail)> {
    validate_id(&args.id)?;
    let message = client.get_message(&args.id, MessageFormat::Full).await?;
    let detail = detail(&message);
    let summary = format!(
        "message {}: {}",
        detail.id,
        detail.subject.as_deref().unwrap_or("(no subject)")
    );
    Ok((summary, detail))
}

async fn get_thread_impl(client: &GmailClient, args: GetArgs) -> AppResult<(String, ThreadDetail)> {
    validate_id(&args.id)?;
    let message = client.get_message(&args.id, MessageFormat::Metadata).await?;
    let thread = client.get_thread(&message.thread_id, MessageFormat::Full).await?;
    let detail = ThreadDetail {
        id: thread.id,
        messages: thread.messages.iter().map(detail).collect(),
    };
    Ok((
        format!("thread {} with {} message(s)", detail.id, detail.messages.len()),
        detail,
    ))
}

async fn send_impl(client: &GmailClient, args: SendArgs) -> AppResult<(String, SendResult)> {
    let reply = match &args.reply_to {
        Some(id) => {
            validate_id(id)?;
            Some(reply_context(client, id).await?)
        }
        None => None,
    };
    let subject = match (args.subject, &reply) {
        (Some(subject), _) => subject,
        (None, Some((_, parent_subject))) => reply_subject(parent_subject),
        (None, None) => return Err(AppError::invalid("--subject is required")),
    };

    let profile = client.profile().await?;
    let reply = reply.map(|(context, _)| context);
    let thread_id = reply.as_ref().map(|r| r.thread_id.clone());
    let message = OutgoingMessage {
        from: profile.email_address,
        to: args.to,
        cc: args.cc,
        bcc: args.bcc,
        subject,
        body: args.body,
        reply,
    };
    let raw = message.to_raw()?;

    if args.draft {
        let draft = client.create_draft(&raw, thread_id.as_deref()).await?;
        let message_ref = draft.message;
        Ok((
            format!("draft {} saved", draft.id),
            SendResult {
                draft: true,
                id: draft.id,
                message_id: message_ref.as_ref().map(|m| m.id.clone()),
                thread_id: message_ref.map(|m| m.thread_id).or(thread_id),
            },
        ))
    } else {
        let sent = client.send_raw(&raw, thread_id.as_deref()).await?;
        Ok((
            format!("message {} sent", sent.id),
            SendResult {
                draft: false,
                message_id: Some(sent.id.clone()),
                id: sent.id,
                thread_id: Some(sent.thread_id).filter(|t| !t.is_empty()),
            },
        ))
    }
}

/// Threading headers and subject of the message being answered
async fn reply_context(client: &GmailClient, id: &str) -> AppResult<(ReplyContext, String)> {
    let parent = client.get_message(id, MessageFormat::Full).await?;
    let headers = parent.headers();
    let message_id = get_header_value(headers, "Message-ID").ok_or_else(|| {
        AppError::InvalidInput(format!("message {id} has no Message-ID header to reply to"))
    })?;
    let context = ReplyContext {
        message_id: message_id.to_owned(),
        references: get_header_value(headers, "References").map(str::to_owned),
        thread_id: parent.thread_id.clone(),
    };
    let subject = get_header_value(headers, "Subject")
        .unwrap_or_default()
        .to_owned();
    Ok((context, subject))
}

async fn modify_impl(client: &GmailClient, args: ModifyArgs) -> AppResult<(String, ModifyResult)> {
    validate_id(&args.id)?;
    let mut add = Vec::new();
    let mut remove = Vec::new();
    if args.mark_read {
        remove.push(LABEL_UNREAD.to_owned());
    }
    if args.mark_unread {
        add.push(LABEL_UNREAD.to_owned());
    }
    if args.star {
        add.push(LABEL_STARRED.to_owned());
    }
    if args.unstar {
        remove.push(LABEL_STARRED.to_owned());
    }
    if args.archive {
        remove.push(LABEL_INBOX.to_owned());
    }
    let trash_change = match (args.trash, args.untrash) {
        (true, _) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    };
    if add.is_empty()
        && remove.is_empty()
        && args.add_label.is_empty()
        && args.remove_label.is_empty()
        && trash_change.is_none()
    {
        return Err(AppError::invalid("modify requires at least one action"));
    }

    if !args.add_label.is_empty() || !args.remove_label.is_empty() {
        let labels = client.list_labels().await?;
        add.extend(resolve_label_ids(&labels, &args.add_label)?);
        remove.extend(resolve_label_ids(&labels, &args.remove_label)?);
    }
    dedup(&mut add);
    dedup(&mut remove);
    if let Some(both) = add.iter().find(|id| remove.contains(id)) {
        return Err(AppError::InvalidInput(format!(
            "label {both} cannot be both added and removed"
        )));
    }

    let mut current_labels = Vec::new();
    if !add.is_empty() || !remove.is_empty() {
        current_labels = client.modify_labels(&args.id, &add, &remove).await?.label_ids;
    }
    match trash_change {
        Some(true) => current_labels = client.trash(&args.id).await?.label_ids,
        Some(false) => current_labels = client.untrash(&args.id).await?.label_ids,
        None => {}
    }

    Ok((
        format!("message {} updated", args.id),
        ModifyResult {
            id: args.id,
            added: add,
            removed: remove,
            trashed: trash_change,
            labels: current_labels,
        },
    ))
}

/// Map label names or ids to ids; names match case-insensitively
fn resolve_label_ids(labels: &[Label], wanted: &[String]) -> AppResult<Vec<String>> {
    wanted
        .iter()
        .map(|name| {
            let name = name.trim();
            labels
                .iter()
                .find(|l| l.id == name)
                .or_else(|| labels.iter().find(|l| l.name.eq_ignore_ascii_case(name)))
                .map(|l| l.id.clone())
                .ok_or_else(|| AppError::InvalidInput(format!("unknown label '{name}'")))
        })
        .collect()
}

fn dedup(ids: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}

/// Reject empty ids and anything that could escape the URL path segment
fn validate_id(id: &str) -> AppResult<()> {
    if id.is_empty() || id.len() > 256 {
        return Err(AppError::invalid("message id must be 1..256 characters"));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(AppError::invalid("message id must match [A-Za-z0-9_-]+"));
    }
    Ok(())
}
