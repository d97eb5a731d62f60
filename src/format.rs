//! Human-readable rendering
//!
//! Small formatting helpers plus the text renderers used when a command runs
//! with `--format text`. Renderers take `now` explicitly so output is
//! deterministic under test.

use std::fmt::{Display, Write as _};

use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::authorizer::AuthStatus;
use crate::models::{
    Label, MessageDetail, MessagePage, MessageSummary, ModifyResult, ParsedAddress, SendResult,
    ThreadDetail,
};

/// Default width for subjects and snippets in listings
pub const DEFAULT_TRUNCATE_LEN: usize = 60;

/// Shorten `text` to at most `max_len` characters
///
/// Longer input keeps its first `max_len - 3` characters followed by `...`.
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_owned();
    }
    if max_len < 3 {
        return text.chars().take(max_len).collect();
    }
    let mut out: String = text.chars().take(max_len - 3).collect();
    out.push_str("...");
    out
}

/// Render a byte count with binary unit steps
pub fn format_byte_size(bytes: Option<u64>) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    let bytes = match bytes {
        Some(b) if b > 0 => b,
        _ => return "0 B".to_owned(),
    };
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Render a date relative to `now`
///
/// Accepts RFC 2822 header dates, RFC 3339, or epoch milliseconds.
pub fn format_relative_date<Tz>(date: Option<&str>, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let Some(parsed) = date.and_then(parse_date) else {
        return "Unknown date".to_owned();
    };
    let local = parsed.with_timezone(&now.timezone());
    let elapsed = now.clone().signed_duration_since(local.clone());

    let minutes = elapsed.num_minutes();
    let hours = elapsed.num_hours();
    let days = elapsed.num_days();
    if minutes < 1 {
        "Just now".to_owned()
    } else if minutes < 60 {
        format!("{minutes} min ago")
    } else if hours < 24 {
        if hours == 1 {
            "1 hour ago".to_owned()
        } else {
            format!("{hours} hours ago")
        }
    } else if days == 1 {
        "Yesterday".to_owned()
    } else if days < 7 {
        format!("{days} days ago")
    } else if local.year() == now.year() {
        local.format("%b %-d").to_string()
    } else {
        local.format("%b %-d, %Y").to_string()
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    mailparse::dateparse(raw)
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

/// `Name <email>`, bare email, or `(unknown sender)`
pub fn display_address(address: &ParsedAddress) -> String {
    match (&address.name, &address.email) {
        (Some(name), Some(email)) => format!("{name} <{email}>"),
        (None, Some(email)) => email.clone(),
        (Some(name), None) => name.clone(),
        (None, None) => "(unknown sender)".to_owned(),
    }
}

fn summary_line<Tz>(index: usize, message: &MessageSummary, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut markers = String::new();
    if message.unread {
        markers.push('*');
    }
    if message.starred {
        markers.push('+');
    }
    let subject = message.subject.as_deref().unwrap_or("(no subject)");
    let mut out = format!(
        "{index:>3}. {markers:<2} {}\n     From: {}  |  {}\n     ID: {}",
        truncate(subject, DEFAULT_TRUNCATE_LEN),
        display_address(&message.from),
        format_relative_date(message.date.as_deref(), now),
        message.id,
    );
    if let Some(snippet) = message.snippet.as_deref().filter(|s| !s.is_empty()) {
        let _ = write!(out, "\n     {}", truncate(snippet, DEFAULT_TRUNCATE_LEN));
    }
    out
}

pub fn render_message_page<Tz>(page: &MessagePage, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    if page.messages.is_empty() {
        return "No messages found.".to_owned();
    }
    let mut out = String::new();
    if let Some(query) = &page.query {
        let _ = writeln!(out, "Query: {query}\n");
    }
    for (idx, message) in page.messages.iter().enumerate() {
        let _ = writeln!(out, "{}\n", summary_line(idx + 1, message, now));
    }
    let _ = write!(out, "{} message(s)", page.messages.len());
    if let Some(token) = &page.next_page_token {
        let _ = write!(out, "\nMore results: --page-token {token}");
    }
    out
}

pub fn render_message_detail(detail: &MessageDetail) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "From:    {}", display_address(&detail.from));
    if let Some(to) = &detail.to {
        let _ = writeln!(out, "To:      {to}");
    }
    if let Some(cc) = &detail.cc {
        let _ = writeln!(out, "Cc:      {cc}");
    }
    let _ = writeln!(
        out,
        "Subject: {}",
        detail.subject.as_deref().unwrap_or("(no subject)")
    );
    if let Some(date) = &detail.date {
        let _ = writeln!(out, "Date:    {date}");
    }
    let _ = writeln!(out, "ID:      {} (thread {})", detail.id, detail.thread_id);
    if !detail.labels.is_empty() {
        let _ = writeln!(out, "Labels:  {}", detail.labels.join(", "));
    }
    let _ = writeln!(out);
    if detail.body.is_empty() {
        let _ = writeln!(out, "(no readable body)");
    } else {
        let _ = writeln!(out, "{}", detail.body);
    }
    if !detail.attachments.is_empty() {
        let _ = writeln!(out, "\nAttachments:");
        for attachment in &detail.attachments {
            let _ = writeln!(
                out,
                "  - {} ({}, {})",
                attachment.filename,
                attachment.mime_type,
                format_byte_size(Some(attachment.size_bytes))
            );
        }
    }
    out.trim_end().to_owned()
}

pub fn render_thread(thread: &ThreadDetail) -> String {
    let separator = "-".repeat(DEFAULT_TRUNCATE_LEN);
    let mut out = format!("Thread {} ({} message(s))", thread.id, thread.messages.len());
    for message in &thread.messages {
        let _ = write!(out, "\n{separator}\n{}", render_message_detail(message));
    }
    out
}

pub fn render_labels(labels: &[Label]) -> String {
    if labels.is_empty() {
        return "No labels.".to_owned();
    }
    let (mut system, mut user): (Vec<&Label>, Vec<&Label>) = labels
        .iter()
        .partition(|l| l.label_type.as_deref() == Some("system"));
    system.sort_by(|a, b| a.name.cmp(&b.name));
    user.sort_by_key(|l| l.name.to_lowercase());

    let mut out = String::new();
    for (heading, group) in [("System labels", system), ("User labels", user)] {
        if group.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{heading}:");
        for label in group {
            match label.messages_unread.filter(|n| *n > 0) {
                Some(unread) => {
                    let _ = writeln!(out, "  {} ({unread} unread)  [{}]", label.name, label.id);
                }
                None => {
                    let _ = writeln!(out, "  {}  [{}]", label.name, label.id);
                }
            }
        }
    }
    out.trim_end().to_owned()
}

pub fn render_auth_status<Tz>(status: &AuthStatus, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    if !status.authenticated {
        return format!("Not authenticated (no token at {})", status.token_path);
    }
    let mut out = format!("Authenticated (token at {})", status.token_path);
    let freshness = if status.fresh { "valid" } else { "expired, will refresh" };
    match &status.expires_at {
        Some(at) => {
            let expiry = parse_date(at)
                .map(|dt| dt.with_timezone(&now.timezone()).format("%Y-%m-%d %H:%M %Z").to_string())
                .unwrap_or_else(|| at.clone());
            let _ = write!(out, "\nAccess token: {freshness} (expires {expiry})");
        }
        None => {
            let _ = write!(out, "\nAccess token: {freshness}");
        }
    }
    let _ = write!(
        out,
        "\nRefresh token: {}",
        if status.has_refresh_token { "present" } else { "missing" }
    );
    if !status.scopes.is_empty() {
        let _ = write!(out, "\nScopes:\n  {}", status.scopes.join("\n  "));
    }
    out
}

pub fn render_send_result(result: &SendResult) -> String {
    if result.draft {
        format!("Draft saved (draft id {})", result.id)
    } else {
        match &result.thread_id {
            Some(thread) => format!("Message sent (id {}, thread {thread})", result.id),
            None => format!("Message sent (id {})", result.id),
        }
    }
}

pub fn render_modify_result(result: &ModifyResult) -> String {
    let mut out = format!("Updated message {}", result.id);
    if !result.added.is_empty() {
        let _ = write!(out, "\n  added:   {}", result.added.join(", "));
    }
    if !result.removed.is_empty() {
        let _ = write!(out, "\n  removed: {}", result.removed.join(", "));
    }
    match result.trashed {
        Some(true) => out.push_str("\n  moved to trash"),
        Some(false) => out.push_str("\n  restored from trash"),
        None => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{
        display_address, format_byte_size, format_relative_date, render_labels,
        render_message_page, truncate,
    };
    use crate::models::{Label, MessagePage, MessageSummary, ParsedAddress};

    #[test]
    fn truncate_never_exceeds_limit() {
        assert_eq!(truncate("short", 60), "short");
        assert_eq!(truncate("exactly ten", 11), "exactly ten");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
        assert_eq!(truncate("abcdef", 2), "ab");
        for n in 0..12 {
            assert!(truncate("héllo wörld, ünïcode", n).chars().count() <= n);
        }
    }

    #[test]
    fn byte_sizes_use_binary_steps() {
        assert_eq!(format_byte_size(None), "0 B");
        assert_eq!(format_byte_size(Some(0)), "0 B");
        assert_eq!(format_byte_size(Some(512)), "512 B");
        assert_eq!(format_byte_size(Some(2048)), "2.0 KB");
        assert_eq!(format_byte_size(Some(1_572_864)), "1.5 MB");
        assert_eq!(format_byte_size(Some(1_073_741_824)), "1.0 GB");
    }

    #[test]
    fn relative_dates_cover_each_bucket() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).single().expect("now");
        let ago = |d: Duration| (now - d).to_rfc3339();

        assert_eq!(format_relative_date(Some(&ago(Duration::seconds(20))), &now), "Just now");
        assert_eq!(format_relative_date(Some(&ago(Duration::minutes(5))), &now), "5 min ago");
        assert_eq!(format_relative_date(Some(&ago(Duration::minutes(61))), &now), "1 hour ago");
        assert_eq!(format_relative_date(Some(&ago(Duration::hours(5))), &now), "5 hours ago");
        assert_eq!(format_relative_date(Some(&ago(Duration::hours(30))), &now), "Yesterday");
        assert_eq!(format_relative_date(Some(&ago(Duration::days(3))), &now), "3 days ago");
        assert_eq!(format_relative_date(Some(&ago(Duration::days(20))), &now), "May 26");
        assert_eq!(
            format_relative_date(Some("Tue, 10 Dec 2024 09:30:00 +0000"), &now),
            "Dec 10, 2024"
        );
    }

    #[test]
    fn relative_dates_accept_epoch_millis() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).single().expect("now");
        let ms = (now - Duration::minutes(10)).timestamp_millis().to_string();
        assert_eq!(format_relative_date(Some(&ms), &now), "10 min ago");
    }

    #[test]
    fn missing_date_is_unknown() {
        let now = Utc::now();
        assert_eq!(format_relative_date(None, &now), "Unknown date");
        assert_eq!(format_relative_date(Some("  "), &now), "Unknown date");
    }

    #[test]
    fn address_display_falls_back() {
        assert_eq!(display_address(&ParsedAddress::default()), "(unknown sender)");
        assert_eq!(
            display_address(&ParsedAddress {
                name: Some("Ann".to_owned()),
                email: Some("ann@example.com".to_owned()),
            }),
            "Ann <ann@example.com>"
        );
    }

    #[test]
    fn page_lists_messages_in_order_with_next_token() {
        let summary = |id: &str, subject: &str| MessageSummary {
            id: id.to_owned(),
            thread_id: id.to_owned(),
            from: ParsedAddress::default(),
            subject: Some(subject.to_owned()),
            date: None,
            snippet: None,
            unread: id == "b",
            starred: false,
            labels: Vec::new(),
        };
        let page = MessagePage {
            query: Some("from:ann".to_owned()),
            messages: vec![summary("a", "First"), summary("b", "Second")],
            next_page_token: Some("tok".to_owned()),
            result_size_estimate: Some(2),
        };

        let rendered = render_message_page(&page, &Utc::now());
        let first = rendered.find("First").expect("first listed");
        let second = rendered.find("Second").expect("second listed");
        assert!(first < second);
        assert!(rendered.contains("--page-token tok"));
        assert!(rendered.contains("2 message(s)"));
    }

    #[test]
    fn labels_grouped_by_type() {
        let label = |id: &str, name: &str, kind: &str, unread: Option<u64>| Label {
            id: id.to_owned(),
            name: name.to_owned(),
            label_type: Some(kind.to_owned()),
            messages_total: None,
            messages_unread: unread,
        };
        let rendered = render_labels(&[
            label("Label_2", "work", "user", Some(3)),
            label("INBOX", "INBOX", "system", None),
        ]);
        let system = rendered.find("System labels").expect("system heading");
        let user = rendered.find("User labels").expect("user heading");
        assert!(system < user);
        assert!(rendered.contains("work (3 unread)"));
    }
}
