//! Payload codec: header lookup, address parsing, body extraction, HTML
//! flattening
//!
//! Everything here is pure and infallible. Malformed input degrades to empty
//! strings or `None` fields so that one unusual message never blocks
//! rendering the rest of a listing.

use std::sync::LazyLock;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use regex::{Captures, Regex};

use crate::models::{AttachmentInfo, Header, MessagePart, ParsedAddress};

/// Maximum payload tree depth visited by any traversal
pub const MAX_PART_DEPTH: usize = 32;

/// Standard alphabet, padding optional; url-safe input is mapped onto it
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

static DANGEROUS_ELEMENT_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [("script", true), ("style", true), ("iframe", false), ("object", false)]
        .iter()
        .flat_map(|&(tag, raw_text)| {
            let mut patterns = vec![
                // complete element, content included
                format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>"),
            ];
            if raw_text {
                // unterminated element runs to end of input
                patterns.push(format!(r"(?is)<{tag}\b[^>]*>.*$"));
            } else {
                patterns.push(format!(r"(?i)<{tag}\b[^>]*>"));
            }
            patterns.push(format!(r"(?i)</{tag}\s*>"));
            patterns
        })
        .map(|pattern| Regex::new(&pattern).expect("valid element regex"))
        .collect()
});
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid comment regex"));
static EMBED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?embed\b[^>]*>").expect("valid embed regex"));
static HANDLER_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)[\s/]+on[a-z]+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#)
        .expect("valid handler regex")
});
static SCRIPT_SCHEME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:java|vb)script\s*:").expect("valid scheme regex")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));
static QUOTED_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<[a-zA-Z](?:[^>"']|"[^"]*"|'[^']*')*>"#).expect("valid quoted tag regex")
});
static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[xX][0-9a-fA-F]{1,6}|#[0-9]{1,7}|[a-zA-Z]{2,8});").expect("valid entity regex")
});
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static ANGLE_ADDR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:"?\s*(?P<name>[^"<]*?)\s*"?\s*)?<\s*(?P<email>[^<>\s]+)\s*>\s*$"#)
        .expect("valid address regex")
});

/// Case-insensitive header lookup, first match wins
pub fn get_header_value<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Parse `"Display Name" <address>` or a bare address
///
/// Empty input yields both fields `None`. Input that does not look like
/// either form comes back whole as `email` with no name.
pub fn parse_address(raw: &str) -> ParsedAddress {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ParsedAddress::default();
    }

    if let Some(caps) = ANGLE_ADDR_RE.captures(trimmed) {
        let name = caps
            .name("name")
            .map(|m| m.as_str().trim())
            .filter(|n| !n.is_empty())
            .map(str::to_owned);
        let email = caps.name("email").map(|m| m.as_str().to_owned());
        return ParsedAddress { name, email };
    }

    ParsedAddress {
        name: None,
        email: Some(trimmed.trim_matches('"').to_owned()),
    }
}

/// Decode a provider base64url string to UTF-8 text
///
/// Accepts url-safe or standard alphabets, with or without padding. Invalid
/// input decodes to an empty string; invalid UTF-8 is replaced lossily.
pub fn decode_base64url(data: &str) -> String {
    let normalized: String = data
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    match LENIENT_BASE64.decode(normalized.as_bytes()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}

/// Extract a display-ready plain-text body from a payload tree
///
/// Preference order at each node:
/// 1. the node's own inline body (flattened if it is HTML)
/// 2. the first inline `text/plain` child
/// 3. the first inline `text/html` child, sanitized
/// 4. the first non-empty result of recursing into nested multipart children
///
/// Returns an empty string when nothing decodable is found.
pub fn extract_plain_body(payload: &MessagePart) -> String {
    extract_from(payload, 0).unwrap_or_default()
}

fn extract_from(part: &MessagePart, depth: usize) -> Option<String> {
    if depth > MAX_PART_DEPTH {
        return None;
    }

    if let Some(data) = inline_data(part) {
        return Some(render_part(part, data));
    }

    let first_inline = |mime: &str| {
        part.parts
            .iter()
            .filter(|p| !is_attachment(p) && mime_is(p, mime))
            .find_map(|p| inline_data(p).map(|data| (p, data)))
    };
    if let Some((child, data)) = first_inline("text/plain").or_else(|| first_inline("text/html")) {
        return Some(render_part(child, data));
    }

    // text leaves were considered above; only nested multiparts are descended
    part.parts
        .iter()
        .filter(|p| !is_attachment(p) && !p.parts.is_empty())
        .filter_map(|p| extract_from(p, depth + 1))
        .find(|text| !text.is_empty())
}

fn render_part(part: &MessagePart, data: &str) -> String {
    let text = decode_base64url(data);
    if mime_is(part, "text/html") {
        sanitize_html(&text)
    } else {
        text
    }
}

fn inline_data(part: &MessagePart) -> Option<&str> {
    part.body
        .as_ref()
        .and_then(|b| b.data.as_deref())
        .filter(|d| !d.is_empty())
}

fn mime_is(part: &MessagePart, mime: &str) -> bool {
    part.mime_type
        .as_deref()
        .and_then(|m| m.split(';').next())
        .is_some_and(|m| m.trim().eq_ignore_ascii_case(mime))
}

fn is_attachment(part: &MessagePart) -> bool {
    part.filename.as_deref().is_some_and(|f| !f.is_empty())
}

/// Collect attachment metadata for every part carrying a filename
pub fn collect_attachments(payload: &MessagePart) -> Vec<AttachmentInfo> {
    let mut out = Vec::new();
    walk_attachments(payload, 0, &mut out);
    out
}

fn walk_attachments(part: &MessagePart, depth: usize, out: &mut Vec<AttachmentInfo>) {
    if depth > MAX_PART_DEPTH {
        return;
    }
    if let Some(filename) = part.filename.as_deref().filter(|f| !f.is_empty()) {
        let body = part.body.as_ref();
        out.push(AttachmentInfo {
            filename: filename.to_owned(),
            mime_type: part
                .mime_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_owned()),
            size_bytes: body.map(|b| b.size).unwrap_or_default(),
            attachment_id: body.and_then(|b| b.attachment_id.clone()),
        });
    }
    for child in &part.parts {
        walk_attachments(child, depth + 1, out);
    }
}

/// Flatten HTML to display text
///
/// Dangerous elements, handler attributes, and script URI schemes are
/// removed before any tag is stripped: tag stripping drops the markup but
/// keeps attribute values inline, so those must be gone first.
pub fn sanitize_html(html: &str) -> String {
    let mut text = COMMENT_RE.replace_all(html, " ").into_owned();
    for re in DANGEROUS_ELEMENT_RES.iter() {
        text = re.replace_all(&text, " ").into_owned();
    }
    text = EMBED_RE.replace_all(&text, " ").into_owned();
    text = strip_handler_attrs(&text);
    text = strip_script_schemes(&text);
    text = TAG_RE.replace_all(&text, " ").into_owned();
    text = decode_entities(&text);
    // entity-encoded schemes only surface after decoding
    text = strip_script_schemes(&text);
    WHITESPACE_RE.replace_all(&text, " ").trim().to_owned()
}

/// Remove `on*` handler attributes from inside start tags only
fn strip_handler_attrs(input: &str) -> String {
    QUOTED_TAG_RE
        .replace_all(input, |caps: &Captures<'_>| {
            HANDLER_ATTR_RE.replace_all(&caps[0], "").into_owned()
        })
        .into_owned()
}

/// Remove script URI schemes until none remain
fn strip_script_schemes(input: &str) -> String {
    let mut text = input.to_owned();
    while SCRIPT_SCHEME_RE.is_match(&text) {
        text = SCRIPT_SCHEME_RE.replace_all(&text, "").into_owned();
    }
    text
}

/// Decode named, decimal, and hex entities in a single pass
///
/// Unknown names and invalid code points are left as written.
fn decode_entities(input: &str) -> String {
    ENTITY_RE
        .replace_all(input, |caps: &Captures<'_>| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(entity)
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_owned(),
            }
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    match name {
        "nbsp" => Some(' '),
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "copy" => Some('\u{a9}'),
        _ => None,
    }
}
