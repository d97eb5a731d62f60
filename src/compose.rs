//! Outgoing message construction
//!
//! Builds an RFC 2822 message with `lettre` and encodes it the way the
//! provider's send and draft endpoints expect: base64url without padding.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use lettre::Message;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;

use crate::errors::{AppError, AppResult};

/// Threading headers for a reply
#[derive(Debug, Clone)]
pub struct ReplyContext {
    /// `Message-ID` header of the message being answered
    pub message_id: String,
    /// Its `References` header, if any
    pub references: Option<String>,
    pub thread_id: String,
}

impl ReplyContext {
    /// `References` for the reply: the parent chain plus the parent itself
    pub fn references_header(&self) -> String {
        match self.references.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            Some(chain) => format!("{chain} {}", self.message_id),
            None => self.message_id.clone(),
        }
    }
}

/// Plain-text message ready to be encoded
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub reply: Option<ReplyContext>,
}

impl OutgoingMessage {
    /// Render the message as RFC 2822 bytes
    ///
    /// `Bcc` is kept in the output; the provider strips it on delivery.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if there is no recipient or an address does not parse
    pub fn to_rfc2822(&self) -> AppResult<Vec<u8>> {
        if self.to.is_empty() {
            return Err(AppError::invalid("at least one --to recipient is required"));
        }
        if self.subject.chars().any(|c| c == '\r' || c == '\n') {
            return Err(AppError::invalid("subject must not contain line breaks"));
        }

        let mut builder = Message::builder()
            .from(parse_mailbox(&self.from, "from")?)
            .subject(self.subject.clone());
        for addr in &self.to {
            builder = builder.to(parse_mailbox(addr, "to")?);
        }
        for addr in &self.cc {
            builder = builder.cc(parse_mailbox(addr, "cc")?);
        }
        for addr in &self.bcc {
            builder = builder.bcc(parse_mailbox(addr, "bcc")?);
        }
        if let Some(reply) = &self.reply {
            builder = builder
                .in_reply_to(reply.message_id.clone())
                .references(reply.references_header());
        }

        let message = builder
            .keep_bcc()
            .header(ContentType::TEXT_PLAIN)
            .body(self.body.clone())
            .map_err(|e| AppError::invalid(format!("cannot build message: {e}")))?;
        Ok(message.formatted())
    }

    /// Base64url `raw` payload for the send and draft endpoints
    pub fn to_raw(&self) -> AppResult<String> {
        Ok(URL_SAFE_NO_PAD.encode(self.to_rfc2822()?))
    }
}

/// Prefix `Re: ` unless the subject already carries it
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"))
    {
        trimmed.to_owned()
    } else {
        format!("Re: {trimmed}")
    }
}

fn parse_mailbox(raw: &str, field: &str) -> AppResult<Mailbox> {
    raw.trim()
        .parse::<Mailbox>()
        .map_err(|e| AppError::InvalidInput(format!("invalid {field} address '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use super::{OutgoingMessage, ReplyContext, reply_subject};
    use crate::errors::AppError;

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            from: "me@example.com".to_owned(),
            to: vec!["Bob <bob@example.com>".to_owned()],
            cc: vec!["carol@example.com".to_owned()],
            bcc: vec!["dave@example.com".to_owned()],
            subject: "Status update".to_owned(),
            body: "All green today.".to_owned(),
            reply: None,
        }
    }

    #[test]
    fn raw_payload_is_unpadded_base64url_of_rfc2822() {
        let raw = message().to_raw().expect("raw");
        assert!(!raw.contains('='));
        assert!(!raw.contains('+'));
        assert!(!raw.contains('/'));

        let decoded = URL_SAFE_NO_PAD.decode(raw).expect("decodes");
        let text = String::from_utf8(decoded).expect("utf8");
        assert!(text.contains("From: me@example.com"));
        assert!(text.contains("bob@example.com"));
        assert!(text.contains("Cc: carol@example.com"));
        assert!(text.contains("Bcc: dave@example.com"));
        assert!(text.contains("Subject: Status update"));
        assert!(text.contains("All green today."));
    }

    #[test]
    fn reply_sets_threading_headers() {
        let mut msg = message();
        msg.reply = Some(ReplyContext {
            message_id: "<parent@example.com>".to_owned(),
            references: Some("<root@example.com>".to_owned()),
            thread_id: "thread-1".to_owned(),
        });
        let text = String::from_utf8(msg.to_rfc2822().expect("rfc2822")).expect("utf8");
        assert!(text.contains("In-Reply-To: <parent@example.com>"));
        assert!(text.contains("References: <root@example.com> <parent@example.com>"));
    }

    #[test]
    fn rejects_missing_and_invalid_recipients() {
        let mut msg = message();
        msg.to.clear();
        assert!(matches!(msg.to_rfc2822(), Err(AppError::InvalidInput(_))));

        let mut msg = message();
        msg.to = vec!["not an address".to_owned()];
        let err = msg.to_rfc2822().expect_err("must fail");
        assert!(err.to_string().contains("invalid to address"));
    }

    #[test]
    fn rejects_header_injection_in_subject() {
        let mut msg = message();
        msg.subject = "hi\r\nBcc: spy@example.com".to_owned();
        assert!(msg.to_rfc2822().is_err());
    }

    #[test]
    fn reply_subject_is_prefixed_once() {
        assert_eq!(reply_subject("Lunch"), "Re: Lunch");
        assert_eq!(reply_subject("RE: Lunch"), "RE: Lunch");
    }
}
