//! Search query assembly
//!
//! Turns structured filters into the provider's search-operator syntax. The
//! grammar itself is never parsed; values are validated and quoted so a flag
//! value cannot smuggle in extra operators.

use chrono::NaiveDate;

use crate::errors::{AppError, AppResult};

/// Maximum length of any single filter value
const MAX_FILTER_CHARS: usize = 256;

/// Structured search filters
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Free text, passed through verbatim so users can add operators
    pub text: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub unread: bool,
    pub has_attachment: bool,
    /// `YYYY-MM-DD` or `YYYY/MM/DD`
    pub after: Option<String>,
    pub before: Option<String>,
    pub label: Option<String>,
    /// Digits with optional `K`/`M` suffix
    pub larger: Option<String>,
    pub smaller: Option<String>,
    pub filename: Option<String>,
}

impl SearchFilters {
    /// Whether no filter at all is set
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.from.is_none()
            && self.to.is_none()
            && self.subject.is_none()
            && !self.unread
            && !self.has_attachment
            && self.after.is_none()
            && self.before.is_none()
            && self.label.is_none()
            && self.larger.is_none()
            && self.smaller.is_none()
            && self.filename.is_none()
    }

    /// Assemble the provider query string
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for empty, oversized, or control-character values,
    ///   embedded double quotes, malformed dates or sizes, or `after` later
    ///   than `before`
    pub fn to_query(&self) -> AppResult<String> {
        let mut parts = Vec::new();
        if let Some(text) = &self.text {
            validate_search_text(text, "query")?;
            parts.push(text.trim().to_owned());
        }
        for (operator, value) in [
            ("from", &self.from),
            ("to", &self.to),
            ("subject", &self.subject),
            ("label", &self.label),
            ("filename", &self.filename),
        ] {
            if let Some(v) = value {
                parts.push(format!("{operator}:{}", quote_operand(v, operator)?));
            }
        }
        if self.unread {
            parts.push("is:unread".to_owned());
        }
        if self.has_attachment {
            parts.push("has:attachment".to_owned());
        }

        let after = self.after.as_deref().map(parse_date).transpose()?;
        let before = self.before.as_deref().map(parse_date).transpose()?;
        if let (Some(a), Some(b)) = (after, before)
            && a > b
        {
            return Err(AppError::invalid("--after must not be later than --before"));
        }
        if let Some(a) = after {
            parts.push(format!("after:{}", query_date(a)));
        }
        if let Some(b) = before {
            parts.push(format!("before:{}", query_date(b)));
        }

        if let Some(size) = &self.larger {
            parts.push(format!("larger:{}", validate_size(size, "larger")?));
        }
        if let Some(size) = &self.smaller {
            parts.push(format!("smaller:{}", validate_size(size, "smaller")?));
        }

        Ok(parts.join(" "))
    }
}

/// Validate search text field bounds and characters
fn validate_search_text(input: &str, field: &str) -> AppResult<()> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_FILTER_CHARS {
        return Err(AppError::InvalidInput(format!(
            "{field} must be 1..{MAX_FILTER_CHARS} characters"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

/// Quote an operator value if it contains whitespace
fn quote_operand(value: &str, field: &str) -> AppResult<String> {
    validate_search_text(value, field)?;
    let trimmed = value.trim();
    if trimmed.contains('"') {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain double quotes"
        )));
    }
    if trimmed.chars().any(char::is_whitespace) {
        Ok(format!("\"{trimmed}\""))
    } else {
        Ok(trimmed.to_owned())
    }
}

/// Parse `YYYY-MM-DD` or `YYYY/MM/DD`
fn parse_date(input: &str) -> AppResult<NaiveDate> {
    let trimmed = input.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y/%m/%d"))
        .map_err(|_| {
            AppError::InvalidInput(format!("invalid date '{input}', expected YYYY-MM-DD"))
        })
}

/// Format date as provider search date (e.g., "2025/01/31")
fn query_date(date: NaiveDate) -> String {
    date.format("%Y/%m/%d").to_string()
}

fn validate_size(input: &str, field: &str) -> AppResult<String> {
    let trimmed = input.trim();
    let (digits, suffix) = match trimmed.char_indices().last() {
        Some((idx, c)) if matches!(c, 'k' | 'K' | 'm' | 'M') => (&trimmed[..idx], Some(c)),
        _ => (trimmed, None),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::InvalidInput(format!(
            "{field} must be a number with optional K or M suffix"
        )));
    }
    Ok(match suffix {
        Some(s) => format!("{digits}{}", s.to_ascii_uppercase()),
        None => digits.to_owned(),
    })
}
