//! Normalizer — raw message bytes to canonical structured text.
//!
//! All raw-format idiosyncrasies (MIME trees, HTML-only bodies, quoted
//! reply chains) are handled here so downstream stages see only
//! [`NormalizedItem`]s. Normalization is deterministic: the same raw
//! payload under the same `NORMALIZER_VERSION` yields byte-identical
//! output, which is what makes cached artifacts reusable.

use mail_parser::{MessageParser, MimeHeaders};
use tracing::debug;

use crate::error::NormalizeError;
use crate::mail::header_datetime;
use crate::model::{Item, NormalizedItem};

/// Bumped whenever the extraction logic changes, so stale cached
/// normalizations are regenerated instead of reused.
pub const NORMALIZER_VERSION: &str = "1";

/// Converts raw items into canonical text.
#[derive(Debug, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Cache key for one item under the current normalizer version.
    pub fn cache_key(item_id: &str) -> String {
        format!("{item_id}@v{NORMALIZER_VERSION}")
    }

    /// Normalize one item. Fails with `MalformedInput` when the payload
    /// has no extractable text body; the caller records the failure and
    /// continues the batch.
    pub fn normalize(&self, item: &Item) -> Result<NormalizedItem, NormalizeError> {
        let parsed = MessageParser::default()
            .parse(&item.raw_payload)
            .ok_or_else(|| NormalizeError::MalformedInput {
                item_id: item.id.clone(),
                reason: "unparsable message".to_string(),
            })?;

        let body = extract_text(&parsed);
        let body = strip_quoted_text(&body);
        if body.trim().is_empty() {
            return Err(NormalizeError::MalformedInput {
                item_id: item.id.clone(),
                reason: "no extractable text body".to_string(),
            });
        }

        let title = parsed
            .subject()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("(no subject)")
            .to_string();
        let source = parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string())
            .unwrap_or_else(|| item.source_identifier.clone());
        let timestamp = header_datetime(&parsed).unwrap_or(item.received_at);

        debug!(item_id = %item.id, title = %title, chars = body.len(), "Normalized item");
        Ok(NormalizedItem {
            item_id: item.id.clone(),
            title,
            source,
            body_text: body,
            timestamp,
        })
    }
}

/// Extract readable text from a parsed message: plain part first, then
/// HTML stripped to text, then text attachments.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.to_string();
        }
    }
    String::new()
}

/// Strip HTML tags from content (basic) and collapse whitespace.
fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip quoted reply text from a body.
///
/// Removes `>`-prefixed lines and everything after an
/// "On ... wrote:" attribution or an "Original Message" separator.
fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();
    let mut skip_rest = false;

    for line in body.lines() {
        if skip_rest {
            break;
        }
        let trimmed = line.trim();
        if trimmed.starts_with('>') {
            continue;
        }
        if trimmed.starts_with("On ") && trimmed.ends_with("wrote:") {
            skip_rest = true;
            continue;
        }
        if trimmed.starts_with("---") && trimmed.contains("Original Message") {
            skip_rest = true;
            continue;
        }
        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }
    result.join("\n")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn item(id: &str, raw: &str) -> Item {
        Item {
            id: id.to_string(),
            source_identifier: "fallback@example.com".to_string(),
            received_at: Utc::now(),
            raw_payload: raw.as_bytes().to_vec(),
        }
    }

    const PLAIN: &str = "From: alice@example.com\r\n\
                         Subject: Weekly digest\r\n\
                         Date: Mon, 16 Jun 2025 08:00:00 +0000\r\n\
                         Content-Type: text/plain\r\n\
                         \r\n\
                         The first story.\r\n\
                         \r\n\
                         The second story.\r\n";

    #[test]
    fn normalizes_plain_text_message() {
        let normalized = Normalizer::new().normalize(&item("m1", PLAIN)).unwrap();
        assert_eq!(normalized.title, "Weekly digest");
        assert_eq!(normalized.source, "alice@example.com");
        assert!(normalized.body_text.contains("The first story."));
        assert_eq!(normalized.timestamp.to_rfc3339(), "2025-06-16T08:00:00+00:00");
    }

    #[test]
    fn normalization_is_deterministic() {
        let normalizer = Normalizer::new();
        let a = normalizer.normalize(&item("m1", PLAIN)).unwrap();
        let b = normalizer.normalize(&item("m1", PLAIN)).unwrap();
        assert_eq!(a.to_markdown(), b.to_markdown());
    }

    #[test]
    fn html_only_body_is_stripped_to_text() {
        let raw = "From: a@b.c\r\n\
                   Subject: Html mail\r\n\
                   Content-Type: text/html\r\n\
                   \r\n\
                   <html><body><p>Hello <b>world</b></p></body></html>\r\n";
        let normalized = Normalizer::new().normalize(&item("m2", raw)).unwrap();
        assert!(normalized.body_text.contains("Hello"));
        assert!(!normalized.body_text.contains('<'));
    }

    #[test]
    fn quoted_reply_text_is_removed() {
        let raw = "From: a@b.c\r\n\
                   Subject: Re: plans\r\n\
                   Content-Type: text/plain\r\n\
                   \r\n\
                   Sounds good to me.\r\n\
                   \r\n\
                   On Mon, Jun 16, 2025 Alice wrote:\r\n\
                   > original text\r\n";
        let normalized = Normalizer::new().normalize(&item("m3", raw)).unwrap();
        assert_eq!(normalized.body_text, "Sounds good to me.");
    }

    #[test]
    fn empty_body_is_malformed() {
        let raw = "From: a@b.c\r\nSubject: Empty\r\nContent-Type: text/plain\r\n\r\n\r\n";
        let err = Normalizer::new().normalize(&item("m4", raw)).unwrap_err();
        assert!(matches!(err, NormalizeError::MalformedInput { .. }));
        assert!(err.to_string().contains("m4"));
    }

    #[test]
    fn missing_subject_gets_placeholder() {
        let raw = "From: a@b.c\r\nContent-Type: text/plain\r\n\r\nsome body\r\n";
        let normalized = Normalizer::new().normalize(&item("m5", raw)).unwrap();
        assert_eq!(normalized.title, "(no subject)");
    }

    #[test]
    fn cache_key_includes_version() {
        assert_eq!(Normalizer::cache_key("m1"), "m1@v1");
    }
}
