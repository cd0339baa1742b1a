//! Mail source boundary — yields raw items for the pipeline.
//!
//! The transport itself (OAuth, IMAP/API plumbing) is a collaborator;
//! the pipeline only depends on the [`MailSource`] trait. The one
//! implementation here reads a directory of downloaded `.eml` files,
//! which is also the layout a fetching front-end writes into.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use tracing::{debug, warn};

use crate::error::MailError;
use crate::model::Item;

/// Which messages to pull from a source.
#[derive(Debug, Clone, Default)]
pub struct MailQuery {
    /// Sender addresses to include; empty means all senders.
    pub senders: Vec<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

impl MailQuery {
    fn matches(&self, sender: &str, received_at: DateTime<Utc>) -> bool {
        if !self.senders.is_empty() {
            let sender = sender.to_lowercase();
            if !self.senders.iter().any(|s| s.to_lowercase() == sender) {
                return false;
            }
        }
        if let Some(after) = self.after
            && received_at < after
        {
            return false;
        }
        if let Some(before) = self.before
            && received_at >= before
        {
            return false;
        }
        true
    }
}

/// Ordered source of raw [`Item`]s.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Source name for logging and error context.
    fn name(&self) -> &str;

    /// Fetch matching items in a stable order.
    async fn fetch(&self, query: &MailQuery) -> Result<Vec<Item>, MailError>;
}

// ── Directory of .eml files ─────────────────────────────────────────

/// Mail source backed by a directory of `.eml` files.
///
/// Item id is the file stem (the fetcher names files after message
/// ids); ordering is by filename so reruns see the same sequence.
/// Header parsing here is minimal — sender and date for query
/// filtering — the normalizer owns full interpretation.
pub struct EmlDirSource {
    dir: PathBuf,
}

impl EmlDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl MailSource for EmlDirSource {
    fn name(&self) -> &str {
        "eml-dir"
    }

    async fn fetch(&self, query: &MailQuery) -> Result<Vec<Item>, MailError> {
        if !self.dir.is_dir() {
            return Err(MailError::Fetch(format!(
                "not a directory: {}",
                self.dir.display()
            )));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("eml"))
            })
            .collect();
        paths.sort();

        let mut items = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = std::fs::read(&path)?;
            let id = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();

            let (sender, received_at) = peek_headers(&raw);
            if !query.matches(&sender, received_at) {
                debug!(item_id = %id, sender = %sender, "Item outside query, skipped");
                continue;
            }

            items.push(Item {
                id,
                source_identifier: sender,
                received_at,
                raw_payload: raw,
            });
        }

        debug!(count = items.len(), dir = %self.dir.display(), "Fetched items");
        Ok(items)
    }
}

/// Best-effort sender/date extraction for query filtering. An
/// unparsable message still becomes an item — the normalizer decides
/// whether it is malformed.
fn peek_headers(raw: &[u8]) -> (String, DateTime<Utc>) {
    let Some(parsed) = MessageParser::default().parse(raw) else {
        warn!("Unparsable message headers, keeping with defaults");
        return ("unknown".to_string(), Utc::now());
    };
    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let received_at = header_datetime(&parsed).unwrap_or_else(Utc::now);
    (sender, received_at)
}

/// Convert a parsed Date header to a UTC timestamp.
pub(crate) fn header_datetime(parsed: &mail_parser::Message) -> Option<DateTime<Utc>> {
    let d = parsed.date()?;
    let naive = chrono::NaiveDate::from_ymd_opt(
        i32::from(d.year),
        u32::from(d.month),
        u32::from(d.day),
    )?
    .and_hms_opt(
        u32::from(d.hour),
        u32::from(d.minute),
        u32::from(d.second),
    )?;
    let offset_minutes = i64::from(d.tz_hour) * 60 * if d.tz_before_gmt { -1 } else { 1 }
        + i64::from(d.tz_minute) * if d.tz_before_gmt { -1 } else { 1 };
    Some(DateTime::<Utc>::from_naive_utc_and_offset(
        naive - chrono::Duration::minutes(offset_minutes),
        Utc,
    ))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    const EML: &str = "From: alice@example.com\r\n\
                       To: me@example.com\r\n\
                       Subject: Hello\r\n\
                       Date: Mon, 16 Jun 2025 08:00:00 +0000\r\n\
                       \r\n\
                       Body text here.\r\n";

    fn write_eml(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[tokio::test]
    async fn fetches_items_in_filename_order() {
        let dir = tempfile::tempdir().unwrap();
        write_eml(dir.path(), "b-msg.eml", EML);
        write_eml(dir.path(), "a-msg.eml", EML);
        write_eml(dir.path(), "notes.txt", "not mail");

        let source = EmlDirSource::new(dir.path());
        let items = source.fetch(&MailQuery::default()).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "a-msg");
        assert_eq!(items[1].id, "b-msg");
        assert_eq!(items[0].source_identifier, "alice@example.com");
    }

    #[tokio::test]
    async fn sender_filter_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        write_eml(dir.path(), "m1.eml", EML);

        let source = EmlDirSource::new(dir.path());
        let query = MailQuery {
            senders: vec!["Alice@Example.COM".to_string()],
            ..Default::default()
        };
        assert_eq!(source.fetch(&query).await.unwrap().len(), 1);

        let other = MailQuery {
            senders: vec!["bob@example.com".to_string()],
            ..Default::default()
        };
        assert!(source.fetch(&other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn date_range_filter() {
        let dir = tempfile::tempdir().unwrap();
        write_eml(dir.path(), "m1.eml", EML);
        let source = EmlDirSource::new(dir.path());

        let inside = MailQuery {
            after: Some("2025-06-01T00:00:00Z".parse().unwrap()),
            before: Some("2025-07-01T00:00:00Z".parse().unwrap()),
            ..Default::default()
        };
        assert_eq!(source.fetch(&inside).await.unwrap().len(), 1);

        let outside = MailQuery {
            before: Some("2025-06-01T00:00:00Z".parse().unwrap()),
            ..Default::default()
        };
        assert!(source.fetch(&outside).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_directory_is_a_fetch_error() {
        let source = EmlDirSource::new("/definitely/not/here");
        let err = source.fetch(&MailQuery::default()).await.unwrap_err();
        assert!(matches!(err, MailError::Fetch(_)));
    }

    #[test]
    fn date_header_parses_with_offset() {
        let raw = "From: a@b.c\r\nDate: Mon, 16 Jun 2025 10:00:00 +0200\r\n\r\nx\r\n";
        let parsed = MessageParser::default().parse(raw.as_bytes()).unwrap();
        let dt = header_datetime(&parsed).unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-06-16T08:00:00+00:00");
    }
}
