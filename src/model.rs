//! Core data model for the email-to-episode pipeline.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Ingested item ───────────────────────────────────────────────────

/// One retrieved source message, immutable once fetched.
///
/// `raw_payload` holds the unparsed RFC-822 bytes; all interpretation
/// happens in the normalizer so raw-format quirks stay out of the
/// downstream stages.
#[derive(Debug, Clone)]
pub struct Item {
    /// Stable message identifier (e.g. the mail provider's message id).
    pub id: String,
    /// Sender address or other origin identifier.
    pub source_identifier: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
    /// Raw message bytes, exactly as fetched.
    pub raw_payload: Vec<u8>,
}

// ── Normalized item ─────────────────────────────────────────────────

/// Canonical structured text derived from an [`Item`].
///
/// A deterministic function of the raw payload and the normalizer
/// version: same input, byte-identical output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub item_id: String,
    /// Subject line, or a placeholder when the message had none.
    pub title: String,
    /// Origin identifier carried through for the markdown header.
    pub source: String,
    /// Plain-text body, quotes and markup stripped.
    pub body_text: String,
    pub timestamp: DateTime<Utc>,
}

impl NormalizedItem {
    /// Render as the canonical markdown artifact (one file per item).
    pub fn to_markdown(&self) -> String {
        format!(
            "# {}\n\n**From:** {}\n\n**Date:** {}\n\n---\n\n{}\n",
            self.title,
            self.source,
            self.timestamp.to_rfc3339(),
            self.body_text
        )
    }

    /// Parse a markdown artifact back into a `NormalizedItem`.
    ///
    /// Inverse of [`to_markdown`](Self::to_markdown) — used when a cached
    /// normalization artifact is reused on a later run.
    pub fn from_markdown(item_id: &str, markdown: &str) -> Option<Self> {
        let mut lines = markdown.lines();
        let title = lines.next()?.strip_prefix("# ")?.to_string();
        let mut source = None;
        let mut timestamp = None;
        for line in lines.by_ref() {
            if let Some(rest) = line.strip_prefix("**From:** ") {
                source = Some(rest.to_string());
            } else if let Some(rest) = line.strip_prefix("**Date:** ") {
                timestamp = DateTime::parse_from_rfc3339(rest)
                    .ok()
                    .map(|t| t.with_timezone(&Utc));
            } else if line == "---" {
                break;
            }
        }
        let body = markdown.split_once("\n---\n\n")?.1;
        Some(Self {
            item_id: item_id.to_string(),
            title,
            source: source?,
            body_text: body.trim_end_matches('\n').to_string(),
            timestamp: timestamp?,
        })
    }
}

// ── Filter decision ─────────────────────────────────────────────────

/// Relevance decision for one item under one filter criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDecision {
    pub item_id: String,
    pub relevant: bool,
    /// Classifier rationale, or the fallback note when the capability
    /// errored and the fail-open/closed default was applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ── Script ──────────────────────────────────────────────────────────

/// One of exactly two conversational personas used throughout a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeakerRole {
    A,
    B,
}

impl SpeakerRole {
    /// The script tag this role is written under ("[Speaker 0]" / "[Speaker 1]").
    pub fn script_tag(&self) -> &'static str {
        match self {
            Self::A => "[Speaker 0]",
            Self::B => "[Speaker 1]",
        }
    }

    /// Short label for logging and segment file names.
    pub fn label(&self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
        }
    }
}

/// One line of dialogue attributed to a single speaker role.
///
/// Indices form a dense 0-based sequence; order defines playback order
/// and is fixed at synthesis time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptUtterance {
    pub index: usize,
    pub role: SpeakerRole,
    pub text: String,
}

// ── Audio ───────────────────────────────────────────────────────────

/// Rendered audio for one utterance. `duration` is measured from the
/// decoded sample count, never estimated from text length.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub utterance_index: usize,
    /// Complete WAV file bytes (header + PCM).
    pub wav_bytes: Vec<u8>,
    pub duration: Duration,
    /// True when this segment is a silence placeholder substituted for a
    /// failed render under the best-effort policy.
    pub substituted: bool,
}

// ── Episode ─────────────────────────────────────────────────────────

/// Final artifact of a run, written once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub audio_path: PathBuf,
    /// Speaker-indicator track aligned to the audio timeline, when video
    /// output is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    pub script_path: PathBuf,
    /// Total audio duration in seconds.
    pub duration_secs: f64,
}
