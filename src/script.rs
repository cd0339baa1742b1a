//! Script synthesizer — relevant items in, two-speaker dialogue out.
//!
//! The whole script is produced as one atomic unit per run. Target
//! duration is advisory: the word budget comes from a words-per-minute
//! heuristic, and the realized duration is only known after rendering.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info};

use crate::capability::{GenerationRequest, TextGenerator};
use crate::config::{SpeakerProfile, WORDS_PER_MINUTE};
use crate::error::{LlmError, ScriptError};
use crate::model::{NormalizedItem, ScriptUtterance, SpeakerRole};
use crate::retry::RetryPolicy;

/// Max characters of combined item content fed to the prompt.
const MAX_CONTENT_CHARS: usize = 50_000;

/// Token ceiling for the generation call.
const MAX_SCRIPT_TOKENS: u32 = 8_000;

/// Generation temperature; higher than classification for natural
/// conversational variation.
const SCRIPT_TEMPERATURE: f32 = 0.8;

pub struct ScriptSynthesizer {
    llm: Arc<dyn TextGenerator>,
    retry: RetryPolicy,
}

impl ScriptSynthesizer {
    pub fn new(llm: Arc<dyn TextGenerator>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    /// Generate a script for the given items.
    ///
    /// Returns the canonical script text (one `[Speaker N] text` line
    /// per utterance, reparseable losslessly) and the parsed sequence.
    pub async fn synthesize(
        &self,
        items: &[NormalizedItem],
        target_minutes: u32,
        speaker_a: &SpeakerProfile,
        speaker_b: &SpeakerProfile,
    ) -> Result<(String, Vec<ScriptUtterance>), ScriptError> {
        if items.is_empty() {
            return Err(ScriptError::EmptyInput);
        }

        let target_words = target_minutes as usize * WORDS_PER_MINUTE;
        let max_tokens = MAX_SCRIPT_TOKENS.min((target_words * 3 / 2) as u32);
        let prompt = build_script_prompt(items, target_minutes, target_words, speaker_a, speaker_b);
        debug!(
            items = items.len(),
            target_minutes, target_words, "Requesting script generation"
        );

        let request = GenerationRequest::new(prompt)
            .with_max_tokens(max_tokens)
            .with_temperature(SCRIPT_TEMPERATURE);

        // Parsing happens inside the retried operation: an unparsable or
        // one-voiced completion is a bad completion, worth another attempt.
        let utterances = self
            .retry
            .run("script.generate", || async {
                let text = self.llm.generate(request.clone()).await?;
                let utterances = parse_script(&text);
                validate_script(&utterances).map_err(|reason| LlmError::InvalidResponse {
                    provider: self.llm.model_name().to_string(),
                    reason,
                })?;
                Ok::<_, LlmError>(utterances)
            })
            .await
            .map_err(|e| match e {
                LlmError::InvalidResponse { reason, .. } => ScriptError::Generation(reason),
                LlmError::EmptyResponse { .. } => {
                    ScriptError::Generation("empty completion".to_string())
                }
                other => ScriptError::Llm(other),
            })?;

        info!(utterances = utterances.len(), "Script synthesized");
        Ok((render_script(&utterances), utterances))
    }
}

/// A script must be non-empty and bi-vocal.
fn validate_script(utterances: &[ScriptUtterance]) -> Result<(), String> {
    if utterances.is_empty() {
        return Err("no speaker-tagged lines in completion".to_string());
    }
    let has_a = utterances.iter().any(|u| u.role == SpeakerRole::A);
    let has_b = utterances.iter().any(|u| u.role == SpeakerRole::B);
    if !(has_a && has_b) {
        return Err("script is a monologue; both speaker roles must appear".to_string());
    }
    Ok(())
}

/// Canonical text form of a script, losslessly reparseable.
pub fn render_script(utterances: &[ScriptUtterance]) -> String {
    let mut out = String::new();
    for u in utterances {
        out.push_str(u.role.script_tag());
        out.push(' ');
        out.push_str(&u.text);
        out.push('\n');
    }
    out
}

/// Parse `[Speaker 0]` / `[Speaker 1]` tagged lines into utterances.
///
/// Tolerates markdown bold around the tag, a parenthesized name, and a
/// `Name:` suffix; a tag on its own line takes its text from the
/// following lines up to the next tag or blank line. Untagged lines are
/// ignored.
pub fn parse_script(text: &str) -> Vec<ScriptUtterance> {
    let tag_re = Regex::new(
        r"^(?:\*\*)?\[Speaker ([01])\](?:\*\*)?(?:\s*\([^)]*\))?(?:\s*[A-Za-z ]+:)?\s*(.*)$",
    )
    .expect("static regex");

    let lines: Vec<&str> = text.lines().collect();
    let mut utterances = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        if let Some(caps) = tag_re.captures(line) {
            let role = if &caps[1] == "0" {
                SpeakerRole::A
            } else {
                SpeakerRole::B
            };
            let mut utterance_text = caps[2].trim().to_string();

            // Tag on its own line: gather continuation lines.
            if utterance_text.is_empty() {
                while i + 1 < lines.len() {
                    let next = lines[i + 1].trim();
                    if next.is_empty() || tag_re.is_match(next) {
                        break;
                    }
                    if !utterance_text.is_empty() {
                        utterance_text.push(' ');
                    }
                    utterance_text.push_str(next);
                    i += 1;
                }
            }

            let utterance_text = utterance_text.trim_end_matches("**").trim().to_string();
            if !utterance_text.is_empty() {
                utterances.push(ScriptUtterance {
                    index: utterances.len(),
                    role,
                    text: utterance_text,
                });
            }
        }
        i += 1;
    }
    utterances
}

/// Build the two-host conversational prompt.
fn build_script_prompt(
    items: &[NormalizedItem],
    target_minutes: u32,
    target_words: usize,
    speaker_a: &SpeakerProfile,
    speaker_b: &SpeakerProfile,
) -> String {
    let mut combined = items
        .iter()
        .map(|item| format!("Article: {}\n{}", item.title, item.to_markdown()))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");
    if combined.len() > MAX_CONTENT_CHARS {
        let mut cut = MAX_CONTENT_CHARS;
        while !combined.is_char_boundary(cut) {
            cut -= 1;
        }
        combined.truncate(cut);
        combined.push_str("\n\n[Content truncated...]");
    }

    format!(
        "You are a podcast script writer creating a {target_minutes}-minute conversational \
         podcast between two hosts.\n\n\
         CRITICAL RULES:\n\
         1. Hosts introduce themselves ONLY at the very beginning (e.g. \"I'm {a_name}\" and \"I'm {b_name}\")\n\
         2. After introductions, hosts NEVER say their own names again\n\
         3. Natural conversation flow with quick back-and-forth exchanges\n\
         4. Keep responses short and punchy - most exchanges 1-3 sentences\n\
         5. Use conversational fillers and reactions like \"mm-hmm\", \"right\", \"exactly\"\n\
         6. NO explicit pause markers\n\
         7. Both hosts must speak; alternate or interleave throughout\n\n\
         The two hosts:\n\
         - Speaker 0 ({a_name}): {a_style}\n\
         - Speaker 1 ({b_name}): {b_style}\n\n\
         Format the script EXACTLY like this:\n\
         [Speaker 0] Text here\n\
         [Speaker 1] Text here\n\n\
         Content to discuss:\n\
         {combined}\n\n\
         Create an engaging {target_minutes}-minute podcast script (approximately \
         {target_words} words) covering the most interesting points from this content.",
        a_name = speaker_a.name,
        a_style = speaker_a.style,
        b_name = speaker_b.name,
        b_style = speaker_b.style,
    )
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;

    struct FakeLlm {
        completion: String,
    }

    #[async_trait]
    impl TextGenerator for FakeLlm {
        fn model_name(&self) -> &str {
            "fake"
        }

        async fn generate(&self, _request: GenerationRequest) -> Result<String, LlmError> {
            Ok(self.completion.clone())
        }
    }

    fn items(n: usize) -> Vec<NormalizedItem> {
        (0..n)
            .map(|i| NormalizedItem {
                item_id: format!("m{i}"),
                title: format!("Story {i}"),
                source: "news@example.com".into(),
                body_text: "Some content.".into(),
                timestamp: Utc::now(),
            })
            .collect()
    }

    fn profiles() -> (SpeakerProfile, SpeakerProfile) {
        let config = crate::config::PipelineConfig::default();
        (config.speaker_a, config.speaker_b)
    }

    // ── Parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_basic_tagged_lines() {
        let script = "[Speaker 0] Welcome to the show. I'm Sarah.\n\
                      [Speaker 1] And I'm Michael.\n\
                      [Speaker 0] Let's jump in.";
        let utterances = parse_script(script);
        assert_eq!(utterances.len(), 3);
        assert_eq!(utterances[0].role, SpeakerRole::A);
        assert_eq!(utterances[1].role, SpeakerRole::B);
        assert_eq!(utterances[2].text, "Let's jump in.");
        let indices: Vec<usize> = utterances.iter().map(|u| u.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn parse_tolerates_markdown_and_names() {
        let script = "**[Speaker 0]** Sarah: Hello there.\n\
                      [Speaker 1] (Michael) Great to be here.";
        let utterances = parse_script(script);
        assert_eq!(utterances.len(), 2);
        assert_eq!(utterances[0].text, "Hello there.");
        assert_eq!(utterances[1].text, "Great to be here.");
    }

    #[test]
    fn parse_gathers_continuation_lines() {
        let script = "[Speaker 0]\nFirst part\nsecond part\n\n[Speaker 1] Reply.";
        let utterances = parse_script(script);
        assert_eq!(utterances.len(), 2);
        assert_eq!(utterances[0].text, "First part second part");
    }

    #[test]
    fn parse_ignores_untagged_preamble() {
        let script = "Here's your script:\n\n[Speaker 0] Hi.\n[Speaker 1] Hey.";
        assert_eq!(parse_script(script).len(), 2);
    }

    #[test]
    fn render_parse_round_trip() {
        let script = "[Speaker 0] Hello.\n[Speaker 1] Hi there.\n[Speaker 0] Bye.";
        let utterances = parse_script(script);
        let rendered = render_script(&utterances);
        assert_eq!(parse_script(&rendered), utterances);
    }

    // ── Synthesis ───────────────────────────────────────────────────

    #[tokio::test]
    async fn synthesize_returns_bi_vocal_script() {
        let llm = Arc::new(FakeLlm {
            completion: "[Speaker 0] I'm Sarah.\n[Speaker 1] And I'm Michael.\n\
                         [Speaker 0] Today: three stories."
                .into(),
        });
        let synth = ScriptSynthesizer::new(llm, RetryPolicy::no_retry());
        let (a, b) = profiles();
        let (text, utterances) = synth.synthesize(&items(3), 5, &a, &b).await.unwrap();
        assert_eq!(utterances.len(), 3);
        assert!(text.starts_with("[Speaker 0] I'm Sarah.\n"));
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let llm = Arc::new(FakeLlm {
            completion: String::new(),
        });
        let synth = ScriptSynthesizer::new(llm, RetryPolicy::no_retry());
        let (a, b) = profiles();
        let err = synth.synthesize(&[], 5, &a, &b).await.unwrap_err();
        assert!(matches!(err, ScriptError::EmptyInput));
    }

    #[tokio::test]
    async fn monologue_completion_is_a_generation_error() {
        let llm = Arc::new(FakeLlm {
            completion: "[Speaker 0] Just me.\n[Speaker 0] Still me.".into(),
        });
        let synth = ScriptSynthesizer::new(llm, RetryPolicy::no_retry());
        let (a, b) = profiles();
        let err = synth.synthesize(&items(1), 5, &a, &b).await.unwrap_err();
        match err {
            ScriptError::Generation(reason) => assert!(reason.contains("monologue")),
            other => panic!("expected Generation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn untagged_completion_is_a_generation_error() {
        let llm = Arc::new(FakeLlm {
            completion: "Sorry, I cannot write that script.".into(),
        });
        let synth = ScriptSynthesizer::new(llm, RetryPolicy::no_retry());
        let (a, b) = profiles();
        let err = synth.synthesize(&items(1), 5, &a, &b).await.unwrap_err();
        assert!(matches!(err, ScriptError::Generation(_)));
    }

    // ── Prompt ──────────────────────────────────────────────────────

    #[test]
    fn prompt_names_both_speakers_and_word_target() {
        let (a, b) = profiles();
        let prompt = build_script_prompt(&items(2), 5, 750, &a, &b);
        assert!(prompt.contains("Speaker 0 (Sarah)"));
        assert!(prompt.contains("Speaker 1 (Michael)"));
        assert!(prompt.contains("750 words"));
        assert!(prompt.contains("Article: Story 0"));
    }

    #[test]
    fn prompt_truncates_oversized_content() {
        let mut big = items(1);
        big[0].body_text = "x".repeat(MAX_CONTENT_CHARS + 10_000);
        let (a, b) = profiles();
        let prompt = build_script_prompt(&big, 30, 4500, &a, &b);
        assert!(prompt.contains("[Content truncated...]"));
        assert!(prompt.len() < MAX_CONTENT_CHARS + 3_000);
    }
}
