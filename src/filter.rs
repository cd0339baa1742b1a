//! Filter stage — relevance classification over normalized items.
//!
//! Never fatal: in passthrough mode everything is relevant, and in
//! classify mode a capability failure on one item falls back to the
//! configured default (fail-open keeps the item) instead of failing the
//! run. Decisions come back in input order; filtering never reorders.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::capability::{GenerationRequest, TextGenerator};
use crate::config::{FilterFallback, FilterMode};
use crate::model::{FilterDecision, NormalizedItem};
use crate::retry::RetryPolicy;

/// Max body lines included in the classification prompt.
const BODY_PREVIEW_LINES: usize = 20;

/// Max tokens for a YES/NO classification answer.
const CLASSIFY_MAX_TOKENS: u32 = 50;

pub struct FilterStage {
    llm: Arc<dyn TextGenerator>,
    mode: FilterMode,
    fallback: FilterFallback,
    retry: RetryPolicy,
}

impl FilterStage {
    pub fn new(
        llm: Arc<dyn TextGenerator>,
        mode: FilterMode,
        fallback: FilterFallback,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            llm,
            mode,
            fallback,
            retry,
        }
    }

    /// Cache key for one item under the current criterion.
    pub fn cache_key(&self, item_id: &str) -> String {
        format!("{item_id}:{}", self.mode.criteria_hash())
    }

    /// Classify one item. Infallible by design: capability errors are
    /// absorbed into the configured fallback decision.
    pub async fn decide(&self, item: &NormalizedItem) -> FilterDecision {
        let criterion = match &self.mode {
            FilterMode::Passthrough => {
                debug!(item_id = %item.item_id, "Filtering disabled, item kept");
                return FilterDecision {
                    item_id: item.item_id.clone(),
                    relevant: true,
                    reason: None,
                };
            }
            FilterMode::Classify { criterion } => criterion,
        };

        let prompt = build_classify_prompt(item, criterion);
        let request = GenerationRequest::new(prompt)
            .with_max_tokens(CLASSIFY_MAX_TOKENS)
            .with_temperature(0.0);

        let result = self
            .retry
            .run("filter.classify", || {
                self.llm.generate(request.clone())
            })
            .await;

        match result {
            Ok(answer) => {
                let relevant = answer.to_uppercase().contains("YES");
                debug!(item_id = %item.item_id, relevant, "Classified item");
                FilterDecision {
                    item_id: item.item_id.clone(),
                    relevant,
                    reason: Some(answer.trim().to_string()),
                }
            }
            Err(e) => {
                let relevant = self.fallback == FilterFallback::Open;
                warn!(
                    item_id = %item.item_id,
                    error = %e,
                    relevant,
                    "Classification failed, applying fallback"
                );
                FilterDecision {
                    item_id: item.item_id.clone(),
                    relevant,
                    reason: Some(format!("classification failed ({e}), fallback applied")),
                }
            }
        }
    }
}

/// Build the YES/NO prompt: criterion, then subject plus the first
/// lines of the body.
fn build_classify_prompt(item: &NormalizedItem, criterion: &str) -> String {
    let preview: Vec<&str> = item.body_text.lines().take(BODY_PREVIEW_LINES).collect();
    format!(
        "You are an assistant that helps filter emails. The filter is: {criterion}\n\n\
         Subject: {}\n\n\
         First lines of email body:\n{}\n\n\
         Should this email be kept? Answer YES or NO and explain briefly why.",
        item.title,
        preview.join("\n")
    )
}

/// Log a one-line summary of a whole filter pass.
pub fn log_filter_summary(decisions: &[FilterDecision]) {
    let kept = decisions.iter().filter(|d| d.relevant).count();
    info!(
        total = decisions.len(),
        kept,
        excluded = decisions.len() - kept,
        "Filter pass complete"
    );
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::LlmError;

    /// Fake generator with a scripted reply per call.
    struct FakeLlm {
        reply: Result<&'static str, ()>,
    }

    #[async_trait]
    impl TextGenerator for FakeLlm {
        fn model_name(&self) -> &str {
            "fake"
        }

        async fn generate(&self, _request: GenerationRequest) -> Result<String, LlmError> {
            match self.reply {
                Ok(text) => Ok(text.to_string()),
                Err(()) => Err(LlmError::RequestFailed {
                    provider: "fake".into(),
                    reason: "down".into(),
                }),
            }
        }
    }

    fn sample_item() -> NormalizedItem {
        NormalizedItem {
            item_id: "m1".into(),
            title: "GPT-5 released".into(),
            source: "news@example.com".into(),
            body_text: "Big model news today.".into(),
            timestamp: chrono::Utc::now(),
        }
    }

    fn stage(reply: Result<&'static str, ()>, fallback: FilterFallback) -> FilterStage {
        FilterStage::new(
            Arc::new(FakeLlm { reply }),
            FilterMode::Classify {
                criterion: "AI news".into(),
            },
            fallback,
            RetryPolicy::no_retry(),
        )
    }

    #[tokio::test]
    async fn passthrough_keeps_everything() {
        let stage = FilterStage::new(
            Arc::new(FakeLlm { reply: Err(()) }),
            FilterMode::Passthrough,
            FilterFallback::Open,
            RetryPolicy::no_retry(),
        );
        let decision = stage.decide(&sample_item()).await;
        assert!(decision.relevant);
        assert!(decision.reason.is_none());
    }

    #[tokio::test]
    async fn yes_answer_keeps_item() {
        let decision = stage(Ok("YES, this is about AI."), FilterFallback::Open)
            .decide(&sample_item())
            .await;
        assert!(decision.relevant);
        assert_eq!(decision.reason.as_deref(), Some("YES, this is about AI."));
    }

    #[tokio::test]
    async fn no_answer_excludes_item() {
        let decision = stage(Ok("NO, unrelated topic."), FilterFallback::Open)
            .decide(&sample_item())
            .await;
        assert!(!decision.relevant);
    }

    #[tokio::test]
    async fn capability_error_fails_open() {
        let decision = stage(Err(()), FilterFallback::Open)
            .decide(&sample_item())
            .await;
        assert!(decision.relevant);
        assert!(decision.reason.unwrap().contains("fallback"));
    }

    #[tokio::test]
    async fn capability_error_fails_closed_when_configured() {
        let decision = stage(Err(()), FilterFallback::Closed)
            .decide(&sample_item())
            .await;
        assert!(!decision.relevant);
    }

    #[test]
    fn prompt_contains_criterion_and_preview() {
        let prompt = build_classify_prompt(&sample_item(), "AI news");
        assert!(prompt.contains("The filter is: AI news"));
        assert!(prompt.contains("Subject: GPT-5 released"));
        assert!(prompt.contains("Big model news today."));
    }

    #[test]
    fn prompt_truncates_long_bodies() {
        let mut item = sample_item();
        item.body_text = (0..100)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = build_classify_prompt(&item, "x");
        assert!(prompt.contains("line 19"));
        assert!(!prompt.contains("line 20\n"));
    }

    #[test]
    fn cache_key_changes_with_criterion() {
        let a = stage(Ok("YES"), FilterFallback::Open).cache_key("m1");
        let other = FilterStage::new(
            Arc::new(FakeLlm { reply: Ok("YES") }),
            FilterMode::Classify {
                criterion: "different".into(),
            },
            FilterFallback::Open,
            RetryPolicy::no_retry(),
        );
        assert_ne!(a, other.cache_key("m1"));
    }
}
