//! Error types for mailcast.

use std::time::Duration;

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mail source error: {0}")]
    Mail(#[from] MailError),

    #[error("Normalization error: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Text generation error: {0}")]
    Llm(#[from] LlmError),

    #[error("Script synthesis error: {0}")]
    Script(#[from] ScriptError),

    #[error("Segment rendering error: {0}")]
    Render(#[from] RenderError),

    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Run cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Artifact IO error: {0}")]
    Artifact(std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mail source errors.
///
/// `Auth` is a configuration problem and aborts the run; `RateLimited`
/// is transient and retried by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Authentication failed for mail source {source_name}: {reason}")]
    Auth { source_name: String, reason: String },

    #[error("Rate limited by mail source {source_name}")]
    RateLimited { source_name: String },

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Normalization errors. Item-level: a malformed item is recorded and
/// excluded, never aborts the batch.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Malformed input for item {item_id}: {reason}")]
    MalformedInput { item_id: String, reason: String },
}

/// Text-generation capability errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Provider {provider} returned empty output")]
    EmptyResponse { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    Auth { provider: String },

    #[error("Malformed request rejected by provider {provider}: {reason}")]
    InvalidRequest { provider: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Script synthesis errors.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("No relevant items to synthesize a script from")]
    EmptyInput,

    #[error("Script generation failed: {0}")]
    Generation(String),

    #[error("Text generation error: {0}")]
    Llm(#[from] LlmError),
}

/// Voice-synthesis / segment rendering errors.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Voice synthesis quota exhausted on {provider}")]
    Quota { provider: String },

    #[error("Voice synthesis timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Invalid voice identity '{voice}': {reason}")]
    InvalidVoice { voice: String, reason: String },

    #[error("Authentication failed for synthesis provider {provider}")]
    Auth { provider: String },

    #[error("Synthesis failed: {reason}")]
    Synthesis { reason: String },

    #[error("Synthesizer returned no audio for utterance {utterance_index}")]
    EmptyAudio { utterance_index: usize },

    #[error("Audio decode failed: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Media assembly errors.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("Segment indices are not contiguous: expected {expected}, found {found}")]
    NonContiguous { expected: usize, found: usize },

    #[error("Total audio duration is zero")]
    ZeroDuration,

    #[error("Segment {utterance_index} sample rate {found} does not match track rate {expected}")]
    SampleRateMismatch {
        utterance_index: usize,
        expected: u32,
        found: u32,
    },

    #[error("Audio encode failed: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run cache errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Failed to persist cache: {0}")]
    Persist(String),

    #[error("Failed to load cache: {0}")]
    Load(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_fold_into_top_level() {
        let e: Error = NormalizeError::MalformedInput {
            item_id: "abc".into(),
            reason: "no text body".into(),
        }
        .into();
        assert!(matches!(e, Error::Normalize(_)));
        assert!(e.to_string().contains("abc"));
    }

    #[test]
    fn synthesis_error_display_carries_reason_only() {
        let e = RenderError::Synthesis { reason: "boom".into() };
        assert_eq!(e.to_string(), "Synthesis failed: boom");
    }
}
