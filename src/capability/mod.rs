//! External capability seams — text generation and voice synthesis.
//!
//! The pipeline never talks to a provider directly; it goes through the
//! two narrow traits here so tests can swap in deterministic fakes.
//! One concrete implementation lives in [`gemini`].

pub mod gemini;

pub use gemini::GeminiClient;

use async_trait::async_trait;

use crate::error::{LlmError, RenderError};

// ── Text generation ─────────────────────────────────────────────────

/// A single text-generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: 1024,
            temperature: 0.2,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Opaque text-generation capability.
///
/// Implementations must treat an empty completion as
/// [`LlmError::EmptyResponse`] (retryable), never as valid output.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model identifier for logging.
    fn model_name(&self) -> &str;

    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError>;
}

// ── Voice synthesis ─────────────────────────────────────────────────

/// Raw synthesized audio: little-endian 16-bit mono PCM.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
}

impl SynthesizedAudio {
    /// Number of samples in the PCM payload.
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }
}

/// Opaque voice-synthesis capability. One call per utterance; calls for
/// different utterances are independent and may run concurrently.
#[async_trait]
pub trait VoiceSynthesizer: Send + Sync {
    /// Provider identifier for logging.
    fn name(&self) -> &str;

    async fn synthesize(&self, text: &str, voice: &str) -> Result<SynthesizedAudio, RenderError>;
}
