//! Gemini HTTP client for both capability seams.
//!
//! Text generation goes through `generateContent`; speech synthesis
//! goes through the same endpoint on a TTS model with an `AUDIO`
//! response modality and a prebuilt voice config. The TTS response
//! carries base64 16-bit PCM (typically 24 kHz) inline.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capability::{GenerationRequest, SynthesizedAudio, TextGenerator, VoiceSynthesizer};
use crate::error::{LlmError, RenderError};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Default PCM rate when the response mime type does not spell one out.
const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Request timeout for a single call. Script generation on a long
/// content window can take a while; TTS calls are slower still.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Gemini client configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: SecretString,
    /// Model for classification and script generation.
    pub text_model: String,
    /// Model for voice synthesis.
    pub tts_model: String,
}

/// Client implementing both [`TextGenerator`] and [`VoiceSynthesizer`].
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: "gemini".to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http, config })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{API_BASE}/{model}:generateContent")
    }

    async fn post(&self, model: &str, body: &GenerateContentRequest) -> Result<GenerateContentResponse, ApiFailure> {
        let response = self
            .http
            .post(self.endpoint(model))
            .header("x-goog-api-key", self.config.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiFailure::Timeout
                } else {
                    ApiFailure::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => ApiFailure::RateLimited,
                401 | 403 => ApiFailure::Auth,
                400 => ApiFailure::BadRequest(truncate(&text, 300)),
                _ => ApiFailure::Transport(format!("HTTP {status}: {}", truncate(&text, 300))),
            });
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| ApiFailure::BadResponse(e.to_string()))
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    fn model_name(&self) -> &str {
        &self.config.text_model
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part::text(request.prompt)],
            }],
            generation_config: Some(GenerationConfig {
                max_output_tokens: Some(request.max_tokens),
                temperature: Some(request.temperature),
                response_modalities: None,
                speech_config: None,
            }),
        };

        let provider = "gemini".to_string();
        let response = self
            .post(&self.config.text_model, &body)
            .await
            .map_err(|f| f.into_llm_error(&provider))?;

        let text = response.first_text().unwrap_or_default();
        if text.trim().is_empty() {
            // Empty completions are retryable, never "no content".
            return Err(LlmError::EmptyResponse { provider });
        }
        debug!(model = %self.config.text_model, chars = text.len(), "Generation complete");
        Ok(text)
    }
}

#[async_trait]
impl VoiceSynthesizer for GeminiClient {
    fn name(&self) -> &str {
        "gemini-tts"
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<SynthesizedAudio, RenderError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part::text(text.to_string())],
            }],
            generation_config: Some(GenerationConfig {
                max_output_tokens: None,
                temperature: None,
                response_modalities: Some(vec!["AUDIO".to_string()]),
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                }),
            }),
        };

        let response = self
            .post(&self.config.tts_model, &body)
            .await
            .map_err(|f| f.into_render_error(voice))?;

        let Some(inline) = response.first_inline_data() else {
            return Err(RenderError::Synthesis {
                reason: "no audio data in response".to_string(),
            });
        };

        let pcm = general_purpose::STANDARD
            .decode(&inline.data)
            .map_err(|e| RenderError::Decode(format!("base64: {e}")))?;
        let sample_rate = parse_rate(&inline.mime_type).unwrap_or(DEFAULT_SAMPLE_RATE);

        debug!(
            voice,
            bytes = pcm.len(),
            sample_rate,
            "Synthesized utterance audio"
        );
        Ok(SynthesizedAudio { pcm, sample_rate })
    }
}

/// Extract the PCM rate from a mime type like `audio/L16;codec=pcm;rate=24000`.
fn parse_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .find_map(|p| p.trim().strip_prefix("rate="))
        .and_then(|r| r.parse().ok())
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ── Failure mapping ─────────────────────────────────────────────────

/// Provider-level failure, mapped per seam: the same 429 is a rate
/// limit for text generation and a quota error for voice synthesis.
enum ApiFailure {
    Timeout,
    RateLimited,
    Auth,
    BadRequest(String),
    BadResponse(String),
    Transport(String),
}

impl ApiFailure {
    fn into_llm_error(self, provider: &str) -> LlmError {
        let provider = provider.to_string();
        match self {
            Self::Timeout => LlmError::Timeout {
                provider,
                timeout: REQUEST_TIMEOUT,
            },
            Self::RateLimited => LlmError::RateLimited {
                provider,
                retry_after: None,
            },
            Self::Auth => LlmError::Auth { provider },
            Self::BadRequest(reason) => LlmError::InvalidRequest { provider, reason },
            Self::BadResponse(reason) => LlmError::InvalidResponse { provider, reason },
            Self::Transport(reason) => LlmError::RequestFailed { provider, reason },
        }
    }

    fn into_render_error(self, voice: &str) -> RenderError {
        match self {
            Self::Timeout => RenderError::Timeout {
                timeout: REQUEST_TIMEOUT,
            },
            Self::RateLimited => RenderError::Quota {
                provider: "gemini-tts".to_string(),
            },
            Self::Auth => RenderError::Auth {
                provider: "gemini-tts".to_string(),
            },
            // A 400 from the TTS model is almost always a bad voice name.
            Self::BadRequest(reason) => RenderError::InvalidVoice {
                voice: voice.to_string(),
                reason,
            },
            Self::BadResponse(reason) | Self::Transport(reason) => {
                RenderError::Synthesis { reason }
            }
        }
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateContentResponse {
    fn first_text(&self) -> Option<String> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .iter()
            .find_map(|p| p.text.clone())
    }

    fn first_inline_data(&self) -> Option<&InlineData> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .iter()
            .find_map(|p| p.inline_data.as_ref())
    }
}
