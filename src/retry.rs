//! Retry policy for external-capability calls.
//!
//! Every network call (classification, script generation, voice
//! synthesis, mail fetch) goes through one [`RetryPolicy`] rather than
//! ad-hoc retry loops at each call site. Transient failures (rate
//! limits, quota, timeouts, empty responses) are retried with jittered
//! exponential backoff; permanent failures (bad credentials, invalid
//! voice, malformed request) surface immediately.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{LlmError, MailError, RenderError};

/// Errors that can say whether another attempt might succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. }
            | Self::Timeout { .. }
            | Self::EmptyResponse { .. }
            | Self::InvalidResponse { .. }
            | Self::RequestFailed { .. } => true,
            Self::Auth { .. } | Self::InvalidRequest { .. } | Self::Json(_) => false,
        }
    }
}

impl Transient for RenderError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Quota { .. }
            | Self::Timeout { .. }
            | Self::Synthesis { .. }
            | Self::EmptyAudio { .. } => true,
            Self::InvalidVoice { .. } | Self::Auth { .. } | Self::Decode(_) | Self::Io(_) => false,
        }
    }
}

impl Transient for MailError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Fetch(_))
    }
}

/// Bounded retry with exponential backoff and jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay,
            max_delay: config.max_delay,
        }
    }

    /// Single attempt, no backoff. Keeps tests fast and deterministic.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff before attempt `n` (1-based): `base * 2^(n-1)`, capped at
    /// `max_delay`, scaled by a random factor in [0.5, 1.5).
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << (attempt - 1).min(16));
        let capped = exp.min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        capped.mul_f64(jitter)
    }

    /// Run `operation` until it succeeds, fails permanently, or the
    /// attempt budget is spent. The last error is returned as-is.
    pub async fn run<T, E, F, Fut>(&self, op_name: &str, mut operation: F) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => {
                    warn!(op = op_name, error = %e, "Permanent failure, not retrying");
                    return Err(e);
                }
                Err(e) if attempt >= self.max_attempts => {
                    warn!(
                        op = op_name,
                        attempts = attempt,
                        error = %e,
                        "Retry budget exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        op = op_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
