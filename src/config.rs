//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::model::SpeakerRole;

/// Words per minute assumed when sizing the script from the target
/// duration. Conversational speech runs 140-160 WPM; 150 is the middle.
pub const WORDS_PER_MINUTE: usize = 150;

/// How relevance filtering runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterMode {
    /// Every item is relevant. Used when filtering is disabled.
    Passthrough,
    /// Delegate to the text-generation capability with a free-text criterion.
    Classify { criterion: String },
}

impl FilterMode {
    /// Stable hash of the criterion, part of the filter cache key so a
    /// changed criterion invalidates prior decisions.
    pub fn criteria_hash(&self) -> String {
        match self {
            Self::Passthrough => "passthrough".to_string(),
            Self::Classify { criterion } => format!("{:016x}", fnv1a(criterion.as_bytes())),
        }
    }
}

/// FNV-1a, used for cache keys. Stable across processes, unlike the
/// std hasher.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// What to do when the classifier errors on one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterFallback {
    /// Keep the item (default): dropping potentially-relevant content is
    /// worse than including noise.
    Open,
    /// Drop the item.
    Closed,
}

/// What to do when one utterance still fails to render after retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPolicy {
    /// The run fails; no episode is produced.
    Strict,
    /// Substitute a fixed-length silence segment and keep going.
    BestEffort,
}

/// One of the two conversational personas.
#[derive(Debug, Clone)]
pub struct SpeakerProfile {
    /// Display name, used in the script prompt and the speaker track.
    pub name: String,
    /// Personality/style descriptor fed to the script prompt.
    pub style: String,
    /// Voice identity passed to the voice-synthesis capability.
    pub voice: String,
}

/// Retry settings applied to every external-capability call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Stable run identifier; artifacts and cache entries are addressed
    /// by it so a later run can detect and skip completed work.
    pub run_id: String,
    /// Root directory for run artifacts.
    pub output_dir: PathBuf,
    /// Advisory episode length in minutes. Realized duration is only
    /// known after rendering.
    pub target_minutes: u32,
    /// Bound on concurrent external-capability calls.
    pub concurrency: usize,
    pub filter_mode: FilterMode,
    pub filter_fallback: FilterFallback,
    pub render_policy: RenderPolicy,
    /// Length of a substituted silence segment under best-effort.
    pub silence_duration: Duration,
    /// Whether to emit the speaker-indicator video track.
    pub video_track: bool,
    pub speaker_a: SpeakerProfile,
    pub speaker_b: SpeakerProfile,
    pub retry: RetryConfig,
}

impl PipelineConfig {
    pub fn speaker(&self, role: SpeakerRole) -> &SpeakerProfile {
        match role {
            SpeakerRole::A => &self.speaker_a,
            SpeakerRole::B => &self.speaker_b,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            run_id: String::new(),
            output_dir: PathBuf::from("./episodes"),
            target_minutes: 30,
            concurrency: 4,
            filter_mode: FilterMode::Passthrough,
            filter_fallback: FilterFallback::Open,
            render_policy: RenderPolicy::BestEffort,
            silence_duration: Duration::from_secs(2),
            video_track: true,
            speaker_a: SpeakerProfile {
                name: "Sarah".to_string(),
                style: "analytical, asks probing questions, provides context".to_string(),
                voice: "zephyr".to_string(),
            },
            speaker_b: SpeakerProfile {
                name: "Michael".to_string(),
                style: "enthusiastic, makes connections, adds energy".to_string(),
                voice: "puck".to_string(),
            },
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criteria_hash_is_stable_and_distinct() {
        let a = FilterMode::Classify {
            criterion: "AI research news".into(),
        };
        let b = FilterMode::Classify {
            criterion: "cooking recipes".into(),
        };
        assert_eq!(a.criteria_hash(), a.criteria_hash());
        assert_ne!(a.criteria_hash(), b.criteria_hash());
        assert_eq!(FilterMode::Passthrough.criteria_hash(), "passthrough");
    }

    #[test]
    fn default_speakers_are_both_configured() {
        let config = PipelineConfig::default();
        assert_eq!(config.speaker(SpeakerRole::A).name, "Sarah");
        assert_eq!(config.speaker(SpeakerRole::B).name, "Michael");
        assert_ne!(config.speaker_a.voice, config.speaker_b.voice);
    }
}
