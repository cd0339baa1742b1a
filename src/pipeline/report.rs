//! Run report — the queryable summary every run produces, episode or not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::Stage;
use crate::model::Episode;

/// Per-stage tallies. `cached` counts work skipped because an earlier
/// run already finished it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageCounts {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cached: usize,
}

impl StageCounts {
    pub fn success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    pub fn failure(&mut self) {
        self.attempted += 1;
        self.failed += 1;
    }

    pub fn cache_hit(&mut self) {
        self.cached += 1;
    }
}

/// One item- or stage-level failure, kept for the report rather than
/// aborting the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub stage: Stage,
    /// Cache key of the failed unit (item id, utterance index, run id).
    pub key: String,
    pub reason: String,
}

/// Summary of one pipeline run, persisted as `report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Items fetched from the mail source before any processing.
    pub fetched: usize,
    pub normalize: StageCounts,
    pub filter: StageCounts,
    /// Items the filter kept.
    pub kept: usize,
    /// Utterances in the synthesized script (0 when synthesis never ran).
    pub utterances: usize,
    pub render: StageCounts,
    /// Segments replaced by silence under the best-effort policy.
    pub substituted: usize,
    pub cancelled: bool,
    pub failures: Vec<FailureRecord>,
    /// The produced episode, absent when any stage stopped the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<Episode>,
}

impl RunReport {
    pub fn begin(run_id: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            started_at: now,
            finished_at: now,
            fetched: 0,
            normalize: StageCounts::default(),
            filter: StageCounts::default(),
            kept: 0,
            utterances: 0,
            render: StageCounts::default(),
            substituted: 0,
            cancelled: false,
            failures: Vec::new(),
            episode: None,
        }
    }

    pub fn record_failure(&mut self, stage: Stage, key: impl Into<String>, reason: String) {
        self.failures.push(FailureRecord {
            stage,
            key: key.into(),
            reason,
        });
    }

    /// A run succeeds iff it produced an episode.
    pub fn is_success(&self) -> bool {
        self.episode.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_means_episode_present() {
        let mut report = RunReport::begin("run-1");
        assert!(!report.is_success());
        report.episode = Some(Episode {
            audio_path: "episode.wav".into(),
            video_path: None,
            script_path: "script.txt".into(),
            duration_secs: 12.5,
        });
        assert!(report.is_success());
    }

    #[test]
    fn report_serializes_with_failures() {
        let mut report = RunReport::begin("run-1");
        report.record_failure(Stage::Normalize, "msg-3", "no text body".into());
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"stage\":\"normalize\""));
        assert!(json.contains("msg-3"));
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.failures.len(), 1);
    }
}
