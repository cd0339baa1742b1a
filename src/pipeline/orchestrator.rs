//! The orchestrator owns the run: it sequences the stages, consults and
//! records the cache, writes artifacts, and assembles the report.
//!
//! Stages themselves never touch the cache — they are pure per-unit
//! workers. All cross-run state flows through here, which is what makes
//! a rerun with the same run id resumable.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::assemble::MediaAssembler;
use crate::cache::{CacheStatus, RunCache, Stage};
use crate::capability::{TextGenerator, VoiceSynthesizer};
use crate::config::{PipelineConfig, RenderPolicy};
use crate::error::{CacheError, Error, Result};
use crate::filter::{log_filter_summary, FilterStage};
use crate::mail::{MailQuery, MailSource};
use crate::model::{AudioSegment, Episode, FilterDecision, NormalizedItem, ScriptUtterance};
use crate::normalize::Normalizer;
use crate::render::{silence_segment, SegmentRenderer};
use crate::retry::RetryPolicy;
use crate::script::{parse_script, ScriptSynthesizer};

use super::report::RunReport;

// ── Cancellation ────────────────────────────────────────────────────

/// Cooperative cancellation handle. Cancelling stops new external calls;
/// in-flight work drains, and the run finishes with a report but no
/// episode.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ── Orchestrator ────────────────────────────────────────────────────

pub struct Orchestrator {
    config: PipelineConfig,
    mail: Arc<dyn MailSource>,
    llm: Arc<dyn TextGenerator>,
    tts: Arc<dyn VoiceSynthesizer>,
    cache: Arc<dyn RunCache>,
    cancel: CancelToken,
}

/// Per-utterance render outcome, folded into the report after the
/// concurrent phase completes.
enum RenderOutcome {
    Rendered { segment: AudioSegment, cached: bool },
    Substituted { segment: AudioSegment, reason: String },
    Failed { index: usize, reason: String },
    Skipped,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        mail: Arc<dyn MailSource>,
        llm: Arc<dyn TextGenerator>,
        tts: Arc<dyn VoiceSynthesizer>,
        cache: Arc<dyn RunCache>,
    ) -> Self {
        Self {
            config,
            mail,
            llm,
            tts,
            cache,
            cancel: CancelToken::new(),
        }
    }

    /// Handle for stopping the run from another task.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Execute the full pipeline for one run.
    ///
    /// Stage-level problems (a failed script, a strict-mode render
    /// failure) end the run with `Ok` and an episode-less report; `Err`
    /// is reserved for faults no rerun would fix without operator action,
    /// like an unwritable output directory or a broken cache file.
    pub async fn run(&self, query: &MailQuery) -> Result<RunReport> {
        let artifacts = ArtifactStore::open(&self.config.output_dir, &self.config.run_id)
            .map_err(Error::Artifact)?;
        let mut report = RunReport::begin(&self.config.run_id);
        let retry = RetryPolicy::new(&self.config.retry);
        info!(run_id = %self.config.run_id, "Run started");

        // Fetch
        let items = retry.run("mail.fetch", || self.mail.fetch(query)).await?;
        report.fetched = items.len();
        info!(items = items.len(), source = self.mail.name(), "Fetched items");
        if items.is_empty() {
            report.record_failure(
                Stage::Script,
                self.config.run_id.clone(),
                "no items fetched".to_string(),
            );
            return self.finish(&artifacts, report);
        }

        // Normalize. Sequential and local: parsing is cheap, and a
        // malformed item is excluded without disturbing the rest.
        let normalizer = Normalizer::new();
        let mut normalized: Vec<NormalizedItem> = Vec::new();
        for item in &items {
            let key = Normalizer::cache_key(&item.id);
            if let Some(cached) = self.load_cached_normalized(&artifacts, &item.id, &key) {
                report.normalize.cache_hit();
                normalized.push(cached);
                continue;
            }
            match normalizer.normalize(item) {
                Ok(n) => {
                    let path = artifacts.write_normalized(&n).map_err(Error::Artifact)?;
                    self.cache.record(
                        Stage::Normalize,
                        &key,
                        CacheStatus::Done,
                        Some(path.to_string_lossy().into_owned()),
                    )?;
                    report.normalize.success();
                    normalized.push(n);
                }
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "Item excluded: normalization failed");
                    self.cache
                        .record(Stage::Normalize, &key, CacheStatus::Failed, None)?;
                    report.normalize.failure();
                    report.record_failure(Stage::Normalize, item.id.clone(), e.to_string());
                }
            }
        }

        // Filter. Concurrent, order-preserving, never fatal.
        let filter = FilterStage::new(
            self.llm.clone(),
            self.config.filter_mode.clone(),
            self.config.filter_fallback,
            retry.clone(),
        );
        let outcomes: Vec<std::result::Result<Option<(FilterDecision, bool)>, CacheError>> =
            stream::iter(normalized.iter())
                .map(|item| {
                    let filter = &filter;
                    async move {
                        let key = filter.cache_key(&item.item_id);
                        if let Some(entry) = self.cache.get(Stage::Filter, &key) {
                            if entry.status == CacheStatus::Done {
                                if let Some(decision) = entry
                                    .output_ref
                                    .as_deref()
                                    .and_then(|raw| serde_json::from_str(raw).ok())
                                {
                                    return Ok(Some((decision, true)));
                                }
                            }
                        }
                        if self.cancel.is_cancelled() {
                            return Ok(None);
                        }
                        let decision = filter.decide(item).await;
                        let raw = serde_json::to_string(&decision)
                            .map_err(|e| CacheError::Persist(e.to_string()))?;
                        self.cache
                            .record(Stage::Filter, &key, CacheStatus::Done, Some(raw))?;
                        Ok(Some((decision, false)))
                    }
                })
                .buffered(self.config.concurrency.max(1))
                .collect()
                .await;

        let mut decisions: Vec<FilterDecision> = Vec::new();
        for outcome in outcomes {
            match outcome? {
                Some((decision, cached)) => {
                    if cached {
                        report.filter.cache_hit();
                    } else {
                        report.filter.success();
                    }
                    decisions.push(decision);
                }
                None => {}
            }
        }
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return self.finish(&artifacts, report);
        }
        log_filter_summary(&decisions);

        let kept: Vec<NormalizedItem> = normalized
            .iter()
            .zip(&decisions)
            .filter(|(_, d)| d.relevant)
            .map(|(n, _)| n.clone())
            .collect();
        report.kept = kept.len();
        if kept.is_empty() {
            report.record_failure(
                Stage::Script,
                self.config.run_id.clone(),
                "no relevant items after filtering".to_string(),
            );
            return self.finish(&artifacts, report);
        }

        // Script. One atomic unit per run.
        let utterances = match self.script_stage(&artifacts, &kept, &mut report).await? {
            Some(u) => u,
            None => return self.finish(&artifacts, report),
        };
        report.utterances = utterances.len();

        // Render. Concurrent and unordered; order is restored by sorting
        // on utterance index afterwards.
        let renderer = SegmentRenderer::new(self.tts.clone(), retry.clone());
        let abort = AtomicBool::new(false);
        let outcomes: Vec<std::result::Result<RenderOutcome, CacheError>> =
            stream::iter(utterances.iter())
                .map(|utterance| {
                    let renderer = &renderer;
                    let artifacts = &artifacts;
                    let abort = &abort;
                    async move {
                        self.render_one(renderer, artifacts, abort, utterance).await
                    }
                })
                .buffer_unordered(self.config.concurrency.max(1))
                .collect()
                .await;

        let mut segments: Vec<AudioSegment> = Vec::new();
        let mut render_failed = false;
        for outcome in outcomes {
            match outcome? {
                RenderOutcome::Rendered { segment, cached } => {
                    if cached {
                        report.render.cache_hit();
                    } else {
                        report.render.success();
                    }
                    segments.push(segment);
                }
                RenderOutcome::Substituted { segment, reason } => {
                    report.render.failure();
                    report.substituted += 1;
                    report.record_failure(Stage::Render, segment.utterance_index.to_string(), reason);
                    segments.push(segment);
                }
                RenderOutcome::Failed { index, reason } => {
                    report.render.failure();
                    report.record_failure(Stage::Render, index.to_string(), reason);
                    render_failed = true;
                }
                RenderOutcome::Skipped => {}
            }
        }
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return self.finish(&artifacts, report);
        }
        if render_failed || segments.len() != utterances.len() {
            warn!(
                rendered = segments.len(),
                expected = utterances.len(),
                "Rendering incomplete, no episode"
            );
            return self.finish(&artifacts, report);
        }
        segments.sort_by_key(|s| s.utterance_index);

        // Assemble.
        self.assemble_stage(&artifacts, &segments, &utterances, &mut report)?;
        self.finish(&artifacts, report)
    }

    // ── Stage helpers ───────────────────────────────────────────────

    fn load_cached_normalized(
        &self,
        artifacts: &ArtifactStore,
        item_id: &str,
        key: &str,
    ) -> Option<NormalizedItem> {
        let entry = self.cache.get(Stage::Normalize, key)?;
        if entry.status != CacheStatus::Done {
            return None;
        }
        let path = entry.output_ref?;
        artifacts.load_normalized(item_id, Path::new(&path))
    }

    /// Returns `Ok(None)` when the script stage failed and the run should
    /// end with a report.
    async fn script_stage(
        &self,
        artifacts: &ArtifactStore,
        kept: &[NormalizedItem],
        report: &mut RunReport,
    ) -> Result<Option<Vec<ScriptUtterance>>> {
        let run_id = self.config.run_id.clone();
        if self.cache.has(Stage::Script, &run_id) {
            if let Some(text) = artifacts.load_script() {
                let utterances = parse_script(&text);
                if !utterances.is_empty() {
                    info!(utterances = utterances.len(), "Reusing cached script");
                    return Ok(Some(utterances));
                }
            }
            warn!("Cached script unreadable, regenerating");
        }
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(None);
        }

        let synthesizer =
            ScriptSynthesizer::new(self.llm.clone(), RetryPolicy::new(&self.config.retry));
        match synthesizer
            .synthesize(
                kept,
                self.config.target_minutes,
                &self.config.speaker_a,
                &self.config.speaker_b,
            )
            .await
        {
            Ok((text, utterances)) => {
                let path = artifacts.write_script(&text).map_err(Error::Artifact)?;
                self.cache.record(
                    Stage::Script,
                    &run_id,
                    CacheStatus::Done,
                    Some(path.to_string_lossy().into_owned()),
                )?;
                Ok(Some(utterances))
            }
            Err(e) => {
                warn!(error = %e, "Script synthesis failed, no episode");
                self.cache
                    .record(Stage::Script, &run_id, CacheStatus::Failed, None)?;
                report.record_failure(Stage::Script, run_id, e.to_string());
                Ok(None)
            }
        }
    }

    async fn render_one(
        &self,
        renderer: &SegmentRenderer,
        artifacts: &ArtifactStore,
        abort: &AtomicBool,
        utterance: &ScriptUtterance,
    ) -> std::result::Result<RenderOutcome, CacheError> {
        let key = format!("{}/{}", self.config.run_id, utterance.index);
        if let Some(entry) = self.cache.get(Stage::Render, &key) {
            if entry.status == CacheStatus::Done {
                if let Some(segment) = entry
                    .output_ref
                    .as_deref()
                    .and_then(|path| artifacts.load_segment(utterance.index, Path::new(path)))
                {
                    return Ok(RenderOutcome::Rendered {
                        segment,
                        cached: true,
                    });
                }
                warn!(utterance = utterance.index, "Cached segment unreadable, re-rendering");
            }
        }
        if self.cancel.is_cancelled() || abort.load(Ordering::SeqCst) {
            return Ok(RenderOutcome::Skipped);
        }

        let voice = &self.config.speaker(utterance.role).voice;
        let rendered = match renderer.render(utterance, voice).await {
            Ok(segment) => artifacts
                .write_segment(&segment, utterance.role)
                .map(|path| (segment, path))
                .map_err(crate::error::RenderError::Io),
            Err(e) => Err(e),
        };

        match rendered {
            Ok((segment, path)) => {
                self.cache.record(
                    Stage::Render,
                    &key,
                    CacheStatus::Done,
                    Some(path.to_string_lossy().into_owned()),
                )?;
                Ok(RenderOutcome::Rendered {
                    segment,
                    cached: false,
                })
            }
            Err(e) => {
                // Substituted silence is recorded Failed, never Done, so a
                // rerun retries the real synthesis.
                self.cache
                    .record(Stage::Render, &key, CacheStatus::Failed, None)?;
                match self.config.render_policy {
                    RenderPolicy::Strict => {
                        abort.store(true, Ordering::SeqCst);
                        warn!(utterance = utterance.index, error = %e, "Render failed, aborting run");
                        Ok(RenderOutcome::Failed {
                            index: utterance.index,
                            reason: e.to_string(),
                        })
                    }
                    RenderPolicy::BestEffort => {
                        warn!(utterance = utterance.index, error = %e, "Render failed, substituting silence");
                        Ok(RenderOutcome::Substituted {
                            segment: silence_segment(
                                utterance.index,
                                self.config.silence_duration,
                            ),
                            reason: e.to_string(),
                        })
                    }
                }
            }
        }
    }

    fn assemble_stage(
        &self,
        artifacts: &ArtifactStore,
        segments: &[AudioSegment],
        utterances: &[ScriptUtterance],
        report: &mut RunReport,
    ) -> Result<()> {
        let run_id = self.config.run_id.clone();
        if let Some(entry) = self.cache.get(Stage::Assemble, &run_id) {
            if entry.status == CacheStatus::Done {
                if let Some(episode) = entry
                    .output_ref
                    .as_deref()
                    .and_then(|raw| serde_json::from_str::<Episode>(raw).ok())
                    .filter(|e| e.audio_path.exists())
                {
                    info!("Reusing assembled episode");
                    report.episode = Some(episode);
                    return Ok(());
                }
                warn!("Cached episode unreadable, reassembling");
            }
        }

        let assembler = MediaAssembler::new(
            &self.config.speaker_a.name,
            &self.config.speaker_b.name,
            self.config.video_track,
        );
        match assembler.assemble(segments, utterances) {
            Ok(assembled) => {
                let audio_path = artifacts
                    .write_episode_audio(&assembled.wav_bytes)
                    .map_err(Error::Artifact)?;
                let video_path = assembled
                    .speaker_track
                    .as_deref()
                    .map(|vtt| artifacts.write_episode_video(vtt))
                    .transpose()
                    .map_err(Error::Artifact)?;
                let episode = Episode {
                    audio_path,
                    video_path,
                    script_path: artifacts.script_path(),
                    duration_secs: assembled.duration.as_secs_f64(),
                };
                // An episode with substituted silence is usable but not
                // final; leaving the entry Failed makes a rerun redo the
                // missing segments and reassemble.
                let status = if report.substituted == 0 {
                    CacheStatus::Done
                } else {
                    CacheStatus::Failed
                };
                let raw = serde_json::to_string(&episode)
                    .map_err(|e| CacheError::Persist(e.to_string()))
                    .map_err(Error::Cache)?;
                self.cache
                    .record(Stage::Assemble, &run_id, status, Some(raw))?;
                report.episode = Some(episode);
            }
            Err(e) => {
                warn!(error = %e, "Assembly failed, no episode");
                self.cache
                    .record(Stage::Assemble, &run_id, CacheStatus::Failed, None)?;
                report.record_failure(Stage::Assemble, run_id, e.to_string());
            }
        }
        Ok(())
    }

    /// Stamp the report, persist it, and hand it back.
    fn finish(&self, artifacts: &ArtifactStore, mut report: RunReport) -> Result<RunReport> {
        report.finished_at = Utc::now();
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| Error::Cache(CacheError::Persist(e.to_string())))?;
        std::fs::write(artifacts.report_path(), json).map_err(Error::Artifact)?;
        info!(
            run_id = %report.run_id,
            success = report.is_success(),
            failures = report.failures.len(),
            "Run finished"
        );
        Ok(report)
    }
}
