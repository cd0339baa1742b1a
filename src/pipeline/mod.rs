//! Pipeline orchestration.
//!
//! Every run flows through the same stage sequence:
//! 1. `MailSource::fetch` — source-specific I/O
//! 2. `Normalizer` — raw payloads to canonical markdown
//! 3. `FilterStage` — relevance classification (never fatal)
//! 4. `ScriptSynthesizer` — one two-speaker script per run
//! 5. `SegmentRenderer` — per-utterance voice synthesis
//! 6. `MediaAssembler` — one episode, one report
//!
//! The [`Orchestrator`] alone reads and writes the run cache; reruns with
//! the same run id skip everything already recorded as done.

pub mod orchestrator;
pub mod report;

pub use orchestrator::{CancelToken, Orchestrator};
pub use report::{FailureRecord, RunReport, StageCounts};
