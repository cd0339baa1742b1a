//! Run cache — content-addressed record of completed stage work.
//!
//! Pure key-value semantics over `(stage, key)` pairs. The orchestrator
//! consults the cache before each stage attempt and records the outcome
//! after it; `Done` entries let a rerun skip the work entirely. Entries
//! never expire on their own — they live until the owning artifact is
//! deleted.
//!
//! Writes within a run are keyed by disjoint `(id, stage)` pairs, so a
//! plain mutex around the map suffices; no two workers contend on the
//! same key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Pipeline stages that record cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalize,
    Filter,
    Script,
    Render,
    Assemble,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normalize => "normalize",
            Self::Filter => "filter",
            Self::Script => "script",
            Self::Render => "render",
            Self::Assemble => "assemble",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one stage attempt for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Pending,
    Done,
    Failed,
}

/// One recorded stage outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status: CacheStatus,
    /// Reference to the produced artifact (file path or inline JSON),
    /// present for `Done` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Key-value store for stage outcomes.
///
/// Passed explicitly to the orchestrator rather than living as ambient
/// global state, so tests can swap in [`MemoryCache`].
pub trait RunCache: Send + Sync {
    fn get(&self, stage: Stage, key: &str) -> Option<CacheEntry>;

    fn record(
        &self,
        stage: Stage,
        key: &str,
        status: CacheStatus,
        output_ref: Option<String>,
    ) -> Result<(), CacheError>;

    /// True when a `Done` entry exists for this key.
    fn has(&self, stage: Stage, key: &str) -> bool {
        self.get(stage, key)
            .is_some_and(|e| e.status == CacheStatus::Done)
    }
}

fn full_key(stage: Stage, key: &str) -> String {
    format!("{}/{}", stage.as_str(), key)
}

// ── In-memory cache ─────────────────────────────────────────────────

/// Volatile cache for tests and single-shot runs.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunCache for MemoryCache {
    fn get(&self, stage: Stage, key: &str) -> Option<CacheEntry> {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .get(&full_key(stage, key))
            .cloned()
    }

    fn record(
        &self,
        stage: Stage,
        key: &str,
        status: CacheStatus,
        output_ref: Option<String>,
    ) -> Result<(), CacheError> {
        self.entries.lock().expect("cache mutex poisoned").insert(
            full_key(stage, key),
            CacheEntry {
                status,
                output_ref,
                recorded_at: Utc::now(),
            },
        );
        Ok(())
    }
}

// ── File-backed cache ───────────────────────────────────────────────

/// Cache persisted as one JSON file in the run directory.
///
/// Rewritten on every record; entry counts are small (items + segments)
/// so full rewrites are cheaper than being clever.
pub struct JsonFileCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl JsonFileCache {
    /// Open a cache file, loading existing entries if present.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw).map_err(|e| CacheError::Load(e.to_string()))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &HashMap<String, CacheEntry>) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| CacheError::Persist(e.to_string()))?;
        // Write-then-rename so a crash mid-write never truncates the cache.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl RunCache for JsonFileCache {
    fn get(&self, stage: Stage, key: &str) -> Option<CacheEntry> {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .get(&full_key(stage, key))
            .cloned()
    }

    fn record(
        &self,
        stage: Stage,
        key: &str,
        status: CacheStatus,
        output_ref: Option<String>,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(
            full_key(stage, key),
            CacheEntry {
                status,
                output_ref,
                recorded_at: Utc::now(),
            },
        );
        self.persist(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_cache_round_trip() {
        let cache = MemoryCache::new();
        assert!(cache.get(Stage::Normalize, "msg-1").is_none());
        assert!(!cache.has(Stage::Normalize, "msg-1"));

        cache
            .record(
                Stage::Normalize,
                "msg-1",
                CacheStatus::Done,
                Some("normalized/msg-1.md".into()),
            )
            .unwrap();

        assert!(cache.has(Stage::Normalize, "msg-1"));
        let entry = cache.get(Stage::Normalize, "msg-1").unwrap();
        assert_eq!(entry.output_ref.as_deref(), Some("normalized/msg-1.md"));
    }

    #[test]
    fn failed_entries_do_not_count_as_done() {
        let cache = MemoryCache::new();
        cache
            .record(Stage::Render, "run-1/2", CacheStatus::Failed, None)
            .unwrap();
        assert!(!cache.has(Stage::Render, "run-1/2"));
        assert!(cache.get(Stage::Render, "run-1/2").is_some());
    }

    #[test]
    fn stages_do_not_collide_on_the_same_key() {
        let cache = MemoryCache::new();
        cache
            .record(Stage::Normalize, "msg-1", CacheStatus::Done, None)
            .unwrap();
        assert!(!cache.has(Stage::Filter, "msg-1"));
    }

    #[test]
    fn file_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = JsonFileCache::open(&path).unwrap();
        cache
            .record(
                Stage::Script,
                "run-1",
                CacheStatus::Done,
                Some("script.txt".into()),
            )
            .unwrap();
        drop(cache);

        let reopened = JsonFileCache::open(&path).unwrap();
        assert!(reopened.has(Stage::Script, "run-1"));
        assert_eq!(
            reopened.get(Stage::Script, "run-1").unwrap().output_ref,
            Some("script.txt".into())
        );
    }

    #[test]
    fn file_cache_open_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonFileCache::open(&dir.path().join("absent.json")).unwrap();
        assert!(cache.get(Stage::Assemble, "run-1").is_none());
    }
}
