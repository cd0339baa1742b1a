//! On-disk layout of a run.
//!
//! Everything a run produces lives under `<output_dir>/<run_id>/`:
//!
//! ```text
//! normalized/<item_id>.md      one markdown file per normalized item
//! script.txt                   canonical script text
//! segments/segment_<i>_<r>.wav one WAV per utterance
//! episode.wav                  assembled audio
//! episode.vtt                  speaker track (when enabled)
//! report.json                  run report
//! cache.json                   stage cache
//! ```
//!
//! Cache entries store paths from this layout as their output refs, so a
//! rerun can reload any finished stage's artifact instead of redoing it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::{AudioSegment, NormalizedItem, SpeakerRole};
use crate::render::wav_duration;

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) the artifact directory for a run.
    pub fn open(output_dir: &Path, run_id: &str) -> io::Result<Self> {
        let root = output_dir.join(run_id);
        fs::create_dir_all(root.join("normalized"))?;
        fs::create_dir_all(root.join("segments"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_path(&self) -> PathBuf {
        self.root.join("cache.json")
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join("report.json")
    }

    // ── Normalized items ────────────────────────────────────────────

    pub fn normalized_path(&self, item_id: &str) -> PathBuf {
        self.root
            .join("normalized")
            .join(format!("{}.md", sanitize(item_id)))
    }

    pub fn write_normalized(&self, item: &NormalizedItem) -> io::Result<PathBuf> {
        let path = self.normalized_path(&item.item_id);
        fs::write(&path, item.to_markdown())?;
        Ok(path)
    }

    /// Reload a normalized item from an earlier run's artifact.
    /// Returns `None` when the file is missing or no longer parses, in
    /// which case the caller renormalizes.
    pub fn load_normalized(&self, item_id: &str, path: &Path) -> Option<NormalizedItem> {
        let markdown = fs::read_to_string(path).ok()?;
        let item = NormalizedItem::from_markdown(item_id, &markdown);
        if item.is_none() {
            warn!(item_id, path = %path.display(), "Cached normalization artifact unreadable");
        }
        item
    }

    // ── Script ──────────────────────────────────────────────────────

    pub fn script_path(&self) -> PathBuf {
        self.root.join("script.txt")
    }

    pub fn write_script(&self, text: &str) -> io::Result<PathBuf> {
        let path = self.script_path();
        fs::write(&path, text)?;
        Ok(path)
    }

    pub fn load_script(&self) -> Option<String> {
        fs::read_to_string(self.script_path()).ok()
    }

    // ── Segments ────────────────────────────────────────────────────

    pub fn segment_path(&self, index: usize, role: SpeakerRole) -> PathBuf {
        self.root
            .join("segments")
            .join(format!("segment_{index}_{}.wav", role.label()))
    }

    pub fn write_segment(&self, segment: &AudioSegment, role: SpeakerRole) -> io::Result<PathBuf> {
        let path = self.segment_path(segment.utterance_index, role);
        fs::write(&path, &segment.wav_bytes)?;
        Ok(path)
    }

    /// Reload a rendered segment from an earlier run. Substituted silence
    /// is never recorded as done, so anything reloadable here is real audio.
    pub fn load_segment(&self, index: usize, path: &Path) -> Option<AudioSegment> {
        let wav_bytes = fs::read(path).ok()?;
        let duration = wav_duration(&wav_bytes)?;
        Some(AudioSegment {
            utterance_index: index,
            wav_bytes,
            duration,
            substituted: false,
        })
    }

    // ── Episode ─────────────────────────────────────────────────────

    pub fn episode_audio_path(&self) -> PathBuf {
        self.root.join("episode.wav")
    }

    pub fn episode_video_path(&self) -> PathBuf {
        self.root.join("episode.vtt")
    }

    pub fn write_episode_audio(&self, wav_bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.episode_audio_path();
        fs::write(&path, wav_bytes)?;
        Ok(path)
    }

    pub fn write_episode_video(&self, vtt: &str) -> io::Result<PathBuf> {
        let path = self.episode_video_path();
        fs::write(&path, vtt)?;
        Ok(path)
    }
}

/// Make an item id safe to use as a file stem.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use std::time::Duration;

    use crate::render::pcm_to_wav;

    use super::*;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path(), "run-1").unwrap();
        (dir, store)
    }

    #[test]
    fn normalized_round_trip() {
        let (_dir, store) = store();
        let item = NormalizedItem {
            item_id: "msg<1>".into(),
            title: "Subject".into(),
            source: "a@b.c".into(),
            body_text: "Body.".into(),
            timestamp: Utc::now(),
        };
        let path = store.write_normalized(&item).unwrap();
        assert!(path.to_string_lossy().ends_with("msg-1-.md"));
        let loaded = store.load_normalized("msg<1>", &path).unwrap();
        assert_eq!(loaded.body_text, "Body.");
    }

    #[test]
    fn segment_round_trip_measures_duration() {
        let (_dir, store) = store();
        let pcm = vec![0u8; 24_000 * 2];
        let segment = AudioSegment {
            utterance_index: 4,
            wav_bytes: pcm_to_wav(&pcm, 24_000).unwrap(),
            duration: Duration::from_secs(1),
            substituted: false,
        };
        let path = store.write_segment(&segment, SpeakerRole::B).unwrap();
        assert!(path.to_string_lossy().ends_with("segment_4_b.wav"));
        let loaded = store.load_segment(4, &path).unwrap();
        assert_eq!(loaded.duration, Duration::from_secs(1));
        assert!(!loaded.substituted);
    }

    #[test]
    fn missing_artifact_loads_as_none() {
        let (_dir, store) = store();
        assert!(store.load_script().is_none());
        assert!(store
            .load_segment(0, &store.segment_path(0, SpeakerRole::A))
            .is_none());
    }
}
