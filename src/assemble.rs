//! Media assembler — rendered segments in, one episode out.
//!
//! Concatenates per-utterance WAVs into a single track with short
//! inter-segment pauses, and optionally emits a WebVTT speaker track
//! aligned to the audio timeline. Pause lengths are a pure function of
//! the segment index so a rerun over the same segments is byte-identical.

use std::io::Cursor;
use std::time::Duration;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::{debug, info};

use crate::error::AssemblyError;
use crate::model::{AudioSegment, ScriptUtterance, SpeakerRole};
use crate::render::{duration_of, OUTPUT_SAMPLE_RATE};

/// Everything assembly produces; the artifact layer decides where it lands.
#[derive(Debug)]
pub struct AssembledEpisode {
    pub wav_bytes: Vec<u8>,
    pub duration: Duration,
    /// WebVTT speaker track, present when the video track is enabled.
    pub speaker_track: Option<String>,
}

pub struct MediaAssembler {
    speaker_a_name: String,
    speaker_b_name: String,
    video_track: bool,
}

impl MediaAssembler {
    pub fn new(speaker_a_name: &str, speaker_b_name: &str, video_track: bool) -> Self {
        Self {
            speaker_a_name: speaker_a_name.to_string(),
            speaker_b_name: speaker_b_name.to_string(),
            video_track,
        }
    }

    /// Concatenate segments in index order into one episode.
    ///
    /// `segments` must be sorted by `utterance_index` and dense from 0;
    /// `utterances` supplies the speaker attribution for the track and
    /// must cover every segment index.
    pub fn assemble(
        &self,
        segments: &[AudioSegment],
        utterances: &[ScriptUtterance],
    ) -> Result<AssembledEpisode, AssemblyError> {
        for (expected, segment) in segments.iter().enumerate() {
            if segment.utterance_index != expected {
                return Err(AssemblyError::NonContiguous {
                    expected,
                    found: segment.utterance_index,
                });
            }
        }

        let mut samples: Vec<i16> = Vec::new();
        let mut cues: Vec<(Duration, Duration, SpeakerRole)> = Vec::new();
        for segment in segments {
            let (segment_samples, rate) = wav_samples(&segment.wav_bytes)?;
            if rate != OUTPUT_SAMPLE_RATE {
                return Err(AssemblyError::SampleRateMismatch {
                    utterance_index: segment.utterance_index,
                    expected: OUTPUT_SAMPLE_RATE,
                    found: rate,
                });
            }
            let start = duration_of(samples.len(), OUTPUT_SAMPLE_RATE);
            samples.extend_from_slice(&segment_samples);
            let end = duration_of(samples.len(), OUTPUT_SAMPLE_RATE);
            if let Some(u) = utterances
                .iter()
                .find(|u| u.index == segment.utterance_index)
            {
                cues.push((start, end, u.role));
            }
            // No trailing pause after the last segment.
            if segment.utterance_index + 1 < segments.len() {
                let pause = pause_samples(segment.utterance_index);
                samples.resize(samples.len() + pause, 0);
            }
        }

        if samples.is_empty() {
            return Err(AssemblyError::ZeroDuration);
        }
        let duration = duration_of(samples.len(), OUTPUT_SAMPLE_RATE);
        let wav_bytes = encode_wav(&samples)?;
        let speaker_track = self.video_track.then(|| self.render_vtt(&cues));
        info!(
            segments = segments.len(),
            duration_secs = duration.as_secs_f64(),
            "Episode assembled"
        );
        Ok(AssembledEpisode {
            wav_bytes,
            duration,
            speaker_track,
        })
    }

    fn render_vtt(&self, cues: &[(Duration, Duration, SpeakerRole)]) -> String {
        let mut out = String::from("WEBVTT\n\n");
        for (start, end, role) in cues {
            let name = match role {
                SpeakerRole::A => &self.speaker_a_name,
                SpeakerRole::B => &self.speaker_b_name,
            };
            out.push_str(&format!(
                "{} --> {}\n{}\n\n",
                vtt_timestamp(*start),
                vtt_timestamp(*end),
                name
            ));
        }
        out
    }
}

/// Inter-segment pause length in samples, deterministic per index.
/// Cycles through 80–150 ms so the cadence varies but reruns match.
fn pause_samples(index: usize) -> usize {
    let millis = 80 + 10 * ((index * 7) % 8);
    millis * OUTPUT_SAMPLE_RATE as usize / 1000
}

fn vtt_timestamp(t: Duration) -> String {
    let total_millis = t.as_millis();
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis / 60_000) % 60;
    let seconds = (total_millis / 1_000) % 60;
    let millis = total_millis % 1_000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

/// Decode a segment WAV into its samples and sample rate.
fn wav_samples(wav_bytes: &[u8]) -> Result<(Vec<i16>, u32), AssemblyError> {
    let reader = WavReader::new(Cursor::new(wav_bytes))
        .map_err(|e| AssemblyError::Encode(format!("segment decode: {e}")))?;
    let rate = reader.spec().sample_rate;
    let samples = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AssemblyError::Encode(format!("segment decode: {e}")))?;
    debug!(samples = samples.len(), rate, "Decoded segment");
    Ok((samples, rate))
}

fn encode_wav(samples: &[i16]) -> Result<Vec<u8>, AssemblyError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: OUTPUT_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    let mut writer =
        WavWriter::new(&mut cursor, spec).map_err(|e| AssemblyError::Encode(e.to_string()))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| AssemblyError::Encode(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| AssemblyError::Encode(e.to_string()))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use crate::render::pcm_to_wav;

    use super::*;

    fn segment(index: usize, seconds: u64) -> AudioSegment {
        let sample_count = seconds as usize * OUTPUT_SAMPLE_RATE as usize;
        let pcm = vec![0u8; sample_count * 2];
        AudioSegment {
            utterance_index: index,
            wav_bytes: pcm_to_wav(&pcm, OUTPUT_SAMPLE_RATE).unwrap(),
            duration: Duration::from_secs(seconds),
            substituted: false,
        }
    }

    fn utterance(index: usize, role: SpeakerRole) -> ScriptUtterance {
        ScriptUtterance {
            index,
            role,
            text: format!("line {index}"),
        }
    }

    fn assembler(video: bool) -> MediaAssembler {
        MediaAssembler::new("Sarah", "Michael", video)
    }

    #[test]
    fn concatenation_is_ordered_and_paused() {
        let segments = vec![segment(0, 1), segment(1, 2), segment(2, 1)];
        let utterances = vec![
            utterance(0, SpeakerRole::A),
            utterance(1, SpeakerRole::B),
            utterance(2, SpeakerRole::A),
        ];
        let episode = assembler(false).assemble(&segments, &utterances).unwrap();
        // 4 s of speech plus an 80 ms and a 150 ms pause, no trailing pause.
        assert_eq!(episode.duration.as_millis(), 4_230);
        assert!(episode.speaker_track.is_none());
    }

    #[test]
    fn assembly_is_deterministic() {
        let segments = vec![segment(0, 1), segment(1, 1)];
        let utterances = vec![utterance(0, SpeakerRole::A), utterance(1, SpeakerRole::B)];
        let a = assembler(true).assemble(&segments, &utterances).unwrap();
        let b = assembler(true).assemble(&segments, &utterances).unwrap();
        assert_eq!(a.wav_bytes, b.wav_bytes);
        assert_eq!(a.speaker_track, b.speaker_track);
    }

    #[test]
    fn gap_in_indices_is_rejected() {
        let segments = vec![segment(0, 1), segment(2, 1)];
        let err = assembler(false).assemble(&segments, &[]).unwrap_err();
        assert!(matches!(
            err,
            AssemblyError::NonContiguous {
                expected: 1,
                found: 2
            }
        ));
    }

    #[test]
    fn empty_input_is_zero_duration() {
        let err = assembler(false).assemble(&[], &[]).unwrap_err();
        assert!(matches!(err, AssemblyError::ZeroDuration));
    }

    #[test]
    fn mismatched_sample_rate_is_rejected() {
        let pcm = vec![0u8; 960];
        let odd = AudioSegment {
            utterance_index: 0,
            wav_bytes: pcm_to_wav(&pcm, 16_000).unwrap(),
            duration: Duration::from_millis(30),
            substituted: false,
        };
        let err = assembler(false).assemble(&[odd], &[]).unwrap_err();
        assert!(matches!(
            err,
            AssemblyError::SampleRateMismatch {
                utterance_index: 0,
                expected: OUTPUT_SAMPLE_RATE,
                found: 16_000
            }
        ));
    }

    #[test]
    fn speaker_track_names_both_hosts() {
        let segments = vec![segment(0, 1), segment(1, 1)];
        let utterances = vec![utterance(0, SpeakerRole::A), utterance(1, SpeakerRole::B)];
        let episode = assembler(true).assemble(&segments, &utterances).unwrap();
        let vtt = episode.speaker_track.unwrap();
        assert!(vtt.starts_with("WEBVTT\n"));
        assert!(vtt.contains("00:00:00.000 --> 00:00:01.000\nSarah\n"));
        assert!(vtt.contains("Michael\n"));
    }
}
