//! Segment renderer — one WAV per utterance via the voice-synthesis
//! capability.
//!
//! The synthesizer hands back raw 16-bit little-endian PCM; this module
//! wraps it as a standalone WAV file and measures the real duration from
//! the sample count.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::debug;

use crate::capability::VoiceSynthesizer;
use crate::error::RenderError;
use crate::model::{AudioSegment, ScriptUtterance};
use crate::retry::RetryPolicy;

/// Sample rate every segment is produced at. Assembly rejects anything else.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

pub struct SegmentRenderer {
    tts: Arc<dyn VoiceSynthesizer>,
    retry: RetryPolicy,
}

impl SegmentRenderer {
    pub fn new(tts: Arc<dyn VoiceSynthesizer>, retry: RetryPolicy) -> Self {
        Self { tts, retry }
    }

    /// Synthesize one utterance into a complete WAV segment.
    pub async fn render(
        &self,
        utterance: &ScriptUtterance,
        voice: &str,
    ) -> Result<AudioSegment, RenderError> {
        let index = utterance.index;
        let audio = self
            .retry
            .run("render.synthesize", || async {
                let audio = self.tts.synthesize(&utterance.text, voice).await?;
                if audio.pcm.is_empty() {
                    return Err(RenderError::EmptyAudio {
                        utterance_index: index,
                    });
                }
                Ok(audio)
            })
            .await?;

        let wav_bytes = pcm_to_wav(&audio.pcm, audio.sample_rate)?;
        let duration = duration_of(audio.sample_count(), audio.sample_rate);
        debug!(
            utterance = index,
            voice,
            duration_ms = duration.as_millis() as u64,
            "Segment rendered"
        );
        Ok(AudioSegment {
            utterance_index: index,
            wav_bytes,
            duration,
            substituted: false,
        })
    }
}

/// Silence placeholder for a failed render under the best-effort policy.
pub fn silence_segment(utterance_index: usize, duration: Duration) -> AudioSegment {
    let sample_count = (duration.as_secs_f64() * OUTPUT_SAMPLE_RATE as f64).round() as usize;
    let pcm = vec![0u8; sample_count * 2];
    let wav_bytes = pcm_to_wav(&pcm, OUTPUT_SAMPLE_RATE).expect("in-memory WAV write");
    AudioSegment {
        utterance_index,
        wav_bytes,
        duration: duration_of(sample_count, OUTPUT_SAMPLE_RATE),
        substituted: true,
    }
}

/// Wrap raw 16-bit LE mono PCM as a WAV file.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, RenderError> {
    if pcm.len() % 2 != 0 {
        return Err(RenderError::Decode(
            "PCM byte length is not a whole number of 16-bit samples".to_string(),
        ));
    }
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    let mut writer =
        WavWriter::new(&mut cursor, spec).map_err(|e| RenderError::Decode(e.to_string()))?;
    for pair in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        writer
            .write_sample(sample)
            .map_err(|e| RenderError::Decode(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| RenderError::Decode(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Duration of `sample_count` mono samples at `sample_rate`.
pub fn duration_of(sample_count: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(sample_count as f64 / sample_rate as f64)
}

/// Measured duration of a WAV file, if it parses.
pub fn wav_duration(wav_bytes: &[u8]) -> Option<Duration> {
    let reader = hound::WavReader::new(Cursor::new(wav_bytes)).ok()?;
    let spec = reader.spec();
    Some(duration_of(reader.len() as usize, spec.sample_rate))
}
