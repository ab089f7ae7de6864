//! Voice activity detection: wraps `earshot`'s per-frame speech/silence
//! classifier and accumulates consecutive speech frames into timestamped
//! segments, matching the shape `engine_whisper.py`'s `get_speech_timestamps`
//! (faster-whisper/silero) returns.
//!
//! Grounded on the teacher's `vad/mod.rs` trait (`detect()` returning a
//! confidence result, `is_initialized`/`initialize`), generalized here with
//! a segment-accumulation layer since earshot only classifies one frame at
//! a time and the VAD-driven engine needs whole-utterance boundaries.

use earshot::{VoiceActivityDetector, VoiceActivityProfile};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VadError {
    #[error("invalid audio: {0}")]
    InvalidAudio(String),
}

/// One detected speech segment, in samples relative to the start of the
/// buffer the VAD was run over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechSegment {
    pub start_sample: usize,
    pub end_sample: usize,
}

impl SpeechSegment {
    pub fn duration_samples(&self) -> usize {
        self.end_sample.saturating_sub(self.start_sample)
    }
}

const FRAME_MS: usize = 30;

pub struct Vad {
    detector: VoiceActivityDetector,
    sample_rate: u32,
}

impl Vad {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            detector: VoiceActivityDetector::new(VoiceActivityProfile::VERY_AGGRESSIVE),
            sample_rate,
        }
    }

    fn frame_len(&self) -> usize {
        (self.sample_rate as usize * FRAME_MS) / 1000
    }

    /// Runs the frame-level detector over `samples` (mono f32, range
    /// [-1.0, 1.0]) and merges consecutive speech frames into segments,
    /// treating a run of `min_silence_ms` of non-speech as a segment break.
    pub fn speech_segments(
        &mut self,
        samples: &[f32],
        min_silence_ms: u32,
    ) -> Result<Vec<SpeechSegment>, VadError> {
        let frame_len = self.frame_len();
        if frame_len == 0 {
            return Err(VadError::InvalidAudio("zero-length VAD frame".to_string()));
        }

        let silence_frames_to_break =
            ((min_silence_ms as usize * 1000) / FRAME_MS / 1000).max(1);

        let mut segments = Vec::new();
        let mut current_start: Option<usize> = None;
        let mut silent_run = 0usize;
        let mut last_speech_end = 0usize;

        let mut offset = 0usize;
        while offset + frame_len <= samples.len() {
            let frame = &samples[offset..offset + frame_len];
            let pcm16: Vec<i16> = frame
                .iter()
                .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                .collect();

            let is_speech = self
                .detector
                .predict_16khz(&pcm16)
                .map_err(|e| VadError::InvalidAudio(format!("{e:?}")))?;

            if is_speech {
                if current_start.is_none() {
                    current_start = Some(offset);
                }
                last_speech_end = offset + frame_len;
                silent_run = 0;
            } else if current_start.is_some() {
                silent_run += 1;
                if silent_run >= silence_frames_to_break {
                    segments.push(SpeechSegment {
                        start_sample: current_start.take().unwrap(),
                        end_sample: last_speech_end,
                    });
                    silent_run = 0;
                }
            }

            offset += frame_len;
        }

        if let Some(start) = current_start {
            segments.push(SpeechSegment {
                start_sample: start,
                end_sample: last_speech_end,
            });
        }

        Ok(segments)
    }

    pub fn trailing_silence_ms(&self, samples: &[f32], segment_end: usize) -> u32 {
        let silence_samples = samples.len().saturating_sub(segment_end);
        ((silence_samples as f64 / self.sample_rate as f64) * 1000.0) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_only_buffer_yields_no_segments() {
        let mut vad = Vad::new(16000);
        let samples = vec![0.0f32; 16000];
        let segments = vad.speech_segments(&samples, 500).unwrap();
        assert!(segments.is_empty());
    }
}
