//! VAD-Driven Engine (C3): buffered, back-pressured whole-utterance
//! inference, backed by `whisper-rs`.
//!
//! Grounded on `engine_whisper.py`'s `WhisperProcessor` — the growing
//! float32 buffer, the dynamic three-step silence threshold for continuous
//! mode (`[1750, 1000, 500]` ms at `[0, 10, 20]` s), the segment-decision
//! tree in `_process_with_vad`, and the overload policy in `_process_result`
//! (`queue_size >= 3` in continuous mode fails the session).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::model_cache::{LoadedModel, ModelCache, ModelLease};
use super::{Engine, EngineOptions, TranscriptResult, TranscriptSink};
use crate::error::{Result, ServerError};
use crate::vad::Vad;

const MIN_BUFFER_SECONDS: f32 = 2.0;
const MAX_SEGMENT_SECONDS: f32 = 30.0;
const BUFFER_REDUCTION_THRESHOLD_SECONDS: f32 = 4.0;
const BUFFER_REDUCTION_KEEP_SECONDS: f32 = 2.0;
const TRAILING_SILENCE_SPLIT_MS: u32 = 1000;
const MIN_INFERENCE_SECONDS: f32 = 0.5;
const NO_SPEECH_THRESHOLD: f32 = 0.7;
const MAX_QUEUE_SIZE_CONTINUOUS: usize = 3;

const DYNAMIC_SILENCE_MS: [u32; 3] = [1750, 1000, 500];
const DYNAMIC_SILENCE_AT_SECONDS: [f32; 3] = [0.0, 10.0, 20.0];
const FIXED_SILENCE_MS: u32 = 1750;

struct WhisperModel {
    path: String,
    context: WhisperContext,
}

impl LoadedModel for WhisperModel {
    fn path(&self) -> &str {
        &self.path
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Waiting,
    HaveFinal,
    Closing,
}

struct SharedBuffer {
    samples: Vec<f32>,
    is_processing: bool,
}

pub struct WhisperEngine {
    options: EngineOptions,
    sink: Arc<dyn TranscriptSink>,
    // `None` once the model lease has been released (after `finish()` or
    // `close()`); §4.6 requires the lease to be given up as soon as the
    // engine is done with it rather than held for the rest of the session.
    lease: Option<Arc<ModelLease>>,
    vad: Vad,
    buffer: Arc<AsyncMutex<SharedBuffer>>,
    queue_size: Arc<AtomicUsize>,
    is_processing: Arc<AtomicBool>,
    // The most recently spawned detached inference task, if any is still
    // running. `close()` awaits it before releasing the model lease so the
    // cache never hands the model to another session while it's still busy.
    inflight: Option<tokio::task::JoinHandle<()>>,
    state: State,
}

impl WhisperEngine {
    pub fn new(
        options: EngineOptions,
        model_cache: ModelCache,
        sink: Arc<dyn TranscriptSink>,
    ) -> Result<Self> {
        let path = options.model_path.clone();
        let lease = model_cache.get_or_create(&path, || {
            let context = WhisperContext::new_with_params(&path, WhisperContextParameters::default())
                .map_err(|e| {
                    ServerError::ChunkProcessorError(format!(
                        "failed to load whisper model at {path}: {e}"
                    ))
                })?;
            Ok(Arc::new(WhisperModel {
                path: path.clone(),
                context,
            }) as Arc<dyn LoadedModel>)
        })?;

        let sample_rate = options.samplerate;
        Ok(Self {
            options,
            sink,
            lease: Some(Arc::new(lease)),
            vad: Vad::new(sample_rate),
            buffer: Arc::new(AsyncMutex::new(SharedBuffer {
                samples: Vec::new(),
                is_processing: false,
            })),
            queue_size: Arc::new(AtomicUsize::new(0)),
            is_processing: Arc::new(AtomicBool::new(false)),
            inflight: None,
            state: State::Waiting,
        })
    }

    fn silence_threshold_ms(&self, buffered_seconds: f32) -> u32 {
        if !self.options.continuous {
            return FIXED_SILENCE_MS;
        }
        let mut threshold = DYNAMIC_SILENCE_MS[0];
        for (i, &at) in DYNAMIC_SILENCE_AT_SECONDS.iter().enumerate() {
            if buffered_seconds >= at {
                threshold = DYNAMIC_SILENCE_MS[i];
            }
        }
        threshold
    }

    /// Decides whether (and what range of) the buffer should be split off
    /// for inference right now. Mirrors `_process_with_vad`'s decision tree.
    async fn maybe_split_and_process(&mut self) -> Result<()> {
        let sample_rate = self.options.samplerate as f32;

        let (should_process, start, end, force_empty_drop) = {
            let mut guard = self.buffer.lock().await;
            if guard.is_processing {
                return Ok(());
            }

            let duration_s = guard.samples.len() as f32 / sample_rate;
            if duration_s < MIN_BUFFER_SECONDS {
                return Ok(());
            }

            let threshold_ms = self.silence_threshold_ms(duration_s);
            let segments = self
                .vad
                .speech_segments(&guard.samples, threshold_ms)
                .map_err(|e| ServerError::AsrEngineError(e.to_string()))?;

            if duration_s > MAX_SEGMENT_SECONDS {
                tracing::warn!(duration_s, "buffer exceeded max segment duration, forcing split");
                (true, 0usize, guard.samples.len(), false)
            } else if segments.len() >= 2 {
                let first = segments.first().unwrap();
                let last = segments.last().unwrap();
                (true, first.start_sample, last.end_sample, false)
            } else if let Some(seg) = segments.first().filter(|_| segments.len() == 1) {
                let trailing = self.vad.trailing_silence_ms(&guard.samples, seg.end_sample);
                if trailing as u32 >= TRAILING_SILENCE_SPLIT_MS {
                    (true, seg.start_sample, seg.end_sample, false)
                } else {
                    (false, 0, 0, false)
                }
            } else if duration_s > BUFFER_REDUCTION_THRESHOLD_SECONDS {
                let keep_samples = (BUFFER_REDUCTION_KEEP_SECONDS * sample_rate) as usize;
                let drop_to = guard.samples.len().saturating_sub(keep_samples);
                guard.samples.drain(0..drop_to);
                (false, 0, 0, true)
            } else {
                (false, 0, 0, false)
            }
        };

        if force_empty_drop || !should_process {
            return Ok(());
        }

        self.split_and_process(start, end).await
    }

    /// Drains `[start, end)` off the buffer and dispatches inference onto
    /// the shared worker pool, detached from the caller (§4.6 step 5). Used
    /// from `process()`, where the session must keep accepting new chunks
    /// while inference for the previous segment is still running.
    async fn split_and_process(&mut self, start: usize, end: usize) -> Result<()> {
        let Some(chunk) = self.drain_for_inference(start, end).await else {
            return Ok(());
        };

        let lease = self.lease.clone().expect("engine used after lease release");
        let buffer = self.buffer.clone();
        let is_processing = self.is_processing.clone();
        let queue_size = self.queue_size.clone();
        let sink = self.sink.clone();
        let params = self.inference_params();

        let handle = tokio::spawn(async move {
            let result =
                tokio::task::spawn_blocking(move || transcribe_blocking(&lease, &chunk, params))
                    .await;

            is_processing.store(false, Ordering::SeqCst);
            buffer.lock().await.is_processing = false;
            queue_size.store(0, Ordering::SeqCst);

            emit_transcription(&*sink, result).await;
        });

        self.inflight = Some(handle);
        Ok(())
    }

    /// Runs inference on `[start, end)` inline, awaiting completion before
    /// returning — used by `finish()`, which must emit the last result (or
    /// propagate its failure) before the session closes (§4.6).
    async fn split_and_process_sync(&mut self, start: usize, end: usize) -> Result<()> {
        let Some(chunk) = self.drain_for_inference(start, end).await else {
            return Ok(());
        };

        let lease = self.lease.clone().expect("engine used after lease release");
        let params = self.inference_params();
        let result =
            tokio::task::spawn_blocking(move || transcribe_blocking(&lease, &chunk, params)).await;

        self.is_processing.store(false, Ordering::SeqCst);
        self.buffer.lock().await.is_processing = false;
        emit_transcription(&*self.sink, result).await;
        Ok(())
    }

    /// Shared setup for both inference paths: drains `[start, end)` off the
    /// buffer and marks processing in progress. Returns `None` if the
    /// segment is too short to be worth transcribing (§4.6's
    /// `MIN_INFERENCE_SECONDS` floor).
    async fn drain_for_inference(&mut self, start: usize, end: usize) -> Option<Vec<f32>> {
        let chunk: Vec<f32> = {
            let mut guard = self.buffer.lock().await;
            let chunk = guard.samples[start..end].to_vec();
            guard.samples.drain(0..end);
            guard.is_processing = true;
            chunk
        };

        self.state = State::HaveFinal;
        self.is_processing.store(true, Ordering::SeqCst);

        let sample_rate = self.options.samplerate;
        if (chunk.len() as f32 / sample_rate as f32) < MIN_INFERENCE_SECONDS {
            self.is_processing.store(false, Ordering::SeqCst);
            self.buffer.lock().await.is_processing = false;
            return None;
        }
        Some(chunk)
    }

    fn inference_params(&self) -> InferenceParams {
        InferenceParams {
            beam_size: self.options.beamsize.unwrap_or(5),
            language: self.options.language_short.clone(),
            prompt: self.options.prompt.clone(),
            translate: self.options.translate,
            want_words: self.options.words,
            samplerate: self.options.samplerate,
        }
    }

    /// Releases the model cache lease, if still held. Called from both
    /// `finish()` and `close()`; safe to call twice (the second call is a
    /// no-op since `self.lease` is already `None`).
    fn release_lease(&mut self) {
        self.lease = None;
    }
}

async fn emit_transcription(
    sink: &dyn TranscriptSink,
    result: std::result::Result<Result<TranscriptResult>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(transcript)) if !transcript.text.is_empty() => {
            sink.send_transcript(transcript).await;
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => sink.send_error(e).await,
        Err(join_err) => {
            sink.send_error(ServerError::AsrEngineError(join_err.to_string()))
                .await
        }
    }
}

struct InferenceParams {
    beam_size: u32,
    language: String,
    prompt: Option<String>,
    translate: bool,
    want_words: bool,
    samplerate: u32,
}

fn transcribe_blocking(
    lease: &ModelLease,
    samples: &[f32],
    params: InferenceParams,
) -> Result<TranscriptResult> {
    let model = lease
        .model()
        .as_any()
        .downcast_ref::<WhisperModel>()
        .ok_or_else(|| ServerError::AsrEngineError("wrong model type in cache".into()))?;

    let mut state = model
        .context
        .create_state()
        .map_err(|e| ServerError::AsrEngineError(format!("failed to create whisper state: {e}")))?;

    let mut full_params = FullParams::new(SamplingStrategy::BeamSearch {
        beam_size: params.beam_size as i32,
        patience: -1.0,
    });
    full_params.set_language(Some(&params.language));
    full_params.set_translate(params.translate);
    full_params.set_token_timestamps(params.want_words);
    if let Some(p) = &params.prompt {
        full_params.set_initial_prompt(p);
    }

    state
        .full(full_params, samples)
        .map_err(|e| ServerError::AsrEngineError(format!("whisper inference failed: {e}")))?;

    let num_segments = state
        .full_n_segments()
        .map_err(|e| ServerError::AsrEngineError(e.to_string()))?;

    let mut texts = Vec::new();
    let mut log_probs = Vec::new();
    let mut words: Vec<serde_json::Value> = Vec::new();
    for i in 0..num_segments {
        let no_speech_prob = state.full_get_segment_no_speech_prob(i).unwrap_or(0.0);
        if no_speech_prob >= NO_SPEECH_THRESHOLD {
            continue;
        }
        if let Ok(text) = state.full_get_segment_text(i) {
            texts.push(text);
        }

        let token_count = state.full_n_tokens(i).unwrap_or(0);
        let mut segment_log_probs = Vec::new();
        for t in 0..token_count {
            if let Ok(token_data) = state.full_get_token_data(i, t) {
                segment_log_probs.push(token_data.plog);
                if params.want_words {
                    if let Ok(token_text) = state.full_get_token_text(i, t) {
                        if !token_text.starts_with("[_") {
                            words.push(serde_json::json!({
                                "word": token_text.trim(),
                                "start": token_data.t0,
                                "end": token_data.t1,
                            }));
                        }
                    }
                }
            }
        }
        if !segment_log_probs.is_empty() {
            log_probs.push(
                segment_log_probs.iter().sum::<f32>() / segment_log_probs.len() as f32,
            );
        }
    }

    let confidence = if log_probs.is_empty() {
        -1.0
    } else {
        log_probs.iter().sum::<f32>() / log_probs.len() as f32
    };

    let mut features = std::collections::HashMap::new();
    if params.want_words && !words.is_empty() {
        features.insert("words".to_string(), serde_json::Value::Array(words));
    }

    Ok(TranscriptResult {
        text: texts.join(" ").trim().to_string(),
        confidence,
        is_final: true,
        alternatives: Vec::new(),
        features,
        duration: Some(samples.len() as f32 / params.samplerate as f32),
    })
}

#[async_trait]
impl Engine for WhisperEngine {
    async fn process(&mut self, chunk: &[u8]) -> Result<()> {
        if self.state == State::Closing {
            return Ok(());
        }

        let samples: Vec<f32> = chunk
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect();

        {
            let mut guard = self.buffer.lock().await;
            guard.samples.extend_from_slice(&samples);
            if guard.is_processing {
                let queued = self.queue_size.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(queued, "inference already running, queuing chunk");
                // Checked right here, at increment time, rather than at the
                // top of the next `process()` call: the detached inference
                // task in `split_and_process` resets `queue_size` to 0 on
                // completion, so a check at call-start could read a
                // post-reset 0 and let an overloaded session through.
                if self.options.continuous && queued >= MAX_QUEUE_SIZE_CONTINUOUS {
                    self.state = State::Closing;
                    return Err(ServerError::AsrEngineError(
                        "Inference is too slow for continuous mode".to_string(),
                    ));
                }
                return Ok(());
            }
        }

        self.maybe_split_and_process().await
    }

    async fn finish(&mut self) -> Result<()> {
        let sample_rate = self.options.samplerate as f32;
        let remaining = {
            let guard = self.buffer.lock().await;
            guard.samples.clone()
        };

        if remaining.len() as f32 / sample_rate >= MIN_INFERENCE_SECONDS {
            let has_speech = !self
                .vad
                .speech_segments(&remaining, FIXED_SILENCE_MS)
                .map_err(|e| ServerError::AsrEngineError(e.to_string()))?
                .is_empty();
            if has_speech {
                // Run the last inference inline and awaited, not detached,
                // so it has definitely completed before the lease is
                // released below (§4.6).
                self.split_and_process_sync(0, remaining.len()).await?;
            }
        }

        if let Some(handle) = self.inflight.take() {
            let _ = handle.await;
        }
        self.state = State::Closing;
        self.release_lease();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state = State::Closing;
        if let Some(handle) = self.inflight.take() {
            let _ = handle.await;
        }
        self.release_lease();
        Ok(())
    }

    fn options(&self) -> &EngineOptions {
        &self.options
    }
}
