//! Streaming Engine (C2): native-partials recognizer, backed by Vosk.
//!
//! Grounded on `engine_vosk.py`'s `VoskProcessor` — the four-state machine
//! (`waiting`/`partial`/`final`/`closing`), duplicate-partial suppression,
//! and the continuous-vs-non-continuous final-result accumulation rule
//! (`append_to_result`: text joined by `", "`, confidence reduced by `min`).

use std::sync::Arc;

use async_trait::async_trait;
use vosk::{DecodingState, Model, Recognizer};

use super::model_cache::{LoadedModel, ModelCache, ModelLease};
use super::{Alternative, Engine, EngineOptions, TranscriptResult, TranscriptSink};
use crate::error::{Result, ServerError};

struct VoskModel {
    path: String,
    model: Model,
}

impl LoadedModel for VoskModel {
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
    Partial,
    Final,
    Closing,
}

pub struct VoskEngine {
    options: EngineOptions,
    sink: Arc<dyn TranscriptSink>,
    recognizer: Recognizer,
    // Keeps the underlying Vosk model alive (and the cache slot leased) for
    // as long as `recognizer` needs it; never read after construction.
    _lease: ModelLease,
    state: State,
    last_partial: String,
    accumulated: Option<TranscriptResult>,
}

impl VoskEngine {
    pub fn new(
        options: EngineOptions,
        model_cache: ModelCache,
        sink: Arc<dyn TranscriptSink>,
    ) -> Result<Self> {
        let path = options.model_path.clone();
        let lease = model_cache.get_or_create(&path, || {
            let model = Model::new(&path).ok_or_else(|| {
                ServerError::ChunkProcessorError(format!("failed to load vosk model at {path}"))
            })?;
            Ok(Arc::new(VoskModel {
                path: path.clone(),
                model,
            }) as Arc<dyn LoadedModel>)
        })?;

        let mut recognizer = {
            let vosk_model = lease
                .model()
                .as_any()
                .downcast_ref::<VoskModel>()
                .ok_or_else(|| {
                    ServerError::ChunkProcessorError(
                        "model cache returned wrong model type".into(),
                    )
                })?;
            Recognizer::new(&vosk_model.model, options.samplerate as f32).ok_or_else(|| {
                ServerError::ChunkProcessorError("failed to build vosk recognizer".into())
            })?
        };

        recognizer.set_max_alternatives(options.alternatives);
        if options.words {
            recognizer.set_words(true);
        }

        Ok(Self {
            options,
            sink,
            recognizer,
            _lease: lease,
            state: State::Waiting,
            last_partial: String::new(),
            accumulated: None,
        })
    }

    async fn handle_partial(&mut self, text: String) {
        if text.is_empty() || text == self.last_partial {
            return;
        }
        self.last_partial = text.clone();
        self.sink
            .send_transcript(TranscriptResult {
                text,
                confidence: -1.0,
                is_final: false,
                alternatives: Vec::new(),
                features: Default::default(),
                duration: None,
            })
            .await;
    }

    /// Pulls text, confidence, and (when `options.alternatives > 1`) the
    /// runner-up alternatives out of a Vosk `CompleteResult`. Vosk switches
    /// the result shape based on `set_max_alternatives`: with it at 0 or 1
    /// the recognizer only ever returns the `Single` variant, so `.single()`
    /// is tried first regardless of the requested count.
    fn extract_complete(&self, complete: vosk::CompleteResult) -> (String, f32, Vec<Alternative>) {
        if let Some(single) = complete.single() {
            return (single.text.to_string(), -1.0, Vec::new());
        }

        if let Some(multiple) = complete.multiple() {
            let mut alts: Vec<Alternative> = multiple
                .alternatives
                .iter()
                .map(|alt| Alternative {
                    text: alt.text.to_string(),
                    confidence: alt.confidence,
                    words: None,
                })
                .collect();

            if alts.is_empty() {
                return (String::new(), -1.0, Vec::new());
            }

            let best = alts.remove(0);
            return (best.text, best.confidence, alts);
        }

        (String::new(), -1.0, Vec::new())
    }

    async fn handle_final(
        &mut self,
        text: String,
        confidence: f32,
        alternatives: Vec<Alternative>,
        skip_send: bool,
    ) {
        if text.is_empty() {
            return;
        }
        let result = TranscriptResult {
            text,
            confidence,
            is_final: true,
            alternatives,
            features: Default::default(),
            duration: None,
        };

        if self.options.continuous {
            self.accumulated = Some(result.clone());
            if !skip_send {
                self.sink.send_transcript(result).await;
            }
        } else {
            self.accumulated = Some(match self.accumulated.take() {
                Some(mut given) => {
                    given.text = format!("{}, {}", given.text, result.text);
                    given.confidence = given.confidence.min(result.confidence);
                    given
                }
                None => result,
            });
        }
    }
}

#[async_trait]
impl Engine for VoskEngine {
    async fn process(&mut self, chunk: &[u8]) -> Result<()> {
        if self.state == State::Closing {
            return Ok(());
        }

        // Wire audio is little-endian i16 PCM (§6); the vosk recognizer
        // wants samples, not raw bytes.
        let samples: Vec<i16> = chunk
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();

        match self.recognizer.accept_waveform(&samples) {
            DecodingState::Finalized => {
                self.state = State::Final;
                let (text, confidence, alternatives) =
                    self.extract_complete(self.recognizer.result());
                self.handle_final(text, confidence, alternatives, false).await;
            }
            DecodingState::Failed => {
                self.state = State::Closing;
                return Err(ServerError::AsrEngineError(
                    "vosk recognizer failed to decode waveform".to_string(),
                ));
            }
            DecodingState::Running => {
                self.state = State::Partial;
                let partial = self.recognizer.partial_result().partial.to_string();
                self.handle_partial(partial).await;
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        let last_was_final = self.state == State::Final;
        self.state = State::Closing;

        if last_was_final && !self.options.continuous {
            if let Some(result) = self.accumulated.take() {
                self.sink.send_transcript(result).await;
            }
        } else if last_was_final {
            // continuous mode already emitted this final as it arrived
        } else {
            let (text, confidence, alternatives) =
                self.extract_complete(self.recognizer.final_result());
            self.handle_final(text, confidence, alternatives, true).await;
            if let Some(result) = self.accumulated.take() {
                self.sink.send_transcript(result).await;
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state = State::Closing;
        Ok(())
    }

    fn options(&self) -> &EngineOptions {
        &self.options
    }
}
