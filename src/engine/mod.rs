//! Engine Interface (C1): the uniform streaming contract every recognizer
//! plugs into, plus deterministic model selection.
//!
//! Grounded on `engine_interface.py`'s `EngineInterface.__init__` (option
//! normalization and the four-step model-selection algorithm) and the
//! teacher's `vad/mod.rs` trait shape (`async_trait`, small capability
//! surface with sensible defaults).

pub mod model_cache;
pub mod streaming;
pub mod vad_driven;
pub mod dev;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ModelEntry, ServerConfig};
use crate::error::{Result, ServerError};

/// Options requested by the client in `welcome.data`, before resolution
/// against the configured model table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestedOptions {
    #[serde(default)]
    pub samplerate: Option<u32>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub continuous: bool,
    #[serde(default, rename = "optimizeFinalResult")]
    pub optimize_final_result: bool,
    #[serde(default)]
    pub alternatives: Option<u32>,
    #[serde(default)]
    pub words: bool,
    #[serde(default)]
    pub speaker: bool,
    #[serde(default)]
    pub phrases: Vec<String>,
    #[serde(default)]
    pub beamsize: Option<u32>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub translate: bool,
}

/// The resolved, normalized options an engine actually runs with (§3 "Engine
/// Options (normalized)").
#[derive(Debug, Clone, Serialize)]
pub struct EngineOptions {
    pub samplerate: u32,
    pub language: String,
    pub language_short: String,
    pub model_name: Option<String>,
    pub model_path: String,
    pub model_properties: HashMap<String, Value>,
    pub task: Option<String>,
    pub continuous: bool,
    pub optimize_final_result: bool,
    pub alternatives: u32,
    pub words: bool,
    pub speaker: bool,
    pub phrases: Vec<String>,
    pub beamsize: Option<u32>,
    pub prompt: Option<String>,
    pub translate: bool,
    pub engine: String,
}

fn normalize_language(lang: &str) -> String {
    lang.replace('_', "-")
}

fn short_code(lang: &str) -> String {
    lang.split('-').next().unwrap_or(lang).to_lowercase()
}

/// Performs the four-step deterministic model-selection algorithm from
/// §4.4. Returns the resolved model's index into `models`.
pub fn select_model(models: &[ModelEntry], req: &RequestedOptions) -> Result<usize> {
    if let Some(name) = &req.model {
        return models
            .iter()
            .position(|m| m.name.as_deref() == Some(name.as_str()) || m.path == *name)
            .ok_or_else(|| ServerError::ModelNotFound(format!("unknown model '{name}'")));
    }

    if let Some(lang) = &req.language {
        let lang = normalize_language(lang);
        let short = short_code(&lang);

        if let Some(idx) = models.iter().position(|m| m.lang == lang) {
            return Ok(idx);
        }

        let candidates: Vec<usize> = models
            .iter()
            .enumerate()
            .filter(|(_, m)| m.lang.to_lowercase().starts_with(&short))
            .map(|(i, _)| i)
            .collect();

        if candidates.is_empty() {
            return Err(ServerError::ModelNotFound(format!(
                "no model for language '{lang}'"
            )));
        }

        if let Some(task) = &req.task {
            if let Some(idx) = candidates
                .iter()
                .find(|&&i| models[i].task.as_deref() == Some(task.as_str()))
            {
                return Ok(*idx);
            }
        }

        return Ok(candidates[0]);
    }

    if req.task.is_some() {
        return Err(ServerError::ModelNotFound(
            "no language given for task".to_string(),
        ));
    }

    if models.is_empty() {
        return Err(ServerError::ModelNotFound("no models configured".to_string()));
    }
    Ok(0)
}

/// Builds the fully normalized [`EngineOptions`] for a session from the
/// requested options and the server's configured model table.
pub fn resolve_options(config: &ServerConfig, req: &RequestedOptions) -> Result<EngineOptions> {
    let idx = select_model(&config.models, req)?;
    let model = &config.models[idx];

    let mut properties = HashMap::new();
    if let Some(scorer) = &model.scorer {
        properties.insert("scorer".to_string(), Value::String(scorer.clone()));
    }
    if let Some(device) = &model.compute_device {
        properties.insert(
            "compute_device".to_string(),
            Value::String(device.clone()),
        );
    }
    if let Some(ctype) = &model.compute_type {
        properties.insert("compute_type".to_string(), Value::String(ctype.clone()));
    }

    let engine = model
        .engine
        .clone()
        .unwrap_or_else(|| config.engine.clone());

    Ok(EngineOptions {
        samplerate: req.samplerate.unwrap_or(16000),
        language: model.lang.clone(),
        language_short: short_code(&model.lang),
        model_name: model.name.clone(),
        model_path: model.path.clone(),
        model_properties: properties,
        task: model.task.clone().or_else(|| req.task.clone()),
        continuous: req.continuous,
        optimize_final_result: req.optimize_final_result,
        alternatives: req.alternatives.unwrap_or(1),
        words: req.words,
        speaker: req.speaker,
        phrases: req.phrases.clone(),
        beamsize: req.beamsize.or(model.beamsize),
        prompt: req.prompt.clone().or_else(|| model.prompt.clone()),
        translate: req.translate || model.translate,
        engine,
    })
}

/// A normalized transcript result emitted by any engine (§3 "Transcript
/// Result (normalized)").
#[derive(Debug, Clone, Default)]
pub struct TranscriptResult {
    pub text: String,
    pub confidence: f32,
    pub is_final: bool,
    pub alternatives: Vec<Alternative>,
    pub features: HashMap<String, Value>,
    pub duration: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alternative {
    pub text: String,
    pub confidence: f32,
    pub words: Option<Value>,
}

/// A sink an engine uses to push transcripts and errors back to the owning
/// session, mirroring `EngineInterface.send_transcript`/`on_error`.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn send_transcript(&self, result: TranscriptResult);
    async fn send_error(&self, error: ServerError);
}

/// Wraps a session's sink so that every *final* transcript passes through
/// the Text Post-Processors (C8) before reaching the client — "applied to
/// final transcripts only, when `optimize_final_result=true`, and only after
/// engine-native finalization" (§4.8). Partials and errors pass through
/// untouched. Built once per session in the protocol handler and handed to
/// `build_engine` in place of the bare session sink when the option is set.
pub struct OptimizingSink {
    inner: Arc<dyn TranscriptSink>,
    language_short: String,
}

impl OptimizingSink {
    pub fn new(inner: Arc<dyn TranscriptSink>, language_short: String) -> Self {
        Self {
            inner,
            language_short,
        }
    }
}

#[async_trait]
impl TranscriptSink for OptimizingSink {
    async fn send_transcript(&self, mut result: TranscriptResult) {
        if result.is_final {
            result.text = crate::text::optimize_final_result(&result.text, &self.language_short);
        }
        self.inner.send_transcript(result).await;
    }

    async fn send_error(&self, error: ServerError) {
        self.inner.send_error(error).await;
    }
}

/// Uniform streaming contract every recognizer plugs into (C1).
#[async_trait]
pub trait Engine: Send {
    /// Feed one chunk of little-endian i16 PCM audio.
    async fn process(&mut self, chunk: &[u8]) -> Result<()>;

    /// Flush any buffered audio and emit a last result if appropriate.
    async fn finish(&mut self) -> Result<()>;

    /// Release all engine resources. Must be idempotent.
    async fn close(&mut self) -> Result<()>;

    /// The normalized options this engine instance is actually running
    /// with, for echoing back in the `welcome` response.
    fn options(&self) -> &EngineOptions;
}

/// Identifies which concrete constructor a resolved model maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Vosk,
    Whisper,
    WaveFileWriter,
    Test,
}

impl EngineKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "vosk" => Some(EngineKind::Vosk),
            "whisper" | "coqui" => Some(EngineKind::Whisper),
            "wave_file_writer" => Some(EngineKind::WaveFileWriter),
            "test" => Some(EngineKind::Test),
            _ => None,
        }
    }
}

/// `dynamic` dispatcher (§4.3): resolves the engine kind from the selected
/// model's own `engine` property rather than a server-wide default.
pub fn engine_kind_for(options: &EngineOptions) -> Result<EngineKind> {
    EngineKind::parse(&options.engine)
        .ok_or_else(|| ServerError::ChunkProcessorError(format!(
            "unknown engine '{}'",
            options.engine
        )))
}

pub use streaming::VoskEngine;
pub use vad_driven::WhisperEngine;
pub use dev::{TestEngine, WaveFileWriterEngine};

/// Constructs the engine selected by `engine_kind_for(options)`. When
/// `options.optimize_final_result` is set, the engine is handed an
/// [`OptimizingSink`] wrapping `sink` so every final transcript it emits has
/// already passed through the Text Post-Processors (C8) by the time it
/// reaches the session.
pub async fn build_engine(
    options: EngineOptions,
    model_cache: model_cache::ModelCache,
    recordings_path: &std::path::Path,
    sink: Arc<dyn TranscriptSink>,
) -> Result<Box<dyn Engine>> {
    let sink: Arc<dyn TranscriptSink> = if options.optimize_final_result {
        Arc::new(OptimizingSink::new(sink, options.language_short.clone()))
    } else {
        sink
    };

    match engine_kind_for(&options)? {
        EngineKind::Vosk => Ok(Box::new(VoskEngine::new(options, model_cache, sink)?)),
        EngineKind::Whisper => Ok(Box::new(WhisperEngine::new(options, model_cache, sink)?)),
        EngineKind::WaveFileWriter => Ok(Box::new(WaveFileWriterEngine::new(
            options,
            recordings_path,
        )?)),
        EngineKind::Test => Ok(Box::new(TestEngine::new(options, sink))),
    }
}

#[cfg(test)]
mod optimizing_sink_tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        transcripts: Mutex<Vec<TranscriptResult>>,
    }

    #[async_trait]
    impl TranscriptSink for RecordingSink {
        async fn send_transcript(&self, result: TranscriptResult) {
            self.transcripts.lock().push(result);
        }
        async fn send_error(&self, _error: ServerError) {}
    }

    fn result(text: &str, is_final: bool) -> TranscriptResult {
        TranscriptResult {
            text: text.to_string(),
            confidence: -1.0,
            is_final,
            alternatives: Vec::new(),
            features: Default::default(),
            duration: None,
        }
    }

    #[tokio::test]
    async fn optimizes_final_but_not_partial_text() {
        let recording = Arc::new(RecordingSink::default());
        let sink = OptimizingSink::new(recording.clone(), "en".to_string());

        sink.send_transcript(result("one hundred clients", false))
            .await;
        sink.send_transcript(result("one hundred clients", true))
            .await;

        let seen = recording.transcripts.lock();
        assert_eq!(seen[0].text, "one hundred clients");
        assert_eq!(seen[1].text, "100 clients");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelEntry;

    fn model(path: &str, lang: &str, task: Option<&str>) -> ModelEntry {
        ModelEntry {
            path: path.to_string(),
            lang: lang.to_string(),
            name: Some(path.to_string()),
            engine: Some("vosk".to_string()),
            task: task.map(|s| s.to_string()),
            scorer: None,
            beamsize: None,
            prompt: None,
            translate: false,
            compute_device: None,
            compute_type: None,
        }
    }

    #[test]
    fn selects_by_exact_model_name() {
        let models = vec![model("a.bin", "en-US", None), model("b.bin", "de-DE", None)];
        let req = RequestedOptions {
            model: Some("b.bin".to_string()),
            ..Default::default()
        };
        assert_eq!(select_model(&models, &req).unwrap(), 1);
    }

    #[test]
    fn unknown_model_name_fails() {
        let models = vec![model("a.bin", "en-US", None)];
        let req = RequestedOptions {
            model: Some("missing.bin".to_string()),
            ..Default::default()
        };
        assert!(select_model(&models, &req).is_err());
    }

    #[test]
    fn falls_back_to_short_code_prefix_match() {
        let models = vec![model("a.bin", "en-GB", None)];
        let req = RequestedOptions {
            language: Some("en-US".to_string()),
            ..Default::default()
        };
        assert_eq!(select_model(&models, &req).unwrap(), 0);
    }

    #[test]
    fn prefers_task_match_within_language() {
        let models = vec![
            model("a.bin", "en-US", None),
            model("b.bin", "en-US", Some("translate")),
        ];
        let req = RequestedOptions {
            language: Some("en-US".to_string()),
            task: Some("translate".to_string()),
            ..Default::default()
        };
        assert_eq!(select_model(&models, &req).unwrap(), 1);
    }

    #[test]
    fn task_alone_fails() {
        let models = vec![model("a.bin", "en-US", None)];
        let req = RequestedOptions {
            task: Some("translate".to_string()),
            ..Default::default()
        };
        assert!(select_model(&models, &req).is_err());
    }

    #[test]
    fn nothing_given_uses_first_model() {
        let models = vec![model("a.bin", "en-US", None), model("b.bin", "de-DE", None)];
        let req = RequestedOptions::default();
        assert_eq!(select_model(&models, &req).unwrap(), 0);
    }
}
