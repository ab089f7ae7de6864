//! Developer/test engines, supplementing the two production engines.
//!
//! Grounded on `chunk_processor.py`'s `WaveFileWriter` (writes raw PCM to a
//! `.wav` file instead of running inference — useful for capturing samples
//! during development) and `ThreadTestProcessor` (a deterministic engine
//! that returns a fixed transcript, used in the original system's own test
//! suite and CI rather than a live model).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hound::{WavSpec, WavWriter};

use super::{Engine, EngineOptions, TranscriptResult, TranscriptSink};
use crate::error::{Result, ServerError};

pub struct WaveFileWriterEngine {
    options: EngineOptions,
    writer: Option<WavWriter<std::io::BufWriter<std::fs::File>>>,
}

impl WaveFileWriterEngine {
    pub fn new(options: EngineOptions, recordings_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(recordings_path).map_err(|e| {
            ServerError::ChunkProcessorError(format!("cannot create recordings dir: {e}"))
        })?;

        let file_name: PathBuf = recordings_path.join(format!(
            "session-{}.wav",
            uuid::Uuid::new_v4()
        ));

        let spec = WavSpec {
            channels: 1,
            sample_rate: options.samplerate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = WavWriter::create(&file_name, spec)
            .map_err(|e| ServerError::ChunkProcessorError(format!("cannot open wav file: {e}")))?;

        Ok(Self {
            options,
            writer: Some(writer),
        })
    }
}

#[async_trait]
impl Engine for WaveFileWriterEngine {
    async fn process(&mut self, chunk: &[u8]) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        for sample in chunk.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])) {
            writer
                .write_sample(sample)
                .map_err(|e| ServerError::AsrEngineError(format!("wav write failed: {e}")))?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| ServerError::AsrEngineError(format!("wav finalize failed: {e}")))?;
        }
        Ok(())
    }

    fn options(&self) -> &EngineOptions {
        &self.options
    }
}

/// Returns a fixed transcript on finish, used by integration tests and
/// local development so the rest of the pipeline can be exercised without a
/// real model loaded.
pub struct TestEngine {
    options: EngineOptions,
    sink: Arc<dyn TranscriptSink>,
    chunks_seen: usize,
}

impl TestEngine {
    pub fn new(options: EngineOptions, sink: Arc<dyn TranscriptSink>) -> Self {
        Self {
            options,
            sink,
            chunks_seen: 0,
        }
    }
}

#[async_trait]
impl Engine for TestEngine {
    async fn process(&mut self, _chunk: &[u8]) -> Result<()> {
        self.chunks_seen += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.sink
            .send_transcript(TranscriptResult {
                text: "hello world".to_string(),
                confidence: 1.0,
                is_final: true,
                alternatives: Vec::new(),
                features: Default::default(),
                duration: None,
            })
            .await;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn options(&self) -> &EngineOptions {
        &self.options
    }
}
