//! Chunk Processor (C5): per-session front door to the selected engine.
//!
//! Grounded on `chunk_processor.py`'s `ChunkProcessor` class — the
//! `is_open`/`accept_chunks` guard pair, `finish_processing` acknowledging
//! the inbound `audioend` before invoking the engine, and `close()` driving
//! the engine through its own teardown before releasing resources.

use crate::engine::Engine;
use crate::error::{Result, ServerError};

pub struct ChunkProcessor {
    engine: Box<dyn Engine>,
    is_open: bool,
    accept_chunks: bool,
}

impl ChunkProcessor {
    pub fn new(engine: Box<dyn Engine>) -> Self {
        Self {
            engine,
            is_open: true,
            accept_chunks: true,
        }
    }

    pub async fn process(&mut self, chunk: &[u8]) -> Result<()> {
        if !(self.is_open && self.accept_chunks) {
            return Err(ServerError::ProcessError);
        }
        if let Err(e) = self.engine.process(chunk).await {
            self.accept_chunks = false;
            return Err(e);
        }
        Ok(())
    }

    /// Stops accepting new audio and drives the engine's own finish path.
    /// The caller is responsible for sending the `audioend` acknowledgement
    /// before awaiting this, per §4.1's ordering requirement.
    pub async fn finish_processing(&mut self) -> Result<()> {
        self.accept_chunks = false;
        self.engine.finish().await
    }

    pub async fn close(&mut self) -> Result<()> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;
        self.engine.close().await
    }

    pub fn get_options(&self) -> &crate::engine::EngineOptions {
        self.engine.options()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineOptions;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StubEngine {
        options: EngineOptions,
        fail_process: bool,
    }

    fn dummy_options() -> EngineOptions {
        EngineOptions {
            samplerate: 16000,
            language: "en-US".to_string(),
            language_short: "en".to_string(),
            model_name: None,
            model_path: "a.bin".to_string(),
            model_properties: HashMap::new(),
            task: None,
            continuous: false,
            optimize_final_result: false,
            alternatives: 1,
            words: false,
            speaker: false,
            phrases: Vec::new(),
            beamsize: None,
            prompt: None,
            translate: false,
            engine: "test".to_string(),
        }
    }

    #[async_trait]
    impl Engine for StubEngine {
        async fn process(&mut self, _chunk: &[u8]) -> Result<()> {
            if self.fail_process {
                return Err(ServerError::AsrEngineError("boom".to_string()));
            }
            Ok(())
        }
        async fn finish(&mut self) -> Result<()> {
            Ok(())
        }
        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
        fn options(&self) -> &EngineOptions {
            &self.options
        }
    }

    #[tokio::test]
    async fn rejects_chunks_after_finish() {
        let mut proc = ChunkProcessor::new(Box::new(StubEngine {
            options: dummy_options(),
            fail_process: false,
        }));
        proc.finish_processing().await.unwrap();
        let err = proc.process(&[0, 0]).await.unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut proc = ChunkProcessor::new(Box::new(StubEngine {
            options: dummy_options(),
            fail_process: false,
        }));
        proc.close().await.unwrap();
        proc.close().await.unwrap();
    }

    #[tokio::test]
    async fn engine_failure_stops_further_chunks() {
        let mut proc = ChunkProcessor::new(Box::new(StubEngine {
            options: dummy_options(),
            fail_process: true,
        }));
        assert!(proc.process(&[0, 0]).await.is_err());
        let err = proc.process(&[0, 0]).await.unwrap_err();
        assert_eq!(err.code(), 400);
    }
}
