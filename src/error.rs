//! Wire-visible error taxonomy. Every variant carries the numeric `code` and
//! `name` the client sees in an `error` message (§7 of the design doc).

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ServerError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("processor is not accepting audio")]
    ProcessError,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("session timed out")]
    TimeoutMessage,

    #[error("operation not possible: {0}")]
    NotPossible(String),

    #[error("asr engine error: {0}")]
    AsrEngineError(String),

    #[error("chunk processor error: {0}")]
    ChunkProcessorError(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),
}

impl ServerError {
    pub fn code(&self) -> u16 {
        match self {
            ServerError::InvalidMessage(_) => 400,
            ServerError::ProcessError => 400,
            ServerError::Unauthorized(_) => 401,
            ServerError::TimeoutMessage => 408,
            ServerError::NotPossible(_) => 418,
            ServerError::AsrEngineError(_) => 500,
            ServerError::ChunkProcessorError(_) => 500,
            // Never sent verbatim: translated by the caller into AsrEngineError
            // or ChunkProcessorError before reaching the wire.
            ServerError::ModelNotFound(_) => 500,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerError::InvalidMessage(_) => "InvalidMessage",
            ServerError::ProcessError => "ProcessError",
            ServerError::Unauthorized(_) => "Unauthorized",
            ServerError::TimeoutMessage => "TimeoutMessage",
            ServerError::NotPossible(_) => "NotPossible",
            ServerError::AsrEngineError(_) => "AsrEngineError",
            ServerError::ChunkProcessorError(_) => "ChunkProcessorError",
            ServerError::ModelNotFound(_) => "AsrEngineError",
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
