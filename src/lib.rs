//! Real-time speech-to-text server: WebSocket audio in, streaming
//! transcripts out.
//!
//! `protocol` drives the per-connection state machine over `chunk_processor`,
//! which hands audio to whichever `engine` the session negotiated. `config`
//! builds the process-wide `ServerContext` once at startup; `http` exposes
//! the unauthenticated capability/health endpoints alongside it.

pub mod chunk_processor;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod protocol;
pub mod session;
pub mod text;
pub mod vad;
