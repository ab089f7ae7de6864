//! Binary entry point: parses CLI flags, loads configuration, builds the
//! process-wide `ServerContext`, and runs the WebSocket and HTTP listeners
//! side by side until shutdown.
//!
//! Grounded on the teacher's `main.rs` pattern (`#[tokio::main]`, a
//! `tracing_subscriber::fmt()` global subscriber installed once at startup)
//! generalized here with `clap` CLI parsing, a blocking-thread pool sized
//! for the inference worker pool (§5: whisper/vosk inference runs on
//! `spawn_blocking`, never the async reactor threads), and a clean non-zero
//! exit on configuration failure instead of the teacher's `unwrap()`-on-bind
//! style.

use std::sync::Arc;

use clap::Parser;

use stt_server::config::{Cli, ServerConfig, ServerContext};
use stt_server::http;
use stt_server::protocol::run_websocket_server;

fn main() {
    // Inference (whisper/vosk) is CPU-bound and runs via `spawn_blocking`;
    // size that pool off the machine's core count rather than tokio's
    // default of 512, so a burst of concurrent sessions degrades by
    // queuing instead of spawning hundreds of OS threads.
    let blocking_threads = (num_cpus::get() * 2).max(4);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(blocking_threads)
        .build()
        .expect("failed to build tokio runtime");

    runtime.block_on(run());
}

async fn run() {
    let cli = Cli::parse();

    let log_level = cli.log_level.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let context = Arc::new(ServerContext::new(config));

    tracing::info!(
        engine = %context.config.engine,
        models = context.config.models.len(),
        "stt-server starting"
    );

    let http_context = context.clone();
    let http_addr = context.http_addr();
    let http_task = tokio::spawn(async move {
        let router = http::router(http_context);
        match tokio::net::TcpListener::bind(&http_addr).await {
            Ok(listener) => {
                tracing::info!(%http_addr, "http surface listening");
                if let Err(e) = axum::serve(listener, router).await {
                    tracing::error!("http surface error: {e}");
                }
            }
            Err(e) => {
                tracing::error!(%http_addr, "failed to bind http surface: {e}");
            }
        }
    });

    let ws_result = tokio::select! {
        result = run_websocket_server(context) => result,
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    http_task.abort();

    if let Err(e) = ws_result {
        tracing::error!("websocket server error: {e}");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            // No SIGTERM support on this platform; fall back to Ctrl-C only.
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
