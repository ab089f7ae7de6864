//! HTTP Surface (C10): `/ping`, `/settings`, `/online` — unauthenticated,
//! served by `axum` alongside the WebSocket listener.
//!
//! Grounded on `rt-ui-http/src/lib.rs`'s style (small `axum` handlers
//! returning typed JSON, a thin router builder function) — this is the one
//! part of the server that draws on a sibling example repo rather than the
//! teacher, since the teacher has no plain-HTTP surface of its own.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ServerContext;

pub fn router(context: Arc<ServerContext>) -> Router {
    let cors = if context.config.cors_origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(
            context
                .config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect::<Vec<_>>(),
        )
    };

    Router::new()
        .route("/ping", get(ping))
        .route("/settings", get(settings))
        .route("/online", get(online))
        .layer(cors)
        .with_state(context)
}

async fn ping(State(context): State<Arc<ServerContext>>) -> impl IntoResponse {
    Json(json!({
        "result": "ok",
        "server": "stt-server",
        "version": env!("CARGO_PKG_VERSION"),
        "engine": context.config.engine,
    }))
}

async fn settings(State(context): State<Arc<ServerContext>>) -> impl IntoResponse {
    let models: Vec<_> = context
        .config
        .models
        .iter()
        .map(|m| {
            json!({
                "name": m.name.clone().unwrap_or_else(|| m.path.clone()),
                "lang": m.lang,
                "engine": m.engine.clone().unwrap_or_else(|| context.config.engine.clone()),
                "task": m.task,
            })
        })
        .collect();

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "engine": context.config.engine,
        "models": models,
        "languages": context.distinct_languages(),
        "modelProperties": ["compute_device", "compute_type", "beamsize", "scorer"],
        "features": ["words_to_digits", "datetime_normalization", "alternatives"],
    }))
}

async fn online() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, ModelEntry, ServerConfig};
    use crate::engine::model_cache::ModelCache;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_context() -> Arc<ServerContext> {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: Vec::new(),
            http_port: None,
            log_level: "info".to_string(),
            heartbeat_delay: 10,
            timeout_seconds: 15,
            auth: AuthConfig::default(),
            recordings_path: "/tmp".into(),
            engine: "test".to_string(),
            models: vec![ModelEntry {
                path: "a.bin".to_string(),
                lang: "en-US".to_string(),
                name: None,
                engine: Some("test".to_string()),
                task: None,
                scorer: None,
                beamsize: None,
                prompt: None,
                translate: false,
                compute_device: None,
                compute_type: None,
            }],
            speaker_models: Vec::new(),
            model_cache_capacity: None,
        };
        Arc::new(ServerContext {
            model_cache: ModelCache::new(2),
            config,
        })
    }

    #[tokio::test]
    async fn online_returns_204() {
        let app = router(test_context());
        let response = app
            .oneshot(Request::builder().uri("/online").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn ping_returns_200() {
        let app = router(test_context());
        let response = app
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
