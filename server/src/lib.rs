pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod pump;
pub mod registry;
pub mod transport;
pub mod validation;
pub mod ws;

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use tts_core::{SpeechSynthesizer, Voice};

use crate::config::ServerConfig;
use crate::controller::SpeechController;
use crate::metrics::{StreamMetrics, StreamMetricsResponse};
use crate::registry::{ConnectionRegistry, ConnectionStats};

#[derive(Clone)]
pub struct AppState {
    pub controller: SpeechController,
    pub config: ServerConfig,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ServerConfig, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        let controller = SpeechController::new(
            Arc::new(ConnectionRegistry::new()),
            synthesizer,
            Arc::new(StreamMetrics::new()),
            &config.stream,
        );
        Self {
            controller,
            config,
            started_at: Utc::now(),
        }
    }
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn list_voices() -> Json<Vec<&'static str>> {
    Json(Voice::ALL.iter().map(|v| v.as_str()).collect())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub active_connections: usize,
    pub connections: Vec<ConnectionStats>,
    pub uptime_seconds: i64,
    pub metrics: StreamMetricsResponse,
}

pub async fn stats_endpoint(State(state): State<AppState>) -> Json<StatsResponse> {
    let connections = state.controller.registry().snapshot().await;
    Json(StatsResponse {
        active_connections: connections.len(),
        connections,
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        metrics: state.controller.metrics().snapshot(),
    })
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let methods = [axum::http::Method::GET, axum::http::Method::OPTIONS];
    let origins: Vec<axum::http::HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {origin}");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(tower_http::cors::Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        CorsLayer::new()
            .allow_origin(tower_http::cors::AllowOrigin::list(origins))
            .allow_methods(methods)
            .allow_headers(tower_http::cors::Any)
    }
}

/// Build the HTTP + WebSocket router.
pub fn app(state: AppState) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(cors_layer(&state.config))
        .into_inner();

    let api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/voices", get(list_voices))
        .route("/stats", get(stats_endpoint))
        .route("/ws", get(ws::speech_socket));

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(middleware_stack)
        .with_state(state)
}
