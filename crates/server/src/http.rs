//! HTTP surface
//!
//! The broker is WebSocket-first; HTTP carries only the upgrade endpoint,
//! health checks, and Prometheus metrics. Admin and analytics APIs live
//! elsewhere.

use axum::{
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    routing::get,
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use classbridge_storage::SessionStore as _;

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::ws::ws_handler;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let ws_path = state.core.settings.server.ws_path.clone();
    let cors_layer = build_cors_layer(&state.core.settings.server.cors_origins);

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        // Development default
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!(origin, "Invalid CORS origin, skipped");
                None
            })
        })
        .collect();

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.core.registry.len(),
        "teachers": state.core.registry.teacher_count(),
        "students": state.core.registry.student_count(),
        "classroom_codes": state.core.codes.len(),
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    // Ready once the session store answers
    match state.core.sessions.active_sessions().await {
        Ok(_) => Ok("ready"),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}
