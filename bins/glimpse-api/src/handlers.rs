// HTTP route handlers for the Glimpse API

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use glimpse_common::types::{RunRequest, RunResponse};
use glimpse_core::{ErrorKind, ExecutionError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::AppState;

/// HTTP status for a request-level failure; user-code failures are 200
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Compile | ErrorKind::Runtime | ErrorKind::Timeout => StatusCode::OK,
    }
}

fn error_response(language: &str, err: &ExecutionError) -> RunResponse {
    RunResponse {
        output: String::new(),
        error: err.to_string(),
        language: language.to_string(),
        info: String::new(),
        execution_time: None,
    }
}

async fn run(state: &AppState, payload: RunRequest, pooled: bool) -> Response {
    let strategy = if pooled { "pooled" } else { "direct" };
    let pool = if pooled { Some(&state.pool) } else { None };

    let outcome = state
        .orchestrator
        .execute(&payload.language, &payload.code, payload.input.as_deref(), pool)
        .await;

    match outcome {
        Ok(result) => {
            let label = result.error_kind().map(|k| k.as_str()).unwrap_or("success");
            state
                .metrics
                .observe(result.language.id(), strategy, label, result.elapsed);
            (StatusCode::OK, Json(result.into_response())).into_response()
        }
        Err(e) => {
            let kind = e.kind();
            match kind {
                ErrorKind::Infrastructure => {
                    error!(language = %payload.language, strategy = strategy, error = %e, "Execution failed")
                }
                _ => warn!(language = %payload.language, strategy = strategy, error = %e, "Execution rejected"),
            }
            (status_for(kind), Json(error_response(&payload.language, &e))).into_response()
        }
    }
}

/// POST /run-code-local - Run directly on the host
pub async fn run_code_local(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RunRequest>,
) -> Response {
    run(&state, payload, false).await
}

/// POST /run-code-pool - Run in a pooled sandbox
pub async fn run_code_pool(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RunRequest>,
) -> Response {
    let response = run(&state, payload, true).await;
    state.metrics.set_pool_stats(&state.pool.stats());
    response
}

/// GET /status - Health check with pool counters
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.pool.stats();
    state.metrics.set_pool_stats(&stats);
    let status = if state.pool.is_shut_down() {
        "shutting_down"
    } else {
        "ok"
    };
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": status,
            "pool": stats,
        })),
    )
}

#[derive(Debug, Serialize)]
pub struct LanguageInfo {
    pub id: &'static str,
    pub compiled: bool,
    pub info: String,
}

/// GET /languages - Supported languages
pub async fn list_languages(State(state): State<Arc<AppState>>) -> Json<Vec<LanguageInfo>> {
    let languages = state
        .orchestrator
        .registry()
        .specs()
        .map(|spec| LanguageInfo {
            id: spec.id.id(),
            compiled: spec.compile_command.is_some(),
            info: spec.version_probe.clone(),
        })
        .collect();
    Json(languages)
}

/// GET /metrics - Prometheus text format
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    state.metrics.set_pool_stats(&state.pool.stats());
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET / - Available routes
pub async fn list_routes() -> impl IntoResponse {
    debug!("Route listing requested");
    Json(serde_json::json!({
        "paths": [
            { "path": "/run-code-local", "method": "POST" },
            { "path": "/run-code-pool", "method": "POST" },
            { "path": "/status", "method": "GET" },
            { "path": "/languages", "method": "GET" },
            { "path": "/metrics", "method": "GET" },
        ]
    }))
}
