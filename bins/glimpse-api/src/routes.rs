use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::list_routes))
        .route("/run-code-local", post(handlers::run_code_local))
        .route("/run-code-pool", post(handlers::run_code_pool))
        .route("/status", get(handlers::health_check))
        .route("/languages", get(handlers::list_languages))
        .route("/metrics", get(handlers::metrics))
}
