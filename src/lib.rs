// src/lib.rs
use std::sync::Arc;

pub mod analysis;
pub mod catalog;
pub mod compare;
pub mod config;
pub mod error;
pub mod export;
pub mod routes;
pub mod service;

pub use config::Config;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::service::FileAnalysisService;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub service: Arc<FileAnalysisService>,
}

/// Builds the application router; shared with the integration tests.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let max_upload = state.config.max_upload_bytes;
    Router::new()
        .route("/health", get(routes::health_check))
        .route("/api", post(routes::analyze))
        .route("/api/compare", post(routes::compare))
        .route("/api/upload-zip", post(routes::upload_zip))
        .layer(cors)
        .layer(DefaultBodyLimit::max(max_upload))
        .with_state(state)
}
