mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use utoipa::OpenApi;

pub use self::error::AppError;
pub use self::state::*;
pub use self::types::*;

#[derive(OpenApi)]
#[openapi(
    paths(api::search_handler, api::download_handler, api::health_handler, api::reload_handler),
    components(schemas(
        types::SearchForm,
        types::SearchMatch,
        types::HealthResponse,
        types::ReloadResponse,
        types::ErrorResponse,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
///
/// * `timeout` - 单个请求的最长处理时间
pub fn create_app(state: Arc<AppState>, timeout: Duration) -> Router {
    Router::new()
        .route("/", get(api::index_handler))
        .route("/search", post(api::search_handler))
        .route("/download/{filename}", get(api::download_handler))
        .route("/health", get(api::health_handler))
        .route("/reload", post(api::reload_handler))
        .route("/metrics", get(api::metrics_handler))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .layer(DefaultBodyLimit::disable())
        // 上传限制：10M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 10))
        .layer(TimeoutLayer::new(timeout))
        .with_state(state)
}
