use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;
use serde_json::json;

use crate::error::FaceSearchError;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型
#[derive(Debug)]
pub struct AppError(pub FaceSearchError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            FaceSearchError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            FaceSearchError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg.clone()),
            FaceSearchError::NotFound(_) => (StatusCode::NOT_FOUND, "File not found".to_string()),
            err => {
                error!("请求处理失败: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Face recognition failed: {}", err))
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<FaceSearchError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
