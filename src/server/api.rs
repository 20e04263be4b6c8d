use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum_typed_multipart::{TypedMultipart, TypedMultipartError};
use log::{debug, info};
use tokio::task::spawn_blocking;

use super::error::Result;
use super::state::AppState;
use super::types::*;
use crate::error::FaceSearchError;
use crate::metrics;
use crate::query::Upload;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Face Search</title></head>
<body>
<h1>Face Search API</h1>
<form action="/search" method="post" enctype="multipart/form-data">
  <input type="file" name="file" accept="image/*">
  <button type="submit">Search</button>
</form>
<p>
示例用法：
<br>
<code>curl -F file=@query.jpg http://127.0.0.1:5000/search</code>
<br>
<code>curl http://127.0.0.1:5000/health</code>
</p>
</body>
</html>
"#;

/// 首页，显示上传表单和使用说明
pub async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// 搜索一张图片中的人脸
#[utoipa::path(
    post,
    path = "/search",
    request_body(content = SearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = Vec<SearchMatch>),
        (status = 400, body = ErrorResponse),
        (status = 413, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    data: std::result::Result<TypedMultipart<SearchRequest>, TypedMultipartError>,
) -> Result<Json<Vec<SearchMatch>>> {
    let file = match data {
        Ok(TypedMultipart(request)) => request.file,
        // 不是 multipart 请求，视为没有上传文件
        Err(TypedMultipartError::InvalidRequest { .. }) => None,
        Err(e) => return Err(multipart_error(e).into()),
    };

    let service = state.service().await;
    let outcome = spawn_blocking(move || {
        let upload = file.as_ref().map(|file| Upload {
            file_name: file.metadata.file_name.as_deref(),
            data: &file.contents,
        });
        service.search_upload(upload)
    })
    .await
    .map_err(|e| FaceSearchError::Search(e.to_string()))??;

    Ok(Json(outcome.into_results().into_iter().map(SearchMatch::from).collect()))
}

fn multipart_error(err: TypedMultipartError) -> FaceSearchError {
    debug!("解析上传表单失败: {}", err);
    match err {
        err @ TypedMultipartError::FieldTooLarge { .. } => FaceSearchError::PayloadTooLarge(err.to_string()),
        err => FaceSearchError::InvalidRequest(format!("Invalid upload: {err}")),
    }
}

/// 下载数据集中的原图
#[utoipa::path(
    get,
    path = "/download/{filename}",
    params(("filename" = String, Path, description = "数据集中的文件名")),
    responses(
        (status = 200, description = "原图内容", content_type = "image/jpeg"),
        (status = 404, body = ErrorResponse),
    )
)]
pub async fn download_handler(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse> {
    let service = state.service().await;
    let path = service.dataset_file(&filename)?;
    let data = tokio::fs::read(&path).await.map_err(|e| {
        debug!("读取 {} 失败: {}", path.display(), e);
        FaceSearchError::NotFound(filename)
    })?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], data))
}

/// 健康检查
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let service = state.service().await;
    Json(HealthResponse {
        status: "healthy".to_string(),
        message: "Face recognition API is running".to_string(),
        index_loaded: service.is_loaded(),
        filenames_loaded: service.is_loaded(),
        total_faces: service.total_faces(),
    })
}

/// 从磁盘重新加载索引
#[utoipa::path(
    post,
    path = "/reload",
    responses(
        (status = 200, body = ReloadResponse),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn reload_handler(State(state): State<Arc<AppState>>) -> Result<Json<ReloadResponse>> {
    info!("重新加载索引");
    let total_faces = state.reload().await?;
    Ok(Json(ReloadResponse { total_faces }))
}

/// Prometheus 指标
pub async fn metrics_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], metrics::gather_text())
}
