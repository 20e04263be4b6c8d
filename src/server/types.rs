use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::query::QueryResult;

/// 搜索请求参数
#[derive(TryFromMultipart)]
pub struct SearchRequest {
    /// 请求体大小由 `RequestBodyLimitLayer` 限制
    #[form_data(limit = "unlimited")]
    pub file: Option<FieldData<Bytes>>,
}

/// 搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchForm {
    /// 上传的图片文件，只使用检测到的第一张人脸
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 一条匹配结果
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SearchMatch {
    /// 人脸记录名称，如 `A.jpg_face1`
    pub filename: String,
    /// 人脸所在的原图
    pub original_filename: String,
    /// 余弦相似度
    pub similarity: f32,
    /// 原图在数据集中的路径
    pub path: String,
}

impl From<QueryResult> for SearchMatch {
    fn from(result: QueryResult) -> Self {
        Self {
            filename: result.filename,
            original_filename: result.original_filename,
            similarity: result.similarity,
            path: result.path.to_string_lossy().into_owned(),
        }
    }
}

/// 健康检查响应
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub index_loaded: bool,
    pub filenames_loaded: bool,
    pub total_faces: usize,
}

/// 重新加载索引的响应
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReloadResponse {
    pub total_faces: usize,
}

/// 错误响应
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
