use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = FaceSearchError> = std::result::Result<T, E>;

/// 人脸检索过程中的错误分类
#[derive(Debug, Error)]
pub enum FaceSearchError {
    /// 请求缺少必要内容，属于用户错误
    #[error("{0}")]
    InvalidRequest(String),
    /// 图片无法解码，只影响当前这一张图片
    #[error("failed to decode {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: image::ImageError,
    },
    /// 检测或特征提取后端出错，与“没有检测到人脸”不同
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("length mismatch between {what}: {expected} != {actual}")]
    LengthMismatch { what: &'static str, expected: usize, actual: usize },
    /// 持久化文件内容前后矛盾
    #[error("corrupt catalog file {}: {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },
    /// 上传内容超过限制
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// 索引不可用，例如未加载或为空
    #[error("search failed: {0}")]
    Search(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FaceSearchError {
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptIndex { path: path.into(), reason: reason.into() }
    }

    /// 是否为持久化状态损坏或不兼容，这类错误不能降级处理
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::LengthMismatch { .. } | Self::CorruptIndex { .. }
        )
    }
}
