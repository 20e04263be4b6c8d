#[cfg(feature = "onnx")]
pub mod onnx;

use std::sync::Arc;

use image::RgbImage;
use log::debug;

use crate::config::{ConfDir, ExtractorOptions};
use crate::error::{FaceSearchError, Result};
use crate::normalize::{l2_norm, normalize};

/// 人脸在图片中的位置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// 检测到的一张人脸
#[derive(Debug, Clone)]
pub struct FaceCrop {
    /// 裁剪出的人脸图片
    pub image: RgbImage,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// 人脸检测与特征提取能力
///
/// `detect_faces` 返回空列表表示图片中没有人脸，这是正常结果；
/// 后端本身出错时应返回 [`FaceSearchError::Extraction`]。
pub trait FaceExtractor: Send + Sync {
    /// 模型名称，会记录在索引清单中
    fn model_name(&self) -> &str;

    fn detect_faces(&self, image: &RgbImage) -> Result<Vec<FaceCrop>>;

    /// 提取一张人脸的原始特征向量
    fn embed(&self, face: &FaceCrop) -> Result<Vec<f32>>;
}

/// 检测图片中的人脸并返回归一化后的特征向量，顺序与检测结果一致
///
/// * `limit` - 最多处理的人脸数量，`None` 表示全部
pub fn extract_embeddings(
    extractor: &dyn FaceExtractor,
    image: &RgbImage,
    limit: Option<usize>,
) -> Result<Vec<Vec<f32>>> {
    let faces = extractor.detect_faces(image)?;
    debug!("检测到 {} 张人脸", faces.len());

    faces
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|face| {
            let raw = extractor.embed(face)?;
            check_raw_embedding(&raw)?;
            Ok(normalize(&raw))
        })
        .collect()
}

/// 空向量、非有限值或零向量无法归一化
fn check_raw_embedding(raw: &[f32]) -> Result<()> {
    if raw.is_empty() {
        return Err(FaceSearchError::Extraction("extractor returned an empty embedding".into()));
    }
    if raw.iter().any(|x| !x.is_finite()) {
        return Err(FaceSearchError::Extraction("embedding contains non-finite values".into()));
    }
    if l2_norm(raw) == 0.0 {
        return Err(FaceSearchError::Extraction("embedding has zero norm".into()));
    }
    Ok(())
}

/// 根据命令行参数加载推理后端
#[cfg(feature = "onnx")]
pub fn load_extractor(
    conf_dir: &ConfDir,
    opts: &ExtractorOptions,
) -> anyhow::Result<Arc<dyn FaceExtractor>> {
    let detector = opts.detector_model.clone().unwrap_or_else(|| conf_dir.detector_model());
    let recognizer = opts.recognizer_model.clone().unwrap_or_else(|| conf_dir.recognizer_model());
    let extractor = onnx::OnnxExtractor::load(&detector, &recognizer, opts)?;
    Ok(Arc::new(extractor))
}

/// 根据命令行参数加载推理后端
#[cfg(not(feature = "onnx"))]
pub fn load_extractor(
    _conf_dir: &ConfDir,
    _opts: &ExtractorOptions,
) -> anyhow::Result<Arc<dyn FaceExtractor>> {
    Err(anyhow::anyhow!("编译时未启用 onnx 特性，没有可用的人脸识别后端"))
}
