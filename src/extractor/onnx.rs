//! SCRFD 人脸检测 + ArcFace 特征提取，基于 ONNX Runtime

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, bail};
use image::imageops::{self, FilterType};
use image::RgbImage;
use log::{debug, info};
use ort::session::Session;
use ort::value::Tensor;

use super::{BoundingBox, FaceCrop, FaceExtractor};
use crate::config::ExtractorOptions;
use crate::error::{FaceSearchError, Result};

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [u32; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;

/// 每个步长对应的 (score, bbox) 输出下标
type StrideOutputs = (usize, usize);

/// 缩放并居中填充后的坐标映射
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

pub struct OnnxExtractor {
    detector: Mutex<Session>,
    recognizer: Mutex<Session>,
    stride_outputs: [StrideOutputs; 3],
    model_name: String,
    detect_threshold: f32,
    nms_threshold: f32,
}

impl OnnxExtractor {
    pub fn load(detector: &Path, recognizer: &Path, opts: &ExtractorOptions) -> anyhow::Result<Self> {
        for path in [detector, recognizer] {
            if !path.is_file() {
                bail!("模型文件不存在: {}", path.display());
            }
        }

        let detector_session = Session::builder()?
            .with_intra_threads(opts.intra_threads)?
            .commit_from_file(detector)
            .with_context(|| format!("加载检测模型 {} 失败", detector.display()))?;
        let recognizer_session = Session::builder()?
            .with_intra_threads(opts.intra_threads)?
            .commit_from_file(recognizer)
            .with_context(|| format!("加载识别模型 {} 失败", recognizer.display()))?;

        let names: Vec<String> =
            detector_session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            bail!("SCRFD 模型至少需要 6 个输出，实际为 {}", names.len());
        }
        let stride_outputs = discover_outputs(&names);
        debug!("SCRFD 输出映射: {:?}", stride_outputs);

        let model_name = recognizer
            .file_stem()
            .map(|s| format!("arcface-{}", s.to_string_lossy()))
            .unwrap_or_else(|| "arcface".to_string());
        info!("已加载模型: {} / {}", detector.display(), recognizer.display());

        Ok(Self {
            detector: Mutex::new(detector_session),
            recognizer: Mutex::new(recognizer_session),
            stride_outputs,
            model_name,
            detect_threshold: opts.detect_threshold,
            nms_threshold: opts.nms_threshold,
        })
    }

    fn detect_boxes(&self, image: &RgbImage) -> Result<Vec<(BoundingBox, f32)>> {
        let (data, letterbox) = scrfd_input(image);
        let size = SCRFD_INPUT_SIZE as usize;
        let input = Tensor::from_array((vec![1usize, 3, size, size], data)).map_err(extraction)?;

        let mut session = self.detector.lock().map_err(extraction)?;
        let outputs = session.run(ort::inputs![input]).map_err(extraction)?;

        let mut detections = vec![];
        for (&stride, &(score_idx, bbox_idx)) in SCRFD_STRIDES.iter().zip(&self.stride_outputs) {
            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(extraction)?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(extraction)?;
            detections.extend(decode_stride(scores, bboxes, stride, &letterbox, self.detect_threshold));
        }

        Ok(nms(detections, self.nms_threshold))
    }
}

impl FaceExtractor for OnnxExtractor {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    /// 按置信度从高到低返回人脸
    fn detect_faces(&self, image: &RgbImage) -> Result<Vec<FaceCrop>> {
        let boxes = self.detect_boxes(image)?;
        Ok(boxes
            .into_iter()
            .filter_map(|(bbox, confidence)| {
                let crop = crop_face(image, &bbox)?;
                Some(FaceCrop { image: crop, bbox, confidence })
            })
            .collect())
    }

    fn embed(&self, face: &FaceCrop) -> Result<Vec<f32>> {
        let size = ARCFACE_INPUT_SIZE as usize;
        let data = planar(&face.image, ARCFACE_MEAN, ARCFACE_STD);
        let input = Tensor::from_array((vec![1usize, 3, size, size], data)).map_err(extraction)?;

        let mut session = self.recognizer.lock().map_err(extraction)?;
        let outputs = session.run(ort::inputs![input]).map_err(extraction)?;
        let (_, embedding) = outputs[0].try_extract_tensor::<f32>().map_err(extraction)?;
        Ok(embedding.to_vec())
    }
}

fn extraction(err: impl std::fmt::Display) -> FaceSearchError {
    FaceSearchError::Extraction(err.to_string())
}

/// 按名称查找 score_8 / bbox_8 这类输出，找不到时使用标准顺序
fn discover_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: u32| names.iter().position(|n| *n == format!("{prefix}_{stride}"));
    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();
    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => [(0, 3), (1, 4), (2, 5)],
    }
}

/// 缩放到 640x640 并居中填充，返回 NCHW 排列的数据
fn scrfd_input(image: &RgbImage) -> (Vec<f32>, Letterbox) {
    let (width, height) = image.dimensions();
    let scale = SCRFD_INPUT_SIZE as f32 / width.max(height) as f32;
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad_x = (SCRFD_INPUT_SIZE - new_w) / 2;
    let pad_y = (SCRFD_INPUT_SIZE - new_h) / 2;
    let mut canvas = RgbImage::from_pixel(SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE, image::Rgb([128; 3]));
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    let letterbox = Letterbox { scale, pad_x: pad_x as f32, pad_y: pad_y as f32 };
    (planar(&canvas, SCRFD_MEAN, SCRFD_STD), letterbox)
}

/// RGB 图片转为 `(p - mean) / std` 的 CHW 数据
fn planar(image: &RgbImage, mean: f32, std: f32) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0; plane * 3];
    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = (pixel[c] as f32 - mean) / std;
        }
    }
    data
}

/// 解码一个步长的检测结果，坐标映射回原图
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: u32,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<(BoundingBox, f32)> {
    let grid = (SCRFD_INPUT_SIZE / stride) as usize;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let stride = stride as f32;

    (0..anchors.min(scores.len()))
        .filter(|&idx| scores[idx] > threshold && idx * 4 + 3 < bboxes.len())
        .map(|idx| {
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * stride;
            let cy = (cell / grid) as f32 * stride;
            let d = &bboxes[idx * 4..idx * 4 + 4];

            let x1 = (cx - d[0] * stride - letterbox.pad_x) / letterbox.scale;
            let y1 = (cy - d[1] * stride - letterbox.pad_y) / letterbox.scale;
            let x2 = (cx + d[2] * stride - letterbox.pad_x) / letterbox.scale;
            let y2 = (cy + d[3] * stride - letterbox.pad_y) / letterbox.scale;
            (BoundingBox { x: x1, y: y1, width: x2 - x1, height: y2 - y1 }, scores[idx])
        })
        .collect()
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}

/// 非极大值抑制，结果按置信度降序
fn nms(mut detections: Vec<(BoundingBox, f32)>, threshold: f32) -> Vec<(BoundingBox, f32)> {
    detections.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut keep: Vec<(BoundingBox, f32)> = vec![];
    for det in detections {
        if keep.iter().all(|k| iou(&k.0, &det.0) <= threshold) {
            keep.push(det);
        }
    }
    keep
}

/// 以人脸框中心裁剪正方形区域并缩放到 112x112，框完全在图片外时返回 `None`
fn crop_face(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (width, height) = image.dimensions();
    let side = bbox.width.max(bbox.height);
    let cx = bbox.x + bbox.width / 2.0;
    let cy = bbox.y + bbox.height / 2.0;

    let x1 = (cx - side / 2.0).max(0.0) as u32;
    let y1 = (cy - side / 2.0).max(0.0) as u32;
    let x2 = ((cx + side / 2.0).max(0.0) as u32).min(width);
    let y2 = ((cy + side / 2.0).max(0.0) as u32).min(height);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    let crop = imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image();
    Some(imageops::resize(&crop, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, FilterType::Triangle))
}
