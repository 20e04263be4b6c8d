use std::fmt;
use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use log::{debug, info, warn};
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use walkdir::WalkDir;

use crate::error::{FaceSearchError, Result};
use crate::extractor::{FaceExtractor, extract_embeddings};
use crate::index::FlatIndex;
use crate::metadata::{FaceRecord, MetadataStore, source_filename};
use crate::preprocess::Preprocessor;
use crate::utils::file_name;

/// 默认扫描的文件后缀名
pub const DEFAULT_SUFFIX: &str = "jpg,jpeg,png";

/// 将逗号分隔的后缀名列表转换为不区分大小写的正则表达式
pub fn suffix_regex(suffix: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(&format!("(?i)^({})$", suffix.replace(',', "|")))
}

/// 单张图片失败的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Read,
    Decode,
    Extraction,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::Decode => "decode",
            Self::Extraction => "extraction",
        };
        f.write_str(s)
    }
}

impl From<&FaceSearchError> for FailureStage {
    fn from(err: &FaceSearchError) -> Self {
        match err {
            FaceSearchError::Io(_) => Self::Read,
            FaceSearchError::Decode { .. } => Self::Decode,
            _ => Self::Extraction,
        }
    }
}

/// 被跳过的图片
#[derive(Debug, Clone, Serialize)]
pub struct ImageFailure {
    pub filename: String,
    pub stage: FailureStage,
    pub message: String,
}

/// 构建统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// 扫描到的图片数量
    pub images_scanned: usize,
    /// 至少检测到一张人脸的图片数量
    pub images_with_faces: usize,
    pub total_faces: usize,
    pub failures: Vec<ImageFailure>,
}

impl IngestReport {
    pub fn average_faces_per_image(&self) -> f32 {
        if self.images_scanned == 0 {
            0.0
        } else {
            self.total_faces as f32 / self.images_scanned as f32
        }
    }
}

/// 构建结果
pub struct IngestOutput {
    pub index: FlatIndex,
    pub metadata: MetadataStore,
    pub report: IngestReport,
}

/// 扫描数据集目录并提取所有人脸特征
pub struct Ingestor<'a> {
    extractor: &'a dyn FaceExtractor,
    preprocessor: Preprocessor,
    suffix: Regex,
    progress: ProgressBar,
}

impl<'a> Ingestor<'a> {
    pub fn new(extractor: &'a dyn FaceExtractor, preprocessor: Preprocessor) -> Self {
        Self {
            extractor,
            preprocessor,
            suffix: suffix_regex(DEFAULT_SUFFIX).expect("default suffix is a valid regex"),
            progress: ProgressBar::hidden(),
        }
    }

    /// 设置扫描的文件后缀名，多个后缀用逗号分隔
    pub fn suffix(mut self, suffix: &str) -> std::result::Result<Self, regex::Error> {
        self.suffix = suffix_regex(suffix)?;
        Ok(self)
    }

    pub fn progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// 列出目录下（不递归）所有符合后缀的图片，按文件名排序
    pub fn scan(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(FaceSearchError::NotFound(format!("dataset directory {}", dir.display())));
        }
        info!("开始扫描目录: {}", dir.display());

        let mut files = vec![];
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(ext) = path.extension() {
                if self.suffix.is_match(&ext.to_string_lossy()) {
                    files.push(path.to_path_buf());
                }
            }
        }
        info!("扫描完成，共 {} 张图片", files.len());
        Ok(files)
    }

    /// 处理一张图片，返回其中每张人脸的归一化特征向量
    pub fn process_image(&self, path: &Path) -> Result<Vec<Vec<f32>>> {
        let image = self.preprocessor.load(path)?;
        let embeddings = extract_embeddings(self.extractor, &image, None)?;
        debug!("{}: {} 张人脸", path.display(), embeddings.len());
        Ok(embeddings)
    }

    /// 处理目录下所有图片，单张图片失败时跳过，不影响其他图片
    pub fn collect(&self, dir: &Path) -> Result<(Vec<FaceRecord>, IngestReport)> {
        let files = self.scan(dir)?;
        self.progress.set_length(files.len() as u64);

        let results = files
            .par_iter()
            .map(|path| {
                let filename = file_name(path);
                let result = self.process_image(path);
                self.progress.inc(1);
                (filename, result)
            })
            .collect::<Vec<_>>();

        let mut report = IngestReport { images_scanned: files.len(), ..Default::default() };
        let mut records = vec![];
        let mut dimension = None;

        for (filename, result) in results {
            let embeddings = match result {
                Ok(embeddings) => embeddings,
                Err(e) => {
                    report.failures.push(failure(filename, FailureStage::from(&e), &e));
                    continue;
                }
            };

            if let Some(first) = embeddings.first() {
                let dim = *dimension.get_or_insert(first.len());
                if let Some(bad) = embeddings.iter().find(|e| e.len() != dim) {
                    let e = FaceSearchError::DimensionMismatch { expected: dim, actual: bad.len() };
                    report.failures.push(failure(filename, FailureStage::Extraction, &e));
                    continue;
                }
                report.images_with_faces += 1;
            }
            for (i, embedding) in embeddings.into_iter().enumerate() {
                let face_index = i as u32 + 1;
                records.push(FaceRecord {
                    id: records.len() as u64,
                    embedding,
                    source_filename: source_filename(&filename, face_index),
                    original_filename: filename.clone(),
                    face_index,
                });
            }
        }
        report.total_faces = records.len();

        Ok((records, report))
    }

    /// 处理目录并构建索引与元数据
    pub fn run(&self, dir: &Path) -> Result<IngestOutput> {
        let (records, report) = self.collect(dir)?;
        let (index, metadata) = build_index(&records)?;

        info!(
            "处理完成: {} 张图片，{} 张人脸，平均每张 {:.2} 张，失败 {} 张",
            report.images_scanned,
            report.total_faces,
            report.average_faces_per_image(),
            report.failures.len()
        );
        if index.is_empty() {
            warn!("没有找到任何人脸，请检查数据集目录和图片文件");
        }

        Ok(IngestOutput { index, metadata, report })
    }
}

/// 按收集顺序将记录批量写入索引与元数据
pub fn build_index(records: &[FaceRecord]) -> Result<(FlatIndex, MetadataStore)> {
    let mut index = FlatIndex::default();
    let ids = index.add_batch(records.iter().map(|r| r.embedding.as_slice()))?;
    let mut metadata = MetadataStore::new();
    for (record, id) in records.iter().zip(ids) {
        let meta_id = metadata.push(&record.original_filename, record.face_index);
        debug_assert_eq!(id, record.id);
        debug_assert_eq!(meta_id, record.id);
    }
    Ok((index, metadata))
}

fn failure(filename: String, stage: FailureStage, err: &FaceSearchError) -> ImageFailure {
    warn!("跳过 {} ({}): {}", filename, stage, err);
    ImageFailure { filename, stage, message: err.to_string() }
}
