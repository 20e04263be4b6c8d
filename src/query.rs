use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use log::{debug, error, info, warn};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::catalog::Catalog;
use crate::error::{FaceSearchError, Result};
use crate::extractor::{FaceExtractor, extract_embeddings};
use crate::metrics::{self, Outcome};
use crate::preprocess::Preprocessor;

/// 查询参数，服务启动后不再变化
#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub preprocessor: Preprocessor,
    /// 覆盖清单中记录的数据集目录
    pub dataset_dir: Option<PathBuf>,
    pub top_k: usize,
    /// 上传文件的临时目录，默认使用系统临时目录
    pub upload_dir: Option<PathBuf>,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self { preprocessor: Preprocessor::default(), dataset_dir: None, top_k: 5, upload_dir: None }
    }
}

/// 一次上传
#[derive(Debug, Clone, Copy)]
pub struct Upload<'a> {
    pub file_name: Option<&'a str>,
    pub data: &'a [u8],
}

/// 一条匹配结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// 排名，从 1 开始
    pub rank: usize,
    pub face_record_id: u64,
    /// 人脸记录名称，如 `A.jpg_face1`
    pub filename: String,
    pub original_filename: String,
    /// 原始内积，即余弦相似度
    pub similarity: f32,
    /// 匹配图片在数据集中的路径
    pub path: PathBuf,
}

/// 查询结果
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Matches(Vec<QueryResult>),
    /// 查询图片中没有检测到人脸，不执行搜索
    NoFace,
}

impl QueryOutcome {
    pub fn into_results(self) -> Vec<QueryResult> {
        match self {
            Self::Matches(results) => results,
            Self::NoFace => vec![],
        }
    }
}

/// 查询服务，持有只读的索引快照
pub struct QueryService {
    catalog: Option<Catalog>,
    extractor: Arc<dyn FaceExtractor>,
    settings: QuerySettings,
}

impl QueryService {
    pub fn new(catalog: Option<Catalog>, extractor: Arc<dyn FaceExtractor>, settings: QuerySettings) -> Self {
        match &catalog {
            Some(catalog) => {
                let model = &catalog.manifest().model;
                if model != extractor.model_name() {
                    warn!("索引使用的模型 {} 与当前模型 {} 不一致", model, extractor.model_name());
                }
                metrics::set_catalog_faces(catalog.len());
            }
            None => {
                warn!("没有找到索引，搜索将不可用");
                metrics::set_catalog_faces(0);
            }
        }
        Self { catalog, extractor, settings }
    }

    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.catalog.is_some()
    }

    pub fn total_faces(&self) -> usize {
        self.catalog.as_ref().map_or(0, Catalog::len)
    }

    pub fn extractor(&self) -> &Arc<dyn FaceExtractor> {
        &self.extractor
    }

    pub fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    /// 数据集目录，优先使用命令行参数
    pub fn dataset_dir(&self) -> Option<&Path> {
        self.settings
            .dataset_dir
            .as_deref()
            .or_else(|| self.catalog.as_ref().map(|c| c.manifest().dataset_dir.as_path()))
    }

    /// 搜索上传的图片，上传内容只在本次调用期间存在于临时文件中
    pub fn search_upload(&self, upload: Option<Upload<'_>>) -> Result<QueryOutcome> {
        let upload = upload.ok_or_else(|| FaceSearchError::InvalidRequest("No file uploaded".into()))?;
        let name = upload.file_name.unwrap_or("<unnamed>");
        info!("正在搜索上传图片 {} ({} 字节)", name, upload.data.len());

        let start = Instant::now();
        let result = self.ready_catalog().and_then(|_| {
            let mut file = self.temp_file()?;
            file.write_all(upload.data)?;
            file.flush()?;
            self.search_file(file.path())
        });
        let elapsed = start.elapsed().as_secs_f32();

        match &result {
            Ok(QueryOutcome::Matches(results)) => {
                metrics::observe_search(Outcome::Matched, elapsed);
                if let Some(top) = results.first() {
                    metrics::observe_top_score(top.similarity);
                }
                info!("{}: {} 个结果，耗时 {:.3}s", name, results.len(), elapsed);
            }
            Ok(QueryOutcome::NoFace) => {
                metrics::observe_search(Outcome::NoFace, elapsed);
                info!("{}: 没有检测到人脸", name);
            }
            Err(e) => {
                metrics::observe_search(Outcome::Error, elapsed);
                error!("搜索 {} 失败: {}", name, e);
            }
        }
        result
    }

    /// 搜索一个图片文件
    pub fn search_file(&self, path: &Path) -> Result<QueryOutcome> {
        self.ready_catalog()?;
        let image = self.settings.preprocessor.load(path).map_err(|e| match e {
            FaceSearchError::Decode { .. } => FaceSearchError::Extraction(e.to_string()),
            e => e,
        })?;
        self.search_image(&image)
    }

    /// 只使用检测到的第一张人脸进行搜索
    pub fn search_image(&self, image: &RgbImage) -> Result<QueryOutcome> {
        let catalog = self.ready_catalog()?;

        let embeddings = extract_embeddings(self.extractor.as_ref(), image, Some(1))?;
        let Some(query) = embeddings.first() else {
            return Ok(QueryOutcome::NoFace);
        };

        let neighbors = catalog
            .index()
            .search(query, self.settings.top_k)
            .map_err(|e| FaceSearchError::Search(e.to_string()))?;
        debug!("搜索得到 {} 个近邻", neighbors.len());

        let dataset_dir = self.dataset_dir().unwrap_or(Path::new(""));
        let results = neighbors
            .into_iter()
            .enumerate()
            .map(|(i, neighbor)| {
                let record = catalog.metadata().record_at(neighbor.id).ok_or_else(|| {
                    FaceSearchError::Search(format!("no metadata for face record {}", neighbor.id))
                })?;
                Ok(QueryResult {
                    rank: i + 1,
                    face_record_id: neighbor.id,
                    filename: record.source_filename.to_owned(),
                    original_filename: record.original_filename.to_owned(),
                    similarity: neighbor.score,
                    path: dataset_dir.join(record.original_filename),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(QueryOutcome::Matches(results))
    }

    /// 数据集根目录下名为 `name` 的文件，不允许访问子目录或上级目录
    pub fn dataset_file(&self, name: &str) -> Result<PathBuf> {
        let not_found = || FaceSearchError::NotFound(name.to_owned());
        let mut components = Path::new(name).components();
        let single = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single || name.contains(['/', '\\']) {
            return Err(not_found());
        }
        let path = self.dataset_dir().ok_or_else(not_found)?.join(name);
        if path.is_file() { Ok(path) } else { Err(not_found()) }
    }

    fn ready_catalog(&self) -> Result<&Catalog> {
        match &self.catalog {
            None => Err(FaceSearchError::Search("index not loaded".into())),
            Some(catalog) if catalog.is_empty() => Err(FaceSearchError::Search("index is empty".into())),
            Some(catalog) => Ok(catalog),
        }
    }

    fn temp_file(&self) -> Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("query-");
        let file = match &self.settings.upload_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file)
    }
}
