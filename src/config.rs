use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use image::imageops::FilterType;

use crate::cli::*;
use crate::preprocess::{DEFAULT_MAX_SIZE, Preprocessor};

static CONF_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
    ProjectDirs::from("", "facesearch", "facesearch")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("facesearch"))
});

fn default_config_dir() -> &'static str {
    CONF_DIR.to_str().unwrap_or("facesearch")
}

#[derive(Parser, Debug, Clone)]
pub struct PreprocessOptions {
    /// 图片最长边的上限，超过时等比缩放
    #[arg(long, value_name = "PIXELS", default_value_t = DEFAULT_MAX_SIZE)]
    pub max_image_size: u32,
    /// 缩放使用的插值方式
    #[arg(long, value_name = "FILTER", default_value = "lanczos3", value_parser = parse_filter)]
    pub resize_filter: FilterType,
}

impl From<&PreprocessOptions> for Preprocessor {
    fn from(opts: &PreprocessOptions) -> Self {
        Preprocessor::new(opts.max_image_size, opts.resize_filter)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ExtractorOptions {
    /// SCRFD 人脸检测模型，默认为 <CATALOG_DIR>/models/det_10g.onnx
    #[arg(long, value_name = "PATH")]
    pub detector_model: Option<PathBuf>,
    /// ArcFace 特征提取模型，默认为 <CATALOG_DIR>/models/w600k_r50.onnx
    #[arg(long, value_name = "PATH")]
    pub recognizer_model: Option<PathBuf>,
    /// 人脸检测置信度阈值
    #[arg(long, value_name = "SCORE", default_value_t = 0.5)]
    pub detect_threshold: f32,
    /// 非极大值抑制的 IoU 阈值
    #[arg(long, value_name = "IOU", default_value_t = 0.4)]
    pub nms_threshold: f32,
    /// 每个推理会话使用的线程数
    #[arg(long, value_name = "N", default_value_t = 2)]
    pub intra_threads: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 返回的结果数量
    #[arg(short, value_name = "K", default_value_t = 5)]
    pub k: usize,
    /// 数据集目录，用于拼接匹配图片的路径，默认使用构建索引时的目录
    #[arg(long, value_name = "DIR")]
    pub dataset_dir: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "facesearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 索引文件目录
    #[arg(short, long = "catalog-dir", default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描数据集目录，提取人脸特征并构建索引
    Ingest(IngestCommand),
    /// 用一张图片搜索相似人脸
    Search(SearchCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
    /// 显示索引信息
    Info(InfoCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回索引清单的路径
    pub fn manifest(&self) -> PathBuf {
        self.path.join("catalog.json")
    }

    /// 返回索引清单的临时路径
    pub fn manifest_tmp(&self) -> PathBuf {
        self.path.join("catalog.json.tmp")
    }

    /// 返回某一代索引所在的目录
    pub fn generation(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// 返回所有已存在的索引代数及其目录，按代数升序
    pub fn all_generations(&self) -> Vec<(u64, PathBuf)> {
        let Ok(entries) = std::fs::read_dir(&self.path) else {
            return vec![];
        };
        let mut generations = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name();
                let n = name.to_str()?.strip_prefix("gen-")?.parse().ok()?;
                Some((n, entry.path()))
            })
            .collect::<Vec<_>>();
        generations.sort_unstable_by_key(|(n, _)| *n);
        generations
    }

    /// 返回下一代索引的名称
    pub fn next_generation(&self) -> String {
        let next = self.all_generations().last().map_or(1, |(n, _)| n + 1);
        generation_name(next)
    }

    /// 返回模型文件目录
    pub fn models(&self) -> PathBuf {
        self.path.join("models")
    }

    pub fn detector_model(&self) -> PathBuf {
        self.models().join("det_10g.onnx")
    }

    pub fn recognizer_model(&self) -> PathBuf {
        self.models().join("w600k_r50.onnx")
    }
}

pub fn generation_name(n: u64) -> String {
    format!("gen-{n:06}")
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

fn parse_filter(s: &str) -> Result<FilterType, String> {
    match s {
        "nearest" => Ok(FilterType::Nearest),
        "triangle" => Ok(FilterType::Triangle),
        "catmull-rom" => Ok(FilterType::CatmullRom),
        "gaussian" => Ok(FilterType::Gaussian),
        "lanczos3" => Ok(FilterType::Lanczos3),
        _ => Err(format!("无效的插值方式: {}", s)),
    }
}
