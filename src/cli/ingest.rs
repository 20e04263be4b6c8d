use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::ProgressBar;
use log::info;
use tokio::task::spawn_blocking;

use crate::catalog::Catalog;
use crate::cli::SubCommandExtend;
use crate::config::{ConfDir, ExtractorOptions, Opts, PreprocessOptions};
use crate::extractor::{FaceExtractor, load_extractor};
use crate::ingest::{DEFAULT_SUFFIX, IngestReport, Ingestor};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct IngestCommand {
    #[command(flatten)]
    pub preprocess: PreprocessOptions,
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    /// 数据集目录，只扫描该目录下的文件，不递归子目录
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,
    /// 不显示进度条
    #[arg(long)]
    pub no_progress: bool,
}

impl SubCommandExtend for IngestCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let extractor = load_extractor(&opts.conf_dir, &self.extractor)?;
        let command = self.clone();
        let conf_dir = opts.conf_dir.clone();

        let report = spawn_blocking(move || command.ingest(&conf_dir, extractor.as_ref())).await??;
        print_report(&report);
        Ok(())
    }
}

impl IngestCommand {
    /// 扫描数据集并写入新的一代索引
    pub fn ingest(&self, conf_dir: &ConfDir, extractor: &dyn FaceExtractor) -> Result<IngestReport> {
        let dataset_dir = self
            .path
            .canonicalize()
            .with_context(|| format!("无法访问数据集目录 {}", self.path.display()))?;

        let pb = if self.no_progress {
            ProgressBar::hidden()
        } else {
            ProgressBar::no_length().with_style(pb_style())
        };
        let ingestor = Ingestor::new(extractor, (&self.preprocess).into())
            .suffix(&self.suffix)
            .context("无效的文件后缀名")?
            .progress(pb.clone());

        let output = ingestor.run(&dataset_dir)?;
        pb.finish_and_clear();

        let manifest = Catalog::write(
            conf_dir,
            &output.index,
            &output.metadata,
            extractor.model_name(),
            &dataset_dir,
        )?;
        info!("索引已写入 {} ({})", conf_dir.path().display(), manifest.generation);

        Ok(output.report)
    }
}

fn print_report(report: &IngestReport) {
    for failure in &report.failures {
        eprintln!("[ERR] {} ({}): {}", failure.filename, failure.stage, failure.message);
    }
    println!("Images processed      : {}", report.images_scanned);
    println!("Images with faces     : {}", report.images_with_faces);
    println!("Images failed         : {}", report.failures.len());
    println!("Total faces           : {}", report.total_faces);
    println!("Avg faces per image   : {:.2}", report.average_faces_per_image());
}
