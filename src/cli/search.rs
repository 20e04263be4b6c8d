use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::task::spawn_blocking;

use crate::catalog::Catalog;
use crate::cli::SubCommandExtend;
use crate::config::{ExtractorOptions, Opts, PreprocessOptions, SearchOptions};
use crate::extractor::load_extractor;
use crate::query::{QueryOutcome, QueryResult, QueryService, QuerySettings};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub preprocess: PreprocessOptions,
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let extractor = load_extractor(&opts.conf_dir, &self.extractor)?;
        let settings = QuerySettings {
            preprocessor: (&self.preprocess).into(),
            dataset_dir: self.search.dataset_dir.clone(),
            top_k: self.search.k,
            upload_dir: None,
        };
        let conf_dir = opts.conf_dir.clone();
        let image = self.image.clone();

        let outcome = spawn_blocking(move || -> Result<QueryOutcome> {
            let catalog = Catalog::open(&conf_dir)?;
            let service = QueryService::new(catalog, extractor, settings);
            Ok(service.search_file(&image)?)
        })
        .await??;

        if outcome == QueryOutcome::NoFace {
            eprintln!("没有检测到人脸");
        }
        print_result(&outcome.into_results(), &self.output_format)
    }
}

fn print_result(result: &[QueryResult], format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for r in result {
                println!("{}\t{:.4}\t{}\t{}", r.rank, r.similarity, r.filename, r.path.display());
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    Json,
    Table,
}
