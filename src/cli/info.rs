use anyhow::{Result, bail};
use clap::Parser;
use tokio::task::spawn_blocking;

use crate::catalog::Catalog;
use crate::cli::SubCommandExtend;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct InfoCommand {
    /// 显示前 N 条向量的模长，用于检查归一化
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub norms: usize,
}

impl SubCommandExtend for InfoCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let conf_dir = opts.conf_dir.clone();
        let Some(catalog) = spawn_blocking(move || Catalog::open(&conf_dir)).await?? else {
            bail!("索引不存在: {}", opts.conf_dir.manifest().display());
        };

        let manifest = catalog.manifest();
        println!("Catalog dir      : {}", opts.conf_dir.path().display());
        println!("Generation       : {}", manifest.generation);
        println!("Model            : {}", manifest.model);
        println!("Dataset dir      : {}", manifest.dataset_dir.display());
        println!("Dimension        : {}", manifest.dimension);
        println!("Total faces      : {}", catalog.len());
        println!("Distinct images  : {}", catalog.distinct_images());

        for (i, norm) in catalog.norms(self.norms).iter().enumerate() {
            let name = catalog.metadata().record_at(i as u64).map_or("", |r| r.source_filename);
            println!("norm[{}]          : {:.6}\t{}", i, norm, name);
        }
        Ok(())
    }
}
