use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::task::spawn_blocking;

use crate::catalog::Catalog;
use crate::cli::SubCommandExtend;
use crate::config::{ExtractorOptions, PreprocessOptions, SearchOptions};
use crate::extractor::load_extractor;
use crate::query::{QueryService, QuerySettings};
use crate::{Opts, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub preprocess: PreprocessOptions,
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub addr: String,
    /// 上传图片的临时目录，默认使用系统临时目录
    #[arg(long, value_name = "DIR")]
    pub upload_dir: Option<PathBuf>,
    /// 单个请求的超时时间，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub request_timeout: u64,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let conf_dir = opts.conf_dir.clone();
        let catalog = match spawn_blocking(move || Catalog::open(&conf_dir)).await? {
            Ok(catalog) => catalog,
            Err(e) if e.is_fatal() => {
                return Err(anyhow::Error::new(e).context("索引损坏或与当前版本不兼容，拒绝启动"));
            }
            Err(e) => return Err(e.into()),
        };
        if catalog.is_none() {
            warn!("{} 中没有索引，请先运行 ingest 后调用 /reload", opts.conf_dir.path().display());
        }

        let extractor = load_extractor(&opts.conf_dir, &self.extractor)?;

        if let Some(dir) = &self.upload_dir {
            tokio::fs::create_dir_all(dir).await?;
        }

        let settings = QuerySettings {
            preprocessor: (&self.preprocess).into(),
            dataset_dir: self.search.dataset_dir.clone(),
            top_k: self.search.k,
            upload_dir: self.upload_dir.clone(),
        };
        let service = QueryService::new(catalog, extractor, settings);

        // 创建应用状态
        let state = server::AppState::new(service, opts.conf_dir.clone());

        // 创建应用
        let app = server::create_app(state, Duration::from_secs(self.request_timeout));

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
