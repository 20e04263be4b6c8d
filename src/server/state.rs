use std::sync::Arc;

use log::info;
use tokio::sync::RwLock;
use tokio::task::spawn_blocking;

use crate::catalog::Catalog;
use crate::config::ConfDir;
use crate::error::{FaceSearchError, Result};
use crate::extractor::FaceExtractor;
use crate::query::{QueryService, QuerySettings};

/// 应用状态
pub struct AppState {
    /// 当前的查询服务快照，只在替换时加写锁
    service: RwLock<Arc<QueryService>>,
    /// 索引文件目录
    conf_dir: ConfDir,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(service: QueryService, conf_dir: ConfDir) -> Arc<Self> {
        Arc::new(AppState { service: RwLock::new(Arc::new(service)), conf_dir })
    }

    /// 获取当前快照
    pub async fn service(&self) -> Arc<QueryService> {
        self.service.read().await.clone()
    }

    /// 从磁盘重新加载索引并替换快照，返回新索引中的人脸数量
    pub async fn reload(&self) -> Result<usize> {
        let current = self.service().await;
        let extractor: Arc<dyn FaceExtractor> = current.extractor().clone();
        let settings: QuerySettings = current.settings().clone();
        let conf_dir = self.conf_dir.clone();

        let service = spawn_blocking(move || -> Result<QueryService> {
            let catalog = Catalog::open(&conf_dir)?;
            Ok(QueryService::new(catalog, extractor, settings))
        })
        .await
        .map_err(|e| FaceSearchError::Search(e.to_string()))??;

        let total = service.total_faces();
        *self.service.write().await = Arc::new(service);
        info!("索引已重新加载: {} 张人脸", total);
        Ok(total)
    }
}
