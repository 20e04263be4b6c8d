use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::ConfDir;
use crate::error::{FaceSearchError, Result};
use crate::index::FlatIndex;
use crate::metadata::MetadataStore;

const FORMAT_VERSION: u32 = 1;

const INDEX_FILE: &str = "faces.index";
const FILENAMES_FILE: &str = "filenames.json";
const METADATA_FILE: &str = "face_metadata.json";

/// 索引清单，指向当前生效的一代索引文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    /// 索引文件所在的子目录名
    pub generation: String,
    /// 提取特征使用的模型
    pub model: String,
    pub dimension: usize,
    pub count: usize,
    /// 构建索引时的数据集目录
    pub dataset_dir: PathBuf,
    pub checksums: Checksums,
}

/// 三个索引文件的 blake3 哈希
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    pub index: String,
    pub filenames: String,
    pub metadata: String,
}

/// 已加载的向量索引及其元数据，加载后只读
#[derive(Debug, Clone)]
pub struct Catalog {
    manifest: Manifest,
    index: FlatIndex,
    metadata: MetadataStore,
}

impl Catalog {
    /// 组合各部分，并检查它们是否一致
    pub fn from_parts(manifest: Manifest, index: FlatIndex, metadata: MetadataStore) -> Result<Self> {
        if index.len() != metadata.len() {
            return Err(FaceSearchError::LengthMismatch {
                what: "index and metadata",
                expected: index.len(),
                actual: metadata.len(),
            });
        }
        if manifest.count != index.len() {
            return Err(FaceSearchError::LengthMismatch {
                what: "manifest and index",
                expected: manifest.count,
                actual: index.len(),
            });
        }
        if manifest.dimension != index.dimension() {
            return Err(FaceSearchError::DimensionMismatch {
                expected: manifest.dimension,
                actual: index.dimension(),
            });
        }
        Ok(Self { manifest, index, metadata })
    }

    /// 打开当前生效的索引，没有索引时返回 `None`
    pub fn open(conf_dir: &ConfDir) -> Result<Option<Self>> {
        let manifest_path = conf_dir.manifest();
        if !manifest_path.exists() {
            return Ok(None);
        }

        let manifest: Manifest = serde_json::from_reader(BufReader::new(File::open(&manifest_path)?))
            .map_err(|e| FaceSearchError::corrupt(&manifest_path, e.to_string()))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(FaceSearchError::corrupt(
                &manifest_path,
                format!("unsupported format version {}", manifest.format_version),
            ));
        }

        let dir = conf_dir.generation(&manifest.generation);
        info!("加载索引: {}", dir.display());

        let index_path = dir.join(INDEX_FILE);
        let filenames_path = dir.join(FILENAMES_FILE);
        let metadata_path = dir.join(METADATA_FILE);
        verify_checksum(&index_path, &manifest.checksums.index)?;
        verify_checksum(&filenames_path, &manifest.checksums.filenames)?;
        verify_checksum(&metadata_path, &manifest.checksums.metadata)?;

        let index = FlatIndex::load(&index_path)?;
        let metadata = MetadataStore::load(&filenames_path, &metadata_path)?;
        let catalog = Self::from_parts(manifest, index, metadata)?;

        info!(
            "索引加载完成: {} 张人脸，维度 {}",
            catalog.len(),
            catalog.manifest.dimension
        );
        Ok(Some(catalog))
    }

    /// 将索引写入新的一代目录，然后原子地替换清单
    ///
    /// 正在读取旧清单的进程仍能读到完整的上一代文件
    pub fn write(
        conf_dir: &ConfDir,
        index: &FlatIndex,
        metadata: &MetadataStore,
        model: &str,
        dataset_dir: &Path,
    ) -> Result<Manifest> {
        if index.len() != metadata.len() {
            return Err(FaceSearchError::LengthMismatch {
                what: "index and metadata",
                expected: index.len(),
                actual: metadata.len(),
            });
        }

        fs::create_dir_all(conf_dir.path())?;
        let previous = read_manifest(conf_dir).map(|m| m.generation);

        let generation = conf_dir.next_generation();
        let dir = conf_dir.generation(&generation);
        fs::create_dir(&dir)?;
        debug!("写入索引文件: {}", dir.display());

        let index_path = dir.join(INDEX_FILE);
        let filenames_path = dir.join(FILENAMES_FILE);
        let metadata_path = dir.join(METADATA_FILE);
        index.persist(&index_path)?;
        metadata.persist(&filenames_path, &metadata_path)?;
        sync_dir(&dir)?;

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            generation: generation.clone(),
            model: model.to_owned(),
            dimension: index.dimension(),
            count: index.len(),
            dataset_dir: dataset_dir.to_path_buf(),
            checksums: Checksums {
                index: file_checksum(&index_path)?,
                filenames: file_checksum(&filenames_path)?,
                metadata: file_checksum(&metadata_path)?,
            },
        };

        let tmp = conf_dir.manifest_tmp();
        {
            let mut file = File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, &manifest)?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&tmp, conf_dir.manifest())?;
        sync_dir(conf_dir.path())?;
        info!("索引已切换到 {}", generation);

        prune_generations(conf_dir, &generation, previous.as_deref());
        Ok(manifest)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// 包含至少一张人脸的原图数量
    pub fn distinct_images(&self) -> usize {
        self.metadata.iter().map(|r| r.original_filename).collect::<HashSet<_>>().len()
    }

    /// 前 n 条向量的模长，用于检查归一化
    pub fn norms(&self, n: usize) -> Vec<f32> {
        self.index.iter().take(n).map(|v| v.dot(&v).sqrt()).collect()
    }
}

fn read_manifest(conf_dir: &ConfDir) -> Option<Manifest> {
    let file = File::open(conf_dir.manifest()).ok()?;
    serde_json::from_reader(BufReader::new(file)).ok()
}

/// 删除当前和上一代以外的索引目录
fn prune_generations(conf_dir: &ConfDir, current: &str, previous: Option<&str>) {
    for (_, dir) in conf_dir.all_generations() {
        let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name == current || Some(name) == previous {
            continue;
        }
        debug!("删除旧索引: {}", dir.display());
        if let Err(e) = fs::remove_dir_all(&dir) {
            warn!("删除旧索引 {} 失败: {}", dir.display(), e);
        }
    }
}

fn file_checksum(path: &Path) -> Result<String> {
    Ok(blake3::hash(&fs::read(path)?).to_hex().to_string())
}

fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    let actual = file_checksum(path)?;
    if actual != expected {
        return Err(FaceSearchError::corrupt(path, "checksum mismatch"));
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
