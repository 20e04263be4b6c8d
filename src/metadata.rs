use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FaceSearchError, Result};

/// 生成人脸记录的名称：`<原始文件名>_face<n>`
pub fn source_filename(original_filename: &str, face_index: u32) -> String {
    format!("{original_filename}_face{face_index}")
}

/// 一条人脸记录，创建后不再修改
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRecord {
    /// 向量 ID
    pub id: u64,
    /// 归一化后的特征向量
    pub embedding: Vec<f32>,
    pub source_filename: String,
    pub original_filename: String,
    /// 在原图中的序号，从 1 开始
    pub face_index: u32,
}

/// 元数据文件中保存的字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceMetadata {
    pub original_filename: String,
    pub face_index: u32,
}

/// 一条记录的完整元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef<'a> {
    pub source_filename: &'a str,
    pub original_filename: &'a str,
    pub face_index: u32,
}

/// 与索引逐位置对应的元数据
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataStore {
    filenames: Vec<String>,
    faces: Vec<FaceMetadata>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// 追加一条记录，返回其位置
    pub fn push(&mut self, original_filename: &str, face_index: u32) -> u64 {
        let id = self.faces.len() as u64;
        self.filenames.push(source_filename(original_filename, face_index));
        self.faces.push(FaceMetadata {
            original_filename: original_filename.to_owned(),
            face_index,
        });
        id
    }

    pub fn record_at(&self, id: u64) -> Option<RecordRef<'_>> {
        let id = usize::try_from(id).ok()?;
        let face = self.faces.get(id)?;
        Some(RecordRef {
            source_filename: &self.filenames[id],
            original_filename: &face.original_filename,
            face_index: face.face_index,
        })
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    pub fn iter(&self) -> impl Iterator<Item = RecordRef<'_>> {
        self.filenames.iter().zip(&self.faces).map(|(name, face)| RecordRef {
            source_filename: name,
            original_filename: &face.original_filename,
            face_index: face.face_index,
        })
    }

    /// 写入文件名数组和人脸元数据数组
    pub fn persist(
        &self,
        filenames_path: impl AsRef<Path>,
        metadata_path: impl AsRef<Path>,
    ) -> Result<()> {
        write_json(filenames_path.as_ref(), &self.filenames)?;
        write_json(metadata_path.as_ref(), &self.faces)?;
        Ok(())
    }

    /// 读取两个元数据文件，并检查两者是否对齐
    pub fn load(
        filenames_path: impl AsRef<Path>,
        metadata_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let filenames: Vec<String> = read_json(filenames_path.as_ref())?;
        let faces: Vec<FaceMetadata> = read_json(metadata_path.as_ref())?;

        if filenames.len() != faces.len() {
            return Err(FaceSearchError::LengthMismatch {
                what: "filenames and face metadata",
                expected: faces.len(),
                actual: filenames.len(),
            });
        }
        for (i, (name, face)) in filenames.iter().zip(&faces).enumerate() {
            if *name != source_filename(&face.original_filename, face.face_index) {
                let reason = format!(
                    "record {i} is named {name:?} but points at face {} of {:?}",
                    face.face_index, face.original_filename
                );
                return Err(FaceSearchError::corrupt(filenames_path.as_ref(), reason));
            }
        }

        Ok(Self { filenames, faces })
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| FaceSearchError::corrupt(path, e.to_string()))
}
