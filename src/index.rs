use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use ndarray::{Array2, ArrayView1, Axis};

use crate::error::{FaceSearchError, Result};

/// 索引文件魔数
const MAGIC: &[u8; 8] = b"FACEIDX\0";
/// 索引文件格式版本
const FORMAT_VERSION: u32 = 1;
/// 文件头长度：魔数 + 版本 + 维度 + 数量
const HEADER_LEN: u64 = 8 + 4 + 4 + 8;

/// 一个搜索结果
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    /// 向量 ID，即插入位置
    pub id: u64,
    /// 与查询向量的内积
    pub score: f32,
}

impl Ord for Neighbor {
    /// 按排名比较：分数越高越靠前，分数相同时 ID 越小越靠前
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score).then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

/// 保留排名最高的 k 个结果
pub struct TopKNeighbors {
    heap: BinaryHeap<Reverse<Neighbor>>,
    k: usize,
}

impl TopKNeighbors {
    pub fn new(k: usize) -> Self {
        Self { heap: BinaryHeap::with_capacity(k + 1), k }
    }

    pub fn push(&mut self, neighbor: Neighbor) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(Reverse(neighbor));
        } else if let Some(Reverse(worst)) = self.heap.peek() {
            if neighbor > *worst {
                self.heap.pop();
                self.heap.push(Reverse(neighbor));
            }
        }
    }

    /// 按排名从高到低输出
    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        // Reverse 的升序即 Neighbor 的降序
        self.heap.into_sorted_vec().into_iter().map(|Reverse(n)| n).collect()
    }
}

/// 暴力搜索的内积索引，向量 ID 即其插入位置
#[derive(Debug, Clone)]
pub struct FlatIndex {
    /// 形状为 (ntotal, dimension)，dimension 为 0 表示尚未确定
    vectors: Array2<f32>,
}

impl Default for FlatIndex {
    fn default() -> Self {
        Self { vectors: Array2::zeros((0, 0)) }
    }
}

impl FlatIndex {
    /// 创建一个指定维度的空索引
    pub fn new(dimension: usize) -> Self {
        Self { vectors: Array2::zeros((0, dimension)) }
    }

    /// 向量维度，空索引在第一次添加前为 0
    pub fn dimension(&self) -> usize {
        self.vectors.ncols()
    }

    pub fn len(&self) -> usize {
        self.vectors.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 添加一条向量，返回分配的 ID
    pub fn add(&mut self, vector: &[f32]) -> Result<u64> {
        if self.dimension() == 0 {
            if vector.is_empty() {
                return Err(FaceSearchError::DimensionMismatch { expected: 1, actual: 0 });
            }
            self.vectors = Array2::zeros((0, vector.len()));
        }
        self.check_dimension(vector)?;

        let id = self.len() as u64;
        self.vectors.push_row(ArrayView1::from(vector)).map_err(|_| {
            FaceSearchError::DimensionMismatch { expected: self.dimension(), actual: vector.len() }
        })?;
        Ok(id)
    }

    /// 按顺序批量添加，返回每条向量的 ID
    pub fn add_batch<'a>(
        &mut self,
        vectors: impl IntoIterator<Item = &'a [f32]>,
    ) -> Result<Vec<u64>> {
        vectors.into_iter().map(|v| self.add(v)).collect()
    }

    /// 获取指定 ID 的向量
    pub fn vector(&self, id: u64) -> Option<ArrayView1<'_, f32>> {
        let id = usize::try_from(id).ok()?;
        (id < self.len()).then(|| self.vectors.row(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = ArrayView1<'_, f32>> {
        self.vectors.axis_iter(Axis(0))
    }

    /// 计算查询向量与所有向量的内积，返回分数最高的 k 个结果
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if self.is_empty() {
            return Ok(vec![]);
        }
        self.check_dimension(query)?;

        let scores = self.vectors.dot(&ArrayView1::from(query));
        let mut topk = TopKNeighbors::new(k);
        for (id, &score) in scores.iter().enumerate() {
            topk.push(Neighbor { id: id as u64, score });
        }
        Ok(topk.into_sorted_vec())
    }

    /// 写入索引文件
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        debug!("写入索引 {}: {} x {}", path.display(), self.len(), self.dimension());
        Ok(())
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        writer.write_u32::<LittleEndian>(self.dimension() as u32)?;
        writer.write_u64::<LittleEndian>(self.len() as u64)?;
        for &x in self.vectors.iter() {
            writer.write_f32::<LittleEndian>(x)?;
        }
        Ok(())
    }

    /// 读取索引文件，数量与维度前后矛盾时报错而不是截断
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        if file_len < HEADER_LEN {
            return Err(FaceSearchError::corrupt(path, "file is shorter than the header"));
        }

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(FaceSearchError::corrupt(path, "bad magic"));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(FaceSearchError::corrupt(path, format!("unsupported version {version}")));
        }
        let dimension = reader.read_u32::<LittleEndian>()? as usize;
        let count = reader.read_u64::<LittleEndian>()?;

        if count > 0 && dimension == 0 {
            return Err(FaceSearchError::corrupt(path, format!("{count} vectors of dimension 0")));
        }
        let payload = count
            .checked_mul(dimension as u64)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| FaceSearchError::corrupt(path, "count * dimension overflows"))?;
        if HEADER_LEN + payload != file_len {
            return Err(FaceSearchError::corrupt(
                path,
                format!(
                    "header declares {count} x {dimension} but payload is {} bytes",
                    file_len - HEADER_LEN
                ),
            ));
        }
        let count = usize::try_from(count)
            .map_err(|_| FaceSearchError::corrupt(path, "count does not fit in memory"))?;

        let mut data = vec![0f32; count * dimension];
        reader.read_f32_into::<LittleEndian>(&mut data)?;
        let vectors = Array2::from_shape_vec((count, dimension), data)
            .map_err(|e| FaceSearchError::corrupt(path, e.to_string()))?;

        debug!("读取索引 {}: {} x {}", path.display(), count, dimension);
        Ok(Self { vectors })
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension() {
            return Err(FaceSearchError::DimensionMismatch {
                expected: self.dimension(),
                actual: vector.len(),
            });
        }
        Ok(())
    }
}
