use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, RgbImage};
use log::debug;

use crate::error::{FaceSearchError, Result};

/// 默认的最长边
pub const DEFAULT_MAX_SIZE: u32 = 800;

/// 限制图片尺寸并统一转为 RGB，使检测耗时与原图分辨率无关
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    max_size: u32,
    filter: FilterType,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self { max_size: DEFAULT_MAX_SIZE, filter: FilterType::Lanczos3 }
    }
}

impl Preprocessor {
    pub fn new(max_size: u32, filter: FilterType) -> Self {
        Self { max_size: max_size.max(1), filter }
    }

    /// 从文件读取图片，格式根据内容判断
    pub fn load(&self, path: impl AsRef<Path>) -> Result<RgbImage> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let reader = ImageReader::open(path)?
            .with_guessed_format()
            .map_err(FaceSearchError::Io)?;
        let image = reader
            .decode()
            .map_err(|source| FaceSearchError::Decode { name, source })?;
        Ok(self.prepare(image))
    }

    /// 转为 RGB 并等比缩放
    pub fn prepare(&self, image: DynamicImage) -> RgbImage {
        let rgb = image.into_rgb8();
        let (width, height) = rgb.dimensions();
        let (new_width, new_height) = self.target_size(width, height);
        if (new_width, new_height) == (width, height) {
            return rgb;
        }
        debug!("缩放图片 {width}x{height} -> {new_width}x{new_height}");
        imageops::resize(&rgb, new_width, new_height, self.filter)
    }

    /// 计算缩放后的尺寸，最长边不超过 `max_size`
    pub fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
        let longer = width.max(height);
        if longer <= self.max_size {
            return (width, height);
        }
        let scale = |side: u32| ((side as u64 * self.max_size as u64 / longer as u64) as u32).max(1);
        if width >= height {
            (self.max_size, scale(height))
        } else {
            (scale(width), self.max_size)
        }
    }
}
