#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;

use facesearch::error::{FaceSearchError, Result};
use facesearch::{BoundingBox, FaceCrop, FaceExtractor};
use image::{ImageFormat, Rgb, RgbImage};
use rstest::fixture;
use tempfile::TempDir;

pub const RED: [u8; 3] = [220, 20, 20];
pub const GREEN: [u8; 3] = [20, 200, 40];
pub const BLUE: [u8; 3] = [30, 40, 210];

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// 把纯色色块当作人脸的确定性提取器
///
/// 每种颜色是一张人脸，按在图片中首次出现的顺序返回；
/// 特征向量为 `[r, g, b, 255]`，相同颜色的相似度为 1。
#[derive(Default)]
pub struct ColorBlobExtractor {
    /// 遇到该颜色时返回提取错误
    pub fail_on: Option<[u8; 3]>,
    /// 特征向量额外补零的维度
    pub extra_dims: usize,
}

impl ColorBlobExtractor {
    pub fn failing_on(color: [u8; 3]) -> Self {
        Self { fail_on: Some(color), ..Default::default() }
    }
}

impl FaceExtractor for ColorBlobExtractor {
    fn model_name(&self) -> &str {
        "color-blob"
    }

    fn detect_faces(&self, image: &RgbImage) -> Result<Vec<FaceCrop>> {
        let mut blobs: Vec<(Rgb<u8>, u32, u32, u32, u32)> = vec![];
        for (x, y, pixel) in image.enumerate_pixels() {
            if is_background(pixel) {
                continue;
            }
            match blobs.iter_mut().find(|b| b.0 == *pixel) {
                Some(b) => {
                    b.1 = b.1.min(x);
                    b.2 = b.2.min(y);
                    b.3 = b.3.max(x);
                    b.4 = b.4.max(y);
                }
                None => blobs.push((*pixel, x, y, x, y)),
            }
        }

        blobs
            .into_iter()
            .map(|(color, x1, y1, x2, y2)| {
                if self.fail_on == Some(color.0) {
                    return Err(FaceSearchError::Extraction(format!("refusing color {:?}", color.0)));
                }
                let crop = image::imageops::crop_imm(image, x1, y1, x2 - x1 + 1, y2 - y1 + 1).to_image();
                let bbox = BoundingBox {
                    x: x1 as f32,
                    y: y1 as f32,
                    width: (x2 - x1 + 1) as f32,
                    height: (y2 - y1 + 1) as f32,
                };
                Ok(FaceCrop { image: crop, bbox, confidence: 1.0 })
            })
            .collect()
    }

    fn embed(&self, face: &FaceCrop) -> Result<Vec<f32>> {
        let pixel = face
            .image
            .pixels()
            .find(|p| !is_background(p))
            .ok_or_else(|| FaceSearchError::Extraction("empty crop".into()))?;
        let mut embedding = vec![pixel[0] as f32, pixel[1] as f32, pixel[2] as f32, 255.0];
        embedding.resize(4 + self.extra_dims, 0.0);
        Ok(embedding)
    }
}

fn is_background(pixel: &Rgb<u8>) -> bool {
    pixel.0.iter().all(|&c| c >= 240)
}

/// 白底图片，每种颜色画一个 10x10 的方块
pub fn blob_image(colors: &[[u8; 3]]) -> RgbImage {
    let width = 20 * colors.len().max(1) as u32 + 10;
    let mut image = RgbImage::from_pixel(width, 24, BACKGROUND);
    for (i, color) in colors.iter().enumerate() {
        let x0 = 10 + 20 * i as u32;
        for x in x0..x0 + 10 {
            for y in 7..17 {
                image.put_pixel(x, y, Rgb(*color));
            }
        }
    }
    image
}

/// PNG 编码，文件格式由内容判断，与后缀名无关
pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut buf = Cursor::new(vec![]);
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

pub fn write_image(path: impl AsRef<Path>, colors: &[[u8; 3]]) {
    std::fs::write(path, png_bytes(&blob_image(colors))).unwrap();
}

/// A.jpg 两张人脸，B.jpg 一张，C.jpg 没有人脸
#[fixture]
pub fn dataset() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_image(dir.path().join("A.jpg"), &[RED, GREEN]);
    write_image(dir.path().join("B.jpg"), &[BLUE]);
    write_image(dir.path().join("C.jpg"), &[]);
    dir
}
