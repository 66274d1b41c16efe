//! 画像の縮小・JPEG再圧縮
//!
//! 最長辺を上限に収まるよう縦横比を保って縮小し、指定品質のJPEGとして
//! Data URI に変換する。上限より小さい画像は拡大しない。

use crate::error::{Result, StockMetaError};
use base64::{engine::general_purpose::STANDARD, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use std::path::Path;
use tracing::warn;

/// 圧縮設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOptions {
    /// 最長辺の上限（px）
    pub max_dimension: u32,
    /// JPEG品質（1-100）
    pub jpeg_quality: u8,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            max_dimension: 1024,
            jpeg_quality: 85,
        }
    }
}

/// 縮小後のサイズを計算（縦横比維持、拡大はしない）
pub fn scaled_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest == 0 || longest <= max_dimension {
        return (width, height);
    }

    let scale = max_dimension as f64 / longest as f64;
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    (w, h)
}

/// 上限を超える画像のみ縮小
pub fn downscale(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    let (target_w, target_h) = scaled_dimensions(w, h, max_dimension);
    if (target_w, target_h) == (w, h) {
        return img;
    }
    img.resize_exact(target_w, target_h, FilterType::Triangle)
}

/// JPEGにエンコードして Data URI を返す
pub fn encode_jpeg_data_uri(img: &DynamicImage, quality: u8) -> Result<String> {
    // JPEGはアルファを持てない
    let rgb = img.to_rgb8();
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder
        .encode_image(&rgb)
        .map_err(|e| StockMetaError::ImageLoad(format!("JPEG encode failed: {}", e)))?;

    Ok(data_uri("image/jpeg", &buffer))
}

pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Data URI からバイト列を取り出す
pub fn decode_data_uri(uri: &str) -> Option<Vec<u8>> {
    let (_, encoded) = uri.split_once(";base64,")?;
    STANDARD.decode(encoded).ok()
}

/// 画像バイト列を圧縮
///
/// デコードできない場合は元データをそのまま Data URI にして返す。
pub fn compress_image_bytes(bytes: &[u8], mime: &str, options: &ImageOptions) -> String {
    let img = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(e) => {
            warn!(error = %e, "image decode failed, sending original");
            return data_uri(mime, bytes);
        }
    };

    match encode_jpeg_data_uri(&downscale(img, options.max_dimension), options.jpeg_quality) {
        Ok(uri) => uri,
        Err(e) => {
            warn!(error = %e, "image re-encode failed, sending original");
            data_uri(mime, bytes)
        }
    }
}

/// 画像ファイルを読み込んで圧縮
pub fn compress_image_file(path: &Path, options: &ImageOptions) -> Result<String> {
    let bytes = std::fs::read(path)
        .map_err(|e| StockMetaError::ImageLoad(format!("{}: {}", path.display(), e)))?;
    Ok(compress_image_bytes(&bytes, mime_for_path(path), options))
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}
