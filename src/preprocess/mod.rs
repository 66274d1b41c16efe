//! 前処理モジュール
//!
//! スキャンしたファイルを解析用ペイロードに変換する（ネットワーク呼び出し前に完結）。
//! - 画像: 縮小・JPEG再圧縮（rayon で並列）
//! - 動画: フレーム抽出（順次）
//! - テキスト: そのまま読み込み
//!
//! 失敗した素材も捨てずに error 状態のワークアイテムとして返す。

pub mod image;
pub mod video;

pub use self::image::{compress_image_file, scaled_dimensions, ImageOptions};
pub use self::video::{extract_frames, frame_timestamps, FfmpegBackend, MediaBackend, VideoOptions};

use crate::config::Config;
use crate::error::{Result, StockMetaError};
use crate::items::{Payload, WorkItem};
use crate::scanner::ScannedFile;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use stock_meta_common::ContentKind;
use tracing::{info, warn};

/// 前処理設定
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreprocessOptions {
    pub image: ImageOptions,
    pub video: VideoOptions,
}

impl From<&Config> for PreprocessOptions {
    fn from(config: &Config) -> Self {
        let image = ImageOptions {
            max_dimension: config.max_image_dimension,
            jpeg_quality: config.jpeg_quality,
        };
        Self {
            image,
            video: VideoOptions {
                frame_count: config.video_frame_count,
                seek_timeout: config.seek_timeout(),
                image,
                ..Default::default()
            },
        }
    }
}

fn read_text(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Err(StockMetaError::NotAnalyzable(path.display().to_string()));
    }
    Ok(text)
}

/// ファイル群をワークアイテムに変換（入力順を維持）
///
/// # Arguments
/// * `files` - スキャン結果
/// * `options` - 圧縮・フレーム抽出設定
/// * `backend` - 動画用メディアバックエンド
/// * `on_progress` - 進捗コールバック (current, total, file_name)
pub async fn prepare_items<B, F>(
    files: &[ScannedFile],
    options: &PreprocessOptions,
    backend: &B,
    mut on_progress: F,
) -> Vec<WorkItem>
where
    B: MediaBackend + ?Sized,
    F: FnMut(usize, usize, &str),
{
    let total = files.len();

    // 画像は CPU バウンドなので先にまとめて並列処理
    let mut images: HashMap<usize, Result<String>> = files
        .par_iter()
        .enumerate()
        .filter(|(_, file)| file.kind == ContentKind::Image)
        .map(|(i, file)| (i, compress_image_file(&file.path, &options.image)))
        .collect();

    let mut items = Vec::with_capacity(total);
    for (i, file) in files.iter().enumerate() {
        on_progress(i + 1, total, &file.file_name);

        let prepared = match file.kind {
            ContentKind::Image => images
                .remove(&i)
                .unwrap_or_else(|| Err(StockMetaError::ImageLoad(file.file_name.clone())))
                .map(|data_uri| Payload::Image { data_uri }),
            ContentKind::Video => extract_frames(backend, &file.path, &options.video)
                .await
                .map(|frames| Payload::Video { frames }),
            ContentKind::Text => read_text(&file.path).map(|text| Payload::Text { text, title: None }),
        };

        items.push(match prepared {
            Ok(payload) => WorkItem::new(&file.file_name, payload),
            Err(e) => {
                warn!(file = %file.file_name, error = %e, "preprocessing failed");
                WorkItem::rejected(&file.file_name, file.kind, e.to_string())
            }
        });
    }

    info!(total, rejected = items.iter().filter(|i| !i.payload().is_analyzable()).count(), "preprocessing finished");
    items
}
