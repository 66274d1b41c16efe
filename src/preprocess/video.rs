//! 動画フレーム抽出
//!
//! 再生時間を両端を除いて等間隔に区切り、各時刻のフレームを縮小JPEGとして取り出す。
//! サンプリング時刻は `duration * i / (n + 1)`（i = 1..=n）。
//!
//! メディア操作は [`MediaBackend`] 経由で行い、既定実装は ffprobe/ffmpeg を呼び出す。
//! 各シークには個別のタイムアウトがあり、作業ディレクトリは成功・失敗を問わず破棄される。

use super::image::{downscale, encode_jpeg_data_uri, ImageOptions};
use crate::error::{Result, StockMetaError};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// 動画ファイルサイズの上限（MB）
pub const MAX_VIDEO_SIZE_MB: u64 = 50;

/// フレーム抽出設定
#[derive(Debug, Clone, PartialEq)]
pub struct VideoOptions {
    pub frame_count: usize,
    /// 1回のシーク（フレーム取得）の制限時間
    pub seek_timeout: Duration,
    /// 入力ファイルサイズの上限（バイト）
    pub max_bytes: u64,
    /// 各フレームの縮小・圧縮設定
    pub image: ImageOptions,
}

impl Default for VideoOptions {
    fn default() -> Self {
        Self {
            frame_count: 5,
            seek_timeout: Duration::from_secs(10),
            max_bytes: MAX_VIDEO_SIZE_MB * 1024 * 1024,
            image: ImageOptions::default(),
        }
    }
}

/// 動画のメタデータ取得・フレームキャプチャ
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// コンテナのメタデータから再生時間（秒）を取得。不定なら None
    async fn probe_duration(&self, source: &Path) -> Result<Option<f64>>;

    /// ストリームを末尾まで読んで再生時間を確定させる
    async fn resolve_duration(&self, source: &Path) -> Result<Option<f64>>;

    /// `at_seconds` のフレームを画像ファイルとして `output` に書き出す
    async fn capture_frame(&self, source: &Path, at_seconds: f64, output: &Path) -> Result<()>;
}

/// サンプリング時刻を計算（両端を含まない等間隔）
pub fn frame_timestamps(duration: f64, frame_count: usize) -> Vec<f64> {
    let slots = (frame_count + 1) as f64;
    (1..=frame_count)
        .map(|i| duration * i as f64 / slots)
        .collect()
}

fn usable_duration(duration: Option<f64>) -> Option<f64> {
    duration.filter(|d| d.is_finite() && *d > 0.0)
}

/// 再生時間を確定
///
/// メタデータで不定の場合は末尾までの読み込みで確定を試み、
/// それでも不明なら破損/非対応として失敗する。
pub async fn determine_duration<B: MediaBackend + ?Sized>(
    backend: &B,
    source: &Path,
    wait: Duration,
) -> Result<f64> {
    let name = display_name(source);

    if let Some(duration) = usable_duration(backend.probe_duration(source).await?) {
        return Ok(duration);
    }

    debug!(file = %name, "duration indeterminate, forcing resolution");
    let resolved = match timeout(wait, backend.resolve_duration(source)).await {
        Ok(result) => result?,
        Err(_) => None,
    };

    usable_duration(resolved).ok_or(StockMetaError::VideoDuration(name))
}

/// 動画からフレームを抽出
///
/// 1フレームでも取得に失敗した場合は動画全体を失敗とする。
pub async fn extract_frames<B: MediaBackend + ?Sized>(
    backend: &B,
    source: &Path,
    options: &VideoOptions,
) -> Result<Vec<String>> {
    let size = std::fs::metadata(source)
        .map_err(|_| StockMetaError::FileNotFound(source.display().to_string()))?
        .len();
    if size > options.max_bytes {
        return Err(StockMetaError::FrameExtraction(format!(
            "video file too large: {:.1}MB (max {}MB)",
            size as f64 / (1024.0 * 1024.0),
            options.max_bytes / (1024 * 1024)
        )));
    }

    let duration = determine_duration(backend, source, options.seek_timeout).await?;

    // Drop で作業ディレクトリごと削除される
    let scratch = tempfile::Builder::new()
        .prefix("stock-meta-frames-")
        .tempdir()?;

    let timestamps = frame_timestamps(duration, options.frame_count);
    let mut frames = Vec::with_capacity(timestamps.len());

    for (i, at) in timestamps.into_iter().enumerate() {
        let output = scratch.path().join(format!("frame_{:03}.jpg", i));

        match timeout(options.seek_timeout, backend.capture_frame(source, at, &output)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(StockMetaError::FrameExtraction(format!(
                    "frame {} at {:.2}s: {}",
                    i + 1,
                    at,
                    e
                )))
            }
            Err(_) => {
                return Err(StockMetaError::FrameExtraction(format!(
                    "frame {} at {:.2}s: seek timed out after {}s",
                    i + 1,
                    at,
                    options.seek_timeout.as_secs_f64()
                )))
            }
        }

        let bytes = tokio::fs::read(&output).await.map_err(|e| {
            StockMetaError::FrameExtraction(format!("frame {} was not written: {}", i + 1, e))
        })?;
        let img = image::load_from_memory(&bytes).map_err(|e| {
            StockMetaError::FrameExtraction(format!("frame {} could not be decoded: {}", i + 1, e))
        })?;

        frames.push(encode_jpeg_data_uri(
            &downscale(img, options.image.max_dimension),
            options.image.jpeg_quality,
        )?);
    }

    debug!(file = %display_name(source), frames = frames.len(), duration, "frames extracted");
    Ok(frames)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// ffprobe/ffmpeg を使う既定のバックエンド
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegBackend {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    async fn run(&self, program: &Path, args: &[&OsStr]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                StockMetaError::FrameExtraction(format!("{} could not be started: {}", program.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StockMetaError::FrameExtraction(format!(
                "{} failed (code {:?}): {}",
                program.display(),
                output.status.code(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// ffprobe の出力から秒数を取り出す（"N/A" は不定）
fn parse_seconds(line: &str) -> Option<f64> {
    line.trim().parse::<f64>().ok()
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    async fn probe_duration(&self, source: &Path) -> Result<Option<f64>> {
        let stdout = self
            .run(
                &self.ffprobe,
                &[
                    OsStr::new("-v"),
                    OsStr::new("error"),
                    OsStr::new("-show_entries"),
                    OsStr::new("format=duration"),
                    OsStr::new("-of"),
                    OsStr::new("default=noprint_wrappers=1:nokey=1"),
                    source.as_os_str(),
                ],
            )
            .await?;

        Ok(stdout.lines().find_map(parse_seconds))
    }

    async fn resolve_duration(&self, source: &Path) -> Result<Option<f64>> {
        // 全パケットのタイムスタンプを読み、最大値を再生時間とみなす
        let stdout = self
            .run(
                &self.ffprobe,
                &[
                    OsStr::new("-v"),
                    OsStr::new("error"),
                    OsStr::new("-select_streams"),
                    OsStr::new("v:0"),
                    OsStr::new("-show_entries"),
                    OsStr::new("packet=pts_time"),
                    OsStr::new("-of"),
                    OsStr::new("csv=p=0"),
                    source.as_os_str(),
                ],
            )
            .await?;

        Ok(stdout
            .lines()
            .filter_map(parse_seconds)
            .reduce(f64::max))
    }

    async fn capture_frame(&self, source: &Path, at_seconds: f64, output: &Path) -> Result<()> {
        let at = format!("{:.3}", at_seconds);
        self.run(
            &self.ffmpeg,
            &[
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-ss"),
                OsStr::new(&at),
                OsStr::new("-i"),
                source.as_os_str(),
                OsStr::new("-frames:v"),
                OsStr::new("1"),
                OsStr::new("-q:v"),
                OsStr::new("2"),
                OsStr::new("-y"),
                output.as_os_str(),
            ],
        )
        .await?;

        if !output.exists() {
            warn!(at = %at, "ffmpeg produced no frame");
            return Err(StockMetaError::FrameExtraction(format!(
                "no frame decoded at {}s",
                at
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_timestamps_exclude_endpoints() {
        let ts = frame_timestamps(12.0, 5);
        assert_eq!(ts, vec![2.0, 4.0, 6.0, 8.0, 10.0]);
    }

    #[test]
    fn test_frame_timestamps_single() {
        assert_eq!(frame_timestamps(10.0, 1), vec![5.0]);
    }

    #[test]
    fn test_usable_duration() {
        assert_eq!(usable_duration(Some(3.5)), Some(3.5));
        assert_eq!(usable_duration(Some(f64::INFINITY)), None);
        assert_eq!(usable_duration(Some(f64::NAN)), None);
        assert_eq!(usable_duration(Some(0.0)), None);
        assert_eq!(usable_duration(None), None);
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("12.480000\n"), Some(12.48));
        assert_eq!(parse_seconds("N/A"), None);
    }
}
