//! 前処理（画像圧縮・動画フレーム抽出・テキスト読み込み）の統合テスト
//!
//! 動画はモックのメディアバックエンドで再生時間とフレームを返す。

use async_trait::async_trait;
use image::{ImageBuffer, ImageFormat, Rgb};
use std::io::Cursor;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use stock_meta::error::{Result, StockMetaError};
use stock_meta::items::Payload;
use stock_meta::preprocess::{extract_frames, prepare_items, MediaBackend, PreprocessOptions, VideoOptions};
use stock_meta::scanner;
use stock_meta_common::{ContentKind, ItemStatus};
use tempfile::tempdir;

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128u8]));
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

/// 再生時間とキャプチャ動作を指定できるモック
struct MockMedia {
    probed: Option<f64>,
    resolved: Option<f64>,
    capture_delay: Option<Duration>,
    captured_at: Mutex<Vec<f64>>,
}

impl MockMedia {
    fn with_duration(duration: f64) -> Self {
        Self {
            probed: Some(duration),
            resolved: None,
            capture_delay: None,
            captured_at: Mutex::new(Vec::new()),
        }
    }

    fn captured(&self) -> Vec<f64> {
        self.captured_at.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaBackend for MockMedia {
    async fn probe_duration(&self, _source: &Path) -> Result<Option<f64>> {
        Ok(self.probed)
    }

    async fn resolve_duration(&self, _source: &Path) -> Result<Option<f64>> {
        Ok(self.resolved)
    }

    async fn capture_frame(&self, _source: &Path, at_seconds: f64, output: &Path) -> Result<()> {
        self.captured_at.lock().unwrap().push(at_seconds);
        if let Some(delay) = self.capture_delay {
            tokio::time::sleep(delay).await;
        }
        std::fs::write(output, png_bytes(1920, 1080))?;
        Ok(())
    }
}

fn fake_video(dir: &Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, vec![0u8; 2048]).unwrap();
    path
}

// =============================================
// フレーム抽出
// =============================================

#[tokio::test]
async fn test_frames_sampled_in_order() {
    let dir = tempdir().expect("Failed to create temp dir");
    let video = fake_video(dir.path(), "clip.mp4");
    let media = MockMedia::with_duration(12.0);

    let frames = extract_frames(&media, &video, &VideoOptions::default()).await.unwrap();

    assert_eq!(frames.len(), 5);
    assert!(frames.iter().all(|f| f.starts_with("data:image/jpeg;base64,")));
    assert_eq!(media.captured(), vec![2.0, 4.0, 6.0, 8.0, 10.0]);
}

#[tokio::test]
async fn test_indeterminate_duration_resolved_by_reading() {
    let dir = tempdir().expect("Failed to create temp dir");
    let video = fake_video(dir.path(), "stream.webm");
    let media = MockMedia {
        probed: Some(f64::INFINITY),
        resolved: Some(8.0),
        ..MockMedia::with_duration(0.0)
    };
    let options = VideoOptions {
        frame_count: 3,
        ..Default::default()
    };

    let frames = extract_frames(&media, &video, &options).await.unwrap();

    assert_eq!(frames.len(), 3);
    assert_eq!(media.captured(), vec![2.0, 4.0, 6.0]);
}

#[tokio::test]
async fn test_unresolvable_duration_fails() {
    let dir = tempdir().expect("Failed to create temp dir");
    let video = fake_video(dir.path(), "broken.webm");
    let media = MockMedia {
        probed: Some(f64::INFINITY),
        resolved: None,
        ..MockMedia::with_duration(0.0)
    };

    let result = extract_frames(&media, &video, &VideoOptions::default()).await;

    assert!(matches!(result, Err(StockMetaError::VideoDuration(name)) if name == "broken.webm"));
    assert!(media.captured().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_seek_timeout_fails_video() {
    let dir = tempdir().expect("Failed to create temp dir");
    let video = fake_video(dir.path(), "slow.mp4");
    let media = MockMedia {
        capture_delay: Some(Duration::from_secs(60)),
        ..MockMedia::with_duration(10.0)
    };
    let options = VideoOptions {
        seek_timeout: Duration::from_secs(1),
        ..Default::default()
    };

    let result = extract_frames(&media, &video, &options).await;

    match result {
        Err(StockMetaError::FrameExtraction(message)) => assert!(message.contains("timed out")),
        other => panic!("expected frame extraction error, got {:?}", other),
    }
    // 最初のフレームで打ち切られる
    assert_eq!(media.captured().len(), 1);
}

#[tokio::test]
async fn test_oversized_video_rejected_before_probe() {
    let dir = tempdir().expect("Failed to create temp dir");
    let video = fake_video(dir.path(), "huge.mov");
    let media = MockMedia::with_duration(10.0);
    let options = VideoOptions {
        max_bytes: 1024,
        ..Default::default()
    };

    let result = extract_frames(&media, &video, &options).await;

    assert!(matches!(result, Err(StockMetaError::FrameExtraction(_))));
    assert!(media.captured().is_empty());
}

// =============================================
// ワークアイテム化
// =============================================

#[tokio::test]
async fn test_prepare_mixed_folder() {
    let dir = tempdir().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("a_photo.png"), png_bytes(2000, 1000)).unwrap();
    fake_video(dir.path(), "b_clip.mp4");
    std::fs::write(dir.path().join("c_story.txt"), "Autumn leaves over a mountain lake").unwrap();

    let files = scanner::scan_folder(dir.path(), false).unwrap();
    let media = MockMedia::with_duration(6.0);
    let mut progress = Vec::new();

    let items = prepare_items(&files, &PreprocessOptions::default(), &media, |current, total, name| {
        progress.push((current, total, name.to_string()));
    })
    .await;

    assert_eq!(items.len(), 3);
    assert_eq!(
        items.iter().map(|i| i.kind()).collect::<Vec<_>>(),
        vec![ContentKind::Image, ContentKind::Video, ContentKind::Text]
    );
    assert!(items.iter().all(|i| i.status() == ItemStatus::Pending));
    assert_eq!(progress.len(), 3);
    assert_eq!(progress[2], (3, 3, "c_story.txt".to_string()));

    match items[1].payload() {
        Payload::Video { frames } => assert_eq!(frames.len(), 5),
        other => panic!("expected video payload, got {:?}", other),
    }
    match items[2].payload() {
        Payload::Text { text, title } => {
            assert!(text.contains("mountain lake"));
            assert!(title.is_none());
        }
        other => panic!("expected text payload, got {:?}", other),
    }
}

#[tokio::test]
async fn test_prepare_rejects_broken_video_only() {
    let dir = tempdir().expect("Failed to create temp dir");
    fake_video(dir.path(), "broken.webm");
    std::fs::write(dir.path().join("photo.png"), png_bytes(64, 64)).unwrap();

    let files = scanner::scan_folder(dir.path(), false).unwrap();
    let media = MockMedia {
        probed: None,
        resolved: Some(f64::INFINITY),
        ..MockMedia::with_duration(0.0)
    };

    let items = prepare_items(&files, &PreprocessOptions::default(), &media, |_, _, _| {}).await;

    let broken = items.iter().find(|i| i.display_name() == "broken.webm").unwrap();
    assert_eq!(broken.status(), ItemStatus::Error);
    assert!(!broken.is_eligible());
    assert!(broken.error().unwrap().contains("duration"));

    let photo = items.iter().find(|i| i.display_name() == "photo.png").unwrap();
    assert!(photo.is_eligible());
}

#[tokio::test]
async fn test_prepare_rejects_blank_text() {
    let dir = tempdir().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("empty.txt"), "\n\n").unwrap();

    let files = scanner::scan_folder(dir.path(), false).unwrap();
    let items = prepare_items(
        &files,
        &PreprocessOptions::default(),
        &MockMedia::with_duration(1.0),
        |_, _, _| {},
    )
    .await;

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status(), ItemStatus::Error);
}
