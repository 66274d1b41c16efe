use crate::error::{Result, StockMetaError};
use std::path::{Path, PathBuf};
use stock_meta_common::ContentKind;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub kind: ContentKind,
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "avi", "mkv"];
const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

/// 拡張子からコンテンツ種別を判定（大文字小文字は区別しない）
pub fn kind_for_path(path: &Path) -> Option<ContentKind> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(ContentKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(ContentKind::Video)
    } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        Some(ContentKind::Text)
    } else {
        None
    }
}

/// ファイル/フォルダのリストをスキャン
///
/// フォルダは直下のみ（`recursive` で再帰）。対応外の拡張子は無視する。
/// 結果はファイル名でソート。
pub fn scan_paths(paths: &[PathBuf], recursive: bool) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            files.extend(scan_folder(path, recursive)?);
        } else if path.is_file() {
            match to_scanned(path) {
                Some(file) => files.push(file),
                None => debug!(path = %path.display(), "unsupported file skipped"),
            }
        } else {
            return Err(StockMetaError::FileNotFound(path.display().to_string()));
        }
    }

    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(files)
}

pub fn scan_folder(folder: &Path, recursive: bool) -> Result<Vec<ScannedFile>> {
    if !folder.exists() {
        return Err(StockMetaError::FolderNotFound(folder.display().to_string()));
    }

    let max_depth = if recursive { usize::MAX } else { 1 };

    let mut files: Vec<ScannedFile> = WalkDir::new(folder)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| to_scanned(e.path()))
        .collect();

    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(files)
}

fn to_scanned(path: &Path) -> Option<ScannedFile> {
    let kind = kind_for_path(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Some(ScannedFile {
        path: path.to_path_buf(),
        file_name,
        kind,
    })
}
