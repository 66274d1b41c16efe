//! 解析結果のファイル出力（CSV / Excel）
//!
//! 完了レコードのみを出力する。列は Filename, Title, Keywords, Category, Releases。

use crate::cli::ExportFormat;
use crate::error::{Result, StockMetaError};
use chrono::Local;
use std::path::{Path, PathBuf};
use stock_meta_common::export::excel_core::generate_excel_buffer;
use stock_meta_common::{build_csv, rows_from_records, AnalysisResultRecord, ContentKind};
use tracing::info;

/// 出力結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub rows: usize,
    /// 出力対象外（error）のレコード数
    pub skipped: usize,
}

/// 既定のファイル名（拡張子なし）
pub fn default_title(kind: Option<ContentKind>) -> String {
    let scope = kind.map(|k| k.as_str()).unwrap_or("all");
    format!("stock-metadata-{}-{}", scope, Local::now().format("%Y%m%d-%H%M%S"))
}

fn sheet_name(kind: Option<ContentKind>) -> &'static str {
    match kind {
        Some(ContentKind::Image) => "Images",
        Some(ContentKind::Video) => "Videos",
        Some(ContentKind::Text) => "Texts",
        None => "Metadata",
    }
}

fn output_path_for_format(output: &Path, title: &str, extension: &str) -> PathBuf {
    if output.is_dir() || output.extension().is_none() {
        output.join(format!("{}.{}", title, extension))
    } else {
        output.to_path_buf()
    }
}

/// レコードを出力
///
/// `output` がディレクトリ（または拡張子なし）なら `title` をファイル名にする。
pub fn export_records(
    records: &[AnalysisResultRecord],
    format: ExportFormat,
    output: &Path,
    title: &str,
    kind: Option<ContentKind>,
) -> Result<ExportSummary> {
    let rows = rows_from_records(records);
    let skipped = records.len() - rows.len();

    let path = match format {
        ExportFormat::Csv => {
            let path = output_path_for_format(output, title, "csv");
            ensure_parent(&path)?;
            std::fs::write(&path, build_csv(&rows))?;
            path
        }
        ExportFormat::Excel => {
            let path = output_path_for_format(output, title, "xlsx");
            ensure_parent(&path)?;
            let buffer = generate_excel_buffer(&rows, sheet_name(kind))
                .map_err(StockMetaError::ExcelGeneration)?;
            std::fs::write(&path, buffer)?;
            path
        }
    };

    info!(path = %path.display(), rows = rows.len(), skipped, "export written");
    Ok(ExportSummary {
        path,
        rows: rows.len(),
        skipped,
    })
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_for_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = output_path_for_format(dir.path(), "report", "csv");
        assert_eq!(path, dir.path().join("report.csv"));
    }

    #[test]
    fn test_output_path_explicit_file() {
        let path = output_path_for_format(Path::new("out/meta.csv"), "ignored", "csv");
        assert_eq!(path, PathBuf::from("out/meta.csv"));
    }

    #[test]
    fn test_default_title_scope() {
        assert!(default_title(Some(ContentKind::Video)).starts_with("stock-metadata-video-"));
        assert!(default_title(None).starts_with("stock-metadata-all-"));
    }
}
