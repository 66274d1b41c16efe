//! CSV生成・読込（共通ライブラリ）
//!
//! 列順は固定: Filename, Title, Keywords, Category, Releases
//! - Keywords はカンマ区切りで1セルに結合
//! - Category は数値コード（1〜21）に変換。該当なしは空セル

use crate::category::{category_code, category_name};
use crate::error::{Error, Result};
use crate::types::{split_keywords, AnalysisResultRecord, Metadata};

/// CSVヘッダー
pub const CSV_HEADERS: [&str; 5] = ["Filename", "Title", "Keywords", "Category", "Releases"];

/// エクスポート1行分
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportRow {
    pub filename: String,
    pub title: String,
    pub keywords: Vec<String>,
    /// 正式カテゴリ名
    pub category: String,
    pub releases: String,
}

impl ExportRow {
    pub fn from_metadata(filename: &str, meta: &Metadata) -> Self {
        Self {
            filename: filename.to_string(),
            title: meta.title.clone(),
            keywords: meta.keywords.clone(),
            category: meta.category.clone(),
            releases: meta.releases.clone(),
        }
    }

    /// セル値（列順どおり）
    pub fn cells(&self) -> [String; 5] {
        [
            self.filename.clone(),
            self.title.clone(),
            self.keywords.join(","),
            category_code(&self.category)
                .map(|c| c.to_string())
                .unwrap_or_default(),
            self.releases.clone(),
        ]
    }
}

/// 完了済みレコードのみを出力行に変換
pub fn rows_from_records<'a, I>(records: I) -> Vec<ExportRow>
where
    I: IntoIterator<Item = &'a AnalysisResultRecord>,
{
    records
        .into_iter()
        .filter_map(|r| r.metadata().map(|m| ExportRow::from_metadata(&r.filename, m)))
        .collect()
}

/// CSV文字列を生成（RFC 4180、改行はCRLF）
pub fn build_csv(rows: &[ExportRow]) -> String {
    let mut out = String::new();
    push_line(&mut out, CSV_HEADERS.iter().map(|h| h.to_string()));
    for row in rows {
        push_line(&mut out, row.cells().into_iter());
    }
    out
}

fn push_line(out: &mut String, cells: impl Iterator<Item = String>) {
    let line = cells.map(|c| escape_cell(&c)).collect::<Vec<_>>().join(",");
    out.push_str(&line);
    out.push_str("\r\n");
}

fn escape_cell(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// CSV文字列をセル配列にパース
pub fn parse_csv(input: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    cell.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => cell.push(ch),
            }
            continue;
        }

        match ch {
            '"' if cell.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut cell)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut cell));
                records.push(std::mem::take(&mut record));
            }
            _ => cell.push(ch),
        }
    }

    if in_quotes {
        return Err(Error::Parse("unterminated quoted field".into()));
    }
    if !cell.is_empty() || !record.is_empty() {
        record.push(cell);
        records.push(record);
    }

    Ok(records)
}

/// エクスポートCSVを行データに戻す（カテゴリはコード→名称）
pub fn parse_export_csv(input: &str) -> Result<Vec<ExportRow>> {
    let mut lines = parse_csv(input)?.into_iter();

    let header = lines
        .next()
        .ok_or_else(|| Error::Parse("empty CSV".into()))?;
    if header != CSV_HEADERS {
        return Err(Error::Parse(format!("unexpected header: {:?}", header)));
    }

    lines
        .enumerate()
        .map(|(i, cells)| {
            if cells.len() != CSV_HEADERS.len() {
                return Err(Error::Parse(format!(
                    "row {}: expected {} columns, got {}",
                    i + 2,
                    CSV_HEADERS.len(),
                    cells.len()
                )));
            }
            let category = cells[3]
                .parse::<u8>()
                .ok()
                .and_then(category_name)
                .unwrap_or_default()
                .to_string();
            Ok(ExportRow {
                filename: cells[0].clone(),
                title: cells[1].clone(),
                keywords: split_keywords(&cells[2]),
                category,
                releases: cells[4].clone(),
            })
        })
        .collect()
}
