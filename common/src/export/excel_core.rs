//! Excel生成（共通ライブラリ）
//!
//! CSVと同じ列構成で1シートに出力する

use super::csv_core::{ExportRow, CSV_HEADERS};
use rust_xlsxwriter::*;

/// 列幅（px）
const COLUMN_WIDTHS_PX: [u32; 5] = [180, 420, 520, 80, 140];

/// Excelをバッファに生成
///
/// # Arguments
/// * `rows` - 出力行（完了済みレコードのみ）
/// * `sheet_name` - シート名
pub fn generate_excel_buffer(rows: &[ExportRow], sheet_name: &str) -> Result<Vec<u8>, String> {
    let mut workbook = Workbook::new();

    let header_format = Format::new()
        .set_bold()
        .set_font_size(10.0)
        .set_background_color(Color::RGB(0xF5F5F5))
        .set_align(FormatAlign::Center)
        .set_border(FormatBorder::Hair)
        .set_border_color(Color::RGB(0xAAAAAA));

    let value_format = Format::new()
        .set_font_size(10.0)
        .set_align(FormatAlign::Left)
        .set_align(FormatAlign::VerticalCenter)
        .set_text_wrap()
        .set_border(FormatBorder::Hair)
        .set_border_color(Color::RGB(0xCCCCCC));

    let worksheet = workbook.add_worksheet();
    worksheet
        .set_name(sheet_name)
        .map_err(|e| format!("シート名設定エラー: {}", e))?;

    for (col, width) in COLUMN_WIDTHS_PX.iter().enumerate() {
        worksheet
            .set_column_width_pixels(col as u16, *width)
            .map_err(|e| format!("列幅設定エラー: {}", e))?;
    }

    for (col, header) in CSV_HEADERS.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, *header, &header_format)
            .map_err(|e| format!("ヘッダー書き込みエラー: {}", e))?;
    }

    for (i, row) in rows.iter().enumerate() {
        let excel_row = (i + 1) as u32;
        for (col, value) in row.cells().iter().enumerate() {
            worksheet
                .write_string_with_format(excel_row, col as u16, value, &value_format)
                .map_err(|e| format!("値書き込みエラー: {}", e))?;
        }
    }

    workbook
        .save_to_buffer()
        .map_err(|e| format!("Excel保存エラー: {}", e))
}
