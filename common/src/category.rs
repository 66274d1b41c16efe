//! Adobe Stockカテゴリ表
//!
//! カテゴリ名 ⇔ 数値コード（1〜21）の静的マッピング。
//! バックエンドは数値・正式名・旧略称のいずれかを返すため、ここで正規化する。

/// 正式カテゴリ名（インデックス+1 がコード）
pub const CATEGORIES: [&str; 21] = [
    "Animals",
    "Buildings and Architecture",
    "Business",
    "Drinks",
    "The Environment",
    "States of Mind",
    "Food",
    "Graphic Resources",
    "Hobbies and Leisure",
    "Industry",
    "Landscape",
    "Lifestyle",
    "People",
    "Plants and Flowers",
    "Culture and Religion",
    "Science",
    "Social Issues",
    "Sports",
    "Technology",
    "Transport",
    "Travel",
];

/// 旧形式の略称 → 正式名
const LEGACY_ALIASES: &[(&str, &str)] = &[
    ("Buildings", "Buildings and Architecture"),
    ("Architecture", "Buildings and Architecture"),
    ("Environment", "The Environment"),
    ("Graphics", "Graphic Resources"),
    ("Hobbies", "Hobbies and Leisure"),
    ("Plants", "Plants and Flowers"),
    ("Culture", "Culture and Religion"),
    ("Religion", "Culture and Religion"),
];

/// コードからカテゴリ名を取得
pub fn category_name(code: u8) -> Option<&'static str> {
    if code == 0 {
        return None;
    }
    CATEGORIES.get(code as usize - 1).copied()
}

/// カテゴリ表記（数値文字列・正式名・略称）からコードを取得
///
/// 大文字小文字は区別しない。該当なしは `None`（誤ったコードを出力しないため）。
pub fn category_code(value: &str) -> Option<u8> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(code) = trimmed.parse::<u8>() {
        return category_name(code).map(|_| code);
    }

    let canonical = canonical_name(trimmed)?;
    CATEGORIES
        .iter()
        .position(|c| *c == canonical)
        .map(|i| (i + 1) as u8)
}

/// 任意の表記を正式カテゴリ名に正規化（該当なしは空文字）
pub fn normalize_category(value: &str) -> String {
    let trimmed = value.trim();
    if let Ok(code) = trimmed.parse::<u8>() {
        return category_name(code).unwrap_or_default().to_string();
    }
    canonical_name(trimmed).unwrap_or_default().to_string()
}

fn canonical_name(value: &str) -> Option<&'static str> {
    if let Some(found) = CATEGORIES.iter().find(|c| c.eq_ignore_ascii_case(value)) {
        return Some(found);
    }
    LEGACY_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(value))
        .map(|(_, name)| *name)
}
