//! 解析結果の型定義
//!
//! CLIとライブラリで共有される型:
//! - Metadata: 生成されたストック素材メタデータ（タイトル・キーワード等）
//! - ProviderOutcome: 解析バックエンドがプロバイダごとに返す結果
//! - AnalysisResultRecord: 結果ストアに永続化される確定済みレコード

use crate::category::normalize_category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// コンテンツ種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Image,
    Video,
    Text,
}

impl ContentKind {
    pub const ALL: [ContentKind; 3] = [ContentKind::Image, ContentKind::Video, ContentKind::Text];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Image => "image",
            ContentKind::Video => "video",
            ContentKind::Text => "text",
        }
    }
}

impl std::str::FromStr for ContentKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image" | "img" => Ok(ContentKind::Image),
            "video" | "vid" => Ok(ContentKind::Video),
            "text" | "txt" => Ok(ContentKind::Text),
            _ => Err(crate::error::Error::Config(format!(
                "Unknown content kind: {}. Use image, video, or text",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// ワークアイテムの解析ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 生成されたメタデータ
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub title: String,
    pub keywords: Vec<String>,
    /// 正式カテゴリ名（CSV出力時に数値コードへ変換）
    pub category: String,
    pub releases: String,
    pub raw_response: String,
}

/// 手動修正用の部分パッチ
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub category: Option<String>,
    pub releases: Option<String>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.keywords.is_none()
            && self.category.is_none()
            && self.releases.is_none()
    }
}

impl Metadata {
    /// パッチを適用（None のフィールドは変更しない）
    pub fn apply(&mut self, patch: &MetadataPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(keywords) = &patch.keywords {
            self.keywords = keywords.clone();
        }
        if let Some(category) = &patch.category {
            let normalized = normalize_category(category);
            self.category = if normalized.is_empty() {
                category.trim().to_string()
            } else {
                normalized
            };
        }
        if let Some(releases) = &patch.releases {
            self.releases = releases.clone();
        }
    }
}

/// カンマ区切り文字列をキーワード配列に分割
pub fn split_keywords(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| k.to_string())
        .collect()
}

/// キーワード（配列またはカンマ区切り文字列）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeywordsField {
    List(Vec<String>),
    Joined(String),
}

impl KeywordsField {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            KeywordsField::List(list) => list
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            KeywordsField::Joined(joined) => split_keywords(&joined),
        }
    }
}

/// カテゴリ（数値コードまたは名称）
///
/// 数値は範囲外や小数でも受け付け、表にないコードは空カテゴリになる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryField {
    Code(serde_json::Number),
    Name(String),
}

impl CategoryField {
    pub fn into_name(self) -> String {
        match self {
            CategoryField::Code(code) => code_to_name(&code),
            CategoryField::Name(name) => {
                let normalized = normalize_category(&name);
                if normalized.is_empty() {
                    name.trim().to_string()
                } else {
                    normalized
                }
            }
        }
    }
}

fn code_to_name(code: &serde_json::Number) -> String {
    let whole = code.as_u64().or_else(|| {
        code.as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= f64::from(u8::MAX))
            .map(|f| f as u64)
    });
    match whole.and_then(|c| u8::try_from(c).ok()) {
        Some(c) => normalize_category(&c.to_string()),
        None => String::new(),
    }
}

/// 解析バックエンドが返すプロバイダ単位の結果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutcome {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<KeywordsField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub releases: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderOutcome {
    /// 成功結果を作成（主にテスト・モック用）
    pub fn success(metadata: Metadata) -> Self {
        Self {
            success: true,
            service: None,
            title: Some(metadata.title),
            keywords: Some(KeywordsField::List(metadata.keywords)),
            category: Some(CategoryField::Name(metadata.category)),
            releases: Some(metadata.releases),
            raw_response: Some(metadata.raw_response),
            error: None,
        }
    }

    /// 失敗結果を作成
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// メタデータまたはエラーメッセージに変換
    ///
    /// `success=false` の場合はプロバイダのエラー文言をそのまま返す。
    pub fn into_result(self) -> Result<Metadata, String> {
        if !self.success {
            return Err(self
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| "Analysis failed".to_string()));
        }

        Ok(Metadata {
            title: self.title.unwrap_or_default(),
            keywords: self.keywords.map(KeywordsField::into_vec).unwrap_or_default(),
            category: self.category.map(CategoryField::into_name).unwrap_or_default(),
            releases: self.releases.unwrap_or_default(),
            raw_response: self.raw_response.unwrap_or_default(),
        })
    }
}

/// レコードの確定結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RecordOutcome {
    Completed { result: Metadata },
    Error { error: String },
}

/// 結果ストアに蓄積される解析結果レコード
///
/// `id` は元のワークアイテムと同一。再解析時は同じ id で置き換える。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResultRecord {
    pub id: String,
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    /// 使用したプロバイダID
    pub service: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: RecordOutcome,
}

impl AnalysisResultRecord {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, RecordOutcome::Completed { .. })
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        match &self.outcome {
            RecordOutcome::Completed { result } => Some(result),
            RecordOutcome::Error { .. } => None,
        }
    }

    pub fn metadata_mut(&mut self) -> Option<&mut Metadata> {
        match &mut self.outcome {
            RecordOutcome::Completed { result } => Some(result),
            RecordOutcome::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            RecordOutcome::Completed { .. } => None,
            RecordOutcome::Error { error } => Some(error),
        }
    }

    pub fn status(&self) -> ItemStatus {
        match self.outcome {
            RecordOutcome::Completed { .. } => ItemStatus::Completed,
            RecordOutcome::Error { .. } => ItemStatus::Error,
        }
    }
}
