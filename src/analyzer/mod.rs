//! 解析モジュール
//!
//! ワークアイテムを解析バックエンドへ送り、結果をステータス遷移と結果レコードに反映する。
//! - バッチ: 種別ごとに対象を固定サイズのチャンクに分け、順番に送信
//! - 単体: 1アイテムの解析・再試行
//! - 取り込み: 既存レコードとの突き合わせ

mod batch;
mod client;
mod intake;
mod outcome;
mod single;

pub use batch::{partition, BatchOptions, BatchProgress, BatchReport, BatchScheduler, BatchSummary};
pub use client::HttpAnalysisService;
pub use intake::{register_prepared, Intake, PREPROCESS_SERVICE};
pub use outcome::{assign_chunk_outcomes, resolve_outcome, NO_RESULTS_MESSAGE};
pub use single::analyze_single;

use crate::error::{Result, StockMetaError};
use crate::items::{Payload, WorkItem};
use crate::settings::Credentials;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use stock_meta_common::{ContentKind, Provider, ProviderOutcome};

/// 解析リクエストの1アイテム
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisInput {
    pub id: String,
    pub display_name: String,
    pub payload: Payload,
}

impl From<&WorkItem> for AnalysisInput {
    fn from(item: &WorkItem) -> Self {
        Self {
            id: item.id().to_string(),
            display_name: item.display_name().to_string(),
            payload: item.payload().clone(),
        }
    }
}

/// 1回の解析で共通の条件
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub provider: Provider,
    pub custom_prompt: Option<String>,
    pub credentials: Credentials,
}

impl RequestContext {
    pub fn new(provider: Provider, credentials: Credentials) -> Self {
        Self {
            provider,
            custom_prompt: None,
            credentials,
        }
    }

    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.custom_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    /// 選択中プロバイダのキーがなければ送信前に失敗させる
    pub fn ensure_credentials(&self) -> Result<()> {
        if self.credentials.has_key(self.provider) {
            Ok(())
        } else {
            Err(StockMetaError::MissingApiKey(self.provider.id().to_string()))
        }
    }
}

/// バッチ解析のレスポンス
///
/// `results` のキーはアイテムIDまたは表示名。
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub results: HashMap<String, Vec<ProviderOutcome>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// 解析バックエンド
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// 1アイテムを解析（プロバイダごとの結果を返す）
    async fn analyze_item(
        &self,
        kind: ContentKind,
        item: &AnalysisInput,
        ctx: &RequestContext,
    ) -> Result<Vec<ProviderOutcome>>;

    /// 同一種別のアイテムをまとめて解析
    async fn analyze_batch(
        &self,
        kind: ContentKind,
        items: &[AnalysisInput],
        ctx: &RequestContext,
    ) -> Result<BatchResponse>;
}
