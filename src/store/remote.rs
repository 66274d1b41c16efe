//! 解析結果のリモート保存・同期

use super::{ResultStore, StoreAction};
use crate::backend::BackendClient;
use crate::error::{Result, StockMetaError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use stock_meta_common::{
    AnalysisResultRecord, CategoryField, ContentKind, KeywordsField, Metadata, RecordOutcome,
};
use tracing::{info, warn};

const RESULTS_PATH: &str = "/api/analysis-results";
const RESULTS_BATCH_PATH: &str = "/api/analysis-results/batch";

/// リモート結果ストアの操作
#[async_trait]
pub trait ResultsRemote: Send + Sync {
    async fn fetch(&self, kind: Option<ContentKind>) -> Result<Vec<AnalysisResultRecord>>;
    async fn push(&self, records: &[AnalysisResultRecord]) -> Result<usize>;
    async fn delete(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Default, Deserialize)]
struct RemoteMetadata {
    title: Option<String>,
    keywords: Option<KeywordsField>,
    category: Option<CategoryField>,
    releases: Option<String>,
    raw_response: Option<String>,
}

/// サーバー側のレコード表現（未設定フィールドは null）
#[derive(Debug, Deserialize)]
struct RemoteRecord {
    id: String,
    filename: String,
    #[serde(rename = "type")]
    kind: ContentKind,
    #[serde(default)]
    result: Option<RemoteMetadata>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl From<RemoteRecord> for AnalysisResultRecord {
    fn from(remote: RemoteRecord) -> Self {
        let outcome = if remote.status.as_deref() == Some("error") {
            RecordOutcome::Error {
                error: remote.error.unwrap_or_else(|| "Unknown error".to_string()),
            }
        } else {
            let meta = remote.result.unwrap_or_default();
            RecordOutcome::Completed {
                result: Metadata {
                    title: meta.title.unwrap_or_default(),
                    keywords: meta.keywords.map(KeywordsField::into_vec).unwrap_or_default(),
                    category: meta.category.map(CategoryField::into_name).unwrap_or_default(),
                    releases: meta.releases.unwrap_or_default(),
                    raw_response: meta.raw_response.unwrap_or_default(),
                },
            }
        };

        AnalysisResultRecord {
            id: remote.id,
            filename: remote.filename,
            kind: remote.kind,
            service: remote.service.unwrap_or_default(),
            timestamp: remote
                .timestamp
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            outcome,
        }
    }
}

/// RFC 3339 またはタイムゾーンなしのISO 8601（UTCとみなす）
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    results: Vec<RemoteRecord>,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    results: &'a [AnalysisResultRecord],
}

#[derive(Debug, Deserialize)]
struct SaveResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    count: usize,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP経由のリモート結果ストア
pub struct ResultsClient {
    backend: BackendClient,
}

impl ResultsClient {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ResultsRemote for ResultsClient {
    async fn fetch(&self, kind: Option<ContentKind>) -> Result<Vec<AnalysisResultRecord>> {
        let path = match kind {
            Some(kind) => format!("{}?type={}", RESULTS_PATH, kind),
            None => RESULTS_PATH.to_string(),
        };
        let response: ListResponse = self.backend.get_json(&path).await?;
        Ok(response.results.into_iter().map(Into::into).collect())
    }

    async fn push(&self, records: &[AnalysisResultRecord]) -> Result<usize> {
        let response: SaveResponse = self
            .backend
            .post_json(RESULTS_BATCH_PATH, &BatchRequest { results: records })
            .await?;
        if !response.success {
            return Err(StockMetaError::ApiCall(
                response.error.unwrap_or_else(|| "saving results failed".to_string()),
            ));
        }
        Ok(response.count)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .backend
            .delete_json(&format!("{}/{}", RESULTS_PATH, id))
            .await?;
        Ok(())
    }
}

/// 同期結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// リモートから取り込んだ件数
    pub pulled: usize,
    /// リモートへ送った件数
    pub pushed: usize,
}

/// ローカルとリモートを突き合わせる（同じIDは新しい方を採用）
pub async fn sync<R: ResultsRemote + ?Sized>(
    store: &ResultStore,
    remote: &R,
    kind: Option<ContentKind>,
) -> Result<SyncSummary> {
    let remote_records = remote.fetch(kind).await?;
    let local_records = match kind {
        Some(kind) => store.records(kind),
        None => store.all_records(),
    };

    let incoming: Vec<AnalysisResultRecord> = remote_records
        .iter()
        .filter(|r| {
            local_records
                .iter()
                .find(|l| l.id == r.id)
                .map_or(true, |l| r.timestamp > l.timestamp)
        })
        .cloned()
        .collect();

    let outgoing: Vec<AnalysisResultRecord> = local_records
        .into_iter()
        .filter(|l| {
            remote_records
                .iter()
                .find(|r| r.id == l.id)
                .map_or(true, |r| l.timestamp > r.timestamp)
        })
        .collect();

    let mut summary = SyncSummary {
        pulled: incoming.len(),
        pushed: 0,
    };
    if !incoming.is_empty() {
        store.dispatch(StoreAction::Merge { records: incoming })?;
    }

    // サーバー側に更新APIはないため、古いレコードは削除してから送り直す
    for record in &outgoing {
        if remote_records.iter().any(|r| r.id == record.id) {
            if let Err(e) = remote.delete(&record.id).await {
                warn!(id = %record.id, error = %e, "stale remote record could not be removed");
            }
        }
    }
    if !outgoing.is_empty() {
        summary.pushed = remote.push(&outgoing).await?;
    }

    info!(pulled = summary.pulled, pushed = summary.pushed, "results synchronized");
    Ok(summary)
}
