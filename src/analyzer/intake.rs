//! 前処理済みアイテムの取り込み
//!
//! 同じ素材の既存レコードがあればIDを引き継ぎ、再解析の結果が同じレコードを置き換えるようにする。
//! 前処理で失敗した素材はその場でエラーレコードとして結果ストアに残す。

use crate::error::Result;
use crate::items::WorkItem;
use crate::store::{ResultStore, StoreAction};
use chrono::Utc;
use stock_meta_common::{AnalysisResultRecord, RecordOutcome};
use tracing::debug;

/// 前処理で失敗したレコードのサービス名
pub const PREPROCESS_SERVICE: &str = "preprocess";

#[derive(Debug, Default)]
pub struct Intake {
    pub items: Vec<WorkItem>,
    /// 既存レコードのIDを引き継いだ件数
    pub reused: usize,
    /// 前処理失敗として記録した件数
    pub rejected: usize,
}

/// 前処理済みアイテムを既存レコードと突き合わせる
///
/// `fresh` の場合は completed のレコードも pending に戻して解析し直す。
pub fn register_prepared(prepared: Vec<WorkItem>, results: &ResultStore, fresh: bool) -> Result<Intake> {
    let mut intake = Intake::default();
    let mut rejected_records = Vec::new();

    for item in prepared {
        let item = match results.find_by_filename(item.kind(), item.display_name()) {
            Some(record) => {
                debug!(file = %item.display_name(), id = %record.id, "existing record reused");
                intake.reused += 1;
                item.adopt_record(&record, fresh)
            }
            None => item,
        };

        if !item.payload().is_analyzable() {
            rejected_records.push(rejection_record(&item));
        }
        intake.items.push(item);
    }

    intake.rejected = rejected_records.len();
    if !rejected_records.is_empty() {
        results.dispatch(StoreAction::Merge {
            records: rejected_records,
        })?;
    }
    Ok(intake)
}

fn rejection_record(item: &WorkItem) -> AnalysisResultRecord {
    AnalysisResultRecord {
        id: item.id().to_string(),
        filename: item.display_name().to_string(),
        kind: item.kind(),
        service: PREPROCESS_SERVICE.to_string(),
        timestamp: Utc::now(),
        outcome: RecordOutcome::Error {
            error: item.error().unwrap_or_default().to_string(),
        },
    }
}
