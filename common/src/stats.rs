//! ダッシュボード集計

use crate::types::{AnalysisResultRecord, ContentKind};
use serde::Serialize;
use std::collections::BTreeMap;

/// 蓄積された解析結果の集計値
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_analyses: usize,
    pub successful_analyses: usize,
    pub error_analyses: usize,
    /// 成功率（%）
    pub success_rate: f64,
    pub by_type: BTreeMap<ContentKind, usize>,
    pub by_service: BTreeMap<String, usize>,
    pub total_keywords: usize,
}

impl DashboardStats {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a AnalysisResultRecord>,
    {
        let mut stats = DashboardStats::default();

        for record in records {
            stats.total_analyses += 1;
            *stats.by_type.entry(record.kind).or_insert(0) += 1;
            *stats.by_service.entry(record.service.clone()).or_insert(0) += 1;

            match record.metadata() {
                Some(meta) => {
                    stats.successful_analyses += 1;
                    stats.total_keywords += meta.keywords.len();
                }
                None => stats.error_analyses += 1,
            }
        }

        if stats.total_analyses > 0 {
            stats.success_rate =
                stats.successful_analyses as f64 / stats.total_analyses as f64 * 100.0;
        }

        stats
    }
}
