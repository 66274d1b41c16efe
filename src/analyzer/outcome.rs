//! 解析結果の振り分けと確定
//!
//! バックエンドの結果をアイテムに対応付け、結果ストアへの保存と
//! ステータス遷移の適用を行う。バッチ・単体のどちらもここを通る。

use super::AnalysisInput;
use crate::error::Result;
use crate::items::{Transition, WorkItemStore};
use crate::store::{ResultStore, StoreAction};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use stock_meta_common::{AnalysisResultRecord, ContentKind, Provider, ProviderOutcome, RecordOutcome};
use tracing::debug;

/// 結果が見つからなかったアイテムのエラー
pub const NO_RESULTS_MESSAGE: &str = "No results received";

/// プロバイダ結果の一覧から遷移を決める
///
/// 選択中プロバイダの結果を優先し、なければ先頭を使う。
pub fn resolve_outcome(outcomes: Option<Vec<ProviderOutcome>>, provider: Provider) -> Transition {
    let mut outcomes = outcomes.unwrap_or_default();
    if outcomes.is_empty() {
        return Transition::Fail(NO_RESULTS_MESSAGE.to_string());
    }

    // サービス名は "Openai" や "Groq (Frame-based)" の形で返る
    let index = outcomes
        .iter()
        .position(|o| {
            o.service
                .as_deref()
                .is_some_and(|s| s.to_lowercase().starts_with(provider.id()))
        })
        .unwrap_or(0);

    match outcomes.swap_remove(index).into_result() {
        Ok(metadata) => Transition::Complete(metadata),
        Err(message) => Transition::Fail(message),
    }
}

/// チャンク内の各アイテムに結果を割り当てる（送信順）
///
/// IDで引けない場合は表示名で引く。同名のアイテムが複数ある場合は
/// その名前の結果を送信順に1件ずつ割り当て、足りない分は None。
pub fn assign_chunk_outcomes(
    inputs: &[AnalysisInput],
    mut results: HashMap<String, Vec<ProviderOutcome>>,
) -> Vec<Option<Vec<ProviderOutcome>>> {
    let mut name_counts: HashMap<&str, usize> = HashMap::new();
    for input in inputs {
        *name_counts.entry(input.display_name.as_str()).or_default() += 1;
    }

    let mut positional: HashMap<String, VecDeque<ProviderOutcome>> = HashMap::new();
    let mut assigned = Vec::with_capacity(inputs.len());

    for input in inputs {
        if let Some(outcomes) = results.remove(&input.id) {
            assigned.push(Some(outcomes));
            continue;
        }

        let shared_name = name_counts
            .get(input.display_name.as_str())
            .is_some_and(|count| *count > 1);
        if !shared_name {
            assigned.push(results.remove(&input.display_name));
            continue;
        }

        if !positional.contains_key(&input.display_name) {
            if let Some(list) = results.remove(&input.display_name) {
                positional.insert(input.display_name.clone(), list.into());
            }
        }
        assigned.push(
            positional
                .get_mut(&input.display_name)
                .and_then(VecDeque::pop_front)
                .map(|outcome| vec![outcome]),
        );
    }

    assigned
}

/// 確定処理の集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SettleTally {
    pub completed: usize,
    pub failed: usize,
    /// 処理中に削除されたアイテム
    pub discarded: usize,
}

fn build_record(
    input: &AnalysisInput,
    kind: ContentKind,
    provider: Provider,
    transition: &Transition,
) -> Option<AnalysisResultRecord> {
    let outcome = match transition {
        Transition::Complete(metadata) => RecordOutcome::Completed {
            result: metadata.clone(),
        },
        Transition::Fail(error) => RecordOutcome::Error {
            error: error.clone(),
        },
        Transition::Begin => return None,
    };

    Some(AnalysisResultRecord {
        id: input.id.clone(),
        filename: input.display_name.clone(),
        kind,
        service: provider.id().to_string(),
        timestamp: Utc::now(),
        outcome,
    })
}

/// 結果を確定する
///
/// 結果ストアへ1回の更新でまとめて保存してから、ワークアイテムの遷移を適用する。
/// 保存に失敗した場合はエラーを返し、アイテムは processing のまま残る。
/// 削除済みのアイテムは記録しない。
pub(crate) fn settle(
    items: &WorkItemStore,
    results: &ResultStore,
    kind: ContentKind,
    provider: Provider,
    outcomes: Vec<(AnalysisInput, Transition)>,
) -> Result<SettleTally> {
    let mut tally = SettleTally::default();
    let mut records = Vec::with_capacity(outcomes.len());
    let mut live = Vec::with_capacity(outcomes.len());

    for (input, transition) in outcomes {
        if !items.contains(&input.id) {
            debug!(id = %input.id, "item removed during analysis, result discarded");
            tally.discarded += 1;
            continue;
        }
        if let Some(record) = build_record(&input, kind, provider, &transition) {
            records.push(record);
            live.push((input.id, transition));
        }
    }

    if !records.is_empty() {
        results.dispatch(StoreAction::Merge { records })?;
    }

    for (id, transition) in live {
        let failed = matches!(transition, Transition::Fail(_));
        if !items.update_status(&id, transition) {
            debug!(id = %id, "item removed during analysis, status not applied");
            tally.discarded += 1;
        } else if failed {
            tally.failed += 1;
        } else {
            tally.completed += 1;
        }
    }

    Ok(tally)
}
