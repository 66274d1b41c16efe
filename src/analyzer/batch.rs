//! バッチ解析スケジューラ
//!
//! 指定種別の pending/error アイテムを追加順に固定サイズのチャンクへ分け、
//! 1チャンクずつ送信する（同時に送るチャンクは常に1つ）。チャンク間には固定の待機を挟む。
//!
//! チャンクの流れ:
//! 1. チャンク内のアイテムを processing にする
//! 2. バッチリクエストを送信
//! 3. 結果を各アイテムに割り当て、結果ストアへまとめて保存し、遷移を適用
//!
//! チャンク単位の失敗（通信エラー・`success=false`）はそのチャンクのアイテムだけを error にし、
//! 残りのチャンクは続行する。ループ自体が中断した場合は processing のまま残った
//! アイテムをすべて error にしてから中断理由を返す。

use super::outcome::{assign_chunk_outcomes, resolve_outcome, settle, SettleTally};
use super::{AnalysisInput, AnalysisService, RequestContext};
use crate::config::Config;
use crate::error::Result;
use crate::items::{Transition, WorkItem, WorkItemStore};
use crate::store::ResultStore;
use std::time::Duration;
use stock_meta_common::ContentKind;
use tracing::{debug, info, warn};

const BATCH_FAILED_MESSAGE: &str = "Batch analysis failed";

/// スケジューラ設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// 1リクエストあたりのアイテム数
    pub chunk_size: usize,
    /// チャンク間の待機時間
    pub chunk_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            chunk_size: 2,
            chunk_delay: Duration::from_secs(2),
        }
    }
}

impl From<&Config> for BatchOptions {
    fn from(config: &Config) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_delay: config.chunk_delay(),
        }
    }
}

/// 進捗通知（チャンク送信直前に呼ばれる）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// 1始まりのチャンク番号
    pub current_chunk: usize,
    pub total_chunks: usize,
    pub chunk_len: usize,
}

/// 実行結果の集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total_chunks: usize,
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    /// 解析中に削除されたアイテム
    pub discarded: usize,
}

impl BatchSummary {
    fn absorb(&mut self, tally: SettleTally) {
        self.completed += tally.completed;
        self.failed += tally.failed;
        self.discarded += tally.discarded;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchReport {
    /// 対象アイテムなし（リクエストは送っていない）
    NothingToAnalyze,
    Finished(BatchSummary),
}

/// 固定サイズに分割（最後のチャンクは端数）
pub fn partition<T: Clone>(items: &[T], chunk_size: usize) -> Vec<Vec<T>> {
    items
        .chunks(chunk_size.max(1))
        .map(<[T]>::to_vec)
        .collect()
}

pub struct BatchScheduler<'a, S: AnalysisService + ?Sized> {
    service: &'a S,
    items: WorkItemStore,
    results: ResultStore,
    options: BatchOptions,
}

impl<'a, S: AnalysisService + ?Sized> BatchScheduler<'a, S> {
    pub fn new(service: &'a S, items: WorkItemStore, results: ResultStore, options: BatchOptions) -> Self {
        Self {
            service,
            items,
            results,
            options,
        }
    }

    /// 指定種別の対象アイテムをすべて解析
    pub async fn run<F>(&self, kind: ContentKind, ctx: &RequestContext, mut on_progress: F) -> Result<BatchReport>
    where
        F: FnMut(BatchProgress),
    {
        let selection = self.items.eligible(kind);
        if selection.is_empty() {
            info!(kind = %kind, "nothing to analyze");
            return Ok(BatchReport::NothingToAnalyze);
        }
        ctx.ensure_credentials()?;

        let chunks = partition(&selection, self.options.chunk_size);
        info!(
            kind = %kind,
            provider = %ctx.provider,
            items = selection.len(),
            chunks = chunks.len(),
            "batch analysis started"
        );

        let mut summary = BatchSummary {
            total_chunks: chunks.len(),
            ..Default::default()
        };

        match self
            .run_chunks(kind, ctx, &chunks, &mut summary, &mut on_progress)
            .await
        {
            Ok(()) => {
                info!(
                    completed = summary.completed,
                    failed = summary.failed,
                    discarded = summary.discarded,
                    "batch analysis finished"
                );
                Ok(BatchReport::Finished(summary))
            }
            Err(e) => {
                let ids: Vec<String> = selection.iter().map(|item| item.id().to_string()).collect();
                let stranded = self.items.fail_processing(&ids, &e.to_string());
                warn!(error = %e, stranded = stranded.len(), "batch analysis aborted");
                Err(e)
            }
        }
    }

    async fn run_chunks<F>(
        &self,
        kind: ContentKind,
        ctx: &RequestContext,
        chunks: &[Vec<WorkItem>],
        summary: &mut BatchSummary,
        on_progress: &mut F,
    ) -> Result<()>
    where
        F: FnMut(BatchProgress),
    {
        let total = chunks.len();
        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 && !self.options.chunk_delay.is_zero() {
                tokio::time::sleep(self.options.chunk_delay).await;
            }

            on_progress(BatchProgress {
                current_chunk: index + 1,
                total_chunks: total,
                chunk_len: chunk.len(),
            });

            let (submitted, tally) = self.process_chunk(kind, ctx, chunk).await?;
            summary.submitted += submitted;
            summary.absorb(tally);
        }
        Ok(())
    }

    async fn process_chunk(
        &self,
        kind: ContentKind,
        ctx: &RequestContext,
        chunk: &[WorkItem],
    ) -> Result<(usize, SettleTally)> {
        // 待機中に削除・変更されたアイテムは送らない
        let inputs: Vec<AnalysisInput> = chunk
            .iter()
            .filter(|item| self.items.update_status(item.id(), Transition::Begin))
            .map(AnalysisInput::from)
            .collect();
        if inputs.is_empty() {
            debug!("chunk emptied before submission");
            return Ok((0, SettleTally::default()));
        }

        let transitions: Vec<Transition> = match self.service.analyze_batch(kind, &inputs, ctx).await {
            Ok(response) if response.success => assign_chunk_outcomes(&inputs, response.results)
                .into_iter()
                .map(|outcomes| resolve_outcome(outcomes, ctx.provider))
                .collect(),
            Ok(response) => {
                let message = response
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| BATCH_FAILED_MESSAGE.to_string());
                warn!(error = %message, "chunk rejected by backend");
                vec![Transition::Fail(message); inputs.len()]
            }
            Err(e) => {
                warn!(error = %e, "chunk request failed");
                vec![Transition::Fail(e.to_string()); inputs.len()]
            }
        };

        let submitted = inputs.len();
        let tally = settle(
            &self.items,
            &self.results,
            kind,
            ctx.provider,
            inputs.into_iter().zip(transitions).collect(),
        )?;
        Ok((submitted, tally))
    }
}
