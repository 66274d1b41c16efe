use super::outcome::{resolve_outcome, settle};
use super::{AnalysisInput, AnalysisService, RequestContext};
use crate::error::{Result, StockMetaError};
use crate::items::{Transition, WorkItemStore};
use crate::store::ResultStore;
use stock_meta_common::ItemStatus;
use tracing::{info, warn};

/// 1アイテムを解析（pending の初回解析と error からの再試行の両方）
///
/// 戻り値は確定後のステータス。解析中にアイテムが削除された場合は None。
pub async fn analyze_single<S: AnalysisService + ?Sized>(
    service: &S,
    items: &WorkItemStore,
    results: &ResultStore,
    id: &str,
    ctx: &RequestContext,
) -> Result<Option<ItemStatus>> {
    ctx.ensure_credentials()?;

    let item = items
        .get(id)
        .ok_or_else(|| StockMetaError::ItemNotFound(id.to_string()))?;
    if !item.is_eligible() || !items.update_status(id, Transition::Begin) {
        return Err(StockMetaError::NotAnalyzable(item.display_name().to_string()));
    }

    let kind = item.kind();
    let input = AnalysisInput::from(&item);
    let transition = match service.analyze_item(kind, &input, ctx).await {
        Ok(outcomes) => resolve_outcome(Some(outcomes), ctx.provider),
        Err(e) => {
            warn!(item = %input.display_name, error = %e, "analysis request failed");
            Transition::Fail(e.to_string())
        }
    };
    let status = transition.target_status();

    let tally = match settle(items, results, kind, ctx.provider, vec![(input, transition)]) {
        Ok(tally) => tally,
        Err(e) => {
            items.fail_processing(&[id.to_string()], &e.to_string());
            return Err(e);
        }
    };

    if tally.discarded > 0 {
        return Ok(None);
    }
    info!(item = %item.display_name(), status = %status, "analysis finished");
    Ok(Some(status))
}
