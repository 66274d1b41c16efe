//! ワークアイテムストア
//!
//! アップロード/入力された素材を解析ライフサイクルに沿って管理する。
//! ステータス遷移: pending → processing → completed | error、error → processing（再試行）
//!
//! ストアは複数の非同期処理から共有されるため、すべての更新は
//! ロック内で完結する読み込み-変更-書き込みとして実行する（await を跨がない）。

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use stock_meta_common::{AnalysisResultRecord, ContentKind, ItemStatus, Metadata, MetadataPatch, RecordOutcome};
use tracing::debug;

/// 衝突しにくいアイテムIDを生成（タイムスタンプ + ランダムサフィックス）
pub fn generate_item_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().timestamp_millis(), &suffix[..9])
}

/// 種別ごとの解析対象データ
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// 圧縮済みJPEGのData URI
    Image { data_uri: String },
    /// 時刻順に並んだフレームのData URI
    Video { frames: Vec<String> },
    Text { text: String, title: Option<String> },
    /// 前処理に失敗した素材（解析対象外）
    Rejected { kind: ContentKind },
}

impl Payload {
    pub fn kind(&self) -> ContentKind {
        match self {
            Payload::Image { .. } => ContentKind::Image,
            Payload::Video { .. } => ContentKind::Video,
            Payload::Text { .. } => ContentKind::Text,
            Payload::Rejected { kind } => *kind,
        }
    }

    pub fn is_analyzable(&self) -> bool {
        !matches!(self, Payload::Rejected { .. })
    }
}

/// ステータス遷移
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// 解析開始（pending/error → processing）
    Begin,
    /// 成功（processing → completed）
    Complete(Metadata),
    /// 失敗（processing → error）
    Fail(String),
}

impl Transition {
    pub fn target_status(&self) -> ItemStatus {
        match self {
            Transition::Begin => ItemStatus::Processing,
            Transition::Complete(_) => ItemStatus::Completed,
            Transition::Fail(_) => ItemStatus::Error,
        }
    }
}

/// 解析対象の1素材
///
/// `result` と `error` は completed/error のときにどちらか一方だけが入る。
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    id: String,
    display_name: String,
    payload: Payload,
    status: ItemStatus,
    result: Option<Metadata>,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(display_name: impl Into<String>, payload: Payload) -> Self {
        Self::with_id(generate_item_id(), display_name, payload)
    }

    pub fn with_id(id: impl Into<String>, display_name: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            payload,
            status: ItemStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// 前処理で失敗した素材（ネットワークに出る前から error）
    pub fn rejected(display_name: impl Into<String>, kind: ContentKind, error: impl Into<String>) -> Self {
        let mut item = Self::new(display_name, Payload::Rejected { kind });
        item.status = ItemStatus::Error;
        item.error = Some(error.into());
        item
    }

    /// 同じ素材の既存レコードのIDを引き継ぐ
    ///
    /// 解析可能な素材は確定状態も復元する（error は再試行対象、completed は再送しない）。
    /// `fresh` の場合は pending のまま同じIDで解析し直す。
    pub fn adopt_record(mut self, record: &AnalysisResultRecord, fresh: bool) -> Self {
        self.id = record.id.clone();
        if fresh || !self.payload.is_analyzable() {
            return self;
        }
        match &record.outcome {
            RecordOutcome::Completed { result } => {
                self.status = ItemStatus::Completed;
                self.result = Some(result.clone());
                self.error = None;
            }
            RecordOutcome::Error { error } => {
                self.status = ItemStatus::Error;
                self.result = None;
                self.error = Some(error.clone());
            }
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn kind(&self) -> ContentKind {
        self.payload.kind()
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn result(&self) -> Option<&Metadata> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// バッチ/単体解析の対象か（pending または error で、解析可能なデータを持つ）
    pub fn is_eligible(&self) -> bool {
        matches!(self.status, ItemStatus::Pending | ItemStatus::Error) && self.payload.is_analyzable()
    }

    /// 遷移を適用。許可されない遷移は false を返し状態を変えない
    pub fn apply(&mut self, transition: Transition) -> bool {
        match (self.status, transition) {
            (ItemStatus::Pending | ItemStatus::Error, Transition::Begin) => {
                if !self.payload.is_analyzable() {
                    return false;
                }
                self.status = ItemStatus::Processing;
                self.result = None;
                self.error = None;
                true
            }
            (ItemStatus::Processing, Transition::Complete(metadata)) => {
                self.status = ItemStatus::Completed;
                self.result = Some(metadata);
                self.error = None;
                true
            }
            (ItemStatus::Processing, Transition::Fail(message)) => {
                self.status = ItemStatus::Error;
                self.result = None;
                self.error = Some(message);
                true
            }
            _ => false,
        }
    }
}

/// ステータス別件数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
}

/// 順序付きワークアイテムの共有ストア
#[derive(Debug, Clone, Default)]
pub struct WorkItemStore {
    inner: Arc<Mutex<Vec<WorkItem>>>,
}

impl WorkItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<WorkItem>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 末尾に追加。既存と同じIDのアイテムは追加しない
    ///
    /// 戻り値は実際に追加した件数
    pub fn add(&self, new_items: impl IntoIterator<Item = WorkItem>) -> usize {
        let mut items = self.lock();
        let mut added = 0;
        for item in new_items {
            if items.iter().any(|existing| existing.id == item.id) {
                debug!(id = %item.id, "duplicate work item ignored");
                continue;
            }
            items.push(item);
            added += 1;
        }
        added
    }

    /// ステータス遷移を適用。IDが存在しないか遷移が不正なら false
    pub fn update_status(&self, id: &str, transition: Transition) -> bool {
        let mut items = self.lock();
        match items.iter_mut().find(|item| item.id == id) {
            Some(item) => item.apply(transition),
            None => false,
        }
    }

    /// 無条件で削除（解析中のリクエストはキャンセルしない）
    pub fn remove(&self, id: &str) -> bool {
        let mut items = self.lock();
        let before = items.len();
        items.retain(|item| item.id != id);
        items.len() != before
    }

    /// 生成済みメタデータを手動修正（ステータスは変えない）
    pub fn edit(&self, id: &str, patch: &MetadataPatch) -> bool {
        let mut items = self.lock();
        match items
            .iter_mut()
            .find(|item| item.id == id)
            .and_then(|item| item.result.as_mut())
        {
            Some(result) => {
                result.apply(patch);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<WorkItem> {
        self.lock().iter().find(|item| item.id == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().iter().any(|item| item.id == id)
    }

    pub fn snapshot(&self) -> Vec<WorkItem> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 指定種別の解析対象（pending/error）を追加順で取得
    pub fn eligible(&self, kind: ContentKind) -> Vec<WorkItem> {
        self.lock()
            .iter()
            .filter(|item| item.kind() == kind && item.is_eligible())
            .cloned()
            .collect()
    }

    /// 指定IDのうち processing のままのものを error にする
    ///
    /// 戻り値は error にしたID
    pub fn fail_processing(&self, ids: &[String], message: &str) -> Vec<String> {
        let mut items = self.lock();
        items
            .iter_mut()
            .filter(|item| ids.contains(&item.id) && item.status == ItemStatus::Processing)
            .map(|item| {
                item.apply(Transition::Fail(message.to_string()));
                item.id.clone()
            })
            .collect()
    }

    pub fn counts(&self) -> StatusCounts {
        let items = self.lock();
        let mut counts = StatusCounts::default();
        for item in items.iter() {
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::Processing => counts.processing += 1,
                ItemStatus::Completed => counts.completed += 1,
                ItemStatus::Error => counts.error += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_item(id: &str) -> WorkItem {
        WorkItem::with_id(
            id,
            format!("{}.jpg", id),
            Payload::Image {
                data_uri: "data:image/jpeg;base64,AAAA".to_string(),
            },
        )
    }

    fn metadata(title: &str) -> Metadata {
        Metadata {
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_generate_item_id_unique() {
        let a = generate_item_id();
        let b = generate_item_id();
        assert_ne!(a, b);
        assert!(a.contains('-'));
    }

    #[test]
    fn test_new_item_is_pending() {
        let item = image_item("a");
        assert_eq!(item.status(), ItemStatus::Pending);
        assert!(item.result().is_none());
        assert!(item.error().is_none());
        assert_eq!(item.kind(), ContentKind::Image);
    }

    #[test]
    fn test_add_dedupes_by_id() {
        let store = WorkItemStore::new();
        assert_eq!(store.add(vec![image_item("a"), image_item("b")]), 2);
        assert_eq!(store.add(vec![image_item("a"), image_item("c")]), 1);
        let ids: Vec<String> = store.snapshot().iter().map(|i| i.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let store = WorkItemStore::new();
        store.add(vec![image_item("a")]);

        assert!(store.update_status("a", Transition::Begin));
        assert_eq!(store.get("a").unwrap().status(), ItemStatus::Processing);

        assert!(store.update_status("a", Transition::Fail("boom".into())));
        let item = store.get("a").unwrap();
        assert_eq!(item.status(), ItemStatus::Error);
        assert_eq!(item.error(), Some("boom"));
        assert!(item.result().is_none());

        // 再試行
        assert!(store.update_status("a", Transition::Begin));
        assert!(store.get("a").unwrap().error().is_none());
        assert!(store.update_status("a", Transition::Complete(metadata("ok"))));
        let item = store.get("a").unwrap();
        assert_eq!(item.status(), ItemStatus::Completed);
        assert_eq!(item.result().unwrap().title, "ok");
        assert!(item.error().is_none());
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let store = WorkItemStore::new();
        store.add(vec![image_item("a")]);

        // pending から直接 completed にはならない
        assert!(!store.update_status("a", Transition::Complete(metadata("x"))));
        assert_eq!(store.get("a").unwrap().status(), ItemStatus::Pending);

        store.update_status("a", Transition::Begin);
        store.update_status("a", Transition::Complete(metadata("x")));
        // completed から再開始しない
        assert!(!store.update_status("a", Transition::Begin));
    }

    #[test]
    fn test_update_missing_id_is_noop() {
        let store = WorkItemStore::new();
        assert!(!store.update_status("missing", Transition::Begin));
    }

    #[test]
    fn test_remove() {
        let store = WorkItemStore::new();
        store.add(vec![image_item("a"), image_item("b")]);
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_edit_keeps_status() {
        let store = WorkItemStore::new();
        store.add(vec![image_item("a")]);
        store.update_status("a", Transition::Begin);
        store.update_status("a", Transition::Complete(metadata("AI title")));

        let patch = MetadataPatch {
            title: Some("Fixed title".into()),
            ..Default::default()
        };
        assert!(store.edit("a", &patch));
        let item = store.get("a").unwrap();
        assert_eq!(item.status(), ItemStatus::Completed);
        assert_eq!(item.result().unwrap().title, "Fixed title");
    }

    #[test]
    fn test_edit_without_result_fails() {
        let store = WorkItemStore::new();
        store.add(vec![image_item("a")]);
        assert!(!store.edit("a", &MetadataPatch::default()));
    }

    #[test]
    fn test_rejected_item_not_eligible() {
        let store = WorkItemStore::new();
        store.add(vec![
            WorkItem::rejected("broken.mp4", ContentKind::Video, "corrupt"),
            WorkItem::with_id("v", "ok.mp4", Payload::Video { frames: vec!["f".into()] }),
        ]);

        let eligible = store.eligible(ContentKind::Video);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id(), "v");
        assert_eq!(store.counts().error, 1);
    }

    #[test]
    fn test_eligible_filters_kind_and_status() {
        let store = WorkItemStore::new();
        store.add(vec![
            image_item("a"),
            image_item("b"),
            WorkItem::with_id("t", "note", Payload::Text { text: "hi".into(), title: None }),
        ]);
        store.update_status("b", Transition::Begin);

        let eligible = store.eligible(ContentKind::Image);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id(), "a");
    }

    #[test]
    fn test_fail_processing_only_touches_processing() {
        let store = WorkItemStore::new();
        store.add(vec![image_item("a"), image_item("b")]);
        store.update_status("a", Transition::Begin);

        let failed = store.fail_processing(&["a".to_string(), "b".to_string()], "aborted");
        assert_eq!(failed, vec!["a".to_string()]);
        assert_eq!(store.get("a").unwrap().error(), Some("aborted"));
        assert_eq!(store.get("b").unwrap().status(), ItemStatus::Pending);
    }

    fn record(id: &str, outcome: RecordOutcome) -> AnalysisResultRecord {
        AnalysisResultRecord {
            id: id.to_string(),
            filename: format!("{}.jpg", id),
            kind: ContentKind::Image,
            service: "openai".to_string(),
            timestamp: Utc::now(),
            outcome,
        }
    }

    #[test]
    fn test_adopt_error_record_is_retryable() {
        let prior = record("old", RecordOutcome::Error { error: "timeout".into() });
        let mut item = image_item("new").adopt_record(&prior, false);

        assert_eq!(item.id(), "old");
        assert_eq!(item.status(), ItemStatus::Error);
        assert_eq!(item.error(), Some("timeout"));
        assert!(item.is_eligible());
        assert!(item.apply(Transition::Begin));
        assert!(item.error().is_none());
    }

    #[test]
    fn test_adopt_completed_record() {
        let prior = record("old", RecordOutcome::Completed { result: metadata("Fox") });

        let kept = image_item("new").adopt_record(&prior, false);
        assert_eq!(kept.status(), ItemStatus::Completed);
        assert_eq!(kept.result().unwrap().title, "Fox");
        assert!(!kept.is_eligible());

        let fresh = image_item("new").adopt_record(&prior, true);
        assert_eq!(fresh.id(), "old");
        assert_eq!(fresh.status(), ItemStatus::Pending);
    }

    #[test]
    fn test_adopt_keeps_rejection() {
        let prior = record("old", RecordOutcome::Completed { result: metadata("Clip") });
        let item = WorkItem::rejected("old.jpg", ContentKind::Image, "corrupt").adopt_record(&prior, false);

        assert_eq!(item.id(), "old");
        assert_eq!(item.status(), ItemStatus::Error);
        assert_eq!(item.error(), Some("corrupt"));
    }
}
