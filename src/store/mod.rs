//! 解析結果ストア
//!
//! 種別ごとの確定済みレコードと選択中プロバイダを保持し、変更のたびにJSONへ保存する。
//! 更新は [`StoreAction`] を1つずつ適用する形で直列化され、保存に失敗した更新は反映しない。
//! 起動時は保存済みファイルから復元する（破損・バージョン不一致なら空から開始）。

pub mod remote;

pub use remote::{sync, ResultsClient, ResultsRemote, SyncSummary};

use crate::config::Config;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use stock_meta_common::{AnalysisResultRecord, ContentKind, DashboardStats, MetadataPatch, Provider};
use tracing::{debug, warn};

const STORE_FILE_NAME: &str = "results.json";

/// ストアへの更新操作
#[derive(Debug, Clone, PartialEq)]
pub enum StoreAction {
    /// レコードを追加（同じIDは置き換え、位置は維持）
    Merge { records: Vec<AnalysisResultRecord> },
    Remove { id: String },
    /// 完了レコードのメタデータを修正
    Edit { id: String, patch: MetadataPatch },
    Select { kind: ContentKind, provider: Provider },
    /// 指定種別（None なら全種別）のレコードを削除
    Clear { kind: Option<ContentKind> },
}

/// 永続化される状態
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    version: u32,
    #[serde(default)]
    selections: BTreeMap<ContentKind, Provider>,
    #[serde(default)]
    records: BTreeMap<ContentKind, Vec<AnalysisResultRecord>>,
}

impl StoreState {
    const CURRENT_VERSION: u32 = 1;

    /// 操作を適用。状態が変わったら true
    fn reduce(&mut self, action: StoreAction) -> bool {
        match action {
            StoreAction::Merge { records } => {
                let mut changed = false;
                for record in records {
                    changed |= self.upsert(record);
                }
                changed
            }
            StoreAction::Remove { id } => {
                let mut removed = false;
                for list in self.records.values_mut() {
                    let before = list.len();
                    list.retain(|r| r.id != id);
                    removed |= list.len() != before;
                }
                removed
            }
            StoreAction::Edit { id, patch } => {
                if patch.is_empty() {
                    return false;
                }
                match self
                    .records
                    .values_mut()
                    .flat_map(|list| list.iter_mut())
                    .find(|r| r.id == id)
                    .and_then(|r| r.metadata_mut())
                {
                    Some(metadata) => {
                        metadata.apply(&patch);
                        true
                    }
                    None => false,
                }
            }
            StoreAction::Select { kind, provider } => {
                self.selections.insert(kind, provider) != Some(provider)
            }
            StoreAction::Clear { kind: Some(kind) } => self
                .records
                .remove(&kind)
                .is_some_and(|list| !list.is_empty()),
            StoreAction::Clear { kind: None } => {
                let had_records = self.records.values().any(|list| !list.is_empty());
                self.records.clear();
                had_records
            }
        }
    }

    fn upsert(&mut self, record: AnalysisResultRecord) -> bool {
        // 種別が変わっていても同じIDは1件だけ
        for (kind, list) in self.records.iter_mut() {
            if *kind != record.kind {
                list.retain(|r| r.id != record.id);
            }
        }

        let list = self.records.entry(record.kind).or_default();
        match list.iter_mut().find(|r| r.id == record.id) {
            Some(existing) if *existing == record => false,
            Some(existing) => {
                *existing = record;
                true
            }
            None => {
                list.push(record);
                true
            }
        }
    }
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            selections: BTreeMap::new(),
            records: BTreeMap::new(),
        }
    }
}

/// 共有結果ストア（Clone で同じ状態を参照）
#[derive(Debug, Clone)]
pub struct ResultStore {
    state: Arc<Mutex<StoreState>>,
    path: Option<PathBuf>,
}

impl ResultStore {
    /// 保存しないストア（テスト用）
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            path: None,
        }
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Config::config_dir()?.join(STORE_FILE_NAME))
    }

    /// 保存済みファイルから復元
    pub fn load(path: &Path) -> Self {
        Self {
            state: Arc::new(Mutex::new(Self::hydrate(path))),
            path: Some(path.to_path_buf()),
        }
    }

    fn hydrate(path: &Path) -> StoreState {
        if !path.exists() {
            return StoreState::default();
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "result store unreadable, starting empty");
                return StoreState::default();
            }
        };

        match serde_json::from_reader::<_, StoreState>(BufReader::new(file)) {
            Ok(state) if state.version == StoreState::CURRENT_VERSION => state,
            Ok(state) => {
                warn!(found = state.version, "result store version mismatch, starting empty");
                StoreState::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "result store corrupt, starting empty");
                StoreState::default()
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 操作を適用して保存
    ///
    /// 戻り値は状態が変わったかどうか。保存に失敗した場合は状態を変えずにエラーを返す。
    pub fn dispatch(&self, action: StoreAction) -> Result<bool> {
        let mut state = self.lock();
        let mut next = state.clone();
        if !next.reduce(action) {
            return Ok(false);
        }

        if let Some(path) = &self.path {
            persist(path, &next)?;
        }
        *state = next;
        Ok(true)
    }

    pub fn records(&self, kind: ContentKind) -> Vec<AnalysisResultRecord> {
        self.lock().records.get(&kind).cloned().unwrap_or_default()
    }

    /// 全レコード（種別順）
    pub fn all_records(&self) -> Vec<AnalysisResultRecord> {
        self.lock().records.values().flatten().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<AnalysisResultRecord> {
        self.lock()
            .records
            .values()
            .flatten()
            .find(|r| r.id == id)
            .cloned()
    }

    /// 同じ種別・ファイル名のレコード（複数あれば最新）
    pub fn find_by_filename(&self, kind: ContentKind, filename: &str) -> Option<AnalysisResultRecord> {
        self.lock()
            .records
            .get(&kind)?
            .iter()
            .filter(|r| r.filename == filename)
            .max_by_key(|r| r.timestamp)
            .cloned()
    }

    pub fn selection(&self, kind: ContentKind) -> Option<Provider> {
        self.lock().selections.get(&kind).copied()
    }

    pub fn stats(&self, kind: Option<ContentKind>) -> DashboardStats {
        let state = self.lock();
        DashboardStats::from_records(
            state
                .records
                .iter()
                .filter(|(k, _)| kind.map_or(true, |wanted| wanted == **k))
                .flat_map(|(_, list)| list.iter()),
        )
    }
}

fn persist(path: &Path, state: &StoreState) -> Result<()> {
    save_json_atomic(path, state)?;
    debug!(path = %path.display(), "result store saved");
    Ok(())
}

/// 一時ファイルに書いてから置き換える
///
/// flush と sync まで成功した場合のみ元のファイルを置き換える。
pub(crate) fn save_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let written = write_json(&tmp, value).and_then(|()| std::fs::rename(&tmp, path).map_err(Into::into));
    if written.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    written
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}
