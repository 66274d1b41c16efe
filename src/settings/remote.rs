//! ユーザー設定のリモート同期
//!
//! バックエンドが応答しない・エラーを返す場合はローカルの保管庫で続行する。

use super::{ApiKeyRegistry, UserKeys};
use crate::backend::BackendClient;
use crate::error::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

const SETTINGS_PATH: &str = "/api/user-settings";
const SETTINGS_FORM_PATH: &str = "/api/user-settings/form";
const CLEAR_KEYS_PATH: &str = "/api/user-settings/api-keys";
const RESET_PROMPTS_PATH: &str = "/api/user-settings/prompts/reset";

#[derive(Debug, Deserialize)]
struct Acknowledgement {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct SettingsClient {
    backend: BackendClient,
    registry: ApiKeyRegistry,
    user_id: String,
}

impl SettingsClient {
    pub fn new(backend: BackendClient, registry: ApiKeyRegistry, user_id: impl Into<String>) -> Self {
        Self {
            backend,
            registry,
            user_id: user_id.into(),
        }
    }

    pub fn local(&self) -> UserKeys {
        self.registry.user(&self.user_id)
    }

    /// 有効な設定（ローカル + リモートの未マスク設定）
    pub async fn effective_keys(&self) -> UserKeys {
        let mut keys = self.local();
        match self.backend.get_json::<Value>(SETTINGS_FORM_PATH).await {
            Ok(value) => keys.merge(&UserKeys::from_flat(&value)),
            Err(e) => warn!(error = %e, "remote settings unavailable, using local keys"),
        }
        keys
    }

    /// 表示用のマスク済み設定
    pub async fn masked_remote(&self) -> Option<UserKeys> {
        match self.backend.get_json::<Value>(SETTINGS_PATH).await {
            Ok(value) => Some(UserKeys::from_flat(&value)),
            Err(e) => {
                warn!(error = %e, "remote settings unavailable");
                None
            }
        }
    }

    /// 設定を更新（ローカルに保存してからリモートへ送る）
    pub async fn update<F: FnOnce(&mut UserKeys)>(&mut self, f: F) -> Result<UserKeys> {
        self.registry.update(&self.user_id, f);
        self.registry.save()?;

        let keys = self.local();
        if let Err(e) = self
            .backend
            .post_json::<_, Value>(SETTINGS_PATH, &keys.to_flat())
            .await
        {
            warn!(error = %e, "remote settings update failed, saved locally only");
        }
        Ok(keys)
    }

    pub async fn clear_api_keys(&mut self) -> Result<()> {
        self.registry.update(&self.user_id, UserKeys::clear_all_keys);
        self.registry.save()?;
        self.acknowledge(self.backend.delete_json(CLEAR_KEYS_PATH).await, "clear api keys");
        Ok(())
    }

    pub async fn reset_prompts(&mut self) -> Result<()> {
        self.registry.update(&self.user_id, |keys| {
            keys.global_system_prompt = None;
            keys.additional_context.clear();
        });
        self.registry.save()?;
        self.acknowledge(
            self.backend
                .post_json(RESET_PROMPTS_PATH, &serde_json::json!({}))
                .await,
            "reset prompts",
        );
        Ok(())
    }

    fn acknowledge(&self, response: Result<Acknowledgement>, action: &str) {
        match response {
            Ok(ack) if ack.success => {}
            Ok(ack) => warn!(action, error = ?ack.error, "remote settings rejected request"),
            Err(e) => warn!(action, error = %e, "remote settings unavailable"),
        }
    }
}
