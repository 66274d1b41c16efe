//! ユーザー設定（APIキー・モデル・プロンプト）
//!
//! キーはユーザーIDごとに `~/.config/stock-meta/keys.json` に保存し、
//! 解析リクエストの認証情報バンドルとしてのみ送信する。

pub mod remote;

pub use remote::SettingsClient;

use crate::config::Config;
use crate::error::Result;
use crate::store::save_json_atomic;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use stock_meta_common::Provider;
use tracing::warn;

const KEYS_FILE_NAME: &str = "keys.json";

/// APIキーをマスク（8文字以下は全て伏せ字、それ以外は先頭4文字と末尾4文字を残す）
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 8), tail)
}

/// 1ユーザー分の設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserKeys {
    pub api_keys: BTreeMap<Provider, String>,
    /// プロバイダごとのモデル上書き
    pub models: BTreeMap<Provider, String>,
    pub global_system_prompt: Option<String>,
    pub additional_context: String,
}

impl UserKeys {
    pub fn configured(&self, provider: Provider) -> bool {
        self.api_keys
            .get(&provider)
            .is_some_and(|key| !key.trim().is_empty())
    }

    /// キー設定済みのプロバイダ（カタログ順）
    pub fn configured_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .iter()
            .copied()
            .filter(|p| self.configured(*p))
            .collect()
    }

    /// キーを設定。空文字列では既存のキーを上書きしない
    pub fn set_api_key(&mut self, provider: Provider, key: &str) -> bool {
        let key = key.trim();
        if key.is_empty() {
            return false;
        }
        self.api_keys.insert(provider, key.to_string());
        true
    }

    pub fn clear_api_key(&mut self, provider: Provider) {
        self.api_keys.remove(&provider);
    }

    pub fn clear_all_keys(&mut self) {
        self.api_keys.clear();
    }

    /// 使用モデル（上書きがなければ既定モデル）
    pub fn model(&self, provider: Provider) -> &str {
        self.models
            .get(&provider)
            .map(String::as_str)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| provider.default_model())
    }

    pub fn masked(&self) -> BTreeMap<Provider, String> {
        self.api_keys
            .iter()
            .map(|(provider, key)| (*provider, mask_api_key(key)))
            .collect()
    }

    /// 別の設定をマージ（空のキーは無視）
    pub fn merge(&mut self, other: &UserKeys) {
        for (provider, key) in &other.api_keys {
            self.set_api_key(*provider, key);
        }
        for (provider, model) in &other.models {
            if !model.trim().is_empty() {
                self.models.insert(*provider, model.clone());
            }
        }
        if other.global_system_prompt.is_some() {
            self.global_system_prompt = other.global_system_prompt.clone();
        }
        if !other.additional_context.is_empty() {
            self.additional_context = other.additional_context.clone();
        }
    }

    /// 解析リクエストに添付する認証情報
    pub fn credentials(&self) -> Credentials {
        Credentials {
            api_keys: self
                .api_keys
                .iter()
                .filter(|(_, key)| !key.trim().is_empty())
                .map(|(p, key)| (p.id().to_string(), key.clone()))
                .collect(),
            models: Provider::ALL
                .iter()
                .map(|p| (p.id().to_string(), self.model(*p).to_string()))
                .collect(),
            system_prompt: self.global_system_prompt.clone(),
            additional_context: self.additional_context.clone(),
        }
    }

    /// `{id}_api_key` / `{id}_model` 形式のフラットなJSONから読み込む
    pub fn from_flat(value: &Value) -> Self {
        let mut keys = UserKeys::default();
        let Some(object) = value.as_object() else {
            return keys;
        };

        for provider in Provider::ALL {
            if let Some(key) = object.get(&format!("{}_api_key", provider.id())).and_then(Value::as_str) {
                keys.set_api_key(provider, key);
            }
            if let Some(model) = object.get(&format!("{}_model", provider.id())).and_then(Value::as_str) {
                if !model.trim().is_empty() {
                    keys.models.insert(provider, model.to_string());
                }
            }
        }
        keys.global_system_prompt = object
            .get("global_system_prompt")
            .and_then(Value::as_str)
            .map(str::to_string);
        keys.additional_context = object
            .get("additional_context")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        keys
    }

    /// フラットなJSONに変換（設定更新リクエスト用）
    pub fn to_flat(&self) -> Map<String, Value> {
        let mut object = Map::new();
        for provider in Provider::ALL {
            if let Some(key) = self.api_keys.get(&provider) {
                object.insert(format!("{}_api_key", provider.id()), Value::String(key.clone()));
            }
            if let Some(model) = self.models.get(&provider) {
                object.insert(format!("{}_model", provider.id()), Value::String(model.clone()));
            }
        }
        if let Some(prompt) = &self.global_system_prompt {
            object.insert("global_system_prompt".into(), Value::String(prompt.clone()));
        }
        object.insert(
            "additional_context".into(),
            Value::String(self.additional_context.clone()),
        );
        object
    }
}

/// 解析リクエストの認証情報バンドル
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Credentials {
    /// プロバイダID → APIキー
    pub api_keys: BTreeMap<String, String>,
    /// プロバイダID → モデル名
    pub models: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub additional_context: String,
}

impl Credentials {
    pub fn has_key(&self, provider: Provider) -> bool {
        self.api_keys
            .get(provider.id())
            .is_some_and(|key| !key.trim().is_empty())
    }
}

/// keys.json の構造
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    /// ユーザーID → 設定
    users: BTreeMap<String, UserKeys>,
}

impl RegistryFile {
    const CURRENT_VERSION: u32 = 1;
}

impl Default for RegistryFile {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            users: BTreeMap::new(),
        }
    }
}

/// ローカルのAPIキー保管庫
#[derive(Debug, Clone)]
pub struct ApiKeyRegistry {
    path: PathBuf,
    file: RegistryFile,
}

impl ApiKeyRegistry {
    pub fn default_path() -> Result<PathBuf> {
        Ok(Config::config_dir()?.join(KEYS_FILE_NAME))
    }

    /// 読み込み（存在しない・壊れている場合は空）
    pub fn load(path: &Path) -> Self {
        let file = File::open(path)
            .ok()
            .and_then(|f| match serde_json::from_reader::<_, RegistryFile>(BufReader::new(f)) {
                Ok(file) if file.version == RegistryFile::CURRENT_VERSION => Some(file),
                Ok(_) => {
                    warn!(path = %path.display(), "key registry version mismatch, starting empty");
                    None
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "key registry unreadable, starting empty");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            path: path.to_path_buf(),
            file,
        }
    }

    pub fn save(&self) -> Result<()> {
        save_json_atomic(&self.path, &self.file)
    }

    pub fn user(&self, user_id: &str) -> UserKeys {
        self.file.users.get(user_id).cloned().unwrap_or_default()
    }

    /// ユーザー設定を更新（保存は呼び出し側）
    pub fn update<F: FnOnce(&mut UserKeys)>(&mut self, user_id: &str, f: F) {
        f(self.file.users.entry(user_id.to_string()).or_default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mask_api_key() {
        assert_eq!(mask_api_key("sk-1234567890abcd"), "sk-1*********abcd");
        assert_eq!(mask_api_key("short"), "*****");
        assert_eq!(mask_api_key("12345678"), "********");
        assert_eq!(mask_api_key(""), "");
    }

    #[test]
    fn test_empty_key_does_not_overwrite() {
        let mut keys = UserKeys::default();
        assert!(keys.set_api_key(Provider::OpenAi, "sk-abc"));
        assert!(!keys.set_api_key(Provider::OpenAi, "  "));
        assert_eq!(keys.api_keys[&Provider::OpenAi], "sk-abc");
    }

    #[test]
    fn test_configured_providers_in_catalogue_order() {
        let mut keys = UserKeys::default();
        keys.set_api_key(Provider::Cohere, "c");
        keys.set_api_key(Provider::Gemini, "g");
        assert_eq!(keys.configured_providers(), vec![Provider::Gemini, Provider::Cohere]);
        assert!(!keys.configured(Provider::OpenAi));
    }

    #[test]
    fn test_model_override_and_default() {
        let mut keys = UserKeys::default();
        assert_eq!(keys.model(Provider::Gemini), Provider::Gemini.default_model());
        keys.models.insert(Provider::Gemini, "gemini-2.5-flash".into());
        assert_eq!(keys.model(Provider::Gemini), "gemini-2.5-flash");
    }

    #[test]
    fn test_credentials_only_include_set_keys() {
        let mut keys = UserKeys::default();
        keys.set_api_key(Provider::Groq, "gsk");
        let creds = keys.credentials();
        assert!(creds.has_key(Provider::Groq));
        assert!(!creds.has_key(Provider::OpenAi));
        assert_eq!(creds.models.len(), Provider::ALL.len());
    }

    #[test]
    fn test_from_flat() {
        let value = json!({
            "user_id": "u1",
            "openai_api_key": "sk-live",
            "gemini_api_key": "",
            "gemini_model": "gemini-2.5-flash",
            "global_system_prompt": null,
            "additional_context": "stock photos"
        });
        let keys = UserKeys::from_flat(&value);
        assert!(keys.configured(Provider::OpenAi));
        assert!(!keys.configured(Provider::Gemini));
        assert_eq!(keys.model(Provider::Gemini), "gemini-2.5-flash");
        assert!(keys.global_system_prompt.is_none());
        assert_eq!(keys.additional_context, "stock photos");
    }

    #[test]
    fn test_flat_round_trip() {
        let mut keys = UserKeys::default();
        keys.set_api_key(Provider::DeepSeek, "ds-key-123456789");
        keys.additional_context = "ctx".into();
        let restored = UserKeys::from_flat(&Value::Object(keys.to_flat()));
        assert_eq!(restored, keys);
    }

    #[test]
    fn test_merge_keeps_existing_on_empty() {
        let mut keys = UserKeys::default();
        keys.set_api_key(Provider::OpenAi, "sk-old");
        let mut incoming = UserKeys::default();
        incoming.api_keys.insert(Provider::OpenAi, String::new());
        incoming.api_keys.insert(Provider::Grok, "xai".into());
        keys.merge(&incoming);
        assert_eq!(keys.api_keys[&Provider::OpenAi], "sk-old");
        assert!(keys.configured(Provider::Grok));
    }

    #[test]
    fn test_registry_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");

        let mut registry = ApiKeyRegistry::load(&path);
        registry.update("user_1", |keys| {
            keys.set_api_key(Provider::OpenAi, "sk-test");
        });
        registry.save().unwrap();

        let reloaded = ApiKeyRegistry::load(&path);
        assert!(reloaded.user("user_1").configured(Provider::OpenAi));
        assert!(!reloaded.user("user_2").configured(Provider::OpenAi));
    }

    #[test]
    fn test_registry_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        std::fs::write(&path, "{not json").unwrap();
        let registry = ApiKeyRegistry::load(&path);
        assert_eq!(registry.user("any"), UserKeys::default());
    }
}
