use crate::error::{Result, StockMetaError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 解析バックエンドのベースURL
    pub backend_url: String,
    /// 認証済みユーザーID（X-User-ID ヘッダーに使用）
    pub user_id: Option<String>,
    /// 1リクエストにまとめるアイテム数
    pub chunk_size: usize,
    /// チャンク間の待機時間（ミリ秒）
    pub chunk_delay_ms: u64,
    pub max_image_dimension: u32,
    pub jpeg_quality: u8,
    pub video_frame_count: usize,
    pub seek_timeout_seconds: u64,
    pub timeout_seconds: u64,
    /// 全リクエスト共通の追加プロンプト
    pub custom_prompt: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:5000".into(),
            user_id: None,
            chunk_size: 2,      // プロバイダのレート制限に合わせた値
            chunk_delay_ms: 2000,
            max_image_dimension: 1024,
            jpeg_quality: 85,
            video_frame_count: 5,
            seek_timeout_seconds: 10,
            timeout_seconds: 120,
            custom_prompt: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_json::from_str(&content)?
        } else {
            Self::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// 設定ディレクトリ（~/.config/stock-meta）
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| StockMetaError::Config("home directory not found".into()))?;
        Ok(home.join(".config").join("stock-meta"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// 環境変数を優先
    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("STOCK_META_BACKEND_URL") {
            if !url.trim().is_empty() {
                self.backend_url = url;
            }
        }
        if let Ok(user) = std::env::var("STOCK_META_USER_ID") {
            if !user.trim().is_empty() {
                self.user_id = Some(user);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(StockMetaError::Config("chunk_size must be at least 1".into()));
        }
        if self.video_frame_count == 0 {
            return Err(StockMetaError::Config("video_frame_count must be at least 1".into()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(StockMetaError::Config("jpeg_quality must be between 1 and 100".into()));
        }
        Ok(())
    }

    /// ユーザーIDを取得（未設定ならエラー）
    pub fn require_user_id(&self) -> Result<&str> {
        self.user_id
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                StockMetaError::Config(
                    "user id is not set. Run `stock-meta config --user-id YOUR_ID`".into(),
                )
            })
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn seek_timeout(&self) -> Duration {
        Duration::from_secs(self.seek_timeout_seconds)
    }
}
