//! AIプロバイダ定義

use crate::error::Error;
use crate::types::ContentKind;
use serde::{Deserialize, Serialize};

/// 解析に使用するAIプロバイダ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Gemini,
    Groq,
    Grok,
    Llama,
    Cohere,
    DeepSeek,
}

impl Provider {
    pub const ALL: [Provider; 7] = [
        Provider::OpenAi,
        Provider::Gemini,
        Provider::Groq,
        Provider::Grok,
        Provider::Llama,
        Provider::Cohere,
        Provider::DeepSeek,
    ];

    /// バックエンドに送るサービスID
    pub fn id(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
            Provider::Groq => "groq",
            Provider::Grok => "grok",
            Provider::Llama => "llama",
            Provider::Cohere => "cohere",
            Provider::DeepSeek => "deepseek",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Gemini => "Gemini",
            Provider::Groq => "Groq",
            Provider::Grok => "Grok",
            Provider::Llama => "Llama",
            Provider::Cohere => "Cohere",
            Provider::DeepSeek => "DeepSeek",
        }
    }

    /// 既定モデル
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-5",
            Provider::Gemini => "gemini-2.5-pro",
            Provider::Groq => "meta-llama/llama-4-maverick-17b-128e-instruct",
            Provider::Grok => "grok-4",
            Provider::Llama => "llama-4-maverick-17b-128e",
            Provider::Cohere => "command-r-plus",
            Provider::DeepSeek => "deepseek-vl-7b-chat",
        }
    }

    /// 動画ファイルをそのまま解析できるか（それ以外はフレーム抽出）
    pub fn native_video_support(&self) -> bool {
        matches!(self, Provider::Gemini)
    }

    /// コンテンツ種別ごとの既定プロバイダ
    ///
    /// `configured` はAPIキー設定済みのプロバイダ。
    /// - 画像/テキスト: 設定済みの先頭
    /// - 動画: ネイティブ動画対応の設定済みプロバイダ、なければ設定済みの先頭
    /// 設定済みがひとつもなければ OpenAI。
    pub fn default_for(kind: ContentKind, configured: &[Provider]) -> Provider {
        let first = Provider::ALL
            .iter()
            .copied()
            .find(|p| configured.contains(p));

        let chosen = match kind {
            ContentKind::Video => Provider::ALL
                .iter()
                .copied()
                .find(|p| p.native_video_support() && configured.contains(p))
                .or(first),
            ContentKind::Image | ContentKind::Text => first,
        };

        chosen.unwrap_or(Provider::OpenAi)
    }
}

impl std::str::FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Provider::ALL
            .iter()
            .copied()
            .find(|p| p.id() == lower)
            .ok_or_else(|| {
                Error::Config(format!(
                    "Unknown provider: {}. Use one of: {}",
                    s,
                    Provider::ALL.iter().map(|p| p.id()).collect::<Vec<_>>().join(", ")
                ))
            })
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!("Gemini".parse::<Provider>().unwrap(), Provider::Gemini);
        assert!("mistral".parse::<Provider>().is_err());
    }

    #[test]
    fn test_provider_serde_id() {
        let json = serde_json::to_string(&Provider::DeepSeek).unwrap();
        assert_eq!(json, "\"deepseek\"");
        let p: Provider = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(p, Provider::OpenAi);
    }

    #[test]
    fn test_default_for_video_prefers_native() {
        let configured = [Provider::OpenAi, Provider::Gemini];
        assert_eq!(Provider::default_for(ContentKind::Video, &configured), Provider::Gemini);
        assert_eq!(Provider::default_for(ContentKind::Image, &configured), Provider::OpenAi);
    }

    #[test]
    fn test_default_for_video_without_native() {
        let configured = [Provider::Groq];
        assert_eq!(Provider::default_for(ContentKind::Video, &configured), Provider::Groq);
    }

    #[test]
    fn test_default_for_nothing_configured() {
        assert_eq!(Provider::default_for(ContentKind::Text, &[]), Provider::OpenAi);
    }
}
