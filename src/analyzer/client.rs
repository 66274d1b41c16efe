//! 解析バックエンドのHTTPクライアント

use super::{AnalysisInput, AnalysisService, BatchResponse, RequestContext};
use crate::backend::BackendClient;
use crate::error::{Result, StockMetaError};
use crate::items::Payload;
use crate::settings::Credentials;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stock_meta_common::{ContentKind, ProviderOutcome};
use tracing::debug;

fn single_endpoint(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Image => "/api/analyze-image-structured",
        ContentKind::Video => "/api/analyze-video-structured",
        ContentKind::Text => "/api/analyze-text-structured",
    }
}

fn batch_endpoint(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Image => "/api/analyze-images-batch",
        ContentKind::Video => "/api/analyze-videos-batch",
        ContentKind::Text => "/api/analyze-texts-batch",
    }
}

/// 全リクエスト共通のフィールド
#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(flatten)]
    body: T,
    /// 常に1プロバイダ
    services: [&'static str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_prompt: Option<&'a str>,
    #[serde(flatten)]
    credentials: &'a Credentials,
}

impl<'a, T: Serialize> Envelope<'a, T> {
    fn new(body: T, ctx: &'a RequestContext) -> Self {
        Self {
            body,
            services: [ctx.provider.id()],
            custom_prompt: ctx.custom_prompt.as_deref(),
            credentials: &ctx.credentials,
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum SingleBody<'a> {
    Image {
        image: &'a str,
        filename: &'a str,
    },
    Video {
        frames: &'a [String],
        filename: &'a str,
    },
    Text {
        text: &'a str,
        filename: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<&'a str>,
    },
}

#[derive(Serialize)]
struct ImageEntry<'a> {
    id: &'a str,
    image_data: &'a str,
    filename: &'a str,
}

#[derive(Serialize)]
struct VideoEntry<'a> {
    id: &'a str,
    frames: &'a [String],
    filename: &'a str,
}

#[derive(Serialize)]
struct TextEntry<'a> {
    id: &'a str,
    text: &'a str,
    filename: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum BatchBody<'a> {
    Images { images: Vec<ImageEntry<'a>> },
    Videos { videos: Vec<VideoEntry<'a>> },
    Texts { texts: Vec<TextEntry<'a>> },
}

#[derive(Debug, Deserialize)]
struct SingleResponse {
    #[serde(default)]
    results: Vec<ProviderOutcome>,
    #[serde(default)]
    error: Option<String>,
}

fn single_body<'a>(kind: ContentKind, item: &'a AnalysisInput) -> Result<SingleBody<'a>> {
    let filename = item.display_name.as_str();
    match (&item.payload, kind) {
        (Payload::Image { data_uri }, ContentKind::Image) => Ok(SingleBody::Image {
            image: data_uri,
            filename,
        }),
        (Payload::Video { frames }, ContentKind::Video) => Ok(SingleBody::Video { frames, filename }),
        (Payload::Text { text, title }, ContentKind::Text) => Ok(SingleBody::Text {
            text,
            filename,
            title: title.as_deref(),
        }),
        _ => Err(StockMetaError::NotAnalyzable(item.display_name.clone())),
    }
}

fn batch_body<'a>(kind: ContentKind, items: &'a [AnalysisInput]) -> Result<BatchBody<'a>> {
    let mismatch = |item: &AnalysisInput| StockMetaError::NotAnalyzable(item.display_name.clone());

    match kind {
        ContentKind::Image => items
            .iter()
            .map(|item| match &item.payload {
                Payload::Image { data_uri } => Ok(ImageEntry {
                    id: &item.id,
                    image_data: data_uri,
                    filename: &item.display_name,
                }),
                _ => Err(mismatch(item)),
            })
            .collect::<Result<Vec<_>>>()
            .map(|images| BatchBody::Images { images }),
        ContentKind::Video => items
            .iter()
            .map(|item| match &item.payload {
                Payload::Video { frames } => Ok(VideoEntry {
                    id: &item.id,
                    frames,
                    filename: &item.display_name,
                }),
                _ => Err(mismatch(item)),
            })
            .collect::<Result<Vec<_>>>()
            .map(|videos| BatchBody::Videos { videos }),
        ContentKind::Text => items
            .iter()
            .map(|item| match &item.payload {
                Payload::Text { text, title } => Ok(TextEntry {
                    id: &item.id,
                    text,
                    filename: &item.display_name,
                    title: title.as_deref(),
                }),
                _ => Err(mismatch(item)),
            })
            .collect::<Result<Vec<_>>>()
            .map(|texts| BatchBody::Texts { texts }),
    }
}

/// HTTP経由の解析サービス
pub struct HttpAnalysisService {
    backend: BackendClient,
}

impl HttpAnalysisService {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    async fn analyze_item(
        &self,
        kind: ContentKind,
        item: &AnalysisInput,
        ctx: &RequestContext,
    ) -> Result<Vec<ProviderOutcome>> {
        let envelope = Envelope::new(single_body(kind, item)?, ctx);
        let response: SingleResponse = self
            .backend
            .post_json(single_endpoint(kind), &envelope)
            .await?;

        match response.error {
            Some(error) if response.results.is_empty() => Err(StockMetaError::ApiCall(error)),
            _ => Ok(response.results),
        }
    }

    async fn analyze_batch(
        &self,
        kind: ContentKind,
        items: &[AnalysisInput],
        ctx: &RequestContext,
    ) -> Result<BatchResponse> {
        let envelope = Envelope::new(batch_body(kind, items)?, ctx);
        debug!(kind = %kind, items = items.len(), "submitting chunk");
        self.backend.post_json(batch_endpoint(kind), &envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stock_meta_common::Provider;

    fn image_input(id: &str) -> AnalysisInput {
        AnalysisInput {
            id: id.to_string(),
            display_name: format!("{}.jpg", id),
            payload: Payload::Image {
                data_uri: "data:image/jpeg;base64,AAAA".into(),
            },
        }
    }

    fn context() -> RequestContext {
        let mut credentials = Credentials::default();
        credentials.api_keys.insert("openai".into(), "sk-test".into());
        RequestContext::new(Provider::OpenAi, credentials).with_prompt(Some("Focus on colors".into()))
    }

    #[test]
    fn test_batch_envelope_shape() {
        let ctx = context();
        let items = vec![image_input("1"), image_input("2")];
        let envelope = Envelope::new(batch_body(ContentKind::Image, &items).unwrap(), &ctx);
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["images"][0]["id"], "1");
        assert_eq!(value["images"][1]["filename"], "2.jpg");
        assert_eq!(value["services"][0], "openai");
        assert_eq!(value["custom_prompt"], "Focus on colors");
        assert_eq!(value["api_keys"]["openai"], "sk-test");
    }

    #[test]
    fn test_single_text_body() {
        let ctx = context();
        let item = AnalysisInput {
            id: "t".into(),
            display_name: "prompt.txt".into(),
            payload: Payload::Text {
                text: "A fox in snow".into(),
                title: Some("Fox".into()),
            },
        };
        let envelope = Envelope::new(single_body(ContentKind::Text, &item).unwrap(), &ctx);
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["text"], "A fox in snow");
        assert_eq!(value["title"], "Fox");
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let items = vec![image_input("1")];
        assert!(matches!(
            batch_body(ContentKind::Video, &items),
            Err(StockMetaError::NotAnalyzable(_))
        ));
    }

    #[test]
    fn test_batch_response_parsing() {
        let json = r#"{
            "success": true,
            "results": {"1.jpg": [{"service": "Openai", "success": true, "title": "T", "keywords": ["a"], "category": 1}]},
            "total_images": 1
        }"#;
        let response: BatchResponse = serde_json::from_str(json).unwrap();
        assert!(response.success);
        assert_eq!(response.results["1.jpg"].len(), 1);
    }
}
