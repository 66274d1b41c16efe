//! 解析バックエンドへのHTTP共通処理
//!
//! すべてのリクエストに `X-User-ID` ヘッダーを付け、非2xxは
//! [`StockMetaError::ApiStatus`]、JSONでない本文は [`StockMetaError::ApiParse`] に変換する。

use crate::config::Config;
use crate::error::{Result, StockMetaError};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const USER_ID_HEADER: &str = "X-User-ID";

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    user_id: Option<String>,
}

impl BackendClient {
    pub fn new(base_url: &str, user_id: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.backend_url,
            config.user_id.clone(),
            config.request_timeout(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.user_id {
            Some(user_id) => builder.header(USER_ID_HEADER, user_id),
            None => builder,
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!(path, "GET");
        let response = self.request(Method::GET, path).send().await?;
        read_json(response).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(path, "POST");
        let response = self.request(Method::POST, path).json(body).send().await?;
        read_json(response).await
    }

    pub async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!(path, "DELETE");
        let response = self.request(Method::DELETE, path).send().await?;
        read_json(response).await
    }
}

/// 本文の `error` フィールドを取り出す（なければ本文そのもの）
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(StockMetaError::ApiStatus {
            status: status.as_u16(),
            message: error_detail(&body),
        });
    }

    serde_json::from_str(&body).map_err(|e| {
        let preview: String = body.chars().take(120).collect();
        StockMetaError::ApiParse(format!("{} (body: {})", e, preview))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_trims_trailing_slash() {
        let client = BackendClient::new("http://localhost:5000/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(client.url("/api/x"), "http://localhost:5000/api/x");
    }

    #[test]
    fn test_error_detail_prefers_error_field() {
        assert_eq!(error_detail(r#"{"error": "Invalid API key"}"#), "Invalid API key");
        assert_eq!(error_detail("<html>Bad Gateway</html>"), "<html>Bad Gateway</html>");
    }
}
