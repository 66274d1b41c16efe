use thiserror::Error;

#[derive(Error, Debug)]
pub enum StockMetaError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("No API key configured for {0}. Run `stock-meta config --set-api-key {0} YOUR_KEY` first")]
    MissingApiKey(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    #[error("No supported files found in {0}")]
    NoInputFound(String),

    #[error("Image load error: {0}")]
    ImageLoad(String),

    #[error("Could not determine duration of {0}: video may be corrupt or unsupported")]
    VideoDuration(String),

    #[error("Frame extraction failed: {0}")]
    FrameExtraction(String),

    #[error("API call failed: {0}")]
    ApiCall(String),

    #[error("{}", status_message(.status, .message))]
    ApiStatus { status: u16, message: String },

    #[error("Could not parse API response: {0}")]
    ApiParse(String),

    #[error("JSON error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Excel generation error: {0}")]
    ExcelGeneration(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Item {0} has no analyzable content")]
    NotAnalyzable(String),

    #[error("Interactive input failed: {0}")]
    Prompt(String),

    #[error(transparent)]
    Common(#[from] stock_meta_common::Error),
}

pub type Result<T> = std::result::Result<T, StockMetaError>;

fn status_message(status: &u16, message: &str) -> String {
    describe_status(*status, message)
}

/// HTTPステータスを利用者向けメッセージに分類
///
/// - 401/403: 認証情報の問題
/// - 429: レート制限
/// - 5xx: 一時的なサーバー障害
pub fn describe_status(status: u16, message: &str) -> String {
    let base = match status {
        401 | 403 => "Authentication failed: check the API key for the selected provider".to_string(),
        429 => "Rate limit exceeded: wait a moment and retry".to_string(),
        500..=599 => format!("Analysis server error (HTTP {}): try again later", status),
        _ => format!("HTTP {}", status),
    };

    let detail = message.trim();
    if detail.is_empty() {
        base
    } else {
        format!("{} ({})", base, detail)
    }
}
