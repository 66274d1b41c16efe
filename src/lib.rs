//! stock-meta: ストック素材メタデータのバッチAI解析
//!
//! 画像・動画・テキストを前処理してから解析バックエンドにチャンク単位で送り、
//! 生成されたタイトル・キーワード・カテゴリを結果ストアに蓄積してCSV/Excelに出力する。

pub mod analyzer;
pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod items;
pub mod preprocess;
pub mod scanner;
pub mod settings;
pub mod store;

pub use error::{Result, StockMetaError};
