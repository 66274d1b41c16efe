//! Stock Meta Common Library
//!
//! CLIとライブラリ本体で共有される、I/Oを持たない型とユーティリティ

pub mod types;
pub mod category;
pub mod provider;
pub mod error;
pub mod stats;
pub mod export;

pub use types::{
    split_keywords, AnalysisResultRecord, CategoryField, ContentKind, ItemStatus, KeywordsField,
    Metadata, MetadataPatch, ProviderOutcome, RecordOutcome,
};
pub use category::{category_code, category_name, normalize_category, CATEGORIES};
pub use provider::Provider;
pub use error::{Error, Result};
pub use stats::DashboardStats;
pub use export::csv_core::{build_csv, parse_csv, parse_export_csv, rows_from_records, ExportRow, CSV_HEADERS};
