use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stock_meta_common::{ContentKind, Provider};

#[derive(Parser)]
#[command(name = "stock-meta")]
#[command(about = "ストック素材メタデータAI生成ツール（画像・動画・テキスト）", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// ファイル/フォルダを解析して結果ストアに保存
    Analyze {
        /// 素材ファイルまたはフォルダ
        paths: Vec<PathBuf>,

        /// 対象の種別を限定 (image/video/text)
        #[arg(short, long)]
        kind: Option<ContentKind>,

        /// 使用するプロバイダ（省略時は種別ごとの選択または既定）
        #[arg(short, long)]
        provider: Option<Provider>,

        /// 追加プロンプト
        #[arg(long)]
        prompt: Option<String>,

        /// 1リクエストにまとめるアイテム数
        #[arg(short = 'c', long)]
        chunk_size: Option<usize>,

        /// サブフォルダも再帰的にスキャン
        #[arg(short = 'r', long)]
        recursive: bool,

        /// テキストを直接解析（複数指定可）
        #[arg(long)]
        text: Vec<String>,

        /// --text のタイトル
        #[arg(long, requires = "text")]
        title: Option<String>,

        /// 解析済みの素材も同じIDで解析し直す
        #[arg(long)]
        reanalyze: bool,
    },

    /// 解析結果の一覧・統計・修正
    Results {
        #[command(subcommand)]
        action: Option<ResultsAction>,

        /// 対象の種別
        #[arg(short, long, global = true)]
        kind: Option<ContentKind>,
    },

    /// 解析結果をCSV/Excelに出力
    Export {
        /// 対象の種別（省略時は全種別）
        #[arg(short, long)]
        kind: Option<ContentKind>,

        /// 出力形式 (csv/excel)
        #[arg(short, long, default_value = "csv")]
        format: ExportFormat,

        /// 出力ファイル/ディレクトリ
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 設定を表示/編集
    Config {
        /// 設定を表示
        #[arg(long)]
        show: bool,

        /// APIキーを設定
        #[arg(long, num_args = 2, value_names = ["PROVIDER", "KEY"])]
        set_api_key: Option<Vec<String>>,

        /// APIキーをすべて削除
        #[arg(long)]
        clear_keys: bool,

        /// 種別ごとのプロバイダを選択
        #[arg(long, num_args = 2, value_names = ["KIND", "PROVIDER"])]
        select: Option<Vec<String>>,

        /// 解析バックエンドのURL
        #[arg(long)]
        backend_url: Option<String>,

        /// ユーザーID
        #[arg(long)]
        user_id: Option<String>,

        /// システムプロンプトを既定に戻す
        #[arg(long)]
        reset_prompts: bool,
    },

    /// 結果をサーバーと同期
    Sync {
        /// 対象の種別（省略時は全種別）
        #[arg(short, long)]
        kind: Option<ContentKind>,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum ResultsAction {
    /// 一覧表示
    List,
    /// 統計表示
    Stats,
    /// レコードを削除
    Remove {
        id: String,
    },
    /// メタデータを修正（オプション省略時は対話入力）
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        /// カンマ区切り
        #[arg(long)]
        keywords: Option<String>,
        /// カテゴリ名またはコード
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        releases: Option<String>,
    },
    /// エラーのレコードを素材ファイルから再解析
    Retry {
        id: String,
        /// 元の素材ファイル
        file: PathBuf,
        /// 使用するプロバイダ
        #[arg(short, long)]
        provider: Option<Provider>,
    },
    /// レコードをすべて削除
    Clear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Csv,
    Excel,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "excel" | "xlsx" => Ok(ExportFormat::Excel),
            _ => Err(format!("Unknown format: {}. Use csv or excel", s)),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Csv => write!(f, "csv"),
            ExportFormat::Excel => write!(f, "excel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_format_from_str() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("xlsx".parse::<ExportFormat>().unwrap(), ExportFormat::Excel);
        assert!("pdf".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_parse_analyze() {
        let cli = Cli::try_parse_from([
            "stock-meta", "analyze", "photos", "--kind", "image", "--provider", "gemini", "-c", "4",
        ])
        .unwrap();
        match cli.command {
            Commands::Analyze { paths, kind, provider, chunk_size, .. } => {
                assert_eq!(paths, vec![PathBuf::from("photos")]);
                assert_eq!(kind, Some(ContentKind::Image));
                assert_eq!(provider, Some(Provider::Gemini));
                assert_eq!(chunk_size, Some(4));
            }
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn test_parse_config_set_api_key() {
        let cli = Cli::try_parse_from(["stock-meta", "config", "--set-api-key", "openai", "sk-x"]).unwrap();
        match cli.command {
            Commands::Config { set_api_key, .. } => {
                assert_eq!(set_api_key, Some(vec!["openai".to_string(), "sk-x".to_string()]));
            }
            _ => panic!("expected config"),
        }
    }

    #[test]
    fn test_parse_results_edit() {
        let cli = Cli::try_parse_from(["stock-meta", "results", "edit", "abc", "--title", "New"]).unwrap();
        match cli.command {
            Commands::Results { action: Some(ResultsAction::Edit { id, title, .. }), .. } => {
                assert_eq!(id, "abc");
                assert_eq!(title.as_deref(), Some("New"));
            }
            _ => panic!("expected results edit"),
        }
    }

    #[test]
    fn test_parse_results_retry() {
        let cli = Cli::try_parse_from(["stock-meta", "results", "retry", "abc", "clips/a.mp4", "-p", "gemini"]).unwrap();
        match cli.command {
            Commands::Results { action: Some(ResultsAction::Retry { id, file, provider }), .. } => {
                assert_eq!(id, "abc");
                assert_eq!(file, PathBuf::from("clips/a.mp4"));
                assert_eq!(provider, Some(Provider::Gemini));
            }
            _ => panic!("expected results retry"),
        }
    }
}
