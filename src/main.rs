use clap::Parser;
use dialoguer::{Confirm, Input};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use stock_meta::analyzer::{
    analyze_single, register_prepared, BatchOptions, BatchReport, BatchScheduler, HttpAnalysisService,
    RequestContext,
};
use stock_meta::backend::BackendClient;
use stock_meta::cli::{Cli, Commands, ExportFormat, ResultsAction};
use stock_meta::config::Config;
use stock_meta::error::{Result, StockMetaError};
use stock_meta::items::{Payload, WorkItem, WorkItemStore};
use stock_meta::preprocess::{prepare_items, FfmpegBackend, PreprocessOptions};
use stock_meta::settings::{mask_api_key, ApiKeyRegistry, SettingsClient, UserKeys};
use stock_meta::store::{self, ResultStore, ResultsClient, StoreAction};
use stock_meta::{export, scanner};
use stock_meta_common::{
    split_keywords, AnalysisResultRecord, ContentKind, ItemStatus, MetadataPatch, Provider,
};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("stock_meta=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stock_meta=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn progress_bar(len: u64, template: &str) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar
}

fn target_kinds(kind: Option<ContentKind>) -> Vec<ContentKind> {
    kind.map(|k| vec![k]).unwrap_or_else(|| ContentKind::ALL.to_vec())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = Config::load()?;

    match cli.command {
        Commands::Analyze {
            paths,
            kind,
            provider,
            prompt,
            chunk_size,
            recursive,
            text,
            title,
            reanalyze,
        } => {
            let mut config = config;
            if let Some(size) = chunk_size {
                config.chunk_size = size;
                config.validate()?;
            }
            let request = AnalyzeRequest {
                paths,
                kind,
                provider,
                prompt,
                recursive,
                texts: text,
                title,
                reanalyze,
            };
            run_analyze(&config, request).await?;
        }

        Commands::Results { action, kind } => {
            run_results(&config, action.unwrap_or(ResultsAction::List), kind).await?;
        }

        Commands::Export { kind, format, output } => {
            run_export(kind, format, output)?;
        }

        Commands::Config {
            show,
            set_api_key,
            clear_keys,
            select,
            backend_url,
            user_id,
            reset_prompts,
        } => {
            let mut config = config;
            let mut changed = false;

            if let Some(url) = backend_url {
                config.backend_url = url;
                changed = true;
            }
            if let Some(id) = user_id {
                config.user_id = Some(id);
                changed = true;
            }
            if changed {
                config.validate()?;
                config.save()?;
                println!("✔ 設定を保存しました");
            }

            if let Some(pair) = select {
                if let [kind, provider] = pair.as_slice() {
                    let kind: ContentKind = kind.parse()?;
                    let provider: Provider = provider.parse()?;
                    let store = ResultStore::load(&ResultStore::default_path()?);
                    store.dispatch(StoreAction::Select { kind, provider })?;
                    println!("✔ {} のプロバイダを {} に設定しました", kind, provider.display_name());
                    if kind == ContentKind::Video && !provider.native_video_support() {
                        println!("  ※ {} は動画をフレーム画像として解析します", provider.display_name());
                    }
                }
            }

            let needs_settings = set_api_key.is_some() || clear_keys || reset_prompts || show;
            if needs_settings {
                run_settings(&config, set_api_key, clear_keys, reset_prompts, show).await?;
            }
        }

        Commands::Sync { kind } => {
            println!("🔄 stock-meta - サーバー同期\n");
            config.require_user_id()?;
            let store = ResultStore::load(&ResultStore::default_path()?);
            let remote = ResultsClient::new(BackendClient::from_config(&config)?);
            let summary = store::sync(&store, &remote, kind).await?;
            println!("✔ 取得 {}件 / 送信 {}件", summary.pulled, summary.pushed);
            println!("\n✅ 同期完了");
        }
    }

    Ok(())
}

struct AnalyzeRequest {
    paths: Vec<PathBuf>,
    kind: Option<ContentKind>,
    provider: Option<Provider>,
    prompt: Option<String>,
    recursive: bool,
    texts: Vec<String>,
    title: Option<String>,
    reanalyze: bool,
}

/// ローカルとサーバーの設定を合わせたAPIキー
async fn effective_keys(config: &Config, backend: &BackendClient) -> Result<UserKeys> {
    let user_id = config.require_user_id()?;
    let settings = SettingsClient::new(
        backend.clone(),
        ApiKeyRegistry::load(&ApiKeyRegistry::default_path()?),
        user_id,
    );
    Ok(settings.effective_keys().await)
}

/// プロバイダはフラグ → 種別ごとの選択 → 既定の順で決める
fn request_context(
    kind: ContentKind,
    provider: Option<Provider>,
    keys: &UserKeys,
    results: &ResultStore,
    prompt: Option<String>,
) -> RequestContext {
    let provider = provider
        .or_else(|| results.selection(kind))
        .unwrap_or_else(|| Provider::default_for(kind, &keys.configured_providers()));
    RequestContext::new(provider, keys.credentials()).with_prompt(prompt)
}

async fn run_analyze(config: &Config, request: AnalyzeRequest) -> Result<()> {
    config.require_user_id()?;
    println!("🧠 stock-meta - メタデータ解析\n");

    // 1. スキャン
    println!("[1/4] 素材をスキャン中...");
    let mut files = if request.paths.is_empty() {
        Vec::new()
    } else {
        scanner::scan_paths(&request.paths, request.recursive)?
    };
    if let Some(kind) = request.kind {
        files.retain(|f| f.kind == kind);
    }
    let accept_text = request.kind.map_or(true, |k| k == ContentKind::Text);
    let inline_texts: Vec<&String> = if accept_text {
        request.texts.iter().filter(|t| !t.trim().is_empty()).collect()
    } else {
        Vec::new()
    };
    if files.is_empty() && inline_texts.is_empty() {
        let scope = request
            .paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(StockMetaError::NoInputFound(scope));
    }
    println!("✔ {}件の素材を検出\n", files.len() + inline_texts.len());

    // 2. 前処理
    println!("[2/4] 前処理中（画像圧縮・フレーム抽出）...");
    let options = PreprocessOptions::from(config);
    let media = FfmpegBackend::default();
    let bar = progress_bar(files.len() as u64, "{bar:40.cyan/blue} {pos}/{len} {msg}");
    let prepared = prepare_items(&files, &options, &media, |current, _total, name| {
        bar.set_position(current as u64);
        bar.set_message(name.to_string());
    })
    .await;
    bar.finish_and_clear();

    // 同じ素材の既存レコードはIDを引き継ぎ、前処理の失敗はここで記録する
    let results = ResultStore::load(&ResultStore::default_path()?);
    let intake = register_prepared(prepared, &results, request.reanalyze)?;
    let mut prepared = intake.items;
    if intake.reused > 0 {
        println!("  既存の解析結果 {}件 を引き継ぎ", intake.reused);
    }

    for (index, text) in inline_texts.into_iter().enumerate() {
        let name = match &request.title {
            Some(title) if index == 0 => title.clone(),
            Some(title) => format!("{} ({})", title, index + 1),
            None => format!("text-{}", index + 1),
        };
        prepared.push(WorkItem::new(
            name,
            Payload::Text {
                text: text.clone(),
                title: request.title.clone(),
            },
        ));
    }

    let rejected: Vec<&WorkItem> = prepared
        .iter()
        .filter(|item| !item.payload().is_analyzable())
        .collect();
    for item in &rejected {
        println!("  ✗ {}: {}", item.display_name(), item.error().unwrap_or_default());
    }
    println!("✔ 前処理完了（{}件、失敗 {}件）\n", prepared.len(), rejected.len());

    let items = WorkItemStore::new();
    items.add(prepared);

    // 3. 解析
    println!("[3/4] AI解析中...");
    let backend = BackendClient::from_config(config)?;
    let keys = effective_keys(config, &backend).await?;
    let service = HttpAnalysisService::new(backend);
    let scheduler = BatchScheduler::new(&service, items.clone(), results.clone(), BatchOptions::from(config));
    let custom_prompt = request.prompt.clone().or_else(|| config.custom_prompt.clone());

    for kind in ContentKind::ALL {
        if items.eligible(kind).is_empty() {
            continue;
        }
        let ctx = request_context(kind, request.provider, &keys, &results, custom_prompt.clone());

        println!("- {} を {} で解析", kind, ctx.provider.display_name());
        let bar = progress_bar(0, "{bar:40.green/white} {pos}/{len} チャンク {msg}");
        let report = scheduler
            .run(kind, &ctx, |progress| {
                bar.set_length(progress.total_chunks as u64);
                bar.set_position(progress.current_chunk.saturating_sub(1) as u64);
                bar.set_message(format!("({}件)", progress.chunk_len));
            })
            .await;
        bar.finish_and_clear();

        match report {
            Ok(BatchReport::Finished(summary)) => println!(
                "✔ {}: 成功 {}件 / 失敗 {}件（{}チャンク）",
                kind, summary.completed, summary.failed, summary.total_chunks
            ),
            Ok(BatchReport::NothingToAnalyze) => {}
            Err(e) => println!("✗ {}: {}", kind, e),
        }
    }
    println!();

    // 4. 結果
    println!("[4/4] 結果");
    for item in items.snapshot() {
        match (item.status(), item.result()) {
            (ItemStatus::Completed, Some(meta)) => {
                println!("  ✔ {} → {}", item.display_name(), meta.title);
            }
            (ItemStatus::Error, _) => {
                println!("  ✗ {}: {}", item.display_name(), item.error().unwrap_or_default());
            }
            (status, _) => println!("  - {} ({})", item.display_name(), status),
        }
    }

    let counts = items.counts();
    println!(
        "\n✅ 解析完了: 成功 {}件 / エラー {}件",
        counts.completed, counts.error
    );
    Ok(())
}

async fn run_results(config: &Config, action: ResultsAction, kind: Option<ContentKind>) -> Result<()> {
    let store = ResultStore::load(&ResultStore::default_path()?);

    match action {
        ResultsAction::List => {
            let mut empty = true;
            for kind in target_kinds(kind) {
                let records = store.records(kind);
                if records.is_empty() {
                    continue;
                }
                empty = false;
                println!("■ {} ({}件)", kind, records.len());
                for record in &records {
                    print_record(record);
                }
                println!();
            }
            if empty {
                println!("解析結果がありません");
            }
        }

        ResultsAction::Stats => {
            let stats = store.stats(kind);
            println!("統計:");
            println!("  解析数: {}", stats.total_analyses);
            println!("  成功: {}", stats.successful_analyses);
            println!("  エラー: {}", stats.error_analyses);
            println!("  成功率: {:.1}%", stats.success_rate);
            println!("  キーワード総数: {}", stats.total_keywords);
            for (kind, count) in &stats.by_type {
                println!("  [{}] {}件", kind, count);
            }
            for (service, count) in &stats.by_service {
                println!("  <{}> {}件", service, count);
            }
        }

        ResultsAction::Remove { id } => {
            if !store.dispatch(StoreAction::Remove { id: id.clone() })? {
                return Err(StockMetaError::ItemNotFound(id));
            }
            println!("✔ 削除しました: {}", id);
        }

        ResultsAction::Edit {
            id,
            title,
            keywords,
            category,
            releases,
        } => {
            let record = store
                .get(&id)
                .ok_or_else(|| StockMetaError::ItemNotFound(id.clone()))?;
            let patch = MetadataPatch {
                title,
                keywords: keywords.as_deref().map(split_keywords),
                category,
                releases,
            };
            let patch = if patch.is_empty() {
                prompt_patch(&record)?
            } else {
                patch
            };
            if patch.is_empty() {
                println!("変更はありません");
                return Ok(());
            }
            if !store.dispatch(StoreAction::Edit { id: id.clone(), patch })? {
                return Err(StockMetaError::NotAnalyzable(record.filename));
            }
            println!("✔ 更新しました: {}", id);
        }

        ResultsAction::Retry { id, file, provider } => {
            run_retry(config, &store, &id, file, provider).await?;
        }

        ResultsAction::Clear => {
            let scope = kind.map(|k| k.to_string()).unwrap_or_else(|| "全種別".into());
            let confirmed = Confirm::new()
                .with_prompt(format!("{} の解析結果をすべて削除しますか？", scope))
                .default(false)
                .interact()
                .map_err(|e| StockMetaError::Prompt(e.to_string()))?;
            if confirmed {
                store.dispatch(StoreAction::Clear { kind })?;
                println!("✔ 解析結果を削除しました");
            }
        }
    }

    Ok(())
}

/// エラーのレコードを同じIDのまま再解析（error → processing → completed | error）
async fn run_retry(
    config: &Config,
    results: &ResultStore,
    id: &str,
    file: PathBuf,
    provider: Option<Provider>,
) -> Result<()> {
    println!("🔁 stock-meta - 再解析\n");
    let record = results
        .get(id)
        .ok_or_else(|| StockMetaError::ItemNotFound(id.to_string()))?;
    if record.is_completed() {
        return Err(StockMetaError::NotAnalyzable(record.filename));
    }

    let files = scanner::scan_paths(std::slice::from_ref(&file), false)?;
    let scanned = files
        .into_iter()
        .find(|f| f.kind == record.kind)
        .ok_or_else(|| StockMetaError::NoInputFound(file.display().to_string()))?;
    if scanned.file_name != record.filename {
        println!("  ※ レコードのファイル名は {} です", record.filename);
    }

    println!("[1/2] 前処理中...");
    let prepared = prepare_items(
        std::slice::from_ref(&scanned),
        &PreprocessOptions::from(config),
        &FfmpegBackend::default(),
        |_, _, _| {},
    )
    .await;
    let items = WorkItemStore::new();
    items.add(prepared.into_iter().map(|item| item.adopt_record(&record, false)));
    let Some(item) = items.get(id) else {
        return Err(StockMetaError::ItemNotFound(id.to_string()));
    };
    if !item.is_eligible() {
        let error = item.error().unwrap_or_default().to_string();
        register_prepared(items.snapshot(), results, false)?;
        println!("✗ {}: {}", item.display_name(), error);
        return Ok(());
    }

    println!("[2/2] AI解析中...");
    let backend = BackendClient::from_config(config)?;
    let keys = effective_keys(config, &backend).await?;
    let ctx = request_context(record.kind, provider, &keys, results, config.custom_prompt.clone());
    let service = HttpAnalysisService::new(backend);

    match analyze_single(&service, &items, results, id, &ctx).await? {
        Some(ItemStatus::Completed) => {
            if let Some(updated) = results.get(id) {
                print_record(&updated);
            }
            println!("\n✅ 再解析完了");
        }
        _ => {
            let error = items
                .get(id)
                .and_then(|item| item.error().map(str::to_string))
                .unwrap_or_default();
            println!("✗ {}: {}", record.filename, error);
        }
    }
    Ok(())
}

fn print_record(record: &AnalysisResultRecord) {
    match record.metadata() {
        Some(meta) => {
            println!("  ✔ {} [{}] {}", record.id, record.filename, meta.title);
            println!("      キーワード: {}", meta.keywords.join(", "));
            println!("      カテゴリ: {}", meta.category);
            if !meta.releases.is_empty() {
                println!("      リリース: {}", meta.releases);
            }
        }
        None => println!(
            "  ✗ {} [{}] {}",
            record.id,
            record.filename,
            record.error().unwrap_or_default()
        ),
    }
}

/// 対話入力でパッチを作成（変更のないフィールドは None）
fn prompt_patch(record: &AnalysisResultRecord) -> Result<MetadataPatch> {
    let meta = record
        .metadata()
        .ok_or_else(|| StockMetaError::NotAnalyzable(record.filename.clone()))?;

    let ask = |prompt: &str, initial: &str| -> Result<String> {
        Input::<String>::new()
            .with_prompt(prompt)
            .with_initial_text(initial)
            .allow_empty(true)
            .interact_text()
            .map_err(|e| StockMetaError::Prompt(e.to_string()))
    };
    let changed = |input: String, current: &str| (input != current).then_some(input);

    let keywords = meta.keywords.join(", ");
    let title = ask("タイトル", &meta.title)?;
    let new_keywords = ask("キーワード（カンマ区切り）", &keywords)?;
    let category = ask("カテゴリ", &meta.category)?;
    let releases = ask("リリース", &meta.releases)?;

    Ok(MetadataPatch {
        title: changed(title, &meta.title),
        keywords: changed(new_keywords, &keywords).map(|k| split_keywords(&k)),
        category: changed(category, &meta.category),
        releases: changed(releases, &meta.releases),
    })
}

fn run_export(kind: Option<ContentKind>, format: ExportFormat, output: Option<PathBuf>) -> Result<()> {
    println!("📄 stock-meta - エクスポート\n");
    let store = ResultStore::load(&ResultStore::default_path()?);
    let records = match kind {
        Some(kind) => store.records(kind),
        None => store.all_records(),
    };

    if !records.iter().any(AnalysisResultRecord::is_completed) {
        println!("出力できる解析結果がありません");
        return Ok(());
    }

    let output = output.unwrap_or_else(|| PathBuf::from("."));
    println!("- {}を生成中...", format);
    let summary = export::export_records(&records, format, &output, &export::default_title(kind), kind)?;
    println!("✔ {}行を出力: {}", summary.rows, summary.path.display());
    if summary.skipped > 0 {
        println!("  （エラーの{}件は除外）", summary.skipped);
    }

    println!("\n✅ エクスポート完了");
    Ok(())
}

async fn run_settings(
    config: &Config,
    set_api_key: Option<Vec<String>>,
    clear_keys: bool,
    reset_prompts: bool,
    show: bool,
) -> Result<()> {
    let user_id = config.require_user_id()?;
    let mut settings = SettingsClient::new(
        BackendClient::from_config(config)?,
        ApiKeyRegistry::load(&ApiKeyRegistry::default_path()?),
        user_id,
    );

    if let Some(pair) = set_api_key {
        if let [provider, key] = pair.as_slice() {
            let provider: Provider = provider.parse()?;
            if key.trim().is_empty() {
                return Err(StockMetaError::MissingApiKey(provider.display_name().to_string()));
            }
            settings
                .update(|keys| {
                    keys.set_api_key(provider, key);
                })
                .await?;
            println!("✔ {} のAPIキーを設定しました", provider.display_name());
        }
    }

    if clear_keys {
        settings.clear_api_keys().await?;
        println!("✔ APIキーをすべて削除しました");
    }

    if reset_prompts {
        settings.reset_prompts().await?;
        println!("✔ プロンプトを既定に戻しました");
    }

    if show {
        let local = settings.local();
        let remote = settings.masked_remote().await;
        let store = ResultStore::load(&ResultStore::default_path()?);

        println!("設定:");
        println!("  バックエンド: {}", config.backend_url);
        println!("  ユーザーID: {}", user_id);
        println!("  チャンクサイズ: {}", config.chunk_size);
        println!("  チャンク間隔: {}ms", config.chunk_delay_ms);
        println!("  最大画像サイズ: {}px", config.max_image_dimension);
        println!("  動画フレーム数: {}", config.video_frame_count);
        println!("APIキー:");
        for provider in Provider::ALL {
            let local_key = local.api_keys.get(&provider).map(|k| mask_api_key(k));
            let remote_key = remote
                .as_ref()
                .and_then(|r| r.api_keys.get(&provider).cloned());
            let shown = local_key.or(remote_key).unwrap_or_else(|| "未設定".into());
            println!("  {:<10} {} (モデル: {})", provider.display_name(), shown, local.model(provider));
        }
        println!("プロバイダ選択:");
        for kind in ContentKind::ALL {
            let selected = store
                .selection(kind)
                .map(|p| p.display_name().to_string())
                .unwrap_or_else(|| "既定".into());
            println!("  {:<6} {}", kind.as_str(), selected);
        }
    }

    Ok(())
}
