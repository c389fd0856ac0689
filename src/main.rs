use anyhow::Context;
use clap::Parser;
use dialoguer::Confirm;
use manifest_sync::api::HttpManifestApi;
use manifest_sync::store::{FileStore, KeyValueStore, LedgerStore};
use manifest_sync::sent::SentRegistry;
use manifest_sync::submission::SubmitOutcome;
use manifest_sync::{cli, config, console, session};
use manifest_sync_common::normalize_code;
use cli::{Cli, Commands};
use config::Config;
use session::ScanEngine;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn file_backend(config: &Config) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    let dir = config.data_dir()?;
    Ok(Arc::new(FileStore::new(dir)))
}

fn build_engine(config: &Config) -> anyhow::Result<ScanEngine> {
    let api = HttpManifestApi::from_config(config)?;
    Ok(ScanEngine::new(
        Arc::new(api),
        file_backend(config)?,
        config.engine_settings(),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = Config::load().context("設定ファイルを読み込めません")?;

    match cli.command {
        Commands::Scan { id } => {
            let engine = build_engine(&config)?;
            console::run_scan_console(&engine, id).await?;
        }

        Commands::Status { id, lines } => {
            let engine = build_engine(&config)?;
            if let Some(record) = engine.sent_registry().find(id).await {
                println!(
                    "マニフェスト {} は送信済みです（{}・{}）",
                    id,
                    record.sync,
                    record.sent_at.format("%Y-%m-%d %H:%M:%S")
                );
                return Ok(());
            }

            let snapshot = engine.snapshot(id).await?;
            let progress = snapshot.progress();
            println!("📦 マニフェスト {}（{}）", id, snapshot.manifest.header_status);
            println!(
                "  完了 {}/{}（一部 {}・未 {}）",
                progress.full, progress.total, progress.partial, progress.none
            );
            if lines {
                println!("{}", snapshot.missing_summary());
            }
        }

        Commands::Clear { id, yes } => {
            let confirmed = yes
                || Confirm::new()
                    .with_prompt(format!("マニフェスト {} のスキャン結果を消去しますか？", id))
                    .default(false)
                    .interact()
                    .context("確認の入力に失敗しました")?;

            if confirmed {
                LedgerStore::new(file_backend(&config)?).clear(id).await?;
                println!("✔ スキャン結果を消去しました");
            } else {
                println!("キャンセルしました");
            }
        }

        Commands::Sent { forget } => {
            let registry =
                SentRegistry::new(file_backend(&config)?, config.engine_settings().sent_retention);

            if let Some(id) = forget {
                if registry.forget(id).await? {
                    println!("✔ マニフェスト {} の送信記録を削除しました", id);
                } else {
                    println!("マニフェスト {} の送信記録はありません", id);
                }
            }

            let records = registry.load().await;
            if records.is_empty() {
                println!("送信済みのマニフェストはありません");
            }
            for record in records {
                println!(
                    "  {}  {}  {}",
                    record.manifest_id,
                    record.sync,
                    record.sent_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        Commands::SyncPending => {
            let engine = build_engine(&config)?;
            let reports = engine.retry_pending().await;
            if reports.is_empty() {
                println!("保留中の送信はありません");
            }
            for item in reports {
                match item.report.outcome {
                    SubmitOutcome::Synced { .. } => {
                        println!("✔ {}: 送信しました", item.manifest_id)
                    }
                    SubmitOutcome::SavedLocalPending { last_error } => {
                        println!("💾 {}: 未送信のまま保持します（{}）", item.manifest_id, last_error)
                    }
                    SubmitOutcome::Rejected { status, message } => println!(
                        "✖ {}: サーバーが拒否しました (HTTP {}): {}",
                        item.manifest_id, status, message
                    ),
                }
            }
        }

        Commands::Normalize { codes } => {
            for code in codes {
                println!("{} → {}", code, normalize_code(&code));
            }
        }

        Commands::Config { set_api_url, show } => {
            let mut config = config;

            if let Some(url) = set_api_url {
                config.set_api_url(url)?;
                println!("✔ APIのURLを設定しました");
            }

            if show {
                println!("設定:");
                println!("  API: {}", config.api_base_url().unwrap_or_else(|_| "未設定".into()));
                println!("  取得: {}", config.fetch_path);
                println!("  送信: {}", config.submit_path);
                println!("  ライブ同期間隔: {}ms", config.poll_interval_ms);
                println!("  保存遅延: {}ms", config.save_debounce_ms);
                println!("  送信試行回数: {}", config.max_submit_attempts);
                if let Ok(dir) = config.data_dir() {
                    println!("  データ: {}", dir.display());
                }
            }
        }
    }

    Ok(())
}
