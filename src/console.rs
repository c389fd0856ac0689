//! 対話式スキャンコンソール
//!
//! 標準入力の1行を1スキャンとして扱う（キーボード入力・ウェッジ式スキャナ共通）。
//! `:` で始まる行はコマンド。入力を待つ間もライブ同期の結果を反映する。

use crate::error::{Result, SyncError};
use crate::session::{RefreshReport, ScanEngine, ScanSession};
use crate::submission::SubmitOutcome;
use manifest_sync_common::{LineStatus, ManifestId, ScanOutcome};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

const HELP: &str = "コマンド: :missing 未スキャン一覧 / :progress 進捗 / :list 明細 / :submit 送信 / \
:incomplete <理由> 未完了で送信 / :clear 消去 / :quit 終了";

/// コンソール入力
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleAction {
    /// スキャンしたコード
    Scan(String),
    Missing,
    Progress,
    List,
    Submit,
    /// 未完了送信（理由は省略可、省略時は次の行で入力）
    Incomplete(Option<String>),
    Clear,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_console_input(line: &str) -> ConsoleAction {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ConsoleAction::Empty;
    }

    let Some(command) = trimmed.strip_prefix(':') else {
        return ConsoleAction::Scan(trimmed.to_string());
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };

    match name.to_lowercase().as_str() {
        "missing" | "m" => ConsoleAction::Missing,
        "progress" | "p" => ConsoleAction::Progress,
        "list" | "l" => ConsoleAction::List,
        "submit" | "s" => ConsoleAction::Submit,
        "incomplete" | "i" => {
            ConsoleAction::Incomplete((!rest.is_empty()).then(|| rest.to_string()))
        }
        "clear" => ConsoleAction::Clear,
        "help" | "h" | "?" => ConsoleAction::Help,
        "quit" | "q" | "exit" => ConsoleAction::Quit,
        _ => ConsoleAction::Unknown(trimmed.to_string()),
    }
}

/// スキャン結果の表示文
pub fn describe_outcome(session: &ScanSession, outcome: &ScanOutcome) -> String {
    match outcome {
        ScanOutcome::Matched {
            field, line_index, ..
        } => {
            let description = session
                .manifest()
                .lines
                .get(*line_index)
                .map(|l| l.description.as_str())
                .unwrap_or("");
            format!("✔ {}を確認しました: {}", field, description)
        }
        ScanOutcome::Duplicate { field, .. } => format!("⚠ この{}はスキャン済みです", field),
        ScanOutcome::NotFound => "✖ このマニフェストに該当するコードがありません".to_string(),
    }
}

fn status_mark(status: LineStatus) -> &'static str {
    match status {
        LineStatus::Full => "●",
        LineStatus::Partial => "◐",
        LineStatus::None => "○",
    }
}

fn print_progress(session: &ScanSession) {
    let p = session.progress();
    let sync = session.sync_state();
    println!(
        "進捗: 完了 {}/{}（一部 {}・未 {}） 保存: {:?} 接続: {}",
        p.full,
        p.total,
        p.partial,
        p.none,
        sync.save_status,
        if sync.online { "オンライン" } else { "オフライン" }
    );
}

fn print_lines(session: &ScanSession) {
    for index in session.display_order() {
        let line = &session.manifest().lines[index];
        let mark = session.line_status(index).map(status_mark).unwrap_or(" ");
        println!(
            "  {} 請求書: {} | 納品書: {} | 梱包: {} | {}",
            mark,
            line.invoice_code.as_deref().unwrap_or("-"),
            line.note_code.as_deref().unwrap_or("-"),
            line.package_count,
            line.description
        );
    }
}

fn print_refresh(report: &RefreshReport) {
    if report.became_finalized {
        println!("ℹ このマニフェストはサーバー側で確定されました");
    }
    if report.lines_changed {
        println!("ℹ 明細が更新されました");
    }
    if !report.orphaned.is_empty() {
        println!(
            "⚠ スキャン済みの {} 件が最新の明細に見つかりません",
            report.orphaned.len()
        );
    }
}

async fn read_line(lines: &mut Lines<BufReader<Stdin>>) -> Result<Option<String>> {
    lines
        .next_line()
        .await
        .map_err(|e| SyncError::Console(e.to_string()))
}

/// マニフェストを開いて対話式スキャンを行う
pub async fn run_scan_console(engine: &ScanEngine, manifest_id: ManifestId) -> Result<()> {
    let mut session = engine.open(manifest_id).await?;

    let manifest = session.manifest();
    println!("📦 マニフェスト {}（{}）", manifest.id, manifest.header_status);
    if let Some(header) = manifest.header() {
        println!(
            "  ルート: {} | 運転手: {} | 車両: {}",
            header.route.as_deref().unwrap_or("-"),
            header.driver.as_deref().unwrap_or("-"),
            header.vehicle.as_deref().unwrap_or("-")
        );
    }
    if !session.ledger().is_empty() {
        println!("✔ 前回のスキャン結果を復元しました");
    }
    print_progress(&session);
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = read_line(&mut lines) => line?,
            Some(report) = session.next_refresh() => {
                print_refresh(&report);
                continue;
            }
        };
        let Some(line) = line else {
            break;
        };

        match parse_console_input(&line) {
            ConsoleAction::Empty => {}
            ConsoleAction::Scan(code) => {
                let outcome = session.submit_code(&code)?;
                println!("{}", describe_outcome(&session, &outcome));
                if outcome.is_matched() && session.is_complete() {
                    println!("✅ すべてスキャンしました。:submit で送信できます");
                }
            }
            ConsoleAction::Missing => println!("{}", session.missing_summary()),
            ConsoleAction::Progress => print_progress(&session),
            ConsoleAction::List => print_lines(&session),
            ConsoleAction::Incomplete(reason) => {
                let reason = match reason {
                    Some(reason) => reason,
                    None => {
                        println!("未完了で送信する理由を入力してください:");
                        read_line(&mut lines).await?.unwrap_or_default()
                    }
                };
                if let Err(e) = session.mark_incomplete(&reason) {
                    println!("送信できません（{}）", e);
                    continue;
                }
                if submit_and_report(&mut session).await? {
                    break;
                }
            }
            ConsoleAction::Submit => {
                if submit_and_report(&mut session).await? {
                    break;
                }
            }
            ConsoleAction::Clear => {
                println!("スキャン結果をすべて消去しますか？ (y/N)");
                let answer = read_line(&mut lines).await?.unwrap_or_default();
                let confirmed = matches!(answer.trim(), "y" | "Y" | "yes");
                if session.clear(confirmed).await? {
                    println!("✔ スキャン結果を消去しました");
                } else {
                    println!("キャンセルしました");
                }
            }
            ConsoleAction::Help => println!("{}", HELP),
            ConsoleAction::Quit => break,
            ConsoleAction::Unknown(input) => println!("不明なコマンド: {}\n{}", input, HELP),
        }
    }

    session.close().await?;
    Ok(())
}

/// 送信して結果を表示。セッションを終了すべきなら `true`
async fn submit_and_report(session: &mut ScanSession) -> Result<bool> {
    let report = match session.submit().await {
        Ok(report) => report,
        Err(SyncError::MissingReason) | Err(SyncError::InvalidState(_)) => {
            let state = session.submission_state();
            println!("送信できません（{}）", state);
            println!("{}", session.missing_summary());
            session.cancel_incomplete();
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    match report.outcome {
        SubmitOutcome::Synced { already_existed } => {
            if already_existed {
                println!("✅ サーバーに登録済みでした（{}回目）", report.attempts);
            } else {
                println!("✅ 送信しました（{}回目）", report.attempts);
            }
            Ok(true)
        }
        SubmitOutcome::SavedLocalPending { last_error } => {
            println!("💾 端末に保存しました。サーバーへの送信は未完了です: {}", last_error);
            println!("   `manifest-sync sync-pending` で再送できます");
            Ok(true)
        }
        SubmitOutcome::Rejected { status, message } => {
            println!("✖ サーバーが拒否しました (HTTP {}): {}", status, message);
            println!("   内容を修正して再送してください");
            Ok(false)
        }
    }
}
