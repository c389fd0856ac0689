use clap::{Parser, Subcommand};
use manifest_sync_common::ManifestId;

#[derive(Parser)]
#[command(name = "manifest-sync")]
#[command(about = "配送マニフェスト照合・オフライン同期ツール", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// マニフェストを開いて対話的にスキャン
    Scan {
        /// マニフェスト番号（numeroCarga）
        #[arg(required = true)]
        id: ManifestId,
    },

    /// スキャン状況を表示
    Status {
        /// マニフェスト番号
        #[arg(required = true)]
        id: ManifestId,

        /// 明細ごとの状態も表示
        #[arg(short, long)]
        lines: bool,
    },

    /// 端末に保存したスキャン結果を消去
    Clear {
        /// マニフェスト番号
        #[arg(required = true)]
        id: ManifestId,

        /// 確認せずに消去
        #[arg(short, long)]
        yes: bool,
    },

    /// 送信済みマニフェストの一覧
    Sent {
        /// 記録を削除して再スキャンを許可
        #[arg(long)]
        forget: Option<ManifestId>,
    },

    /// 端末に保留した送信を再送
    SyncPending,

    /// コードの正規化結果を表示
    Normalize {
        /// 請求書番号・納品書番号
        #[arg(required = true)]
        codes: Vec<String>,
    },

    /// 設定を表示/編集
    Config {
        /// APIのURLを設定
        #[arg(long)]
        set_api_url: Option<String>,

        /// 設定を表示
        #[arg(long)]
        show: bool,
    },
}
