use manifest_sync_common::ManifestId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("APIのURLが設定されていません。`manifest-sync config --set-api-url URL` で設定してください")]
    MissingApiUrl,

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("レスポンス解析エラー: {0}")]
    Parse(#[from] manifest_sync_common::Error),

    #[error("通信エラー: {0}")]
    Http(#[from] reqwest::Error),

    #[error("サーバーに接続できません: {0}")]
    Unreachable(String),

    #[error("マニフェストが見つかりません: {0}")]
    ManifestNotFound(ManifestId),

    #[error("マニフェスト {0} は送信済みです。再スキャンはできません")]
    AlreadySent(ManifestId),

    #[error("未完了で送信するには理由（コメント）が必要です")]
    MissingReason,

    #[error("ローカル保存に失敗しました。作業内容が失われる可能性があります。スキャン結果を手書きで控えてください: {0}")]
    LocalSaveFailed(String),

    #[error("サーバーが送信を拒否しました (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("ストレージエラー: {0}")]
    Storage(String),

    #[error("操作できない状態です: {0}")]
    InvalidState(String),

    #[error("入力エラー: {0}")]
    Console(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
