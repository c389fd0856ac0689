//! サーバーAPI
//!
//! - `buscar-carga`: マニフェスト取得（ヘッダー + 明細）
//! - `guardar-carga`: スキャン結果の送信
//!
//! 送信結果は HTTP ステータスのまま返し、分類は `submission::classify` が行う。

mod fake;
mod http;

pub use fake::{FetchStep, ScriptedApi};
pub use http::HttpManifestApi;

use crate::error::Result;
use async_trait::async_trait;
use manifest_sync_common::{Manifest, ManifestId, SubmissionPayload};
use thiserror::Error;

/// サーバーからの応答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    /// サーバーが返したエラーメッセージ（`error` / `message`）
    pub message: Option<String>,
}

impl ApiResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            message: None,
        }
    }

    pub fn with_message(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }
}

/// 応答が得られなかった失敗
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("タイムアウト")]
    Timeout,

    #[error("ネットワークエラー: {0}")]
    Network(String),
}

#[async_trait]
pub trait ManifestApi: Send + Sync {
    /// マニフェストを取得（該当なしは `Ok(None)`）
    async fn fetch_manifest(&self, id: ManifestId) -> Result<Option<Manifest>>;

    /// 送信ペイロードをPOST
    async fn submit(&self, payload: &SubmissionPayload) -> std::result::Result<ApiResponse, TransportError>;
}
