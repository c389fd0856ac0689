//! 送信の状態遷移
//!
//! ```text
//! Editing ──(台帳が完了)──> Complete ─────────────┐
//!    │                                             ├─> Submitting{n} ─┬─> Synced
//!    └─(未完了で送信)──> IncompletePendingReason ──┘        │          └─> SavedLocalPending
//!                                                          └─(4xx拒否)─> Editing
//! ```
//!
//! 応答の分類:
//! - 2xx: 同期完了
//! - 409: 登録済み。同期完了として扱い再試行しない
//! - その他の4xx: 拒否。再試行せず、サーバーのメッセージをそのまま返す
//! - 5xx・通信失敗・タイムアウト: 指数バックオフで再試行。上限に達したら端末に保留

mod retry;

pub use retry::RetryPolicy;

use crate::api::{ApiResponse, ManifestApi, TransportError};
use crate::error::{Result, SyncError};
use manifest_sync_common::SubmissionPayload;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Editing,
    Complete,
    IncompletePendingReason,
    Submitting { attempt: u32 },
    Synced,
    SavedLocalPending,
}

impl std::fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionState::Editing => write!(f, "スキャン中"),
            SubmissionState::Complete => write!(f, "完了（送信可能）"),
            SubmissionState::IncompletePendingReason => write!(f, "未完了送信（理由待ち）"),
            SubmissionState::Submitting { attempt } => write!(f, "送信中（{}回目）", attempt),
            SubmissionState::Synced => write!(f, "送信済み"),
            SubmissionState::SavedLocalPending => write!(f, "端末に保存済み（未同期）"),
        }
    }
}

/// 1回の送信結果の分類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Synced,
    /// 409: 既に登録済み
    AlreadyExists,
    Rejected { status: u16, message: String },
    Retryable(String),
}

pub fn classify(result: &std::result::Result<ApiResponse, TransportError>) -> Classification {
    match result {
        Ok(response) => match response.status {
            200..=299 => Classification::Synced,
            409 => Classification::AlreadyExists,
            status @ 400..=499 => Classification::Rejected {
                status,
                message: response
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            },
            status => Classification::Retryable(
                response
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            ),
        },
        Err(e) => Classification::Retryable(e.to_string()),
    }
}

/// 送信処理全体の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Synced { already_existed: bool },
    SavedLocalPending { last_error: String },
    Rejected { status: u16, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReport {
    pub outcome: SubmitOutcome,
    /// 実際に呼び出した回数
    pub attempts: u32,
}

impl SubmitReport {
    pub fn is_synced(&self) -> bool {
        matches!(self.outcome, SubmitOutcome::Synced { .. })
    }
}

/// 再試行つきで送信する
///
/// `on_attempt` は各試行の直前に試行番号（1始まり）で呼ばれる。
pub async fn run_submission<F>(
    api: &dyn ManifestApi,
    payload: &SubmissionPayload,
    policy: &RetryPolicy,
    mut on_attempt: F,
) -> SubmitReport
where
    F: FnMut(u32),
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        on_attempt(attempt);

        let result = api.submit(payload).await;
        match classify(&result) {
            Classification::Synced => {
                info!(manifest_id = payload.manifest_id, attempt, "submission synced");
                return SubmitReport {
                    outcome: SubmitOutcome::Synced {
                        already_existed: false,
                    },
                    attempts: attempt,
                };
            }
            Classification::AlreadyExists => {
                info!(manifest_id = payload.manifest_id, attempt, "server already has manifest (409)");
                return SubmitReport {
                    outcome: SubmitOutcome::Synced {
                        already_existed: true,
                    },
                    attempts: attempt,
                };
            }
            Classification::Rejected { status, message } => {
                warn!(manifest_id = payload.manifest_id, status, %message, "submission rejected");
                return SubmitReport {
                    outcome: SubmitOutcome::Rejected { status, message },
                    attempts: attempt,
                };
            }
            Classification::Retryable(reason) => {
                if !policy.has_attempts_left(attempt) {
                    warn!(
                        manifest_id = payload.manifest_id,
                        attempt,
                        %reason,
                        "retries exhausted, keeping submission on device"
                    );
                    return SubmitReport {
                        outcome: SubmitOutcome::SavedLocalPending { last_error: reason },
                        attempts: attempt,
                    };
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    manifest_id = payload.manifest_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %reason,
                    "submission failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// 送信状態の管理
#[derive(Debug, Clone)]
pub struct SubmissionCoordinator {
    state: SubmissionState,
    reason: Option<String>,
}

impl Default for SubmissionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionCoordinator {
    pub fn new() -> Self {
        Self {
            state: SubmissionState::Editing,
            reason: None,
        }
    }

    pub fn state(&self) -> SubmissionState {
        self.state
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            SubmissionState::Synced | SubmissionState::SavedLocalPending
        )
    }

    /// 台帳の完了状態に合わせて Editing / Complete を切り替える
    pub fn on_ledger_changed(&mut self, complete: bool) {
        self.state = match (self.state, complete) {
            (SubmissionState::Editing, true) => SubmissionState::Complete,
            (SubmissionState::Complete, false) => SubmissionState::Editing,
            (SubmissionState::IncompletePendingReason, true) => {
                self.reason = None;
                SubmissionState::Complete
            }
            (state, _) => state,
        };
    }

    /// 未完了のまま送信する（理由の入力待ちへ）
    pub fn request_incomplete(&mut self) -> Result<()> {
        match self.state {
            SubmissionState::Editing | SubmissionState::IncompletePendingReason => {
                self.state = SubmissionState::IncompletePendingReason;
                Ok(())
            }
            SubmissionState::Complete => Err(SyncError::InvalidState(
                "すべてスキャン済みです。通常の送信を行ってください".into(),
            )),
            state => Err(SyncError::InvalidState(state.to_string())),
        }
    }

    pub fn set_reason(&mut self, reason: &str) {
        let reason = reason.trim();
        self.reason = (!reason.is_empty()).then(|| reason.to_string());
    }

    pub fn cancel_incomplete(&mut self) {
        if self.state == SubmissionState::IncompletePendingReason {
            self.state = SubmissionState::Editing;
            self.reason = None;
        }
    }

    /// 送信開始前の検証。送信するコメントを返す
    ///
    /// 未完了送信では理由の後に未スキャン要約をそのまま付ける。
    pub fn prepare(&self, missing_summary: &str) -> Result<Option<String>> {
        match self.state {
            SubmissionState::Complete => Ok(None),
            SubmissionState::IncompletePendingReason => {
                let reason = self.reason.as_deref().ok_or(SyncError::MissingReason)?;
                Ok(Some(format!("{}\n\n{}", reason, missing_summary)))
            }
            SubmissionState::Editing => Err(SyncError::InvalidState(
                "未スキャンの明細があります。未完了で送信するには理由を入力してください".into(),
            )),
            state => Err(SyncError::InvalidState(state.to_string())),
        }
    }

    pub fn mark_attempt(&mut self, attempt: u32) {
        self.state = SubmissionState::Submitting { attempt };
    }

    /// 送信結果を反映
    pub fn finish(&mut self, outcome: &SubmitOutcome) {
        self.state = match outcome {
            SubmitOutcome::Synced { .. } => SubmissionState::Synced,
            SubmitOutcome::SavedLocalPending { .. } => SubmissionState::SavedLocalPending,
            SubmitOutcome::Rejected { .. } => SubmissionState::Editing,
        };
    }

    /// ローカル保存の失敗で送信を中止
    pub fn abort(&mut self) {
        if matches!(self.state, SubmissionState::Submitting { .. }) {
            self.state = SubmissionState::Editing;
        }
    }
}
