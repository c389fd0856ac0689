//! 遅延保存（デバウンス）
//!
//! 台帳が変更されるたびに `schedule` でスナップショットを渡す。
//! 最後の変更から一定時間（既定500ms）変更がなければ1回だけ書き込む。
//! 書き込み時点で最新のスナップショットを使うため、後勝ちが保たれる。
//!
//! 送信前の即時保存と消去も同じタスクを通すため、1件のマニフェストへの
//! 書き込みは常に順番に実行される（古いスナップショットが後から上書きしない）。
//!
//! 保存状態は `watch` チャネルで公開する（UIの「保存済み/保存中/エラー」表示用）。

use crate::error::{Result, SyncError};
use crate::store::{LedgerStore, SaveOutcome};
use chrono::{DateTime, Utc};
use manifest_sync_common::{ManifestId, ScanLedger};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Saved,
    Saving,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveState {
    pub status: SaveStatus,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for SaveState {
    fn default() -> Self {
        Self {
            status: SaveStatus::Saved,
            last_saved_at: None,
            last_error: None,
        }
    }
}

enum Command {
    Schedule(ScanLedger),
    Flush(oneshot::Sender<Result<Option<SaveOutcome>>>),
    SaveNow(ScanLedger, oneshot::Sender<Result<SaveOutcome>>),
    Clear(oneshot::Sender<Result<()>>),
    Discard,
}

pub struct DebouncedSaver {
    tx: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SaveState>,
    handle: JoinHandle<()>,
}

impl DebouncedSaver {
    pub fn spawn(store: LedgerStore, manifest_id: ManifestId, delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SaveState::default());
        let worker = SaveWorker {
            store,
            manifest_id,
            delay,
            state: state_tx,
        };
        let handle = tokio::spawn(worker.run(rx));
        Self { tx, state, handle }
    }

    /// 変更後の台帳を渡して保存を予約
    pub fn schedule(&self, ledger: &ScanLedger) {
        if self.tx.send(Command::Schedule(ledger.clone())).is_err() {
            error!("save worker is gone, change not scheduled");
        }
    }

    /// 予約中の保存を即時実行して結果を返す
    pub async fn flush(&self) -> Result<Option<SaveOutcome>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(reply_tx))
            .map_err(|_| SyncError::InvalidState("保存タスクが終了しています".into()))?;
        reply_rx
            .await
            .map_err(|_| SyncError::InvalidState("保存タスクが応答しません".into()))?
    }

    /// 渡した台帳を即時保存（予約中の保存は置き換える）
    ///
    /// 実行中の遅延保存が終わってから書き込む。
    pub async fn save_now(&self, ledger: &ScanLedger) -> Result<SaveOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::SaveNow(ledger.clone(), reply_tx))
            .map_err(|_| SyncError::InvalidState("保存タスクが終了しています".into()))?;
        reply_rx
            .await
            .map_err(|_| SyncError::InvalidState("保存タスクが応答しません".into()))?
    }

    /// 予約中の保存を破棄して保存済みの台帳を消去
    pub async fn clear(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Clear(reply_tx))
            .map_err(|_| SyncError::InvalidState("保存タスクが終了しています".into()))?;
        reply_rx
            .await
            .map_err(|_| SyncError::InvalidState("保存タスクが応答しません".into()))?
    }

    /// 予約中の保存を破棄
    pub fn discard(&self) {
        let _ = self.tx.send(Command::Discard);
    }

    pub fn state(&self) -> SaveState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveState> {
        self.state.clone()
    }

    /// 最終保存を行ってタスクを終了
    pub async fn close(self) -> Result<Option<SaveOutcome>> {
        let result = self.flush().await;
        drop(self.tx);
        let _ = self.handle.await;
        result
    }
}

struct SaveWorker {
    store: LedgerStore,
    manifest_id: ManifestId,
    delay: Duration,
    state: watch::Sender<SaveState>,
}

impl SaveWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut pending: Option<ScanLedger> = None;
        let mut deadline: Option<Instant> = None;

        loop {
            // 無効時も式は評価されるため、期限なしの場合は現在時刻を渡しておく
            let wake_at = deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Schedule(ledger)) => {
                        pending = Some(ledger);
                        deadline = Some(Instant::now() + self.delay);
                        self.state.send_modify(|s| s.status = SaveStatus::Saving);
                    }
                    Some(Command::Flush(reply)) => {
                        deadline = None;
                        let result = self.write(pending.take()).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::SaveNow(ledger, reply)) => {
                        deadline = None;
                        pending = None;
                        let _ = reply.send(self.write_ledger(&ledger).await);
                    }
                    Some(Command::Clear(reply)) => {
                        deadline = None;
                        pending = None;
                        let result = self.store.clear(self.manifest_id).await;
                        if result.is_ok() {
                            self.settle();
                        }
                        let _ = reply.send(result);
                    }
                    Some(Command::Discard) => {
                        deadline = None;
                        pending = None;
                        self.settle();
                    }
                    None => {
                        // 送信側が破棄された: 最後の状態を書き込んで終了
                        let _ = self.write(pending.take()).await;
                        break;
                    }
                },
                _ = sleep_until(wake_at), if deadline.is_some() => {
                    deadline = None;
                    let _ = self.write(pending.take()).await;
                }
            }
        }
    }

    /// 予約がなくなった時点の表示を「保存済み」に戻す
    fn settle(&self) {
        self.state.send_modify(|s| {
            if s.status == SaveStatus::Saving {
                s.status = SaveStatus::Saved;
            }
        });
    }

    async fn write(&self, ledger: Option<ScanLedger>) -> Result<Option<SaveOutcome>> {
        match ledger {
            Some(ledger) => self.write_ledger(&ledger).await.map(Some),
            None => Ok(None),
        }
    }

    async fn write_ledger(&self, ledger: &ScanLedger) -> Result<SaveOutcome> {
        self.state.send_modify(|s| s.status = SaveStatus::Saving);
        match self.store.save(self.manifest_id, ledger).await {
            Ok(outcome) => {
                debug!(manifest_id = self.manifest_id, ?outcome, "debounced save done");
                self.state.send_modify(|s| {
                    s.status = SaveStatus::Saved;
                    s.last_saved_at = Some(Utc::now());
                    s.last_error = None;
                });
                Ok(outcome)
            }
            Err(e) => {
                error!(manifest_id = self.manifest_id, error = %e, "ledger could not be saved");
                let message = e.to_string();
                self.state.send_modify(|s| {
                    s.status = SaveStatus::Error;
                    s.last_error = Some(message);
                });
                Err(e)
            }
        }
    }
}
