//! バックグラウンド再取得（ライブ同期）
//!
//! 状態は `Idle` / `Polling` の2つ。
//! - 前回の取得が終わってから次のタイマーを張る（同時に2件の取得は走らない）
//! - タイマーを張る前と取得完了後に停止フラグを確認する
//! - `stop` は停止フラグを落としてタスクを中断する。実行中の取得の結果は捨てる
//!
//! 取得失敗はユーザーに通知しない（`PollEvent::Unreachable` で接続状態だけ伝える）。

use crate::api::ManifestApi;
use manifest_sync_common::{Manifest, ManifestId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const EVENT_BUFFER: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// 最新のマニフェストを取得した
    Refreshed(Manifest),
    /// サーバーに届かなかった（オフライン表示用）
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
}

struct ActivePoll {
    manifest_id: ManifestId,
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct LiveSyncPoller {
    api: Arc<dyn ManifestApi>,
    interval: Duration,
    active: Option<ActivePoll>,
}

impl LiveSyncPoller {
    pub fn new(api: Arc<dyn ManifestApi>, interval: Duration) -> Self {
        Self {
            api,
            interval,
            active: None,
        }
    }

    pub fn state(&self) -> PollerState {
        match &self.active {
            Some(active) if active.running.load(Ordering::SeqCst) => PollerState::Polling,
            _ => PollerState::Idle,
        }
    }

    pub fn manifest_id(&self) -> Option<ManifestId> {
        self.active.as_ref().map(|a| a.manifest_id)
    }

    /// ポーリングを開始（実行中なら止めてから開始）
    ///
    /// 開始ごとに新しい受信側を返す。停止後に届くイベントはない。
    pub fn start(&mut self, manifest_id: ManifestId) -> mpsc::Receiver<PollEvent> {
        self.stop();

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let running = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(poll_loop(
            self.api.clone(),
            manifest_id,
            self.interval,
            running.clone(),
            tx,
        ));

        info!(manifest_id, interval_ms = self.interval.as_millis() as u64, "live sync started");
        self.active = Some(ActivePoll {
            manifest_id,
            running,
            handle,
        });
        rx
    }

    /// ポーリングを停止
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.running.store(false, Ordering::SeqCst);
            active.handle.abort();
            info!(manifest_id = active.manifest_id, "live sync stopped");
        }
    }
}

impl Drop for LiveSyncPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(
    api: Arc<dyn ManifestApi>,
    manifest_id: ManifestId,
    interval: Duration,
    running: Arc<AtomicBool>,
    tx: mpsc::Sender<PollEvent>,
) {
    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(interval).await;
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let result = api.fetch_manifest(manifest_id).await;

        // 停止後に完了した取得は反映しない
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let event = match result {
            Ok(Some(manifest)) => PollEvent::Refreshed(manifest),
            Ok(None) => {
                debug!(manifest_id, "poll: manifest not found, ignored");
                continue;
            }
            Err(e) => {
                debug!(manifest_id, error = %e, "poll failed, ignored");
                PollEvent::Unreachable
            }
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(manifest_id, "poll event dropped, consumer is behind");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
}
