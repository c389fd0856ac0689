//! スキャンセッション
//!
//! 1件のマニフェストを開いてから閉じるまでの作業単位。
//! カメラ・手入力を問わず、スキャン入力はすべて `ScanSession::submit_code` を通る。
//!
//! - 開く: 送信済みチェック → 取得 → 台帳の復元 → 遅延保存とライブ同期を開始
//! - スキャン: 照合 → 台帳更新 → 遅延保存を予約 → 完了判定
//! - 再取得: 明細とヘッダー状態だけを差し替え、台帳は行キーで引き継ぐ
//! - 送信: ローカル保存を先に確定させてから送信
//! - 閉じる: ライブ同期を止め、最後の状態を書き込む

use crate::api::ManifestApi;
use crate::config::EngineSettings;
use crate::error::{Result, SyncError};
use crate::poller::{LiveSyncPoller, PollEvent, PollerState};
use crate::saver::{DebouncedSaver, SaveStatus};
use crate::sent::{PendingQueue, SentRegistry, SyncMark};
use crate::store::{KeyValueStore, LedgerStore};
use crate::submission::{run_submission, SubmissionCoordinator, SubmissionState, SubmitOutcome, SubmitReport};
use chrono::{DateTime, Utc};
use manifest_sync_common::{
    build_payload, normalize_code, HeaderStatus, LineStatus, Manifest, ManifestId, ManifestIndex,
    Progress, ScanLedger, ScanOutcome,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 画面表示用の同期状態（永続化しない）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub save_status: SaveStatus,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub online: bool,
    pub pending_sync: bool,
}

/// 再取得の反映結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// 現在の明細に存在しなくなった台帳キー（削除はしない）
    pub orphaned: Vec<String>,
    /// サーバー側で確定済みになった
    pub became_finalized: bool,
    pub lines_changed: bool,
}

/// 保留中送信の再送結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReport {
    pub manifest_id: ManifestId,
    pub report: SubmitReport,
}

/// 保存済みスキャン結果と最新マニフェストの読み取り専用の組
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestSnapshot {
    pub manifest: Manifest,
    pub ledger: ScanLedger,
}

impl ManifestSnapshot {
    pub fn progress(&self) -> Progress {
        self.ledger.progress(&self.manifest)
    }

    pub fn missing_summary(&self) -> String {
        self.ledger.missing_summary(&self.manifest)
    }
}

/// セッションを開くための共有部品
#[derive(Clone)]
pub struct ScanEngine {
    api: Arc<dyn ManifestApi>,
    ledger_store: LedgerStore,
    sent: SentRegistry,
    pending: PendingQueue,
    settings: EngineSettings,
}

impl ScanEngine {
    pub fn new(
        api: Arc<dyn ManifestApi>,
        backend: Arc<dyn KeyValueStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            api,
            ledger_store: LedgerStore::new(backend.clone()),
            sent: SentRegistry::new(backend.clone(), settings.sent_retention),
            pending: PendingQueue::new(backend),
            settings,
        }
    }

    pub fn ledger_store(&self) -> &LedgerStore {
        &self.ledger_store
    }

    pub fn sent_registry(&self) -> &SentRegistry {
        &self.sent
    }

    pub fn pending_queue(&self) -> &PendingQueue {
        &self.pending
    }

    /// マニフェストを取得してセッションを開く
    pub async fn open(&self, manifest_id: ManifestId) -> Result<ScanSession> {
        if self.sent.is_sent(manifest_id).await {
            return Err(SyncError::AlreadySent(manifest_id));
        }

        let manifest = self
            .api
            .fetch_manifest(manifest_id)
            .await?
            .ok_or(SyncError::ManifestNotFound(manifest_id))?;

        let ledger = self.ledger_store.load(manifest_id).await;
        if !ledger.is_empty() {
            info!(manifest_id, entries = ledger.len(), "resumed previous scans");
            let index = ManifestIndex::build(&manifest.lines);
            let orphaned = ledger.orphaned_keys(&index);
            if !orphaned.is_empty() {
                warn!(manifest_id, ?orphaned, "saved scans no longer match any line");
            }
        }

        let mut coordinator = SubmissionCoordinator::new();
        coordinator.on_ledger_changed(ledger.is_complete(&manifest));

        let saver = DebouncedSaver::spawn(
            self.ledger_store.clone(),
            manifest_id,
            self.settings.save_debounce,
        );
        let mut poller = LiveSyncPoller::new(self.api.clone(), self.settings.poll_interval);
        let events = poller.start(manifest_id);

        Ok(ScanSession {
            manifest,
            ledger,
            coordinator,
            saver,
            poller,
            events,
            online: true,
            pending_sync: false,
            engine: self.clone(),
        })
    }

    /// 取得と台帳の読み込みだけを行う（ライブ同期・遅延保存は開始しない）
    pub async fn snapshot(&self, manifest_id: ManifestId) -> Result<ManifestSnapshot> {
        let manifest = self
            .api
            .fetch_manifest(manifest_id)
            .await?
            .ok_or(SyncError::ManifestNotFound(manifest_id))?;
        let ledger = self.ledger_store.load(manifest_id).await;
        Ok(ManifestSnapshot { manifest, ledger })
    }

    /// 端末に保留した送信を再送する
    pub async fn retry_pending(&self) -> Vec<PendingReport> {
        let mut reports = Vec::new();

        for item in self.pending.list().await {
            let id = item.manifest_id;
            let report = run_submission(self.api.as_ref(), &item.payload, &self.settings.retry, |_| {}).await;

            match &report.outcome {
                SubmitOutcome::Synced { .. } => {
                    if let Err(e) = self.sent.record(id, SyncMark::Synced).await {
                        warn!(manifest_id = id, error = %e, "could not mark sent record synced");
                    }
                    if let Err(e) = self.pending.remove(id).await {
                        warn!(manifest_id = id, error = %e, "could not dequeue synced submission");
                    }
                }
                SubmitOutcome::Rejected { status, message } => {
                    // 再送しても通らないので破棄し、再スキャンを許可する
                    warn!(manifest_id = id, status, %message, "queued submission rejected, dropped");
                    if let Err(e) = self.pending.remove(id).await {
                        warn!(manifest_id = id, error = %e, "could not dequeue rejected submission");
                    }
                    if let Err(e) = self.sent.forget(id).await {
                        warn!(manifest_id = id, error = %e, "could not forget rejected manifest");
                    }
                }
                SubmitOutcome::SavedLocalPending { .. } => {
                    debug!(manifest_id = id, "still offline, submission kept");
                }
            }

            reports.push(PendingReport {
                manifest_id: id,
                report,
            });
        }

        reports
    }
}

pub struct ScanSession {
    manifest: Manifest,
    ledger: ScanLedger,
    coordinator: SubmissionCoordinator,
    saver: DebouncedSaver,
    poller: LiveSyncPoller,
    events: mpsc::Receiver<PollEvent>,
    online: bool,
    pending_sync: bool,
    engine: ScanEngine,
}

impl ScanSession {
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn manifest_id(&self) -> ManifestId {
        self.manifest.id
    }

    pub fn ledger(&self) -> &ScanLedger {
        &self.ledger
    }

    pub fn submission_state(&self) -> SubmissionState {
        self.coordinator.state()
    }

    pub fn poller_state(&self) -> PollerState {
        self.poller.state()
    }

    /// スキャン入力（バーコード・手入力共通）
    pub fn submit_code(&mut self, raw: &str) -> Result<ScanOutcome> {
        if self.coordinator.is_finished() {
            return Err(SyncError::InvalidState(format!(
                "マニフェスト {} は{}です",
                self.manifest.id,
                self.coordinator.state()
            )));
        }

        let outcome = self.ledger.try_confirm(raw, &self.manifest);
        debug!(
            manifest_id = self.manifest.id,
            raw,
            normalized = %normalize_code(raw),
            ?outcome,
            "scan"
        );

        if outcome.is_matched() {
            self.saver.schedule(&self.ledger);
            self.coordinator
                .on_ledger_changed(self.ledger.is_complete(&self.manifest));
        }
        Ok(outcome)
    }

    /// 再取得したマニフェストを反映（台帳は行キーで引き継ぐ）
    pub fn apply_refresh(&mut self, refreshed: Manifest) -> RefreshReport {
        if refreshed.id != self.manifest.id {
            warn!(
                expected = self.manifest.id,
                got = refreshed.id,
                "refresh for another manifest ignored"
            );
            return RefreshReport::default();
        }

        let was_finalized = self.manifest.header_status == HeaderStatus::Finalized;
        let lines_changed = self.manifest.lines != refreshed.lines;
        self.manifest.replace_contents(refreshed);

        let index = ManifestIndex::build(&self.manifest.lines);
        let orphaned = self.ledger.orphaned_keys(&index);
        if lines_changed && !orphaned.is_empty() {
            warn!(manifest_id = self.manifest.id, ?orphaned, "scanned lines disappeared after refresh");
        }

        let became_finalized =
            !was_finalized && self.manifest.header_status == HeaderStatus::Finalized;
        if became_finalized {
            info!(manifest_id = self.manifest.id, "manifest finalized on server");
        }

        self.coordinator
            .on_ledger_changed(self.ledger.is_complete(&self.manifest));

        RefreshReport {
            orphaned,
            became_finalized,
            lines_changed,
        }
    }

    fn handle_event(&mut self, event: PollEvent) -> Option<RefreshReport> {
        match event {
            PollEvent::Refreshed(manifest) => {
                self.online = true;
                Some(self.apply_refresh(manifest))
            }
            PollEvent::Unreachable => {
                self.online = false;
                None
            }
        }
    }

    /// 届いているライブ同期イベントをすべて反映
    pub fn drain_refreshes(&mut self) -> Vec<RefreshReport> {
        let mut reports = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let Some(report) = self.handle_event(event) {
                reports.push(report);
            }
        }
        reports
    }

    /// 次のライブ同期イベントを待って反映（停止後は `None`）
    pub async fn next_refresh(&mut self) -> Option<RefreshReport> {
        loop {
            let event = self.events.recv().await?;
            if let Some(report) = self.handle_event(event) {
                return Some(report);
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.ledger.is_complete(&self.manifest)
    }

    pub fn missing_summary(&self) -> String {
        self.ledger.missing_summary(&self.manifest)
    }

    pub fn progress(&self) -> Progress {
        self.ledger.progress(&self.manifest)
    }

    pub fn line_status(&self, index: usize) -> Option<LineStatus> {
        self.manifest
            .lines
            .get(index)
            .map(|line| self.ledger.line_status(line))
    }

    pub fn display_order(&self) -> Vec<usize> {
        self.ledger.display_order(&self.manifest)
    }

    /// 未完了のまま送信する（理由つき）
    pub fn mark_incomplete(&mut self, reason: &str) -> Result<()> {
        self.coordinator.request_incomplete()?;
        self.coordinator.set_reason(reason);
        Ok(())
    }

    pub fn cancel_incomplete(&mut self) {
        self.coordinator.cancel_incomplete();
    }

    /// 送信（ローカル保存を確定させてから）
    pub async fn submit(&mut self) -> Result<SubmitReport> {
        let id = self.manifest.id;
        let comment = self.coordinator.prepare(&self.missing_summary())?;
        let payload = build_payload(&self.manifest, &self.ledger, comment.as_deref())?;

        // 保存できない状態では送らない
        if let Err(e) = self.saver.save_now(&self.ledger).await {
            error!(manifest_id = id, error = %e, "submission aborted: local save failed");
            self.coordinator.abort();
            return Err(e);
        }

        // 送信中に落ちても再送できるよう、最初の試行より前に待ち行列へ入れる
        if let Err(e) = self.engine.pending.enqueue(payload.clone()).await {
            self.coordinator.abort();
            return Err(SyncError::LocalSaveFailed(format!("未送信データの保存に失敗: {}", e)));
        }
        if let Err(e) = self.engine.sent.record(id, SyncMark::Pending).await {
            if let Err(e) = self.engine.pending.remove(id).await {
                warn!(manifest_id = id, error = %e, "could not dequeue aborted submission");
            }
            self.coordinator.abort();
            return Err(SyncError::LocalSaveFailed(e.to_string()));
        }

        let api = self.engine.api.clone();
        let policy = self.engine.settings.retry.clone();
        let coordinator = &mut self.coordinator;
        let report = run_submission(api.as_ref(), &payload, &policy, |attempt| {
            coordinator.mark_attempt(attempt)
        })
        .await;
        self.coordinator.finish(&report.outcome);

        match &report.outcome {
            SubmitOutcome::Synced { .. } => {
                self.poller.stop();
                if let Err(e) = self.engine.sent.record(id, SyncMark::Synced).await {
                    warn!(manifest_id = id, error = %e, "could not mark sent record synced");
                }
                if let Err(e) = self.engine.pending.remove(id).await {
                    warn!(manifest_id = id, error = %e, "could not dequeue synced submission");
                }
                if self.engine.settings.clear_ledger_on_sync {
                    if let Err(e) = self.saver.clear().await {
                        warn!(manifest_id = id, error = %e, "could not clear synced ledger");
                    }
                }
                self.pending_sync = false;
            }
            SubmitOutcome::SavedLocalPending { .. } => {
                self.poller.stop();
                self.pending_sync = true;
            }
            SubmitOutcome::Rejected { .. } => {
                // 修正して再送できるよう送信済み記録と待ち行列を戻す
                if let Err(e) = self.engine.pending.remove(id).await {
                    warn!(manifest_id = id, error = %e, "could not dequeue rejected submission");
                }
                if let Err(e) = self.engine.sent.forget(id).await {
                    warn!(manifest_id = id, error = %e, "could not forget rejected manifest");
                }
                self.coordinator
                    .on_ledger_changed(self.ledger.is_complete(&self.manifest));
            }
        }

        Ok(report)
    }

    /// スキャン結果をすべて消去（確認済みの場合のみ）
    pub async fn clear(&mut self, confirmed: bool) -> Result<bool> {
        if !confirmed {
            return Ok(false);
        }
        self.saver.clear().await?;
        self.ledger.clear();
        self.coordinator
            .on_ledger_changed(self.ledger.is_complete(&self.manifest));
        info!(manifest_id = self.manifest.id, "scans cleared");
        Ok(true)
    }

    pub fn sync_state(&self) -> SyncState {
        let save = self.saver.state();
        SyncState {
            save_status: save.status,
            last_saved_at: save.last_saved_at,
            online: self.online,
            pending_sync: self.pending_sync,
        }
    }

    /// 保留中の保存を即時書き込み
    pub async fn flush(&self) -> Result<()> {
        self.saver.flush().await.map(|_| ())
    }

    /// ライブ同期を止めて最後の状態を保存
    pub async fn close(mut self) -> Result<()> {
        self.poller.stop();
        self.saver.close().await.map(|_| ())
    }
}
