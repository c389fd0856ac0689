//! 送信済み記録と未送信待ち行列
//!
//! - SentRegistry: 送信したマニフェストIDの記録。記録済みのIDは再スキャン不可。
//!   同期済みの記録は保持期間（既定20分）を過ぎたら読み込み時に破棄する。
//!   未同期（Pending）の記録は破棄しない。
//! - PendingQueue: サーバー未確認のまま端末に残した送信ペイロード。
//!   `ScanEngine::retry_pending` で再送する。

use crate::error::Result;
use crate::store::{KeyValueStore, PENDING_SUBMISSIONS_KEY, SENT_MANIFESTS_KEY};
use chrono::{DateTime, Utc};
use manifest_sync_common::{ManifestId, SubmissionPayload};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// サーバー同期状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMark {
    Synced,
    Pending,
}

impl std::fmt::Display for SyncMark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMark::Synced => write!(f, "同期済み"),
            SyncMark::Pending => write!(f, "未同期"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentRecord {
    pub manifest_id: ManifestId,
    pub sent_at: DateTime<Utc>,
    pub sync: SyncMark,
}

#[derive(Clone)]
pub struct SentRegistry {
    backend: Arc<dyn KeyValueStore>,
    retention: Duration,
}

impl SentRegistry {
    pub fn new(backend: Arc<dyn KeyValueStore>, retention: Duration) -> Self {
        Self { backend, retention }
    }

    /// 記録一覧（期限切れの同期済み記録は破棄）
    pub async fn load(&self) -> Vec<SentRecord> {
        self.load_at(Utc::now()).await
    }

    pub async fn load_at(&self, now: DateTime<Utc>) -> Vec<SentRecord> {
        let records: Vec<SentRecord> = read_list(self.backend.as_ref(), SENT_MANIFESTS_KEY).await;
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);

        let before = records.len();
        let kept: Vec<SentRecord> = records
            .into_iter()
            .filter(|r| r.sync == SyncMark::Pending || now - r.sent_at <= retention)
            .collect();

        if kept.len() != before {
            info!(purged = before - kept.len(), "expired sent records purged");
            if let Err(e) = write_list(self.backend.as_ref(), SENT_MANIFESTS_KEY, &kept).await {
                warn!(error = %e, "could not persist purged sent records");
            }
        }
        kept
    }

    pub async fn find(&self, id: ManifestId) -> Option<SentRecord> {
        self.load().await.into_iter().find(|r| r.manifest_id == id)
    }

    pub async fn is_sent(&self, id: ManifestId) -> bool {
        self.find(id).await.is_some()
    }

    /// 送信を記録（同じIDは上書き）
    pub async fn record(&self, id: ManifestId, sync: SyncMark) -> Result<()> {
        self.record_at(id, sync, Utc::now()).await
    }

    pub async fn record_at(&self, id: ManifestId, sync: SyncMark, at: DateTime<Utc>) -> Result<()> {
        let mut records = self.load_at(at).await;
        records.retain(|r| r.manifest_id != id);
        records.push(SentRecord {
            manifest_id: id,
            sent_at: at,
            sync,
        });
        write_list(self.backend.as_ref(), SENT_MANIFESTS_KEY, &records).await
    }

    /// 記録を削除（再スキャンを許可）
    pub async fn forget(&self, id: ManifestId) -> Result<bool> {
        let mut records = self.load().await;
        let before = records.len();
        records.retain(|r| r.manifest_id != id);
        if records.len() == before {
            return Ok(false);
        }
        write_list(self.backend.as_ref(), SENT_MANIFESTS_KEY, &records).await?;
        Ok(true)
    }
}

/// 端末に保留した送信
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSubmission {
    pub manifest_id: ManifestId,
    pub queued_at: DateTime<Utc>,
    pub payload: SubmissionPayload,
}

#[derive(Clone)]
pub struct PendingQueue {
    backend: Arc<dyn KeyValueStore>,
}

impl PendingQueue {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub async fn list(&self) -> Vec<PendingSubmission> {
        read_list(self.backend.as_ref(), PENDING_SUBMISSIONS_KEY).await
    }

    /// ペイロードを保留（同じIDは置き換え）
    pub async fn enqueue(&self, payload: SubmissionPayload) -> Result<()> {
        let mut items = self.list().await;
        items.retain(|p| p.manifest_id != payload.manifest_id);
        items.push(PendingSubmission {
            manifest_id: payload.manifest_id,
            queued_at: Utc::now(),
            payload,
        });
        write_list(self.backend.as_ref(), PENDING_SUBMISSIONS_KEY, &items).await
    }

    pub async fn remove(&self, id: ManifestId) -> Result<()> {
        let mut items = self.list().await;
        items.retain(|p| p.manifest_id != id);
        write_list(self.backend.as_ref(), PENDING_SUBMISSIONS_KEY, &items).await
    }

    pub async fn len(&self) -> usize {
        self.list().await.len()
    }
}

async fn read_list<T: DeserializeOwned>(backend: &dyn KeyValueStore, key: &str) -> Vec<T> {
    match backend.get(key).await {
        Ok(Some(content)) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(key, error = %e, "corrupt list ignored");
            Vec::new()
        }),
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!(key, error = %e, "list read failed");
            Vec::new()
        }
    }
}

async fn write_list<T: Serialize>(backend: &dyn KeyValueStore, key: &str, items: &[T]) -> Result<()> {
    let content = serde_json::to_string(items)?;
    backend.set(key, &content).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn registry() -> SentRegistry {
        SentRegistry::new(Arc::new(MemoryStore::new()), Duration::from_secs(1200))
    }

    #[tokio::test]
    async fn test_synced_records_expire() {
        let registry = registry();
        registry.record_at(1, SyncMark::Synced, at(0)).await.unwrap();
        registry.record_at(2, SyncMark::Pending, at(0)).await.unwrap();

        let records = registry.load_at(at(1199)).await;
        assert_eq!(records.len(), 2);

        let records = registry.load_at(at(1201)).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].manifest_id, 2);
        assert_eq!(records[0].sync, SyncMark::Pending);
    }

    #[tokio::test]
    async fn test_record_overwrites_same_id() {
        let registry = registry();
        registry.record(5, SyncMark::Pending).await.unwrap();
        registry.record(5, SyncMark::Synced).await.unwrap();

        let records = registry.load().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sync, SyncMark::Synced);
        assert!(registry.is_sent(5).await);
    }

    #[tokio::test]
    async fn test_forget() {
        let registry = registry();
        registry.record(5, SyncMark::Synced).await.unwrap();
        assert!(registry.forget(5).await.unwrap());
        assert!(!registry.forget(5).await.unwrap());
        assert!(!registry.is_sent(5).await);
    }

    #[tokio::test]
    async fn test_pending_queue_replaces_same_id() {
        let queue = PendingQueue::new(Arc::new(MemoryStore::new()));
        let payload = SubmissionPayload {
            ok: true,
            manifest_id: 3,
            lines: vec![],
            headers: vec![],
            comment: None,
        };
        queue.enqueue(payload.clone()).await.unwrap();
        queue
            .enqueue(SubmissionPayload {
                comment: Some("再送".into()),
                ..payload
            })
            .await
            .unwrap();

        let items = queue.list().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].payload.comment.as_deref(), Some("再送"));

        queue.remove(3).await.unwrap();
        assert_eq!(queue.len().await, 0);
    }
}
