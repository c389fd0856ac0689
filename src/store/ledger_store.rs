//! スキャン台帳の永続化
//!
//! 本キーへの書き込みに失敗したら予備キーへ1回だけ書き込む。
//! 両方失敗した場合のみ `SyncError::LocalSaveFailed` を返す。
//! 読み込みは本キー・予備キーのうち新しい方の有効なデータを使い、
//! 欠損・破損時は空の台帳を返す（エラーにはしない）。

use super::{ledger_backup_key, ledger_key, KeyValueStore};
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use manifest_sync_common::{ManifestId, ScanLedger};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// 保存先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Primary,
    /// 本キーに失敗し予備キーに保存
    Backup,
}

/// 保存ファイルの構造
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerFile {
    /// バージョン（互換性チェック用）
    pub version: u32,
    pub manifest_id: ManifestId,
    pub saved_at: DateTime<Utc>,
    pub entries: ScanLedger,
}

impl LedgerFile {
    pub const CURRENT_VERSION: u32 = 1;
}

#[derive(Clone)]
pub struct LedgerStore {
    backend: Arc<dyn KeyValueStore>,
}

impl LedgerStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn KeyValueStore> {
        &self.backend
    }

    /// 台帳を保存
    pub async fn save(&self, id: ManifestId, ledger: &ScanLedger) -> Result<SaveOutcome> {
        let file = LedgerFile {
            version: LedgerFile::CURRENT_VERSION,
            manifest_id: id,
            saved_at: Utc::now(),
            entries: ledger.clone(),
        };
        let content = serde_json::to_string(&file)
            .map_err(|e| SyncError::LocalSaveFailed(e.to_string()))?;

        let primary_err = match self.backend.set(&ledger_key(id), &content).await {
            Ok(()) => {
                debug!(manifest_id = id, entries = ledger.len(), "ledger saved");
                return Ok(SaveOutcome::Primary);
            }
            Err(e) => e,
        };

        warn!(manifest_id = id, error = %primary_err, "primary ledger write failed, trying backup");
        match self.backend.set(&ledger_backup_key(id), &content).await {
            Ok(()) => Ok(SaveOutcome::Backup),
            Err(backup_err) => Err(SyncError::LocalSaveFailed(format!(
                "{} / backup: {}",
                primary_err, backup_err
            ))),
        }
    }

    /// 台帳を読み込み（欠損・破損は空の台帳）
    pub async fn load(&self, id: ManifestId) -> ScanLedger {
        let primary = self.read_slot(id, &ledger_key(id)).await;
        let backup = self.read_slot(id, &ledger_backup_key(id)).await;

        match (primary, backup) {
            (Some(p), Some(b)) if b.saved_at > p.saved_at => {
                debug!(manifest_id = id, "using newer backup ledger");
                b.entries
            }
            (Some(p), _) => p.entries,
            (None, Some(b)) => {
                warn!(manifest_id = id, "primary ledger unavailable, restored from backup");
                b.entries
            }
            (None, None) => ScanLedger::new(),
        }
    }

    /// 台帳を削除（本キー・予備キーとも）
    pub async fn clear(&self, id: ManifestId) -> Result<()> {
        for key in [ledger_key(id), ledger_backup_key(id)] {
            self.backend
                .remove(&key)
                .await
                .map_err(|e| SyncError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    async fn read_slot(&self, id: ManifestId, key: &str) -> Option<LedgerFile> {
        let content = match self.backend.get(key).await {
            Ok(Some(content)) => content,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "ledger read failed");
                return None;
            }
        };

        match serde_json::from_str::<LedgerFile>(&content) {
            Ok(file) if file.version == LedgerFile::CURRENT_VERSION && file.manifest_id == id => {
                Some(file)
            }
            Ok(file) => {
                warn!(key, version = file.version, "ledger version or id mismatch, ignored");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "corrupt ledger ignored");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use manifest_sync_common::{Manifest, ManifestLine};

    fn ledger_with_scan() -> ScanLedger {
        let manifest = Manifest::new(
            9,
            vec![],
            vec![ManifestLine::new(Some("1"), Some("10"), 1, "")],
        );
        let mut ledger = ScanLedger::new();
        ledger.try_confirm("1", &manifest);
        ledger
    }

    #[tokio::test]
    async fn test_save_falls_back_to_backup() {
        let backend = Arc::new(MemoryStore::new());
        backend.fail_writes_to(&ledger_key(9));
        let store = LedgerStore::new(backend.clone());

        let ledger = ledger_with_scan();
        assert_eq!(store.save(9, &ledger).await.unwrap(), SaveOutcome::Backup);
        assert!(backend.raw(&ledger_backup_key(9)).is_some());
        assert_eq!(store.load(9).await, ledger);
    }

    #[tokio::test]
    async fn test_save_fails_when_both_slots_fail() {
        let backend = Arc::new(MemoryStore::new());
        backend.set_fail_all_writes(true);
        let store = LedgerStore::new(backend);

        let result = store.save(9, &ledger_with_scan()).await;
        assert!(matches!(result, Err(SyncError::LocalSaveFailed(_))));
    }

    #[tokio::test]
    async fn test_load_tolerates_corrupt_data() {
        let backend = Arc::new(MemoryStore::new());
        backend.insert_raw(&ledger_key(9), "{not json");
        let store = LedgerStore::new(backend);
        assert!(store.load(9).await.is_empty());
    }

    #[tokio::test]
    async fn test_load_ignores_other_manifest_id() {
        let backend = Arc::new(MemoryStore::new());
        let store = LedgerStore::new(backend.clone());
        store.save(9, &ledger_with_scan()).await.unwrap();

        let content = backend.raw(&ledger_key(9)).unwrap();
        backend.insert_raw(&ledger_key(10), &content);
        assert!(store.load(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_both_slots() {
        let backend = Arc::new(MemoryStore::new());
        let store = LedgerStore::new(backend.clone());
        store.save(9, &ledger_with_scan()).await.unwrap();
        backend.insert_raw(&ledger_backup_key(9), "{}");

        store.clear(9).await.unwrap();
        assert!(backend.raw(&ledger_key(9)).is_none());
        assert!(backend.raw(&ledger_backup_key(9)).is_none());
        assert!(store.load(9).await.is_empty());
    }
}
