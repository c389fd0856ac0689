//! ローカル永続化
//!
//! 型なしのキー/値ストレージを `KeyValueStore` で抽象化する。
//! - FileStore: データディレクトリ配下に1キー1ファイル（一時ファイル経由で置換）
//! - MemoryStore: テスト用（書き込み失敗の注入・書き込み回数の計測）
//!
//! JSONの読み書きは上位の `LedgerStore` / `SentRegistry` が担い、
//! ストレージ固有のエラーはそこで吸収する。

mod ledger_store;

pub use ledger_store::{LedgerFile, LedgerStore, SaveOutcome};

use async_trait::async_trait;
use manifest_sync_common::ManifestId;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// 送信済みマニフェスト記録のキー
pub const SENT_MANIFESTS_KEY: &str = "sent_manifests";

/// 未送信ペイロード待ち行列のキー
pub const PENDING_SUBMISSIONS_KEY: &str = "pending_submissions";

/// マニフェストごとのスキャン台帳キー
pub fn ledger_key(id: ManifestId) -> String {
    format!("scans_{}", id)
}

/// スキャン台帳の予備キー
pub fn ledger_backup_key(id: ManifestId) -> String {
    format!("{}.bak", ledger_key(id))
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("storage error: {0}")]
pub struct StoreError(pub String);

impl From<StoreError> for crate::error::SyncError {
    fn from(e: StoreError) -> Self {
        crate::error::SyncError::Storage(e.0)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError(e.to_string())
    }
}

/// 非同期キー/値ストレージ
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// ファイルベースのストレージ
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(StoreError(format!("invalid key: {}", key)));
        }
        Ok(self.root.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    fn backend_tag(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.root).await?;

        // 書き込み途中の電源断で既存データを壊さないよう一時ファイルから置換
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// メモリ上のストレージ（テスト用）
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
    fail_all_writes: AtomicBool,
    failing_keys: Mutex<HashSet<String>>,
    next_write_delay: Mutex<Option<Duration>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// すべての書き込みを失敗させる
    pub fn set_fail_all_writes(&self, fail: bool) {
        self.fail_all_writes.store(fail, Ordering::SeqCst);
    }

    /// 指定キーへの書き込みだけを失敗させる
    pub fn fail_writes_to(&self, key: &str) {
        if let Ok(mut keys) = self.failing_keys.lock() {
            keys.insert(key.to_string());
        }
    }

    /// 次の書き込み1回だけを遅らせる（書き込み中の競合の再現用）
    ///
    /// 書き込む値は呼び出し時点のもの。
    pub fn delay_next_write(&self, delay: Duration) {
        if let Ok(mut next) = self.next_write_delay.lock() {
            *next = Some(delay);
        }
    }

    /// 成功した書き込み回数
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// 生データを直接参照
    pub fn raw(&self, key: &str) -> Option<String> {
        self.data.lock().ok().and_then(|data| data.get(key).cloned())
    }

    /// 生データを直接書き込む（破損データの注入用、回数に数えない）
    pub fn insert_raw(&self, key: &str, value: &str) {
        if let Ok(mut data) = self.data.lock() {
            data.insert(key.to_string(), value.to_string());
        }
    }

    fn lock_data(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StoreError> {
        self.data
            .lock()
            .map_err(|_| StoreError("memory store poisoned".into()))
    }

    fn write_fails(&self, key: &str) -> bool {
        if self.fail_all_writes.load(Ordering::SeqCst) {
            return true;
        }
        self.failing_keys
            .lock()
            .map(|keys| keys.contains(key))
            .unwrap_or(true)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock_data()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.write_fails(key) {
            return Err(StoreError(format!("injected write failure: {}", key)));
        }
        let delay = self.next_write_delay.lock().ok().and_then(|mut next| next.take());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.lock_data()?.insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_all_writes.load(Ordering::SeqCst) {
            return Err(StoreError(format!("injected remove failure: {}", key)));
        }
        self.lock_data()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_scheme() {
        assert_eq!(ledger_key(500), "scans_500");
        assert_eq!(ledger_backup_key(500), "scans_500.bak");
    }

    #[tokio::test]
    async fn test_memory_store_failure_injection() {
        let store = MemoryStore::new();
        store.set("a", "1").await.unwrap();
        store.fail_writes_to("b");
        assert!(store.set("b", "2").await.is_err());
        assert_eq!(store.write_count(), 1);

        store.set_fail_all_writes(true);
        assert!(store.set("a", "3").await.is_err());
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.set("../escape", "x").await.is_err());
        assert!(store.get(".hidden").await.is_err());
    }
}
