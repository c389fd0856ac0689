//! 永続化テスト
//!
//! ファイルストレージ上での台帳の保存・復元を検証

use manifest_sync::store::{ledger_backup_key, ledger_key, FileStore, KeyValueStore, LedgerStore, SaveOutcome};
use manifest_sync_common::{Manifest, ManifestHeader, ManifestLine, ScanLedger};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn sample_manifest() -> Manifest {
    Manifest::new(
        500,
        vec![ManifestHeader::default()],
        vec![
            ManifestLine::new(Some("A2000010"), Some("55"), 3, "X"),
            ManifestLine::new(Some("B0012345"), Some("0077"), 1, "Y"),
        ],
    )
}

fn scanned_ledger(manifest: &Manifest) -> ScanLedger {
    let mut ledger = ScanLedger::new();
    ledger.try_confirm("A2000010", manifest);
    ledger.try_confirm("77", manifest);
    ledger
}

/// 保存 → 再起動（新しいストア） → 読み込みで同じ台帳になる
#[tokio::test]
async fn test_ledger_survives_restart() {
    let dir = tempdir().expect("Failed to create temp dir");
    let manifest = sample_manifest();
    let ledger = scanned_ledger(&manifest);

    {
        let store = LedgerStore::new(Arc::new(FileStore::new(dir.path())));
        let outcome = store.save(500, &ledger).await.expect("保存失敗");
        assert_eq!(outcome, SaveOutcome::Primary);
    }

    let reopened = LedgerStore::new(Arc::new(FileStore::new(dir.path())));
    let loaded = reopened.load(500).await;
    assert_eq!(loaded, ledger);
    assert!(!loaded.is_line_complete(&manifest.lines[0]));
}

/// 保存していないマニフェストは空の台帳
#[tokio::test]
async fn test_load_absent_ledger() {
    let dir = tempdir().expect("Failed to create temp dir");
    let store = LedgerStore::new(Arc::new(FileStore::new(dir.path())));
    assert!(store.load(1).await.is_empty());
}

/// 破損した本ファイルは予備ファイルで補う
#[tokio::test]
async fn test_corrupt_primary_falls_back_to_backup() {
    let dir = tempdir().expect("Failed to create temp dir");
    let backend = Arc::new(FileStore::new(dir.path()));
    let store = LedgerStore::new(backend.clone());
    let manifest = sample_manifest();
    let ledger = scanned_ledger(&manifest);

    store.save(500, &ledger).await.unwrap();
    let content = backend.get(&ledger_key(500)).await.unwrap().unwrap();
    backend.set(&ledger_backup_key(500), &content).await.unwrap();
    backend.set(&ledger_key(500), "{\"version\":1,").await.unwrap();

    assert_eq!(store.load(500).await, ledger);
}

/// 本・予備の両方があれば新しい方を使う
#[tokio::test]
async fn test_newer_slot_wins() {
    let dir = tempdir().expect("Failed to create temp dir");
    let backend = Arc::new(FileStore::new(dir.path()));
    let store = LedgerStore::new(backend.clone());
    let manifest = sample_manifest();

    let mut older = ScanLedger::new();
    older.try_confirm("A2000010", &manifest);
    store.save(500, &older).await.unwrap();
    let older_content = backend.get(&ledger_key(500)).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let newer = scanned_ledger(&manifest);
    store.save(500, &newer).await.unwrap();
    let newer_content = backend.get(&ledger_key(500)).await.unwrap().unwrap();

    // 本ファイルに古い内容、予備に新しい内容を置く
    backend.set(&ledger_key(500), &older_content).await.unwrap();
    backend.set(&ledger_backup_key(500), &newer_content).await.unwrap();

    assert_eq!(store.load(500).await, newer);
}

/// 消去後は何も残らない
#[tokio::test]
async fn test_clear_removes_files() {
    let dir = tempdir().expect("Failed to create temp dir");
    let backend = Arc::new(FileStore::new(dir.path()));
    let store = LedgerStore::new(backend.clone());
    let manifest = sample_manifest();

    store.save(500, &scanned_ledger(&manifest)).await.unwrap();
    store.clear(500).await.unwrap();
    // 存在しないものの消去もエラーにしない
    store.clear(500).await.unwrap();

    assert!(backend.get(&ledger_key(500)).await.unwrap().is_none());
    assert!(store.load(500).await.is_empty());
}
