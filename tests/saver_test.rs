//! 遅延保存テスト
//!
//! 時刻を止めた tokio ランタイムでデバウンスの動作を検証

use manifest_sync::saver::{DebouncedSaver, SaveStatus};
use manifest_sync::store::{LedgerStore, MemoryStore, SaveOutcome};
use manifest_sync_common::{Manifest, ManifestLine, ScanLedger};
use std::sync::Arc;
use std::time::Duration;

const DELAY: Duration = Duration::from_millis(500);

fn manifest() -> Manifest {
    let lines = (1..=5)
        .map(|i| {
            let invoice = i.to_string();
            let note = (i * 10).to_string();
            ManifestLine::new(Some(invoice.as_str()), Some(note.as_str()), 1, "")
        })
        .collect();
    Manifest::new(42, vec![], lines)
}

fn setup() -> (Arc<MemoryStore>, LedgerStore) {
    let backend = Arc::new(MemoryStore::new());
    let store = LedgerStore::new(backend.clone());
    (backend, store)
}

/// 連続したスキャンは1回の書き込みにまとめる
#[tokio::test(start_paused = true)]
async fn test_rapid_changes_coalesce_into_one_write() {
    let (backend, store) = setup();
    let saver = DebouncedSaver::spawn(store.clone(), 42, DELAY);
    let m = manifest();
    let mut ledger = ScanLedger::new();

    for code in ["1", "2", "3", "4", "5"] {
        ledger.try_confirm(code, &m);
        saver.schedule(&ledger);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(backend.write_count(), 0);
    assert_eq!(saver.state().status, SaveStatus::Saving);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(backend.write_count(), 1);
    assert_eq!(saver.state().status, SaveStatus::Saved);
    assert!(saver.state().last_saved_at.is_some());

    // 書き込まれたのは最後の状態
    assert_eq!(store.load(42).await, ledger);
}

/// flush は待たずに書き込む
#[tokio::test(start_paused = true)]
async fn test_flush_writes_immediately() {
    let (backend, store) = setup();
    let saver = DebouncedSaver::spawn(store, 42, DELAY);
    let m = manifest();
    let mut ledger = ScanLedger::new();
    ledger.try_confirm("1", &m);
    saver.schedule(&ledger);

    let outcome = saver.flush().await.unwrap();
    assert_eq!(outcome, Some(SaveOutcome::Primary));
    assert_eq!(backend.write_count(), 1);

    // 予約が残っていないので期限が来ても再度書かない
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(backend.write_count(), 1);

    // 何も予約がなければ何もしない
    assert_eq!(saver.flush().await.unwrap(), None);
}

/// close は最後の状態を書き込む
#[tokio::test(start_paused = true)]
async fn test_close_flushes_pending_change() {
    let (backend, store) = setup();
    let saver = DebouncedSaver::spawn(store.clone(), 42, DELAY);
    let m = manifest();
    let mut ledger = ScanLedger::new();
    ledger.try_confirm("10", &m);
    saver.schedule(&ledger);

    saver.close().await.unwrap();
    assert_eq!(backend.write_count(), 1);
    assert_eq!(store.load(42).await, ledger);
}

/// discard は予約を取り消す
#[tokio::test(start_paused = true)]
async fn test_discard_cancels_pending_write() {
    let (backend, store) = setup();
    let saver = DebouncedSaver::spawn(store, 42, DELAY);
    let m = manifest();
    let mut ledger = ScanLedger::new();
    ledger.try_confirm("1", &m);
    saver.schedule(&ledger);
    saver.discard();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.write_count(), 0);
    assert_eq!(saver.state().status, SaveStatus::Saved);
}

/// 本・予備とも書けない場合はエラー状態になる
#[tokio::test(start_paused = true)]
async fn test_failed_save_reports_error_state() {
    let (backend, store) = setup();
    backend.set_fail_all_writes(true);
    let saver = DebouncedSaver::spawn(store, 42, DELAY);
    let m = manifest();
    let mut ledger = ScanLedger::new();
    ledger.try_confirm("1", &m);
    saver.schedule(&ledger);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let state = saver.state();
    assert_eq!(state.status, SaveStatus::Error);
    assert!(state.last_error.is_some());

    // 復旧後の保存でエラーは消える
    backend.set_fail_all_writes(false);
    saver.schedule(&ledger);
    saver.flush().await.unwrap();
    let state = saver.state();
    assert_eq!(state.status, SaveStatus::Saved);
    assert!(state.last_error.is_none());
}

/// 即時保存は実行中の遅延保存の完了後に書き込む
#[tokio::test(start_paused = true)]
async fn test_save_now_runs_after_in_flight_write() {
    let (backend, store) = setup();
    let saver = DebouncedSaver::spawn(store.clone(), 42, DELAY);
    let m = manifest();
    let mut ledger = ScanLedger::new();

    backend.delay_next_write(Duration::from_secs(2));
    ledger.try_confirm("1", &m);
    saver.schedule(&ledger);
    tokio::time::sleep(Duration::from_millis(600)).await;

    ledger.try_confirm("2", &m);
    saver.schedule(&ledger);
    let outcome = saver.save_now(&ledger).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Primary);
    assert_eq!(backend.write_count(), 2);

    // 予約は即時保存で置き換わっている
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(backend.write_count(), 2);
    assert_eq!(store.load(42).await, ledger);
}

/// 消去は実行中の遅延保存の完了後に行う
#[tokio::test(start_paused = true)]
async fn test_clear_runs_after_in_flight_write() {
    let (backend, store) = setup();
    let saver = DebouncedSaver::spawn(store.clone(), 42, DELAY);
    let m = manifest();
    let mut ledger = ScanLedger::new();

    backend.delay_next_write(Duration::from_secs(2));
    ledger.try_confirm("1", &m);
    saver.schedule(&ledger);
    tokio::time::sleep(Duration::from_millis(600)).await;

    saver.clear().await.unwrap();
    assert!(store.load(42).await.is_empty());
    assert_eq!(saver.state().status, SaveStatus::Saved);
}
