//! ライブ同期テスト
//!
//! ポーリング間隔・失敗の無視・停止の確実さを検証

use manifest_sync::api::{FetchStep, ScriptedApi};
use manifest_sync::poller::{LiveSyncPoller, PollEvent, PollerState};
use manifest_sync_common::{Manifest, ManifestLine};
use std::sync::Arc;
use std::time::Duration;

const INTERVAL: Duration = Duration::from_secs(2);

fn manifest(description: &str) -> Manifest {
    Manifest::new(7, vec![], vec![ManifestLine::new(Some("1"), Some("10"), 1, description)])
}

/// 間隔ごとに最新のマニフェストが届く
#[tokio::test(start_paused = true)]
async fn test_polls_at_interval() {
    let api = Arc::new(ScriptedApi::with_manifest(manifest("v1")));
    let mut poller = LiveSyncPoller::new(api.clone(), INTERVAL);
    let mut rx = poller.start(7);
    assert_eq!(poller.state(), PollerState::Polling);

    tokio::time::sleep(Duration::from_millis(1900)).await;
    assert_eq!(api.fetch_calls(), 0);

    let event = rx.recv().await.unwrap();
    assert_eq!(event, PollEvent::Refreshed(manifest("v1")));

    api.set_manifest(manifest("v2"));
    let event = rx.recv().await.unwrap();
    assert_eq!(event, PollEvent::Refreshed(manifest("v2")));
    assert_eq!(api.fetch_calls(), 2);
}

/// 取得失敗は接続状態だけ伝えてポーリングを続ける
#[tokio::test(start_paused = true)]
async fn test_failures_are_ignored() {
    let api = Arc::new(ScriptedApi::with_manifest(manifest("v1")));
    api.push_fetch(FetchStep::Fail);
    api.push_fetch(FetchStep::NotFound);
    let mut poller = LiveSyncPoller::new(api.clone(), INTERVAL);
    let mut rx = poller.start(7);

    assert_eq!(rx.recv().await.unwrap(), PollEvent::Unreachable);
    // 該当なしは通知しない
    assert_eq!(rx.recv().await.unwrap(), PollEvent::Refreshed(manifest("v1")));
    assert_eq!(api.fetch_calls(), 3);
}

/// 取得中に停止したら結果は捨て、次の取得も行わない
#[tokio::test(start_paused = true)]
async fn test_stop_during_in_flight_poll() {
    let api = Arc::new(ScriptedApi::with_manifest(manifest("v1")));
    api.set_fetch_delay(Duration::from_secs(1));
    let mut poller = LiveSyncPoller::new(api.clone(), INTERVAL);
    let mut rx = poller.start(7);

    // 2秒で取得開始、3秒で完了予定
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(api.fetch_calls(), 1);
    poller.stop();
    assert_eq!(poller.state(), PollerState::Idle);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(api.fetch_calls(), 1);
    assert!(rx.recv().await.is_none());
}

/// 再開すると新しい受信側に切り替わる
#[tokio::test(start_paused = true)]
async fn test_restart_replaces_previous_loop() {
    let api = Arc::new(ScriptedApi::with_manifest(manifest("v1")));
    let mut poller = LiveSyncPoller::new(api.clone(), INTERVAL);
    let mut first = poller.start(7);
    let mut second = poller.start(7);

    assert!(first.recv().await.is_none());
    assert_eq!(second.recv().await.unwrap(), PollEvent::Refreshed(manifest("v1")));
    assert_eq!(poller.manifest_id(), Some(7));
}

/// 破棄すると止まる
#[tokio::test(start_paused = true)]
async fn test_drop_stops_polling() {
    let api = Arc::new(ScriptedApi::with_manifest(manifest("v1")));
    let mut rx = {
        let mut poller = LiveSyncPoller::new(api.clone(), INTERVAL);
        poller.start(7)
    };

    assert!(rx.recv().await.is_none());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(api.fetch_calls(), 0);
}
