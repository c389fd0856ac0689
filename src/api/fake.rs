//! 台本どおりに応答するAPI（テスト用）

use super::{ApiResponse, ManifestApi, TransportError};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use manifest_sync_common::{Manifest, ManifestId, SubmissionPayload};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// 取得1回分の応答
#[derive(Debug, Clone)]
pub enum FetchStep {
    Found(Manifest),
    NotFound,
    Fail,
}

/// 取得は台本を順に消費し、尽きたら `current` を返す。
/// 送信も台本を順に消費し、尽きたら HTTP 200 を返す。
#[derive(Debug, Default)]
pub struct ScriptedApi {
    current: Mutex<Option<Manifest>>,
    fetch_script: Mutex<VecDeque<FetchStep>>,
    submit_script: Mutex<VecDeque<std::result::Result<ApiResponse, TransportError>>>,
    submitted: Mutex<Vec<SubmissionPayload>>,
    fetch_calls: AtomicUsize,
    submit_calls: AtomicUsize,
    fetch_delay: Mutex<Option<Duration>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manifest(manifest: Manifest) -> Self {
        let api = Self::default();
        api.set_manifest(manifest);
        api
    }

    /// サーバー側の現在のマニフェストを差し替える
    pub fn set_manifest(&self, manifest: Manifest) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(manifest);
        }
    }

    pub fn push_fetch(&self, step: FetchStep) {
        if let Ok(mut script) = self.fetch_script.lock() {
            script.push_back(step);
        }
    }

    pub fn push_submit(&self, response: std::result::Result<ApiResponse, TransportError>) {
        if let Ok(mut script) = self.submit_script.lock() {
            script.push_back(response);
        }
    }

    /// 取得のたびに待たせる（実行中のポーリングを停止するテスト用）
    pub fn set_fetch_delay(&self, delay: Duration) {
        if let Ok(mut d) = self.fetch_delay.lock() {
            *d = Some(delay);
        }
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<SubmissionPayload> {
        self.submitted.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ManifestApi for ScriptedApi {
    async fn fetch_manifest(&self, id: ManifestId) -> Result<Option<Manifest>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.fetch_delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let step = self.fetch_script.lock().ok().and_then(|mut s| s.pop_front());
        match step {
            Some(FetchStep::Found(manifest)) => Ok(Some(manifest)),
            Some(FetchStep::NotFound) => Ok(None),
            Some(FetchStep::Fail) => Err(SyncError::Unreachable("scripted fetch failure".into())),
            None => Ok(self
                .current
                .lock()
                .ok()
                .and_then(|m| m.clone())
                .filter(|m| m.id == id)),
        }
    }

    async fn submit(&self, payload: &SubmissionPayload) -> std::result::Result<ApiResponse, TransportError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.push(payload.clone());
        }
        self.submit_script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or(Ok(ApiResponse::new(200)))
    }
}
