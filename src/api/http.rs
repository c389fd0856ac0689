use super::{ApiResponse, ManifestApi, TransportError};
use crate::config::Config;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use manifest_sync_common::{parse_fetch_response, Manifest, ManifestId, SubmissionPayload};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// reqwest によるAPIクライアント
#[derive(Debug, Clone)]
pub struct HttpManifestApi {
    client: reqwest::Client,
    fetch_url: String,
    submit_url: String,
    request_timeout: Duration,
    submit_timeout: Duration,
}

impl HttpManifestApi {
    pub fn new(base_url: &str, fetch_path: &str, submit_path: &str) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        let base = base_url.trim_end_matches('/');
        Ok(Self {
            client,
            fetch_url: format!("{}{}", base, fetch_path),
            submit_url: format!("{}{}", base, submit_path),
            request_timeout: Duration::from_secs(60),
            submit_timeout: Duration::from_secs(8),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let base_url = config.api_base_url()?;
        let mut api = Self::new(&base_url, &config.fetch_path, &config.submit_path)?;
        api.request_timeout = Duration::from_millis(config.request_timeout_ms);
        api.submit_timeout = Duration::from_millis(config.submit_timeout_ms);
        Ok(api)
    }
}

#[async_trait]
impl ManifestApi for HttpManifestApi {
    async fn fetch_manifest(&self, id: ManifestId) -> Result<Option<Manifest>> {
        let response = self
            .client
            .post(&self.fetch_url)
            .timeout(self.request_timeout)
            .json(&json!({ "numeroCarga": id }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::Rejected {
                status: status.as_u16(),
                message: server_message(&body).unwrap_or_else(|| body.clone()),
            });
        }

        debug!(manifest_id = id, bytes = body.len(), "manifest fetched");
        Ok(parse_fetch_response(id, &body)?)
    }

    async fn submit(&self, payload: &SubmissionPayload) -> std::result::Result<ApiResponse, TransportError> {
        let response = self
            .client
            .post(&self.submit_url)
            .timeout(self.submit_timeout)
            .json(payload)
            .send()
            .await
            .map_err(to_transport_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(ApiResponse {
            status,
            message: server_message(&body),
        })
    }
}

fn to_transport_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(e.to_string())
    }
}

/// 応答本文からエラーメッセージを取り出す
fn server_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error", "message", "mensaje"]
        .iter()
        .find_map(|field| value.get(field).and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_message() {
        assert_eq!(
            server_message(r#"{"error":"columna duplicada"}"#).as_deref(),
            Some("columna duplicada")
        );
        assert_eq!(server_message(r#"{"message":"bad"}"#).as_deref(), Some("bad"));
        assert_eq!(server_message("<html>"), None);
    }

    #[test]
    fn test_urls_join_without_double_slash() {
        let api = HttpManifestApi::new("http://srv/", "/api/guias/buscar-carga", "/api/guias/guardar-carga")
            .unwrap();
        assert_eq!(api.fetch_url, "http://srv/api/guias/buscar-carga");
        assert_eq!(api.submit_url, "http://srv/api/guias/guardar-carga");
    }
}
