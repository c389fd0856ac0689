use crate::error::{Result, SyncError};
use crate::submission::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// APIのURLを上書きする環境変数
pub const API_URL_ENV: &str = "MANIFEST_SYNC_API_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub fetch_path: String,
    pub submit_path: String,
    pub request_timeout_ms: u64,
    pub submit_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub save_debounce_ms: u64,
    pub max_submit_attempts: u32,
    pub backoff_base_ms: u64,
    pub sent_retention_secs: u64,
    pub clear_ledger_on_sync: bool,
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: None,
            fetch_path: "/api/guias/buscar-carga".into(),
            submit_path: "/api/guias/guardar-carga".into(),
            request_timeout_ms: 60_000,
            submit_timeout_ms: 8_000,
            poll_interval_ms: 2_000,
            save_debounce_ms: 500,
            max_submit_attempts: 3,
            backoff_base_ms: 500,
            sent_retention_secs: 20 * 60, // 送信済み記録は20分で破棄
            clear_ledger_on_sync: true,
            data_dir: None,
        }
    }
}

/// エンジンに渡す型付き設定（エンジン自身はファイルや環境変数を読まない）
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    pub save_debounce: Duration,
    pub sent_retention: Duration,
    pub retry: RetryPolicy,
    pub clear_ledger_on_sync: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Config::default().engine_settings()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| SyncError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("manifest-sync").join("config.json"))
    }

    /// スキャン台帳・送信記録の保存先
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let base = dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
            .ok_or_else(|| SyncError::Config("データディレクトリが見つかりません".into()))?;
        Ok(base.join("manifest-sync"))
    }

    pub fn api_base_url(&self) -> Result<String> {
        // 環境変数を優先
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                return Ok(url);
            }
        }

        self.api_base_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or(SyncError::MissingApiUrl)
    }

    pub fn set_api_url(&mut self, url: String) -> Result<()> {
        self.api_base_url = Some(url);
        self.save()
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            save_debounce: Duration::from_millis(self.save_debounce_ms),
            sent_retention: Duration::from_secs(self.sent_retention_secs),
            retry: RetryPolicy {
                max_attempts: self.max_submit_attempts.max(1),
                base_delay: Duration::from_millis(self.backoff_base_ms),
                ..RetryPolicy::default()
            },
            clear_ledger_on_sync: self.clear_ledger_on_sync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fetch_path, "/api/guias/buscar-carga");
        assert_eq!(config.submit_timeout_ms, 8_000);
        assert_eq!(config.sent_retention_secs, 1_200);
        assert!(config.api_base_url.is_none());
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"api_base_url":"http://srv","poll_interval_ms":5000}"#).unwrap();
        assert_eq!(config.api_base_url.as_deref(), Some("http://srv"));
        assert_eq!(config.poll_interval_ms, 5_000);
        assert_eq!(config.save_debounce_ms, 500);
    }

    #[test]
    fn test_engine_settings() {
        let config = Config {
            max_submit_attempts: 0,
            ..Config::default()
        };
        let settings = config.engine_settings();
        assert_eq!(settings.poll_interval, Duration::from_secs(2));
        assert_eq!(settings.save_debounce, Duration::from_millis(500));
        assert_eq!(settings.retry.max_attempts, 1);
        assert!(settings.clear_ledger_on_sync);
    }

    // 環境変数を書き換えるため1つのテストにまとめる
    #[test]
    fn test_api_url_resolution() {
        std::env::remove_var(API_URL_ENV);
        let mut config = Config::default();
        assert!(matches!(config.api_base_url(), Err(SyncError::MissingApiUrl)));

        config.api_base_url = Some("http://file".into());
        assert_eq!(config.api_base_url().unwrap(), "http://file");

        std::env::set_var(API_URL_ENV, "http://env");
        assert_eq!(config.api_base_url().unwrap(), "http://env");

        std::env::set_var(API_URL_ENV, "  ");
        assert_eq!(config.api_base_url().unwrap(), "http://file");
        std::env::remove_var(API_URL_ENV);
    }
}
