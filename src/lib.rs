//! Manifest Sync
//!
//! 配送マニフェストの照合とオフライン同期を行うエンジン。
//! 純粋な照合ロジックは `manifest-sync-common` にあり、
//! このクレートは永続化・通信・ライブ同期・送信を担う。

pub mod api;
pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod poller;
pub mod saver;
pub mod sent;
pub mod session;
pub mod store;
pub mod submission;

pub use config::{Config, EngineSettings};
pub use error::{Result, SyncError};
pub use session::{ManifestSnapshot, RefreshReport, ScanEngine, ScanSession, SyncState};
