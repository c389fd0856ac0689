//! Manifest Sync Common Library
//!
//! 照合エンジンの純粋な中核（I/Oなし）
//! - コード正規化
//! - マニフェスト型と取得レスポンスのパース
//! - 行キー索引とスキャン台帳
//! - 送信ペイロード

pub mod error;
pub mod index;
pub mod ledger;
pub mod normalizer;
pub mod parser;
pub mod payload;
pub mod types;

pub use error::{Error, Result};
pub use index::{line_key, IndexedLine, ManifestIndex};
pub use ledger::{
    LineStatus, Progress, ScanEntry, ScanField, ScanLedger, ScanOutcome, ALL_COMPLETE_SUMMARY,
};
pub use normalizer::{normalize_code, normalize_optional};
pub use parser::{manifest_from_value, parse_fetch_response};
pub use payload::{build_payload, SubmissionPayload, SERVER_MANAGED_FIELDS};
pub use types::{HeaderStatus, Manifest, ManifestHeader, ManifestId, ManifestLine};
