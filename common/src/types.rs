//! マニフェストの型定義
//!
//! サーバーの `buscar-carga` レスポンスに対応する型:
//! - ManifestHeader: `cargado[]`（ルート・運転手・車両・状態）
//! - ManifestLine: `detalle[]`（請求書番号・納品書番号・梱包数・内容）
//! - Manifest: 上記をまとめたもの
//!
//! 上流は番号を文字列でも数値でも返すため、コード系フィールドは寛容に読む。
//! 未知のフィールドは `extra` に保持し、送信時にそのまま戻す。

use crate::normalizer::normalize_optional;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// マニフェストID（`numeroCarga` / `id_ca`）
pub type ManifestId = u64;

/// 明細1行: 配送単位
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestLine {
    /// 請求書番号
    #[serde(rename = "factura", default, deserialize_with = "lenient_code")]
    pub invoice_code: Option<String>,

    /// 納品書番号
    #[serde(rename = "nota", default, deserialize_with = "lenient_code")]
    pub note_code: Option<String>,

    /// 梱包数
    #[serde(rename = "paquetes", default, deserialize_with = "lenient_count")]
    pub package_count: u32,

    /// 内容
    #[serde(rename = "descrip", default, deserialize_with = "lenient_text")]
    pub description: String,

    /// 上流が付与するその他のフィールド（vendedor, responsable など）
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ManifestLine {
    pub fn new(invoice: Option<&str>, note: Option<&str>, packages: u32, description: &str) -> Self {
        Self {
            invoice_code: invoice.map(str::to_string),
            note_code: note.map(str::to_string),
            package_count: packages,
            description: description.to_string(),
            extra: Map::new(),
        }
    }

    /// 正規化済み請求書番号（欠損は空文字）
    pub fn invoice_key(&self) -> String {
        normalize_optional(self.invoice_code.as_deref())
    }

    /// 正規化済み納品書番号（欠損は空文字）
    pub fn note_key(&self) -> String {
        normalize_optional(self.note_code.as_deref())
    }

    /// 請求書番号が存在するか（空白のみは欠損扱い）
    pub fn has_invoice(&self) -> bool {
        has_code(self.invoice_code.as_deref())
    }

    /// 納品書番号が存在するか（空白のみは欠損扱い）
    pub fn has_note(&self) -> bool {
        has_code(self.note_code.as_deref())
    }
}

/// コードが実質的に存在するか
pub fn has_code(code: Option<&str>) -> bool {
    code.map(|c| !c.trim().is_empty()).unwrap_or(false)
}

/// ヘッダー: ルート・運転手・車両・状態
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestHeader {
    /// 状態コード（`F` = 確定など）
    #[serde(rename = "estatus", default, deserialize_with = "lenient_code")]
    pub status: Option<String>,

    #[serde(rename = "ruta", default, deserialize_with = "lenient_code")]
    pub route: Option<String>,

    #[serde(rename = "conductor", default, deserialize_with = "lenient_code")]
    pub driver: Option<String>,

    #[serde(rename = "vehiculo", default, deserialize_with = "lenient_code")]
    pub vehicle: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// サーバー側のマニフェスト状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeaderStatus {
    Open,
    InProgress,
    Finalized,
    #[default]
    Unknown,
}

impl HeaderStatus {
    /// `estatus` コードから状態を判定
    pub fn from_code(code: Option<&str>) -> Self {
        let Some(code) = code else {
            return HeaderStatus::Unknown;
        };
        match code.trim().to_uppercase().as_str() {
            "F" => HeaderStatus::Finalized,
            "A" => HeaderStatus::Open,
            "P" | "E" | "C" => HeaderStatus::InProgress,
            _ => HeaderStatus::Unknown,
        }
    }
}

impl std::fmt::Display for HeaderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderStatus::Open => write!(f, "未着手"),
            HeaderStatus::InProgress => write!(f, "作業中"),
            HeaderStatus::Finalized => write!(f, "確定済み"),
            HeaderStatus::Unknown => write!(f, "不明"),
        }
    }
}

/// マニフェスト: ヘッダーと明細の組
///
/// 取得のたびに丸ごと置き換える。スキャン状態は `ScanLedger` が
/// 行キーで別管理するため、明細の並び替えや書式変更の影響を受けない。
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub id: ManifestId,
    pub header_status: HeaderStatus,
    pub headers: Vec<ManifestHeader>,
    pub lines: Vec<ManifestLine>,
}

impl Manifest {
    pub fn new(id: ManifestId, headers: Vec<ManifestHeader>, lines: Vec<ManifestLine>) -> Self {
        let header_status = HeaderStatus::from_code(
            headers.first().and_then(|h| h.status.as_deref()),
        );
        Self {
            id,
            header_status,
            headers,
            lines,
        }
    }

    /// 先頭ヘッダー（ルート・運転手表示用）
    pub fn header(&self) -> Option<&ManifestHeader> {
        self.headers.first()
    }

    /// 明細とヘッダーを差し替える（スキャン状態には触れない）
    pub fn replace_contents(&mut self, refreshed: Manifest) {
        self.header_status = refreshed.header_status;
        self.headers = refreshed.headers;
        self.lines = refreshed.lines;
    }
}

/// 文字列・数値・nullを受け付けてコード文字列にする
fn lenient_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// 数値・数値文字列を梱包数にする（読めなければ0）
fn lenient_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// nullを空文字として読む
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_line_accepts_numeric_codes() {
        let line: ManifestLine = serde_json::from_value(json!({
            "factura": 7000010,
            "nota": "055",
            "paquetes": "3",
            "descrip": "X",
            "vendedor": "V01"
        }))
        .unwrap();

        assert_eq!(line.invoice_code.as_deref(), Some("7000010"));
        assert_eq!(line.note_code.as_deref(), Some("055"));
        assert_eq!(line.package_count, 3);
        assert_eq!(line.description, "X");
        assert_eq!(line.extra.get("vendedor"), Some(&json!("V01")));
    }

    #[test]
    fn test_line_null_fields() {
        let line: ManifestLine = serde_json::from_value(json!({
            "factura": null,
            "nota": "12",
            "descrip": null
        }))
        .unwrap();

        assert!(line.invoice_code.is_none());
        assert!(!line.has_invoice());
        assert!(line.has_note());
        assert_eq!(line.package_count, 0);
        assert_eq!(line.description, "");
        assert_eq!(line.invoice_key(), "");
    }

    #[test]
    fn test_blank_code_is_absent() {
        let line = ManifestLine::new(Some("   "), Some("1"), 1, "");
        assert!(!line.has_invoice());
    }

    #[test]
    fn test_header_status_from_code() {
        assert_eq!(HeaderStatus::from_code(Some(" f ")), HeaderStatus::Finalized);
        assert_eq!(HeaderStatus::from_code(Some("A")), HeaderStatus::Open);
        assert_eq!(HeaderStatus::from_code(Some("P")), HeaderStatus::InProgress);
        assert_eq!(HeaderStatus::from_code(Some("?")), HeaderStatus::Unknown);
        assert_eq!(HeaderStatus::from_code(None), HeaderStatus::Unknown);
    }

    #[test]
    fn test_manifest_status_from_first_header() {
        let header = ManifestHeader {
            status: Some("F".into()),
            ..Default::default()
        };
        let manifest = Manifest::new(1, vec![header], vec![]);
        assert_eq!(manifest.header_status, HeaderStatus::Finalized);
    }
}
