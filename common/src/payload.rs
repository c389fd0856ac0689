//! 送信ペイロード
//!
//! `guardar-carga` に送る本文を組み立てる。
//! サーバーは `id_ca`・`fecha`・`status` を自前で付与するため、
//! 各ヘッダー・明細からこれらのフィールドを取り除いて送る。

use crate::error::Result;
use crate::index::line_key;
use crate::ledger::ScanLedger;
use crate::types::{Manifest, ManifestId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// サーバー管理フィールド（送信前に除去）
pub const SERVER_MANAGED_FIELDS: [&str; 4] = ["id_ca", "fecha", "status", "estatus"];

/// 明細ごとのスキャン済みフラグ
pub const SCANNED_INVOICE_FIELD: &str = "escaneado_factura";
pub const SCANNED_NOTE_FIELD: &str = "escaneado_nota";

/// 送信本文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    #[serde(default = "default_ok")]
    pub ok: bool,

    #[serde(rename = "id_ca")]
    pub manifest_id: ManifestId,

    #[serde(rename = "detalle")]
    pub lines: Vec<Map<String, Value>>,

    #[serde(rename = "cargado")]
    pub headers: Vec<Map<String, Value>>,

    /// 未完了のまま送信する場合の理由
    #[serde(rename = "comentario", default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn default_ok() -> bool {
    true
}

/// マニフェストと台帳からペイロードを組み立てる
pub fn build_payload(
    manifest: &Manifest,
    ledger: &ScanLedger,
    comment: Option<&str>,
) -> Result<SubmissionPayload> {
    let headers = manifest
        .headers
        .iter()
        .map(to_sanitized_map)
        .collect::<Result<Vec<_>>>()?;

    let lines = manifest
        .lines
        .iter()
        .map(|line| {
            let mut map = to_sanitized_map(line)?;
            let entry = ledger.get(&line_key(line));
            map.insert(
                SCANNED_INVOICE_FIELD.to_string(),
                Value::Bool(entry.map_or(false, |e| e.invoice_confirmed)),
            );
            map.insert(
                SCANNED_NOTE_FIELD.to_string(),
                Value::Bool(entry.map_or(false, |e| e.note_confirmed)),
            );
            Ok(map)
        })
        .collect::<Result<Vec<_>>>()?;

    let comment = comment
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    Ok(SubmissionPayload {
        ok: true,
        manifest_id: manifest.id,
        lines,
        headers,
        comment,
    })
}

/// シリアライズしてサーバー管理フィールドを除去
fn to_sanitized_map<T: Serialize>(item: &T) -> Result<Map<String, Value>> {
    let mut map = match serde_json::to_value(item)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for field in SERVER_MANAGED_FIELDS {
        map.remove(field);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ManifestHeader, ManifestLine};
    use serde_json::json;

    fn sample_manifest() -> Manifest {
        let mut header = ManifestHeader {
            status: Some("A".into()),
            route: Some("R-1".into()),
            ..Default::default()
        };
        header.extra.insert("fecha".into(), json!("2024-01-01"));
        header.extra.insert("id_ca".into(), json!(500));

        let mut line = ManifestLine::new(Some("A2000010"), Some("055"), 3, "X");
        line.extra.insert("status".into(), json!("X"));
        line.extra.insert("vendedor".into(), json!("V01"));

        Manifest::new(
            500,
            vec![header],
            vec![line, ManifestLine::new(Some("9"), None, 1, "Y")],
        )
    }

    #[test]
    fn test_payload_strips_server_managed_fields() {
        let manifest = sample_manifest();
        let payload = build_payload(&manifest, &ScanLedger::new(), None).unwrap();

        for map in payload.headers.iter().chain(payload.lines.iter()) {
            for field in SERVER_MANAGED_FIELDS {
                assert!(!map.contains_key(field), "field {} present", field);
            }
        }
        assert_eq!(payload.headers[0].get("ruta"), Some(&json!("R-1")));
        assert_eq!(payload.lines[0].get("vendedor"), Some(&json!("V01")));
    }

    #[test]
    fn test_payload_scanned_flags() {
        let manifest = sample_manifest();
        let mut ledger = ScanLedger::new();
        ledger.try_confirm("72000010", &manifest);

        let payload = build_payload(&manifest, &ledger, None).unwrap();
        assert_eq!(payload.lines[0][SCANNED_INVOICE_FIELD], json!(true));
        assert_eq!(payload.lines[0][SCANNED_NOTE_FIELD], json!(false));
        assert_eq!(payload.lines[1][SCANNED_INVOICE_FIELD], json!(false));
    }

    #[test]
    fn test_payload_wire_shape() {
        let manifest = sample_manifest();
        let payload = build_payload(&manifest, &ScanLedger::new(), Some("  faltan 2 cajas ")).unwrap();
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["id_ca"], json!(500));
        assert_eq!(value["ok"], json!(true));
        assert_eq!(value["comentario"], json!("faltan 2 cajas"));
        assert!(value["detalle"].is_array());
        assert!(value["cargado"].is_array());
    }

    #[test]
    fn test_blank_comment_is_omitted() {
        let manifest = sample_manifest();
        let payload = build_payload(&manifest, &ScanLedger::new(), Some("   ")).unwrap();
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("comentario").is_none());
    }
}
