//! APIレスポンスパーサー
//!
//! `buscar-carga` のレスポンスJSONから `Manifest` を組み立てる。
//!
//! レスポンス形式:
//! ```json
//! { "cargado": [ { "estatus": "A", "ruta": "...", ... } ],
//!   "detalle": [ { "factura": "...", "nota": "...", "paquetes": 3, "descrip": "..." } ] }
//! ```
//! `cargado` と `detalle` が両方とも無い場合は「該当なし」として扱う。
//! 空配列は「存在するが明細0件」であり、該当なしではない。

use crate::error::{Error, Result};
use crate::types::{Manifest, ManifestHeader, ManifestId, ManifestLine};
use serde_json::Value;

/// ヘッダー配列のキー
pub const HEADERS_FIELD: &str = "cargado";

/// 明細配列のキー
pub const LINES_FIELD: &str = "detalle";

/// 取得レスポンス文字列をパース
///
/// # Returns
/// * `Ok(Some(Manifest))` - 取得成功
/// * `Ok(None)` - サーバーに該当マニフェストなし
/// * `Err` - JSONとして読めない、または配列が不正
///
/// # Examples
/// ```
/// use manifest_sync_common::parse_fetch_response;
///
/// let body = r#"{"cargado":[{"estatus":"A"}],"detalle":[{"factura":"A2000010","nota":"055","paquetes":3,"descrip":"X"}]}"#;
/// let manifest = parse_fetch_response(500, body).unwrap().unwrap();
/// assert_eq!(manifest.lines.len(), 1);
/// ```
pub fn parse_fetch_response(id: ManifestId, body: &str) -> Result<Option<Manifest>> {
    let value: Value = serde_json::from_str(body.trim())?;
    manifest_from_value(id, value)
}

/// パース済みJSONから `Manifest` を組み立てる
pub fn manifest_from_value(id: ManifestId, value: Value) -> Result<Option<Manifest>> {
    let Value::Object(mut object) = value else {
        return Err(Error::Parse("レスポンスがオブジェクトではありません".into()));
    };

    let headers = object.remove(HEADERS_FIELD).filter(|v| !v.is_null());
    let lines = object.remove(LINES_FIELD).filter(|v| !v.is_null());

    if headers.is_none() && lines.is_none() {
        return Ok(None);
    }

    let headers: Vec<ManifestHeader> = match headers {
        Some(v) => parse_array(HEADERS_FIELD, v)?,
        None => Vec::new(),
    };
    let lines: Vec<ManifestLine> = match lines {
        Some(v) => parse_array(LINES_FIELD, v)?,
        None => Vec::new(),
    };

    Ok(Some(Manifest::new(id, headers, lines)))
}

fn parse_array<T: serde::de::DeserializeOwned>(field: &str, value: Value) -> Result<Vec<T>> {
    if !value.is_array() {
        return Err(Error::Parse(format!("{}が配列ではありません", field)));
    }
    serde_json::from_value(value)
        .map_err(|e| Error::Parse(format!("{} JSONパースエラー: {}", field, e)))
}
