//! コード正規化モジュール
//!
//! バーコードリーダー・手入力から受け取った請求書番号/納品書番号を
//! 比較用の正規キーに変換する。上流システムごとに番号体系が揺れるため、
//! 照合・インデックス・台帳キーはすべてこの関数を経由する。
//!
//! ## 変換規則
//! 1. 前後の空白を除去し大文字化
//! 2. `A` + 数字7桁: `A2` で始まれば先頭の `A` を `7` に置換、
//!    それ以外は `A` を除去して先頭ゼロを除去
//! 3. `B` + 数字7桁: 数字部が `"0050000"` より辞書順で小さければ `8`、
//!    そうでなければ `5` を前置（先頭ゼロは保持）
//! 4. 数字のみ: 先頭ゼロを除去（`"007"` と `"7"` は同一）
//! 5. それ以外: 1 の結果をそのまま返す

use lazy_static::lazy_static;
use regex::Regex;

/// Bシリーズの振り分け境界
const B_SERIES_PIVOT: &str = "0050000";

lazy_static! {
    // `\d` はUnicode数字にも一致するため明示的にASCIIで書く
    static ref A_SERIES_RE: Regex = Regex::new(r"^A[0-9]{7}$").unwrap();
    static ref B_SERIES_RE: Regex = Regex::new(r"^B[0-9]{7}$").unwrap();
    static ref DIGITS_RE: Regex = Regex::new(r"^[0-9]+$").unwrap();
}

/// 生コードを比較用キーに正規化する
///
/// 決定的で副作用はない。
///
/// # Examples
/// ```
/// use manifest_sync_common::normalize_code;
///
/// assert_eq!(normalize_code(" a2000010 "), "72000010");
/// assert_eq!(normalize_code("A0001234"), "1234");
/// assert_eq!(normalize_code("B0012345"), "80012345");
/// assert_eq!(normalize_code("007"), "7");
/// ```
pub fn normalize_code(raw: &str) -> String {
    let code = raw.trim().to_uppercase();

    if A_SERIES_RE.is_match(&code) {
        if code.starts_with("A2") {
            return format!("7{}", &code[1..]);
        }
        return strip_leading_zeros(&code[1..]);
    }

    if B_SERIES_RE.is_match(&code) {
        let serie = &code[1..];
        let prefix = if serie < B_SERIES_PIVOT { '8' } else { '5' };
        return format!("{}{}", prefix, serie);
    }

    if DIGITS_RE.is_match(&code) {
        return strip_leading_zeros(&code);
    }

    code
}

/// 欠損しうるフィールドを正規化（欠損は空文字）
pub fn normalize_optional(raw: Option<&str>) -> String {
    raw.map(normalize_code).unwrap_or_default()
}

/// 数値化相当の先頭ゼロ除去（全桁ゼロは `"0"`）
fn strip_leading_zeros(digits: &str) -> String {
    let stripped = digits.trim_start_matches('0');
    if stripped.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    }
}
