//! マニフェスト明細インデックス
//!
//! 正規化済みの請求書番号・納品書番号から安定した行キーを導出し、
//! 行キー → (明細, 位置) の索引を作る。再取得で明細が並び替わっても
//! スキャン状態を行キーで追跡できる。

use crate::normalizer::normalize_optional;
use crate::types::ManifestLine;
use std::collections::HashMap;

/// 行キーの区切り文字
pub const LINE_KEY_SEPARATOR: char = '_';

/// 明細の安定キー: `正規化請求書番号_正規化納品書番号`
pub fn line_key(line: &ManifestLine) -> String {
    format!(
        "{}{}{}",
        normalize_optional(line.invoice_code.as_deref()),
        LINE_KEY_SEPARATOR,
        normalize_optional(line.note_code.as_deref())
    )
}

/// 索引の1エントリ
#[derive(Debug, Clone, Copy)]
pub struct IndexedLine<'a> {
    pub line: &'a ManifestLine,
    pub index: usize,
}

/// 行キー → 明細の索引
///
/// 同じキーに正規化される明細が複数ある場合は先頭の1件のみ保持する
/// （データ品質の問題として扱い、診断は出さない）。
#[derive(Debug, Default)]
pub struct ManifestIndex<'a> {
    entries: HashMap<String, IndexedLine<'a>>,
}

impl<'a> ManifestIndex<'a> {
    /// 明細リストから索引を構築
    pub fn build(lines: &'a [ManifestLine]) -> Self {
        let mut entries = HashMap::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            entries
                .entry(line_key(line))
                .or_insert(IndexedLine { line, index });
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&IndexedLine<'a>> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
