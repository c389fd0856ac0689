//! スキャン台帳
//!
//! マニフェスト1件分の 行キー → {請求書確認済み, 納品書確認済み} を管理する。
//! スキャン入力（カメラ・手入力とも）は `ScanLedger::try_confirm` に集約される。
//!
//! ## 照合規則
//! - 明細を元の順序で走査し、最初に一致した行を採用する（最良一致ではない）
//! - 一致判定は「生値同士」「正規化値同士」「スキャン正規化値と生データ」
//!   「スキャン生値と正規化データ」のいずれか
//! - 一致したフィールドが確認済みなら `Duplicate`（状態は変更しない）
//! - どの行にも一致しなければ `NotFound`（状態は変更しない）

use crate::index::{line_key, ManifestIndex};
use crate::normalizer::normalize_code;
use crate::types::{has_code, Manifest, ManifestLine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 未スキャンがない場合の要約文
pub const ALL_COMPLETE_SUMMARY: &str = "すべての請求書・納品書のスキャンが完了しています。";

/// 未スキャン要約の見出し
pub const MISSING_SUMMARY_HEADING: &str = "未スキャン:";

/// 明細1行分のスキャン状態
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEntry {
    #[serde(default)]
    pub invoice_confirmed: bool,

    #[serde(default)]
    pub note_confirmed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at_invoice: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at_note: Option<DateTime<Utc>>,
}

impl ScanEntry {
    pub fn is_confirmed(&self, field: ScanField) -> bool {
        match field {
            ScanField::Invoice => self.invoice_confirmed,
            ScanField::Note => self.note_confirmed,
        }
    }

    /// いずれかのフィールドが確認済みか
    pub fn any_confirmed(&self) -> bool {
        self.invoice_confirmed || self.note_confirmed
    }

    /// 最後に確認された時刻
    pub fn last_confirmed_at(&self) -> Option<DateTime<Utc>> {
        match (self.confirmed_at_invoice, self.confirmed_at_note) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    fn confirm(&mut self, field: ScanField, at: DateTime<Utc>) {
        match field {
            ScanField::Invoice => {
                self.invoice_confirmed = true;
                self.confirmed_at_invoice.get_or_insert(at);
            }
            ScanField::Note => {
                self.note_confirmed = true;
                self.confirmed_at_note.get_or_insert(at);
            }
        }
    }
}

/// スキャン対象フィールド
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanField {
    Invoice,
    Note,
}

impl std::fmt::Display for ScanField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanField::Invoice => write!(f, "請求書"),
            ScanField::Note => write!(f, "納品書"),
        }
    }
}

/// スキャン結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// 新たに確認した
    Matched {
        line_key: String,
        field: ScanField,
        line_index: usize,
    },
    /// 有効なコードだが確認済み
    Duplicate {
        line_key: String,
        field: ScanField,
        line_index: usize,
    },
    /// どの明細にも一致しない
    NotFound,
}

impl ScanOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, ScanOutcome::Matched { .. })
    }
}

/// 明細の表示用状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// 両方確認済み
    Full,
    /// 片方のみ
    Partial,
    /// 未確認
    None,
}

/// 進捗集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub total: usize,
    pub full: usize,
    pub partial: usize,
    pub none: usize,
}

/// スキャン済みコード（照合用に生値と正規化値を保持）
struct ScannedCode {
    trimmed: String,
    normalized: String,
}

impl ScannedCode {
    fn new(raw: &str) -> Self {
        let trimmed = raw.trim().to_string();
        let normalized = normalize_code(&trimmed);
        Self { trimmed, normalized }
    }

    /// 対称一致: 生値・正規化値・片側正規化のいずれか
    fn matches(&self, source: Option<&str>) -> bool {
        let Some(source) = source else {
            return false;
        };
        let data = source.trim();
        if data.is_empty() {
            return false;
        }
        let data_normalized = normalize_code(data);
        self.trimmed == data
            || self.normalized == data_normalized
            || self.normalized == data
            || self.trimmed == data_normalized
    }
}

/// マニフェスト1件分のスキャン台帳
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanLedger {
    entries: BTreeMap<String, ScanEntry>,
}

impl ScanLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// スキャンしたコードを照合して台帳を更新
    pub fn try_confirm(&mut self, raw: &str, manifest: &Manifest) -> ScanOutcome {
        self.try_confirm_at(raw, manifest, Utc::now())
    }

    /// 確認時刻を指定して照合（テスト・再生用）
    pub fn try_confirm_at(
        &mut self,
        raw: &str,
        manifest: &Manifest,
        now: DateTime<Utc>,
    ) -> ScanOutcome {
        let scanned = ScannedCode::new(raw);
        if scanned.trimmed.is_empty() {
            return ScanOutcome::NotFound;
        }

        for (line_index, line) in manifest.lines.iter().enumerate() {
            let invoice_hit = scanned.matches(line.invoice_code.as_deref());
            let note_hit = scanned.matches(line.note_code.as_deref());
            if !invoice_hit && !note_hit {
                continue;
            }

            let key = line_key(line);
            let current = self.entries.get(&key);
            let invoice_done = current.map_or(false, |e| e.invoice_confirmed);
            let note_done = current.map_or(false, |e| e.note_confirmed);

            // 同一行で両方に一致する場合は未確認側を優先
            let pending_field = if invoice_hit && !invoice_done {
                Some(ScanField::Invoice)
            } else if note_hit && !note_done {
                Some(ScanField::Note)
            } else {
                None
            };

            return match pending_field {
                Some(field) => {
                    self.entries.entry(key.clone()).or_default().confirm(field, now);
                    ScanOutcome::Matched {
                        line_key: key,
                        field,
                        line_index,
                    }
                }
                None => ScanOutcome::Duplicate {
                    line_key: key,
                    field: if invoice_hit {
                        ScanField::Invoice
                    } else {
                        ScanField::Note
                    },
                    line_index,
                },
            };
        }

        ScanOutcome::NotFound
    }

    /// 明細のスキャン状態
    pub fn entry_for(&self, line: &ManifestLine) -> Option<&ScanEntry> {
        self.entries.get(&line_key(line))
    }

    pub fn get(&self, key: &str) -> Option<&ScanEntry> {
        self.entries.get(key)
    }

    /// 請求書側が充足しているか（欠損フィールドは充足扱い）
    fn invoice_satisfied(line: &ManifestLine, entry: Option<&ScanEntry>) -> bool {
        !line.has_invoice() || entry.map_or(false, |e| e.invoice_confirmed)
    }

    /// 納品書側が充足しているか（欠損フィールドは充足扱い）
    fn note_satisfied(line: &ManifestLine, entry: Option<&ScanEntry>) -> bool {
        !line.has_note() || entry.map_or(false, |e| e.note_confirmed)
    }

    /// 明細が完了しているか
    pub fn is_line_complete(&self, line: &ManifestLine) -> bool {
        let entry = self.entry_for(line);
        Self::invoice_satisfied(line, entry) && Self::note_satisfied(line, entry)
    }

    /// 全明細が完了しているか
    pub fn is_complete(&self, manifest: &Manifest) -> bool {
        manifest.lines.iter().all(|line| self.is_line_complete(line))
    }

    /// 表示用の明細状態
    pub fn line_status(&self, line: &ManifestLine) -> LineStatus {
        let entry = self.entry_for(line);
        if Self::invoice_satisfied(line, entry) && Self::note_satisfied(line, entry) {
            LineStatus::Full
        } else if entry.map_or(false, ScanEntry::any_confirmed) {
            LineStatus::Partial
        } else {
            LineStatus::None
        }
    }

    /// 進捗を集計
    pub fn progress(&self, manifest: &Manifest) -> Progress {
        let mut progress = Progress {
            total: manifest.lines.len(),
            ..Default::default()
        };
        for line in &manifest.lines {
            match self.line_status(line) {
                LineStatus::Full => progress.full += 1,
                LineStatus::Partial => progress.partial += 1,
                LineStatus::None => progress.none += 1,
            }
        }
        progress
    }

    /// 未スキャン明細の要約（マニフェスト順）
    ///
    /// 1行ごとに `- 請求書: X | 納品書: Y | 内容: Z` 形式で不足分のみ列挙する。
    /// 不足がなければ `ALL_COMPLETE_SUMMARY` を返す。
    pub fn missing_summary(&self, manifest: &Manifest) -> String {
        let missing: Vec<String> = manifest
            .lines
            .iter()
            .filter_map(|line| {
                let entry = self.entry_for(line);
                let mut parts = Vec::new();
                if !Self::invoice_satisfied(line, entry) {
                    parts.push(format!(
                        "{}: {}",
                        ScanField::Invoice,
                        line.invoice_code.as_deref().unwrap_or("N/A").trim()
                    ));
                }
                if !Self::note_satisfied(line, entry) {
                    parts.push(format!(
                        "{}: {}",
                        ScanField::Note,
                        line.note_code.as_deref().unwrap_or("N/A").trim()
                    ));
                }
                if parts.is_empty() {
                    None
                } else {
                    Some(format!(
                        "- {} | 内容: {}",
                        parts.join(" | "),
                        line.description.trim()
                    ))
                }
            })
            .collect();

        if missing.is_empty() {
            ALL_COMPLETE_SUMMARY.to_string()
        } else {
            format!("{}\n{}", MISSING_SUMMARY_HEADING, missing.join("\n"))
        }
    }

    /// 表示順: 確認済み（新しい順）→ 未確認（マニフェスト順）
    pub fn display_order(&self, manifest: &Manifest) -> Vec<usize> {
        let mut confirmed: Vec<(usize, Option<DateTime<Utc>>)> = Vec::new();
        let mut unconfirmed: Vec<usize> = Vec::new();

        for (index, line) in manifest.lines.iter().enumerate() {
            match self.entry_for(line).filter(|e| e.any_confirmed()) {
                Some(entry) => confirmed.push((index, entry.last_confirmed_at())),
                None => unconfirmed.push(index),
            }
        }

        // 時刻なし（旧形式データ）は最古扱い、安定ソートで同時刻はマニフェスト順
        confirmed.sort_by(|a, b| b.1.cmp(&a.1));

        confirmed
            .into_iter()
            .map(|(index, _)| index)
            .chain(unconfirmed)
            .collect()
    }

    /// 現在の明細に存在しない行キー
    pub fn orphaned_keys(&self, index: &ManifestIndex<'_>) -> Vec<String> {
        self.entries
            .keys()
            .filter(|key| !index.contains_key(key))
            .cloned()
            .collect()
    }

    /// 確認済みフィールド数
    pub fn confirmed_count(&self) -> usize {
        self.entries
            .values()
            .map(|e| usize::from(e.invoice_confirmed) + usize::from(e.note_confirmed))
            .sum()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ScanEntry)> {
        self.entries.iter()
    }
}

/// 入力コードが有効か（空白のみは無効）
pub fn is_scannable(raw: &str) -> bool {
    has_code(Some(raw))
}
