//! Workbook sink for cohort report exports.
//!
//! A workbook is a set of named sheets, each with one header row and data
//! rows. Exports append to the sheet for their module/class and skip rows
//! that are already present, so exporting the same cohort twice is a no-op.
//! A sheet never mixes header layouts.

use std::{collections::BTreeMap, io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::report::ExportOutcome;

/// Spreadsheet applications reject longer sheet names.
pub const MAX_SHEET_NAME_CHARS: usize = 31;
const FORBIDDEN_SHEET_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("workbook I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("workbook is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Workbook {
    pub sheets: BTreeMap<String, Sheet>,
}

impl Workbook {
    /// Appends after the last row of `sheet`, creating it with `headers` if
    /// needed. Rows only land under a matching header row: when the sheet
    /// exists with other headers, the rows go to the first continuation
    /// sheet (`"<name> (2)"`, `"<name> (3)"`, ...) with matching or no headers.
    pub fn append(&mut self, sheet: &str, headers: &[String], rows: &[Vec<String>]) -> ExportOutcome {
        let base = sanitize_sheet_name(sheet);
        let name = self.sheet_for(&base, headers);
        if name != base {
            tracing::warn!(
                "Sheet '{}' has different columns; writing to '{}' instead",
                base,
                name
            );
        }

        let target = self.sheets.entry(name.clone()).or_insert_with(|| Sheet {
            headers: headers.to_vec(),
            rows: Vec::new(),
        });

        let mut appended = 0;
        let mut skipped = 0;
        for row in rows {
            if target.rows.contains(row) {
                skipped += 1;
            } else {
                target.rows.push(row.clone());
                appended += 1;
            }
        }

        ExportOutcome { sheet: name, appended, skipped }
    }

    fn sheet_for(&self, base: &str, headers: &[String]) -> String {
        let mut n = 1;
        loop {
            let candidate = if n == 1 { base.to_string() } else { continuation_name(base, n) };
            match self.sheets.get(&candidate) {
                Some(existing) if existing.headers != headers => n += 1,
                _ => return candidate,
            }
        }
    }
}

fn continuation_name(base: &str, n: usize) -> String {
    let suffix = format!(" ({})", n);
    let room = MAX_SHEET_NAME_CHARS.saturating_sub(suffix.chars().count());
    let stem: String = base.chars().take(room).collect();
    format!("{}{}", stem.trim_end(), suffix)
}

pub fn sanitize_sheet_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !FORBIDDEN_SHEET_CHARS.contains(c))
        .collect();
    let trimmed: String = cleaned.trim().chars().take(MAX_SHEET_NAME_CHARS).collect();
    let trimmed = trimmed.trim_end().to_string();
    if trimmed.is_empty() { "Sheet".to_string() } else { trimmed }
}

#[async_trait]
pub trait SpreadsheetSink: Send + Sync {
    async fn append_rows(
        &self,
        sheet: &str,
        headers: &[String],
        rows: &[Vec<String>],
    ) -> Result<ExportOutcome, ExportError>;
}

/// Workbook persisted as one JSON document on disk.
pub struct JsonWorkbookSink {
    path: PathBuf,
    // serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl JsonWorkbookSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    async fn load(&self) -> Result<Workbook, ExportError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Workbook::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, workbook: &Workbook) -> Result<(), ExportError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(workbook)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SpreadsheetSink for JsonWorkbookSink {
    async fn append_rows(
        &self,
        sheet: &str,
        headers: &[String],
        rows: &[Vec<String>],
    ) -> Result<ExportOutcome, ExportError> {
        let _guard = self.lock.lock().await;
        let mut workbook = self.load().await?;
        let outcome = workbook.append(sheet, headers, rows);
        if outcome.appended > 0 {
            self.save(&workbook).await?;
        }
        Ok(outcome)
    }
}

/// In-process workbook, for tests and demos.
#[derive(Default)]
pub struct MemoryWorkbookSink {
    workbook: Mutex<Workbook>,
}

impl MemoryWorkbookSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Workbook {
        self.workbook.lock().await.clone()
    }
}

#[async_trait]
impl SpreadsheetSink for MemoryWorkbookSink {
    async fn append_rows(
        &self,
        sheet: &str,
        headers: &[String],
        rows: &[Vec<String>],
    ) -> Result<ExportOutcome, ExportError> {
        Ok(self.workbook.lock().await.append(sheet, headers, rows))
    }
}
