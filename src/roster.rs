//! Sheet layout: where roster fields live and how rows map to records.
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::config::Config;
use crate::model::{AttendanceRecord, AttendanceStatus};

static A1_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:'?(?P<sheet>[^'!]+)'?!)?(?P<col>[A-Z]{1,3})(?P<row>\d+)(?::[A-Z]{1,3}\d*)?$")
        .expect("static A1 regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("roster range `{0}` is not `Sheet!A2:L1000`-style A1 notation")]
    BadRange(String),
    #[error("column `{0}` lies left of the roster range start")]
    ColumnOutOfRange(String),
    #[error("`{0}` is not a column letter (A..ZZZ)")]
    BadColumn(String),
}

/// Convert column letters to a 0-based index (`A` = 0, `AA` = 26).
///
/// `None` unless `letters` is one to three uppercase ASCII letters.
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    letters
        .bytes()
        .try_fold(0u32, |acc, b| {
            b.is_ascii_uppercase()
                .then(|| acc * 26 + u32::from(b - b'A' + 1))
        })
        .map(|n| n - 1)
}

/// Resolved addressing for the roster and audit log sheets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLayout {
    pub roster_range: String,
    pub sheet_name: Option<String>,
    pub sheet_id: i64,
    pub first_row: u32,
    pub status_column: String,
    /// Highlight spans columns `[0, highlight_end)`.
    pub highlight_end: u32,
    pub log_append_range: String,
    pub log_read_range: String,
    name_col: usize,
    email_col: usize,
    roll_col: usize,
    section_col: usize,
    code_col: usize,
    status_col: usize,
}

impl SheetLayout {
    pub fn from_config(cfg: &Config) -> Result<Self, LayoutError> {
        let roster = &cfg.sheets.roster;
        let caps = A1_RANGE
            .captures(roster.range.trim())
            .ok_or_else(|| LayoutError::BadRange(roster.range.clone()))?;
        let column = |letters: &str| {
            column_index(letters).ok_or_else(|| LayoutError::BadColumn(letters.to_string()))
        };
        let start_col = column(&caps["col"])?;
        let first_row: u32 = caps["row"]
            .parse()
            .map_err(|_| LayoutError::BadRange(roster.range.clone()))?;
        let sheet_name = caps.name("sheet").map(|m| m.as_str().to_string());

        let offset = |letters: &str| -> Result<usize, LayoutError> {
            column(letters)?
                .checked_sub(start_col)
                .map(|c| c as usize)
                .ok_or_else(|| LayoutError::ColumnOutOfRange(letters.to_string()))
        };
        let cols = &roster.columns;
        let highlight_end = column(&roster.highlight_through)? + 1;

        Ok(Self {
            roster_range: roster.range.clone(),
            sheet_name,
            sheet_id: roster.sheet_id,
            first_row,
            status_column: cols.status.clone(),
            highlight_end,
            log_append_range: cfg.sheets.logs.append_range.clone(),
            log_read_range: cfg.sheets.logs.read_range.clone(),
            name_col: offset(&cols.name)?,
            email_col: offset(&cols.email)?,
            roll_col: offset(&cols.roll_number)?,
            section_col: offset(&cols.section)?,
            code_col: offset(&cols.code)?,
            status_col: offset(&cols.status)?,
        })
    }

    /// Decode raw rows; the sheet row of `rows[i]` is `first_row + i`.
    pub fn parse_rows(&self, rows: &[Vec<String>]) -> Vec<AttendanceRecord> {
        rows.iter()
            .enumerate()
            .map(|(idx, row)| {
                let cell = |i: usize| row.get(i).map(|s| s.trim().to_string()).unwrap_or_default();
                AttendanceRecord {
                    name: cell(self.name_col),
                    email: cell(self.email_col),
                    roll_number: cell(self.roll_col),
                    section: cell(self.section_col),
                    qr_id: cell(self.code_col),
                    attendance: AttendanceStatus::parse_status(&cell(self.status_col)),
                    row_index: self.first_row + idx as u32,
                }
            })
            .collect()
    }

    /// A1 address of the status cell for a 1-based sheet row.
    pub fn status_cell(&self, row_index: u32) -> String {
        match &self.sheet_name {
            Some(sheet) => format!("'{}'!{}{}", sheet, self.status_column, row_index),
            None => format!("{}{}", self.status_column, row_index),
        }
    }
}
