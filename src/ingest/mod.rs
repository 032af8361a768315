//! Statement ingestion: PDF, CSV and Excel files into a normalised
//! transaction table.

pub mod columns;
pub mod csv_parser;
pub mod excel;
pub mod pdf;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// One normalised statement row. Debits are negative, credits positive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionTable {
    pub transactions: Vec<Transaction>,
    /// Width of the source table.
    pub column_count: usize,
    /// Non-fatal conditions hit while parsing.
    pub warnings: Vec<String>,
}

impl TransactionTable {
    pub fn row_count(&self) -> usize {
        self.transactions.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Csv,
    Excel,
}

impl FileKind {
    pub const ACCEPTED: &'static [&'static str] = &["pdf", "csv", "xls", "xlsx"];

    /// Accepts a filename, a path, or a bare extension.
    pub fn from_name(name: &str) -> Result<Self, IngestError> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(name)
            .trim_start_matches('.')
            .to_lowercase();

        match ext.as_str() {
            "pdf" => Ok(FileKind::Pdf),
            "csv" => Ok(FileKind::Csv),
            "xls" | "xlsx" => Ok(FileKind::Excel),
            _ => Err(IngestError::UnsupportedFormat(ext)),
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Unsupported file type '{0}'. Please upload PDF, Excel, or CSV files.")]
    UnsupportedFormat(String),
    #[error("Couldn't find a {0} column in the file")]
    MissingColumn(&'static str),
    #[error("The file contains no data")]
    Empty,
    #[error("Failed to read {kind} file: {message}")]
    Malformed { kind: &'static str, message: String },
}

impl IngestError {
    pub fn malformed(kind: &'static str, err: impl std::fmt::Display) -> Self {
        IngestError::Malformed {
            kind,
            message: err.to_string(),
        }
    }
}

/// Parse an uploaded file held in memory. Nothing is written to disk.
pub fn ingest(bytes: &[u8], filename: &str) -> Result<TransactionTable, IngestError> {
    match FileKind::from_name(filename)? {
        FileKind::Csv => {
            let grid = csv_parser::read_grid(bytes)?;
            columns::grid_to_table(&grid)
        }
        FileKind::Excel => {
            let grid = excel::read_grid(bytes)?;
            columns::grid_to_table(&grid)
        }
        FileKind::Pdf => pdf::read_table(bytes),
    }
}
