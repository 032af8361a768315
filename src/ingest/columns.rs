//! Column detection and cell normalisation shared by the CSV and Excel
//! readers. Both produce a [`RawGrid`] of string cells which is turned into
//! a [`TransactionTable`] here.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use std::str::FromStr;

use super::{IngestError, Transaction, TransactionTable};
use crate::categories;

/// Header rows are searched for within this many leading records.
const HEADER_SCAN_ROWS: usize = 20;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%m/%d/%y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%Y/%m/%d",
    "%d-%b-%Y",
    "%d %b %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawGrid {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawGrid {
    /// Build a grid from raw records, skipping any statement preamble that
    /// precedes the header row. The header row is the first record with a
    /// date-like column name and at least two non-empty cells.
    pub fn from_records(mut records: Vec<Vec<String>>) -> Result<Self, IngestError> {
        records.retain(|r| r.iter().any(|c| !c.trim().is_empty()));
        if records.is_empty() {
            return Err(IngestError::Empty);
        }

        let header_idx = records
            .iter()
            .take(HEADER_SCAN_ROWS)
            .position(|record| {
                let filled = record.iter().filter(|c| !c.trim().is_empty()).count();
                filled >= 2 && record.iter().any(|c| normalise_header(c).contains("date"))
            })
            .unwrap_or(0);

        let rows = records.split_off(header_idx + 1);
        let headers = records.pop().unwrap_or_default();

        Ok(Self { headers, rows })
    }

    /// Number of columns carrying a header or at least one value.
    pub fn column_count(&self) -> usize {
        let width = self
            .rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0);

        (0..width)
            .filter(|&i| {
                let filled = |c: &String| !c.trim().is_empty();
                self.headers.get(i).is_some_and(filled)
                    || self.rows.iter().any(|r| r.get(i).is_some_and(filled))
            })
            .count()
    }
}

/// Lowercase, drop punctuation, and join words with underscores:
/// `"Withdrawals ($)"` becomes `"withdrawals"`.
pub fn normalise_header(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join("_")
}

fn first_match(headers: &[String], needles: &[&str], exclude: &[Option<usize>]) -> Option<usize> {
    needles.iter().find_map(|needle| {
        headers
            .iter()
            .enumerate()
            .find(|(i, h)| h.contains(needle) && !exclude.contains(&Some(*i)))
            .map(|(i, _)| i)
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AmountColumns {
    Signed(usize),
    Split {
        withdrawal: Option<usize>,
        deposit: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct ColumnMap {
    date: usize,
    description: Option<usize>,
    amount: AmountColumns,
    category: Option<usize>,
}

impl ColumnMap {
    fn detect(headers: &[String]) -> Result<Self, IngestError> {
        let date = first_match(headers, &["date"], &[]).ok_or(IngestError::MissingColumn("date"))?;
        let withdrawal = first_match(
            headers,
            &["withdrawals", "withdrawal", "withdrawls", "withdrawl", "withdraw", "debit"],
            &[Some(date)],
        );
        let deposit = first_match(
            headers,
            &["deposits", "deposit", "credit"],
            &[Some(date), withdrawal],
        );

        let amount = if withdrawal.is_some() || deposit.is_some() {
            AmountColumns::Split { withdrawal, deposit }
        } else {
            let signed = first_match(headers, &["amount", "amt", "value"], &[Some(date)])
                .ok_or(IngestError::MissingColumn("amount"))?;
            AmountColumns::Signed(signed)
        };

        let mut taken = match amount {
            AmountColumns::Signed(i) => vec![Some(i)],
            AmountColumns::Split { withdrawal, deposit } => vec![withdrawal, deposit],
        };
        taken.push(Some(date));

        let description = first_match(
            headers,
            &["description", "desc", "details", "memo", "narrative", "payee", "merchant"],
            &taken,
        );
        taken.push(description);
        let category = first_match(headers, &["category"], &taken);

        Ok(Self {
            date,
            description,
            amount,
            category,
        })
    }

    fn amount(&self, row: &[String]) -> Option<Decimal> {
        match self.amount {
            AmountColumns::Signed(i) => parse_money(cell(row, Some(i))),
            AmountColumns::Split { withdrawal, deposit } => {
                let w = parse_money(cell(row, withdrawal));
                let d = parse_money(cell(row, deposit));
                match (w, d) {
                    (None, None) => None,
                    (w, d) => Some(d.unwrap_or_default().abs() - w.unwrap_or_default().abs()),
                }
            }
        }
    }
}

fn cell(row: &[String], idx: Option<usize>) -> &str {
    idx.and_then(|i| row.get(i)).map(|s| s.trim()).unwrap_or("")
}

/// Turn a raw grid into normalised transactions. Rows without a parseable
/// date or amount are skipped and counted in a warning.
pub fn grid_to_table(grid: &RawGrid) -> Result<TransactionTable, IngestError> {
    let headers: Vec<String> = grid.headers.iter().map(|h| normalise_header(h)).collect();
    let columns = ColumnMap::detect(&headers)?;

    let mut transactions = Vec::with_capacity(grid.rows.len());
    let mut skipped = 0usize;

    for row in &grid.rows {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }

        let date = parse_date(cell(row, Some(columns.date)));
        let (Some(date), Some(amount)) = (date, columns.amount(row)) else {
            skipped += 1;
            continue;
        };

        let description = cell(row, columns.description).to_string();
        let category = categories::normalise_label(cell(row, columns.category))
            .or_else(|| categories::guess(&description, amount).map(|c| c.to_string()));

        transactions.push(Transaction {
            date,
            description,
            amount,
            category,
        });
    }

    let mut warnings = Vec::new();
    if skipped > 0 {
        warnings.push(format!("{} row(s) skipped: unparseable date or amount", skipped));
    }

    Ok(TransactionTable {
        transactions,
        column_count: grid.column_count(),
        warnings,
    })
}

/// Largest magnitude accepted for a single amount. Anything bigger is
/// treated as unparseable so that totals cannot overflow.
pub fn max_amount() -> Decimal {
    Decimal::from(1_000_000_000_000i64)
}

/// Parse a currency-like string. Handles symbols, thousands separators,
/// decimal commas, `(12.00)` and `12.00-` negatives, and trailing `CR`/`DR`
/// markers.
pub fn parse_money(raw: &str) -> Option<Decimal> {
    let mut s = raw.trim().to_uppercase();
    if s.is_empty() {
        return None;
    }

    let mut negative = false;
    if let Some(rest) = s.strip_suffix("DR") {
        negative = true;
        s = rest.trim().to_string();
    } else if let Some(rest) = s.strip_suffix("CR") {
        s = rest.trim().to_string();
    }

    if s.starts_with('(') && s.ends_with(')') {
        negative = !negative;
        s = s[1..s.len() - 1].to_string();
    }

    let mut digits: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if let Some(rest) = digits.strip_prefix('-') {
        negative = !negative;
        digits = rest.to_string();
    } else if let Some(rest) = digits.strip_suffix('-') {
        negative = !negative;
        digits = rest.to_string();
    }

    if digits.is_empty() || !digits.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let value = Decimal::from_str(&normalise_separators(&digits)).ok()?;
    if value > max_amount() {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// Keep the decimal separator as `.` and drop grouping separators. The last
/// of `,`/`.` is the decimal mark when both occur. A lone comma is decimal
/// unless exactly three digits follow it (`1,200`); repeated marks of one
/// kind are always grouping (`1.200.000`).
fn normalise_separators(digits: &str) -> String {
    let last_comma = digits.rfind(',');
    let last_dot = digits.rfind('.');
    let decimal = match (last_comma, last_dot) {
        (Some(c), Some(d)) => Some(c.max(d)),
        (Some(c), None) => {
            let after = digits.len() - c - 1;
            (digits.matches(',').count() == 1 && after != 3).then_some(c)
        }
        (None, Some(d)) => (digits.matches('.').count() == 1).then_some(d),
        (None, None) => None,
    };

    digits
        .char_indices()
        .filter_map(|(i, ch)| match ch {
            ',' | '.' if Some(i) == decimal => Some('.'),
            ',' | '.' => None,
            _ => Some(ch),
        })
        .collect()
}

/// Parse a statement date in any of the common bank formats. Years before
/// 1900 are rejected so that `01/05/24` falls through to the two-digit-year
/// format instead of becoming year 24.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    // ISO timestamps: keep the date part
    let candidates = [Some(s), s.get(..10).filter(|p| p.contains('-'))];

    candidates.into_iter().flatten().find_map(|candidate| {
        DATE_FORMATS
            .iter()
            .filter_map(|fmt| NaiveDate::parse_from_str(candidate, fmt).ok())
            .find(|d| d.year() >= 1900)
    })
}
