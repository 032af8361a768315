//! Text-based statement extraction. Each page is scanned line by line for
//! rows shaped like `DATE DESCRIPTION AMOUNT [BALANCE]`.

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use std::sync::OnceLock;
use tracing::debug;

use super::columns::{parse_date, parse_money};
use super::{IngestError, Transaction, TransactionTable};
use crate::categories;

const DATE: &str = concat!(
    r"\d{4}-\d{2}-\d{2}",
    r"|\d{1,2}/\d{1,2}(?:/\d{2,4})?",
    r"|\d{1,2}\.\d{1,2}\.\d{4}",
    r"|\d{1,2}[ -][A-Za-z]{3}[ -]\d{4}",
    r"|[A-Za-z]{3} \d{1,2}(?:, \d{4})?",
);
const MONEY: &str = r"\(?-?[$£€]?-?\d{1,3}(?:,?\d{3})*\.\d{2}\)?-?(?:\s?(?:CR|DR))?";

fn row_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(
            r"^\s*(?P<date>{DATE})\s+(?P<desc>.+?)\s+(?P<amount>{MONEY}){balance}\s*$",
            balance = format!(r"(?:\s+(?P<balance>{MONEY}))?"),
        );
        Regex::new(&pattern).expect("row pattern is valid")
    })
}

/// Opening/closing and brought/carried-forward balance wording.
fn balance_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)^(?:(?:opening|closing|previous|starting|ending|beginning|new)\s+balance\b",
            r"|balance\s+(?:brought|carried)\s+(?:forward|fwd)\b",
            r"|balance\s+[bc]/?f\b)",
        ))
        .expect("balance pattern is valid")
    })
}

fn year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(19|20)\d{2}\b").expect("year pattern is valid"))
}

pub fn read_table(bytes: &[u8]) -> Result<TransactionTable, IngestError> {
    // pdf-extract panics on some malformed documents
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| IngestError::malformed("PDF", "document could not be decoded"))?
        .map_err(|e| IngestError::malformed("PDF", e))?;

    debug!(pages = pages.len(), "pdf text extracted");
    Ok(parse_pages(&pages))
}

/// Build a table from already-extracted page text. Pages without rows only
/// produce warnings; a document without any rows yields an empty table.
pub fn parse_pages(pages: &[String]) -> TransactionTable {
    let statement_year = pages
        .iter()
        .find_map(|p| year_regex().find(p))
        .and_then(|m| m.as_str().parse::<i32>().ok());

    let mut transactions = Vec::new();
    let mut empty_pages = Vec::new();
    let mut saw_balance = false;
    let mut previous_balance: Option<Decimal> = None;
    let mut skipped = 0usize;

    for (page_no, page) in pages.iter().enumerate() {
        let before = transactions.len();

        for line in page.lines() {
            let Some(caps) = row_regex().captures(line) else {
                continue;
            };

            let (Some(date), Some(raw_amount)) = (
                parse_row_date(&caps["date"], statement_year),
                parse_money(&caps["amount"]),
            ) else {
                skipped += 1;
                continue;
            };
            let balance = caps.name("balance").and_then(|m| parse_money(m.as_str()));
            saw_balance |= balance.is_some();

            let description = caps["desc"].trim().to_string();

            // Opening/closing balance lines seed the running balance only
            if balance_line_regex().is_match(&description) {
                previous_balance = balance.or(Some(raw_amount));
                continue;
            }

            let amount = signed_amount(&caps["amount"], raw_amount, balance, previous_balance);
            if balance.is_some() {
                previous_balance = balance;
            }

            let category = categories::guess(&description, amount).map(|c| c.to_string());
            transactions.push(Transaction {
                date,
                description,
                amount,
                category,
            });
        }

        if transactions.len() == before {
            empty_pages.push(page_no + 1);
        }
    }

    let mut warnings = Vec::new();
    if skipped > 0 {
        warnings.push(format!("{} row(s) skipped: unparseable date or amount", skipped));
    }
    if transactions.is_empty() {
        warnings.push("No tabular text found in PDF".to_string());
    } else {
        for page in empty_pages {
            warnings.push(format!("Page {}: no transaction rows found", page));
        }
    }

    TransactionTable {
        transactions,
        column_count: if saw_balance { 4 } else { 3 },
        warnings,
    }
}

fn parse_row_date(raw: &str, statement_year: Option<i32>) -> Option<NaiveDate> {
    parse_date(raw).or_else(|| {
        // Statements often print `03/14` or `Mar 14` without the year
        let year = statement_year?;
        parse_date(&format!("{}/{}", raw, year))
            .or_else(|| parse_date(&format!("{}, {}", raw, year)))
    })
}

/// Explicit signs win. Otherwise the running balance tells debits from
/// credits, and without one the row is taken as a debit.
fn signed_amount(
    token: &str,
    parsed: Decimal,
    balance: Option<Decimal>,
    previous: Option<Decimal>,
) -> Decimal {
    let upper = token.to_uppercase();
    let explicit = token.contains('-')
        || token.contains('(')
        || upper.ends_with("CR")
        || upper.ends_with("DR");
    if explicit {
        return parsed;
    }

    match (balance, previous) {
        (Some(now), Some(before)) if now > before => parsed.abs(),
        _ => -parsed.abs(),
    }
}
