use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ai::llm::{Completion, LlmError, Message};
use crate::budget::BudgetSummary;
use crate::ingest::Transaction;
use crate::sessions::StoredTable;

/// Rows listed verbatim in the prompt; the aggregates cover the rest.
const MAX_LISTED_TRANSACTIONS: usize = 200;
/// Prior chat messages sent along with a question.
const MAX_HISTORY_MESSAGES: usize = 20;

const INITIAL_ANALYSIS_REQUEST: &str = "Please analyse my budget situation. Give me:\n\
1. An overview of my spending versus my income and budget\n\
2. My income as seen in the transactions\n\
3. The categories where I am overspending\n\
4. Specific suggestions on where to cut back\n\
5. What is left in each budget category this month";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("No data uploaded yet. Please upload a file first.")]
    NoData,
    #[error("Upstream LLM call failed: {0}")]
    Upstream(#[from] LlmError),
    #[error("Upstream LLM call timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
}

/// Everything the engine needs from a session.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInput<'a> {
    pub tables: &'a [StoredTable],
    pub income: Option<Decimal>,
    pub budget: Option<&'a BTreeMap<String, Decimal>>,
    pub history: &'a [Message],
}

impl<'a> AnalysisInput<'a> {
    fn transactions(self) -> impl Iterator<Item = &'a Transaction> + 'a {
        let tables: &'a [StoredTable] = self.tables;
        tables.iter().flat_map(|t| t.table.transactions.iter())
    }
}

#[derive(Clone)]
pub struct AnalysisEngine {
    llm: Arc<dyn Completion>,
    timeout: Duration,
}

impl AnalysisEngine {
    pub fn new(llm: Arc<dyn Completion>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Answer `question` about the given tables. The model's text is
    /// returned as-is.
    pub async fn analyze(
        &self,
        question: &str,
        input: AnalysisInput<'_>,
    ) -> Result<String, AnalysisError> {
        if input.transactions().next().is_none() {
            return Err(AnalysisError::NoData);
        }

        let summary = BudgetSummary::compute(input.transactions(), input.income, input.budget);
        let system = build_system_prompt(&summary, input.tables);

        let skip = input.history.len().saturating_sub(MAX_HISTORY_MESSAGES);
        let mut messages: Vec<Message> = input.history[skip..].to_vec();
        messages.push(Message::user(question));

        info!(
            tables = input.tables.len(),
            transactions = summary.transaction_count,
            history = messages.len() - 1,
            "analysis request"
        );

        match tokio::time::timeout(self.timeout, self.llm.complete(&system, &messages)).await {
            Ok(Ok(text)) => {
                debug!(text_len = text.len(), "analysis response");
                Ok(text)
            }
            Ok(Err(err)) => {
                warn!(error = %err, "upstream failure");
                Err(AnalysisError::Upstream(err))
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "upstream timed out");
                Err(AnalysisError::Timeout(self.timeout))
            }
        }
    }

    /// Budget overview with a fixed request.
    pub async fn initial_analysis(
        &self,
        input: AnalysisInput<'_>,
    ) -> Result<String, AnalysisError> {
        self.analyze(INITIAL_ANALYSIS_REQUEST, input).await
    }
}

/// Request sent after a manual transaction so the model can report where
/// the budget now stands.
pub fn transaction_update_request(tx: &Transaction) -> String {
    let kind = if tx.amount < Decimal::ZERO { "expense" } else { "income" };
    format!(
        "I just added a new {} of {:.2} on {}: \"{}\" (category: {}).\n\
1. Acknowledge the transaction\n\
2. Tell me how much is left in each part of my budget\n\
3. Say whether my spending is on track\n\
4. Give one short piece of advice",
        kind,
        tx.amount.abs(),
        tx.date,
        tx.description,
        tx.category.as_deref().unwrap_or(crate::categories::UNCATEGORIZED),
    )
}

pub fn build_system_prompt(summary: &BudgetSummary, tables: &[StoredTable]) -> String {
    let files: Vec<&str> = tables.iter().map(|t| t.filename.as_str()).collect();

    format!(
        "You are a helpful financial assistant. Answer questions about the user's budgeting, \
spending, and financial planning using the statement data below. Amounts are in the \
statement currency; debits are negative.\n\n\
FILES\n{}\n\n\
SUMMARY\n{}\n\
TRANSACTIONS\n{}\n\
Guidance: ground every figure in the data above, keep answers concise, and be supportive \
but honest about overspending. Exceeding a savings goal is a good thing.",
        files.join(", "),
        summary.to_prompt_text(),
        transaction_listing(tables),
    )
}

/// Most recent transactions first, one per line.
fn transaction_listing(tables: &[StoredTable]) -> String {
    let mut all: Vec<&Transaction> = tables
        .iter()
        .flat_map(|t| t.table.transactions.iter())
        .collect();
    all.sort_by(|a, b| b.date.cmp(&a.date));

    let total = all.len();
    let mut out = String::new();
    for tx in all.iter().take(MAX_LISTED_TRANSACTIONS) {
        out.push_str(&format!(
            "{} | {} | {:.2} | {}\n",
            tx.date,
            tx.description,
            tx.amount,
            tx.category.as_deref().unwrap_or("-")
        ));
    }
    if total > MAX_LISTED_TRANSACTIONS {
        out.push_str(&format!(
            "({} older transactions omitted; they are included in the summary)\n",
            total - MAX_LISTED_TRANSACTIONS
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::{Scripted, ScriptedCompletion};
    use crate::ingest::TransactionTable;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;

    fn stored(rows: Vec<(u32, &str, Decimal, &str)>) -> StoredTable {
        let transactions = rows
            .into_iter()
            .map(|(day, desc, amount, cat)| Transaction {
                date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
                description: desc.to_string(),
                amount,
                category: Some(cat.to_string()),
            })
            .collect();
        StoredTable {
            file_id: "f1".to_string(),
            filename: "transactions.csv".to_string(),
            table: Arc::new(TransactionTable {
                transactions,
                column_count: 4,
                warnings: Vec::new(),
            }),
            uploaded_at: Utc::now(),
        }
    }

    fn input<'a>(tables: &'a [StoredTable], history: &'a [Message]) -> AnalysisInput<'a> {
        AnalysisInput {
            tables,
            income: None,
            budget: None,
            history,
        }
    }

    fn engine(llm: Arc<ScriptedCompletion>) -> AnalysisEngine {
        AnalysisEngine::new(llm, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_no_tables_never_calls_upstream() {
        let llm = Arc::new(ScriptedCompletion::replying("unused"));
        let err = engine(llm.clone()).analyze("how much?", input(&[], &[])).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NoData));
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_tables_count_as_no_data() {
        let llm = Arc::new(ScriptedCompletion::default());
        let tables = vec![stored(vec![])];
        let err = engine(llm.clone()).analyze("q", input(&tables, &[])).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NoData));
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_carries_aggregates_and_question() {
        let llm = Arc::new(ScriptedCompletion::replying("You spent 70.00."));
        let tables = vec![stored(vec![
            (1, "Corner Market", dec!(-50), "groceries"),
            (2, "Pasta Place", dec!(-20), "dining"),
            (15, "ACME Corp Salary", dec!(2000), "salary"),
        ])];
        let history = vec![Message::user("hi"), Message::assistant("hello")];

        let answer = engine(llm.clone())
            .analyze("How much did I spend?", input(&tables, &history))
            .await
            .unwrap();
        assert_eq!(answer, "You spent 70.00.");

        let calls = llm.calls();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert!(call.system.contains("financial assistant"));
        assert!(call.system.contains("groceries: 50.00"));
        assert!(call.system.contains("Net: 1930.00"));
        assert!(call.system.contains("2024-03-15 | ACME Corp Salary | 2000.00 | salary"));
        assert_eq!(call.messages.len(), 3);
        assert_eq!(call.messages[2], Message::user("How much did I spend?"));
    }

    #[tokio::test]
    async fn test_upstream_error_propagates() {
        let llm = Arc::new(ScriptedCompletion::default());
        llm.push(Scripted::Fail(LlmError::MissingCredential));
        let tables = vec![stored(vec![(1, "x", dec!(-1), "misc")])];
        let err = engine(llm).analyze("q", input(&tables, &[])).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Upstream(LlmError::MissingCredential)));
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let llm = Arc::new(ScriptedCompletion::default());
        llm.push(Scripted::Hang(Duration::from_secs(5)));
        let tables = vec![stored(vec![(1, "x", dec!(-1), "misc")])];
        let engine = AnalysisEngine::new(llm, Duration::from_millis(50));
        let err = engine.analyze("q", input(&tables, &[])).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Timeout(_)));
    }

    #[test]
    fn test_listing_is_capped() {
        let rows: Vec<(u32, &str, Decimal, &str)> = (0..250)
            .map(|i| (1 + (i % 28) as u32, "row", dec!(-1), "misc"))
            .collect();
        let listing = transaction_listing(&[stored(rows)]);
        assert_eq!(listing.lines().count(), MAX_LISTED_TRANSACTIONS + 1);
        assert!(listing
            .ends_with("(50 older transactions omitted; they are included in the summary)\n"));
    }

    #[test]
    fn test_transaction_update_request() {
        let tx = Transaction {
            date: NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(),
            description: "Coffee".to_string(),
            amount: dec!(-12.5),
            category: Some("dining".to_string()),
        };
        let request = transaction_update_request(&tx);
        assert!(request.starts_with(
            "I just added a new expense of 12.50 on 2024-03-20: \"Coffee\" (category: dining)."
        ));
        assert!(request.contains("left in each part of my budget"));
    }
}
