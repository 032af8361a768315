use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::categories::{bucket_for_label, Bucket, UNCATEGORIZED};
use crate::ingest::Transaction;
use crate::merchant::normalise_merchant_key;

const TOP_MERCHANTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MerchantTotal {
    pub merchant: String,
    pub total: Decimal,
    pub count: usize,
}

/// Progress against one bucket of the income split. `spent` is a positive
/// magnitude. For expenses and wants `remaining` is target minus spent; for
/// savings it is spent minus target, so a positive value means the goal was
/// exceeded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalProgress {
    pub bucket: Bucket,
    pub target: Decimal,
    pub spent: Decimal,
    pub remaining: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Deterministic aggregates over a session's transactions. Spending
/// figures keep the statement sign, so they are negative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetSummary {
    pub totals_by_category: BTreeMap<String, Decimal>,
    pub income: Decimal,
    /// True when `income` came from the session setting rather than credits.
    pub income_is_explicit: bool,
    pub total_spent: Decimal,
    pub net: Decimal,
    pub budget_remaining: BTreeMap<String, Decimal>,
    /// Income split into 70/20/10 goals; empty while income is zero.
    pub goals: Vec<GoalProgress>,
    pub transaction_count: usize,
    pub date_range: Option<DateRange>,
    pub top_merchants: Vec<MerchantTotal>,
}

impl BudgetSummary {
    pub fn compute<'a, I>(
        transactions: I,
        income: Option<Decimal>,
        budget: Option<&BTreeMap<String, Decimal>>,
    ) -> Self
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let mut totals_by_category: BTreeMap<String, Decimal> = BTreeMap::new();
        let mut merchants: HashMap<String, (Decimal, usize)> = HashMap::new();
        let mut bucket_spent: BTreeMap<Bucket, Decimal> = BTreeMap::new();
        let mut credits = Decimal::ZERO;
        let mut total_spent = Decimal::ZERO;
        let mut transaction_count = 0;
        let mut date_range: Option<DateRange> = None;

        for tx in transactions {
            transaction_count += 1;
            date_range = Some(match date_range {
                None => DateRange { start: tx.date, end: tx.date },
                Some(r) => DateRange {
                    start: r.start.min(tx.date),
                    end: r.end.max(tx.date),
                },
            });

            if tx.amount > Decimal::ZERO {
                credits += tx.amount;
                continue;
            }
            if tx.amount.is_zero() {
                continue;
            }

            total_spent += tx.amount;
            let category = tx.category.clone().unwrap_or_else(|| UNCATEGORIZED.to_string());
            if let Some(bucket) = bucket_for_label(&category) {
                *bucket_spent.entry(bucket).or_default() -= tx.amount;
            }
            *totals_by_category.entry(category).or_default() += tx.amount;

            let key = normalise_merchant_key(&tx.description);
            if !key.is_empty() {
                let entry = merchants.entry(key).or_default();
                entry.0 += tx.amount;
                entry.1 += 1;
            }
        }

        let income_is_explicit = income.is_some();
        let income = income.unwrap_or(credits);

        let budget_remaining = budget
            .map(|limits| {
                limits
                    .iter()
                    .map(|(category, limit)| {
                        let spent = totals_by_category.get(category).copied().unwrap_or_default();
                        (category.clone(), *limit + spent)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let goals = if income > Decimal::ZERO {
            Bucket::all()
                .into_iter()
                .map(|bucket| {
                    let target = (income * bucket.share()).round_dp(2);
                    let spent = bucket_spent.get(&bucket).copied().unwrap_or_default();
                    let remaining = match bucket {
                        Bucket::Savings => spent - target,
                        _ => target - spent,
                    };
                    GoalProgress {
                        bucket,
                        target,
                        spent,
                        remaining,
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        let mut top_merchants: Vec<MerchantTotal> = merchants
            .into_iter()
            .map(|(merchant, (total, count))| MerchantTotal { merchant, total, count })
            .collect();
        // Most negative first; name breaks ties so output is stable
        top_merchants.sort_by(|a, b| {
            a.total
                .cmp(&b.total)
                .then_with(|| a.merchant.cmp(&b.merchant))
        });
        top_merchants.truncate(TOP_MERCHANTS);

        Self {
            totals_by_category,
            income,
            income_is_explicit,
            total_spent,
            net: income + total_spent,
            budget_remaining,
            goals,
            transaction_count,
            date_range,
            top_merchants,
        }
    }

    /// Plain-text rendering embedded in prompts.
    pub fn to_prompt_text(&self) -> String {
        let mut out = String::new();

        match &self.date_range {
            Some(r) => out.push_str(&format!("- Date range: {} to {}\n", r.start, r.end)),
            None => out.push_str("- Date range: unknown\n"),
        }
        out.push_str(&format!("- Transactions: {}\n", self.transaction_count));
        let source = if self.income_is_explicit { "set by user" } else { "estimated from credits" };
        out.push_str(&format!("- Income ({}): {:.2}\n", source, self.income));
        out.push_str(&format!("- Total spent: {:.2}\n", self.total_spent.abs()));
        out.push_str(&format!("- Net: {:.2}\n", self.net));

        out.push_str("- Spending by category:\n");
        let mut by_size: Vec<(&String, &Decimal)> = self.totals_by_category.iter().collect();
        by_size.sort_by(|a, b| a.1.cmp(b.1));
        for (category, total) in by_size {
            out.push_str(&format!("  - {}: {:.2}\n", category, total.abs()));
        }

        if !self.budget_remaining.is_empty() {
            out.push_str("- Budget remaining (negative means over budget):\n");
            for (category, remaining) in &self.budget_remaining {
                out.push_str(&format!("  - {}: {:.2}\n", category, remaining));
            }
        }

        if !self.goals.is_empty() {
            out.push_str("- Income split goals (70% expenses, 20% wants, 10% savings):\n");
            for g in &self.goals {
                let status = match g.bucket {
                    Bucket::Savings if g.remaining >= Decimal::ZERO => {
                        format!("goal exceeded by {:.2}", g.remaining)
                    }
                    Bucket::Savings => format!("{:.2} still to save", g.remaining.abs()),
                    _ => format!("remaining {:.2}", g.remaining),
                };
                out.push_str(&format!(
                    "  - {}: {:.2} of {:.2} ({})\n",
                    g.bucket, g.spent, g.target, status
                ));
            }
        }

        if !self.top_merchants.is_empty() {
            out.push_str("- Top merchants:\n");
            for m in &self.top_merchants {
                out.push_str(&format!(
                    "  - {}: {:.2} ({} tx)\n",
                    m.merchant,
                    m.total.abs(),
                    m.count
                ));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tx(day: u32, description: &str, amount: Decimal, category: Option<&str>) -> Transaction {
        Transaction {
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            description: description.to_string(),
            amount,
            category: category.map(|c| c.to_string()),
        }
    }

    fn fixture() -> Vec<Transaction> {
        vec![
            tx(1, "Corner Market", dec!(-50), Some("groceries")),
            tx(2, "Pasta Place", dec!(-20), Some("dining")),
            tx(15, "ACME Corp Salary", dec!(2000), Some("salary")),
        ]
    }

    #[test]
    fn test_fixture_summary() {
        let rows = fixture();
        let summary = BudgetSummary::compute(&rows, None, None);

        let expected: BTreeMap<String, Decimal> =
            [("dining".to_string(), dec!(-20)), ("groceries".to_string(), dec!(-50))].into();
        assert_eq!(summary.totals_by_category, expected);
        assert_eq!(summary.income, dec!(2000));
        assert!(!summary.income_is_explicit);
        assert_eq!(summary.total_spent, dec!(-70));
        assert_eq!(summary.net, dec!(1930));
        assert_eq!(summary.transaction_count, 3);
        assert_eq!(
            summary.date_range,
            Some(DateRange {
                start: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            })
        );
    }

    #[test]
    fn test_explicit_income_overrides_credits() {
        let rows = fixture();
        let summary = BudgetSummary::compute(&rows, Some(dec!(3000)), None);
        assert_eq!(summary.income, dec!(3000));
        assert_eq!(summary.net, dec!(2930));
    }

    #[test]
    fn test_budget_remaining() {
        let rows = fixture();
        let budget: BTreeMap<String, Decimal> =
            [("groceries".to_string(), dec!(40)), ("travel".to_string(), dec!(100))].into();
        let summary = BudgetSummary::compute(&rows, None, Some(&budget));
        assert_eq!(summary.budget_remaining["groceries"], dec!(-10));
        assert_eq!(summary.budget_remaining["travel"], dec!(100));
    }

    #[test]
    fn test_income_split_goals() {
        let rows = fixture();
        let summary = BudgetSummary::compute(&rows, None, None);
        let by_bucket: BTreeMap<Bucket, &GoalProgress> =
            summary.goals.iter().map(|g| (g.bucket, g)).collect();

        assert_eq!(by_bucket[&Bucket::Expenses].target, dec!(1400));
        assert_eq!(by_bucket[&Bucket::Expenses].spent, dec!(50));
        assert_eq!(by_bucket[&Bucket::Expenses].remaining, dec!(1350));
        assert_eq!(by_bucket[&Bucket::Wants].spent, dec!(20));
        assert_eq!(by_bucket[&Bucket::Wants].remaining, dec!(380));
        assert_eq!(by_bucket[&Bucket::Savings].target, dec!(200));
        assert_eq!(by_bucket[&Bucket::Savings].remaining, dec!(-200));
    }

    #[test]
    fn test_savings_goal_exceeded() {
        let mut rows = fixture();
        rows.push(tx(20, "VANGUARD BUY", dec!(-250), Some("savings")));
        let summary = BudgetSummary::compute(&rows, None, None);
        let savings = summary.goals.iter().find(|g| g.bucket == Bucket::Savings).unwrap();
        assert_eq!(savings.remaining, dec!(50));
        assert!(summary
            .to_prompt_text()
            .contains("savings: 250.00 of 200.00 (goal exceeded by 50.00)"));
    }

    #[test]
    fn test_amounts_at_the_cap_do_not_overflow() {
        let max = crate::ingest::columns::max_amount();
        let rows: Vec<Transaction> = (1..=28).map(|d| tx(d, "BIG", -max, None)).collect();
        let summary = BudgetSummary::compute(&rows, Some(max), None);
        assert_eq!(summary.total_spent, -max * Decimal::from(28));
    }

    #[test]
    fn test_uncategorised_debits_grouped() {
        let rows = vec![tx(1, "MYSTERY 001", dec!(-5), None), tx(2, "MYSTERY 002", dec!(-7), None)];
        let summary = BudgetSummary::compute(&rows, None, None);
        assert_eq!(summary.totals_by_category[UNCATEGORIZED], dec!(-12));
        assert_eq!(summary.top_merchants.len(), 1);
        assert_eq!(summary.top_merchants[0].count, 2);
    }

    #[test]
    fn test_empty_input() {
        let summary = BudgetSummary::compute(std::iter::empty::<&Transaction>(), None, None);
        assert_eq!(summary.transaction_count, 0);
        assert_eq!(summary.net, Decimal::ZERO);
        assert!(summary.date_range.is_none());
        assert!(summary.goals.is_empty());
    }

    #[test]
    fn test_prompt_text_mentions_categories() {
        let rows = fixture();
        let text = BudgetSummary::compute(&rows, None, None).to_prompt_text();
        assert!(text.contains("groceries: 50.00"));
        assert!(text.contains("Income (estimated from credits): 2000.00"));
        assert!(text.contains("Net: 1930.00"));
    }
}
