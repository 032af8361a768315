use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label used for debit rows that carry no category.
pub const UNCATEGORIZED: &str = "uncategorized";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Groceries,
    Dining,
    Transport,
    Housing,
    Utilities,
    Subscriptions,
    Insurance,
    Health,
    Shopping,
    Entertainment,
    Transfers,
    Savings,
    Fees,
    Income,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Category::Groceries => "groceries",
            Category::Dining => "dining",
            Category::Transport => "transport",
            Category::Housing => "housing",
            Category::Utilities => "utilities",
            Category::Subscriptions => "subscriptions",
            Category::Insurance => "insurance",
            Category::Health => "health",
            Category::Shopping => "shopping",
            Category::Entertainment => "entertainment",
            Category::Transfers => "transfers",
            Category::Savings => "savings",
            Category::Fees => "fees",
            Category::Income => "income",
        };
        f.write_str(label)
    }
}

impl Category {
    /// Upper-case words or phrases that identify the category in a
    /// description. They only match on word boundaries.
    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Category::Groceries => &[
                "GROCER", "GROCERY", "GROCERIES", "SUPERMARKET", "WHOLE FOODS", "TRADER JOE",
                "KROGER", "SAFEWAY", "ALDI", "LIDL", "MIGROS", "COOP", "TESCO", "SAINSBURY",
                "SAINSBURYS", "COSTCO",
            ],
            Category::Dining => &[
                "RESTAURANT", "CAFE", "COFFEE", "STARBUCKS", "MCDONALD", "MCDONALDS", "PIZZA",
                "BURGER", "DINER", "DINING", "DOORDASH", "UBER EATS", "GRUBHUB", "DELIVEROO", "BAR",
            ],
            Category::Transport => &[
                "UBER", "LYFT", "TAXI", "SHELL", "CHEVRON", "EXXON", "FUEL", "GAS STATION",
                "PARKING", "TRANSIT", "METRO", "SBB", "TRAIN", "AIRLINE", "AIRLINES",
            ],
            Category::Housing => &[
                "RENT", "RENTAL", "MORTGAGE", "LANDLORD", "LEASE", "APARTMENT", "APARTMENTS",
            ],
            Category::Utilities => &[
                "ELECTRIC", "ELECTRICITY", "WATER", "UTILITY", "UTILITIES", "INTERNET", "COMCAST",
                "VERIZON", "AT&T", "T-MOBILE", "PHONE", "SWISSCOM",
            ],
            Category::Subscriptions => &[
                "NETFLIX", "SPOTIFY", "HULU", "DISNEY+", "YOUTUBE", "ICLOUD", "APPLE.COM/BILL",
                "SUBSCRIPTION", "MEMBERSHIP", "GYM",
            ],
            Category::Insurance => &["INSURANCE", "GEICO", "ALLSTATE", "PROGRESSIVE"],
            Category::Health => &[
                "PHARMACY", "CVS", "WALGREENS", "DOCTOR", "DENTAL", "CLINIC", "HOSPITAL",
            ],
            Category::Shopping => &[
                "AMAZON", "TARGET", "WALMART", "EBAY", "IKEA", "BEST BUY", "ZALANDO",
            ],
            Category::Entertainment => &[
                "CINEMA", "MOVIE", "MOVIES", "THEATER", "CONCERT", "TICKETMASTER", "STEAM",
            ],
            Category::Transfers => &["TRANSFER", "TRANSFERS", "ZELLE", "VENMO", "PAYPAL", "TWINT"],
            Category::Savings => &[
                "SAVINGS", "INVEST", "INVESTMENT", "VANGUARD", "FIDELITY", "BROKERAGE",
            ],
            Category::Fees => &["FEE", "FEES", "OVERDRAFT", "INTEREST CHARGE", "SERVICE CHARGE"],
            Category::Income => &[
                "SALARY", "PAYROLL", "DIRECT DEP", "DIRECT DEPOSIT", "DEPOSIT", "REFUND",
                "DIVIDEND",
            ],
        }
    }

    /// Budget bucket the category counts against. Income and transfers
    /// are not spending.
    pub fn bucket(&self) -> Option<Bucket> {
        match self {
            Category::Groceries
            | Category::Transport
            | Category::Housing
            | Category::Utilities
            | Category::Insurance
            | Category::Health
            | Category::Fees => Some(Bucket::Expenses),
            Category::Dining
            | Category::Subscriptions
            | Category::Shopping
            | Category::Entertainment => Some(Bucket::Wants),
            Category::Savings => Some(Bucket::Savings),
            Category::Transfers | Category::Income => None,
        }
    }

    /// Parse a lowercase label produced by `Display`.
    pub fn from_label(label: &str) -> Option<Category> {
        Category::all().iter().copied().find(|c| c.to_string() == label)
    }

    /// Rule order; earlier entries win when several keywords match.
    pub fn all() -> &'static [Category] {
        &[
            Category::Income,
            Category::Housing,
            Category::Savings,
            Category::Subscriptions,
            Category::Groceries,
            Category::Dining,
            Category::Transport,
            Category::Utilities,
            Category::Insurance,
            Category::Health,
            Category::Shopping,
            Category::Entertainment,
            Category::Fees,
            Category::Transfers,
        ]
    }
}

/// Spending buckets of the income split: needs, discretionary wants, and
/// savings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Expenses,
    Wants,
    Savings,
}

impl Bucket {
    pub fn all() -> [Bucket; 3] {
        [Bucket::Expenses, Bucket::Wants, Bucket::Savings]
    }

    /// Default share of income: 70% expenses, 20% wants, 10% savings.
    pub fn share(&self) -> Decimal {
        match self {
            Bucket::Expenses => Decimal::new(70, 2),
            Bucket::Wants => Decimal::new(20, 2),
            Bucket::Savings => Decimal::new(10, 2),
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Bucket::Expenses => "expenses",
            Bucket::Wants => "wants",
            Bucket::Savings => "savings",
        })
    }
}

/// Bucket for a stored category label. Labels outside the built-in set,
/// including uncategorised rows, count as expenses.
pub fn bucket_for_label(label: &str) -> Option<Bucket> {
    match Category::from_label(label) {
        Some(category) => category.bucket(),
        None => Some(Bucket::Expenses),
    }
}

/// Guess a category from the description. Income keywords only apply to
/// credits so a refund-looking debit is not filed as income.
pub fn guess(description: &str, amount: Decimal) -> Option<Category> {
    let desc = description.to_uppercase();
    Category::all().iter().copied().find(|category| {
        if *category == Category::Income && amount <= Decimal::ZERO {
            return false;
        }
        category.keywords().iter().any(|kw| contains_word(&desc, kw))
    })
}

/// True when `word` occurs in `haystack` with no letter or digit directly
/// before or after it.
fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.match_indices(word).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Normalise a free-form category label from a source file.
pub fn normalise_label(raw: &str) -> Option<String> {
    let label = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    if label.is_empty() || label == "nan" || label == "none" {
        None
    } else {
        Some(label)
    }
}
