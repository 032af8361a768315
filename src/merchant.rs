/// Reduce a raw statement description to a stable merchant key so that
/// variants like `STARBUCKS #1234 SEATTLE` and `STARBUCKS #987 SEATTLE`
/// group together.
pub fn normalise_merchant_key(description: &str) -> String {
    let mut s = description.to_uppercase();

    // Card-processor prefixes
    for prefix in &["POS ", "SQ *", "TST* ", "PAYPAL *", "DEBIT CARD PURCHASE "] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.to_string();
        }
    }

    let mut result_tokens: Vec<String> = Vec::new();

    for token in s.split_whitespace() {
        // Everything after a card marker is card number fragments
        if token == "CARD" || token == "KARTE" {
            break;
        }
        let trimmed = token.trim_start_matches('#');
        let is_reference = trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '*' | '/' | '-'));
        if trimmed.is_empty() || is_reference {
            continue;
        }
        result_tokens.push(token.trim_matches(|c: char| c == ',' || c == '.').to_string());
    }

    result_tokens.retain(|t| !t.is_empty());
    result_tokens.join(" ")
}
