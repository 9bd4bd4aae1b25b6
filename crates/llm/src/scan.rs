//! Deterministic text scanning shared by the rule-based decider and the
//! pre-model routing rules. Extraction from free text is lossy; these
//! helpers only claim what they can see literally.

pub fn normalize_text(text: &str) -> String {
    text.to_ascii_lowercase()
}

pub fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_ascii_alphanumeric() || matches!(character, '$' | '%' | '.' | '-') {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().map(|token| token.to_string()).collect()
}

/// `$100`, `$1.5k`, `2m` as dollars, or None.
pub fn parse_money_token(token: &str) -> Option<f64> {
    let trimmed = token.trim_start_matches('$').trim_end_matches(',');
    if trimmed.is_empty() {
        return None;
    }

    let (number_part, multiplier) = if let Some(prefix) = trimmed.strip_suffix('k') {
        (prefix, 1_000.0)
    } else if let Some(prefix) = trimmed.strip_suffix('m') {
        (prefix, 1_000_000.0)
    } else {
        (trimmed, 1.0)
    };

    let amount = number_part.parse::<f64>().ok()?;
    if amount < 0.0 {
        return None;
    }
    Some(amount * multiplier)
}

/// An upper price bound stated in the text: `under $100`, `below 50`,
/// `max $2k`, or a bare `$100` anywhere.
pub fn extract_price_cap(text: &str) -> Option<f64> {
    let bound_context = ["under", "below", "max", "within", "than"];
    let tokens = tokenize(&normalize_text(text));

    for (index, token) in tokens.iter().enumerate() {
        let in_context = index > 0 && bound_context.contains(&tokens[index - 1].as_str());
        if token.starts_with('$') || in_context {
            if let Some(dollars) = parse_money_token(token) {
                return Some(dollars);
            }
        }
    }
    None
}

/// Last user-authored line of the conversation, the only turn the
/// deterministic layers look at.
pub fn last_user_text(messages: &[crate::types::ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|message| message.role == crate::types::ChatRole::User)
        .map(|message| message.content.as_str())
}

#[cfg(test)]
mod tests {
    use crate::types::ChatMessage;

    use super::{extract_price_cap, last_user_text, parse_money_token};

    #[test]
    fn money_tokens_cover_plain_k_and_m_suffixes() {
        assert_eq!(parse_money_token("$100"), Some(100.0));
        assert_eq!(parse_money_token("2.5k"), Some(2500.0));
        assert_eq!(parse_money_token("$1m"), Some(1_000_000.0));
        assert_eq!(parse_money_token("banana"), None);
    }

    #[test]
    fn price_caps_need_a_bound_word_or_dollar_sign() {
        assert_eq!(extract_price_cap("sneakers under $100"), Some(100.0));
        assert_eq!(extract_price_cap("sneakers under 100"), Some(100.0));
        assert_eq!(extract_price_cap("less than 75 for shoes"), Some(75.0));
        assert_eq!(extract_price_cap("show me 100 sneakers"), None);
    }

    #[test]
    fn last_user_text_skips_assistant_turns() {
        let messages = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("noted"),
            ChatMessage::user("second"),
        ];
        assert_eq!(last_user_text(&messages), Some("second"));
    }
}
