//! Deterministic pre-model routing. One priority-ordered rule list sits in
//! front of the model-based decider: greetings short-circuit, and a few
//! high-precision intents are unambiguous enough that asking a model only
//! adds latency and misclassification risk.

use std::collections::BTreeSet;

use serde_json::Value;

use concierge_llm::scan::{extract_price_cap, normalize_text, tokenize};
use concierge_llm::types::ToolCall;

/// What the rule layer decided before any model saw the turn.
#[derive(Clone, Debug, PartialEq)]
pub enum PreModelRoute {
    /// Pure social utterance: templated response, no tool, no state change.
    Greeting,
    /// Unambiguous intent: bypass Stage 1 with this exact call.
    Forced { rule: &'static str, call: ToolCall },
}

struct RuleInput<'a> {
    raw: &'a str,
    text: String,
    tokens: Vec<String>,
    enabled: &'a BTreeSet<String>,
}

type Rule = (&'static str, fn(&RuleInput<'_>) -> Option<PreModelRoute>);

/// Evaluated top to bottom; the first hit wins.
const RULES: &[Rule] = &[
    ("greeting", greeting_rule),
    ("price_bounded_search", price_bounded_search_rule),
    ("explicit_comparison", comparison_rule),
    ("outfit_request", outfit_rule),
];

pub fn evaluate(message: &str, enabled: &BTreeSet<String>) -> Option<PreModelRoute> {
    let text = normalize_text(message);
    let input = RuleInput { raw: message, tokens: tokenize(&text), text, enabled };
    RULES.iter().find_map(|(_, rule)| rule(&input))
}

/// Name of the rule that would fire, for audit trails and tests.
pub fn matching_rule(message: &str, enabled: &BTreeSet<String>) -> Option<&'static str> {
    let text = normalize_text(message);
    let input = RuleInput { raw: message, tokens: tokenize(&text), text, enabled };
    RULES.iter().find(|(_, rule)| rule(&input).is_some()).map(|(name, _)| *name)
}

const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "yo", "hiya", "howdy", "good morning", "good afternoon", "good evening",
    "thanks", "thank you", "bye", "goodbye", "see you",
];

fn greeting_rule(input: &RuleInput<'_>) -> Option<PreModelRoute> {
    let stripped: String = input
        .text
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || ch.is_ascii_whitespace() || *ch == '\'')
        .collect();
    let stripped = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    // Short and composed purely of social words; "hello, any sneakers?" must
    // NOT match.
    let is_greeting = !stripped.is_empty()
        && stripped.split_whitespace().count() <= 4
        && (GREETINGS.contains(&stripped.as_str())
            || stripped
                .split_whitespace()
                .all(|word| GREETINGS.contains(&word) || matches!(word, "there" | "good" | "morning" | "afternoon" | "evening")));

    is_greeting.then_some(PreModelRoute::Greeting)
}

/// Canned greeting body; the pipeline brands it per tenant.
pub fn greeting_text(display_name: &str) -> String {
    format!(
        "Hello! Welcome to {display_name}. I can help you find products, compare options, manage your cart, or check on an order."
    )
}

fn price_bounded_search_rule(input: &RuleInput<'_>) -> Option<PreModelRoute> {
    if !input.enabled.contains("search") {
        return None;
    }
    let cap = extract_price_cap(input.raw)?;

    // A bound alone is not a search; there must be something to search for.
    const BOUND_WORDS: &[&str] =
        &["under", "below", "max", "within", "than", "less", "more", "for", "the", "and"];
    let has_subject = input.tokens.iter().any(|token| {
        !token.starts_with('$')
            && token.parse::<f64>().is_err()
            && token.len() > 2
            && !BOUND_WORDS.contains(&token.as_str())
    });
    if !has_subject {
        return None;
    }

    let call = ToolCall::new("search")
        .with_arg("query", Value::from(input.raw.trim()))
        .with_arg("max_price", Value::from(cap));
    Some(PreModelRoute::Forced { rule: "price_bounded_search", call })
}

fn comparison_rule(input: &RuleInput<'_>) -> Option<PreModelRoute> {
    if !input.enabled.contains("compare") {
        return None;
    }
    let compares = input.text.contains("compare")
        || input.text.contains(" vs ")
        || input.text.contains(" versus ");
    if !compares {
        return None;
    }

    let call = ToolCall::new("compare").with_arg("query", Value::from(input.raw.trim()));
    Some(PreModelRoute::Forced { rule: "explicit_comparison", call })
}

fn outfit_rule(input: &RuleInput<'_>) -> Option<PreModelRoute> {
    if !input.enabled.contains("outfit") {
        return None;
    }
    let wants_outfit = input.text.contains("outfit")
        || input.text.contains("what should i wear")
        || input.text.contains("dress me");
    if !wants_outfit {
        return None;
    }

    let call = ToolCall::new("outfit").with_arg("query", Value::from(input.raw.trim()));
    Some(PreModelRoute::Forced { rule: "outfit_request", call })
}

/// Post-Stage-1 heuristic: the model answered in prose, but the user was
/// clearly steering the previous result set ("something cheaper", "more
/// casual", "do you have it in black"). Kept narrow on purpose: it overrides
/// a model decision, and false positives are worse than misses.
pub fn is_style_adjustment(message: &str) -> bool {
    let text = normalize_text(message);
    const PATTERNS: &[&str] = &[
        "something cheaper",
        "bit cheaper",
        "more casual",
        "more formal",
        "sportier",
        "less expensive",
        "in black",
        "in white",
        "in blue",
        "in green",
        "other colors",
        "different color",
        "similar but",
        "like that but",
    ];
    PATTERNS.iter().any(|pattern| text.contains(pattern))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::{evaluate, is_style_adjustment, matching_rule, PreModelRoute};

    fn all_enabled() -> BTreeSet<String> {
        ["search", "compare", "outfit", "recommend"]
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    #[test]
    fn greetings_short_circuit() {
        for text in ["hi", "Hello!", "hey there", "Good morning", "thank you"] {
            assert_eq!(
                matching_rule(text, &all_enabled()),
                Some("greeting"),
                "`{text}` should be a greeting"
            );
        }
    }

    #[test]
    fn greeting_with_intent_falls_through() {
        // A greeting that carries a request must reach the model.
        for text in ["hello, any sneakers?", "hi, I need running shoes", "hey can you compare these"] {
            assert_ne!(matching_rule(text, &all_enabled()), Some("greeting"), "`{text}`");
        }
    }

    #[test]
    fn price_bounded_search_is_forced_with_cap() {
        let route = evaluate("sneakers under $100", &all_enabled()).expect("route");
        match route {
            PreModelRoute::Forced { rule, call } => {
                assert_eq!(rule, "price_bounded_search");
                assert_eq!(call.name, "search");
                assert_eq!(call.arguments.get("max_price"), Some(&json!(100.0)));
                assert_eq!(call.arguments.get("query"), Some(&json!("sneakers under $100")));
            }
            PreModelRoute::Greeting => panic!("expected forced route"),
        }
    }

    #[test]
    fn bare_amount_is_not_a_search() {
        assert!(evaluate("under $100", &all_enabled()).is_none());
    }

    #[test]
    fn comparison_language_is_forced() {
        let table = [
            ("compare Model A and Model B", true),
            ("Aero Glide 90 vs Court Classic Low", true),
            ("what do you have?", false),
        ];
        for (text, expected) in table {
            let forced = matches!(
                evaluate(text, &all_enabled()),
                Some(PreModelRoute::Forced { rule: "explicit_comparison", .. })
            );
            assert_eq!(forced, expected, "`{text}`");
        }
    }

    #[test]
    fn rules_respect_the_enabled_action_set() {
        let only_search: BTreeSet<String> = ["search".to_string()].into_iter().collect();
        assert!(evaluate("compare A vs B", &only_search).is_none());
        assert!(evaluate("build me an outfit", &only_search).is_none());
        assert!(evaluate("sneakers under $50", &only_search).is_some());
    }

    #[test]
    fn style_adjustments_are_narrow() {
        assert!(is_style_adjustment("hmm, something cheaper maybe?"));
        assert!(is_style_adjustment("do you have it in black"));
        assert!(!is_style_adjustment("tell me about your return policy"));
        assert!(!is_style_adjustment("checkout"));
    }
}
