use serde_json::Value;

use crate::scan::{extract_price_cap, last_user_text, normalize_text};
use crate::types::{ChatMessage, Decision, ToolCall, ToolSpec};

/// Deterministic last-resort decider. When every configured backend has
/// failed, keyword rules over the last user turn map onto whatever actions
/// the registry enabled. Always produces a decision; the pipeline never
/// dead-ends with zero working backends.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuleBasedDecider;

pub const FALLBACK_TEXT: &str =
    "I can help you search the catalog, compare products, manage your cart, or check an order. What are you looking for?";

/// Stage 2 stand-in when no backend can phrase the result; the grounding
/// check appends the concrete item names afterwards.
pub const FALLBACK_RESULT_TEXT: &str = "Here is what I found for you.";

impl RuleBasedDecider {
    pub fn decide(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Decision {
        let Some(raw_text) = last_user_text(messages) else {
            return Decision::Message { text: FALLBACK_TEXT.to_string() };
        };
        let text = normalize_text(raw_text);
        let query = raw_text.trim().to_string();
        let has = |name: &str| tools.iter().any(|tool| tool.name == name);

        if has("order_status")
            && text.contains("order")
            && ["status", "track", "where", "arrive"].iter().any(|word| text.contains(word))
        {
            let mut call = ToolCall::new("order_status");
            if let Some(order_id) = find_order_token(&query) {
                call = call.with_arg("order_id", Value::from(order_id));
            }
            return Decision::tool(call);
        }

        if has("checkout")
            && ["checkout", "check out", "place the order", "place my order", "buy now"]
                .iter()
                .any(|phrase| text.contains(phrase))
        {
            return Decision::tool(ToolCall::new("checkout"));
        }

        if has("remove_from_cart") && text.contains("cart") && text.contains("remove") {
            return Decision::tool(
                ToolCall::new("remove_from_cart").with_arg("query", Value::from(query)),
            );
        }

        // Whole-outfit adds win over single-item adds.
        if has("add_outfit")
            && text.contains("outfit")
            && (text.contains("add") || text.contains("cart"))
        {
            return Decision::tool(
                ToolCall::new("add_outfit").with_arg("query", Value::from(query)),
            );
        }

        if has("add_to_cart") && text.contains("cart") && text.contains("add") {
            return Decision::tool(
                ToolCall::new("add_to_cart").with_arg("query", Value::from(query)),
            );
        }

        if has("view_cart") && text.contains("cart") {
            return Decision::tool(ToolCall::new("view_cart"));
        }

        if has("compare") && (text.contains("compare") || text.contains(" vs ")) {
            return Decision::tool(ToolCall::new("compare").with_arg("query", Value::from(query)));
        }

        if has("outfit") && text.contains("outfit") {
            return Decision::tool(ToolCall::new("outfit").with_arg("query", Value::from(query)));
        }

        if has("recommend")
            && ["recommend", "suggest", "what should i"].iter().any(|phrase| text.contains(phrase))
        {
            return Decision::tool(ToolCall::new("recommend").with_arg("query", Value::from(query)));
        }

        if has("search") && looks_like_shopping(&text) {
            let mut call = ToolCall::new("search").with_arg("query", Value::from(query));
            if let Some(cap) = extract_price_cap(raw_text) {
                call = call.with_arg("max_price", Value::from(cap));
            }
            return Decision::tool(call);
        }

        Decision::Message { text: FALLBACK_TEXT.to_string() }
    }
}

fn looks_like_shopping(text: &str) -> bool {
    [
        "find", "show", "search", "looking for", "need", "want", "buy", "shop", "browse", "any",
        "have",
    ]
    .iter()
    .any(|phrase| text.contains(phrase))
}

fn find_order_token(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|token| token.trim_matches(|ch: char| !ch.is_ascii_alphanumeric() && ch != '-'))
        .find(|token| token.to_ascii_uppercase().starts_with("ORD-"))
        .map(|token| token.to_ascii_uppercase())
}
