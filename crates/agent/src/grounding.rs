//! Stage 2 grounding: the response prompt contains only the literal action
//! result, and a post-generation check guarantees multi-item results are
//! actually named. Instructing a model not to hallucinate is necessary but
//! not sufficient; the deterministic append closes the omission gap.

use serde_json::Value;

use concierge_llm::types::ChatMessage;

/// Distinct display names carried by a tool result, in result order.
pub fn result_item_names(result: &Value) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();

    let mut push = |name: Option<&str>| {
        if let Some(name) = name {
            if !name.is_empty() && !names.iter().any(|existing| existing == name) {
                names.push(name.to_string());
            }
        }
    };

    if let Some(items) = result.get("items").and_then(Value::as_array) {
        for item in items {
            push(item.get("name").and_then(Value::as_str));
        }
    }
    for path in [&["order", "lines"][..], &["cart", "lines"][..]] {
        let lines = path
            .iter()
            .fold(Some(result), |value, key| value.and_then(|v| v.get(*key)))
            .and_then(Value::as_array);
        if let Some(lines) = lines {
            for line in lines {
                push(line.get("product_name").and_then(Value::as_str));
            }
        }
    }

    names
}

/// Build the Stage 2 conversation: persona, the literal result, and nothing
/// else the model could be tempted to embellish.
pub fn build_stage2_messages(
    display_name: &str,
    preference_hint: Option<&str>,
    action: &str,
    result: &Value,
) -> Vec<ChatMessage> {
    let mut system = format!(
        "You are the shopping assistant for {display_name}. \
         Write one short, friendly reply describing ONLY the entities in the result below. \
         Never invent products, prices, availability, or order details. \
         If the result is empty, say so plainly."
    );
    if let Some(hint) = preference_hint {
        system.push_str(&format!(" The shopper has shown interest in: {hint}."));
    }

    let result_json = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
    let user = format!(
        "The `{action}` action returned this result:\n\n{result_json}\n\n\
         Describe it to the shopper. Refer to products by their exact names."
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// For multi-item results, at least two distinct item names must appear
/// verbatim in the generated text; otherwise the missing names are appended
/// deterministically.
pub fn enforce(text: &str, names: &[String]) -> (String, bool) {
    if names.len() < 2 {
        return (text.to_string(), false);
    }

    let present = names.iter().filter(|name| text.contains(name.as_str())).count();
    if present >= 2 {
        return (text.to_string(), false);
    }

    let missing: Vec<&str> = names
        .iter()
        .filter(|name| !text.contains(name.as_str()))
        .map(String::as_str)
        .collect();

    let mut enforced = text.trim_end().to_string();
    if !enforced.is_empty() && !enforced.ends_with(['.', '!', '?']) {
        enforced.push('.');
    }
    if !enforced.is_empty() {
        enforced.push(' ');
    }
    enforced.push_str(&format!("The matching items are: {}.", missing.join(", ")));
    (enforced, true)
}
