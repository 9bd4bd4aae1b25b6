use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// One callable action as advertised to a backend. `parameters` is a JSON
/// Schema object; each backend translates it into its native tool shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Normalized tool invocation, regardless of which backend produced it.
/// Arguments are untyped by design; only the handler validates them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), arguments: Map::new() }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }
}

/// Stage 1 outcome: invoke a tool, or answer in plain text. A backend may
/// send prose alongside a tool call; that preamble survives normalization so
/// the pipeline can fall back to it when the action itself fails.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Tool { call: ToolCall, preamble: Option<String> },
    Message { text: String },
}

impl Decision {
    pub fn tool(call: ToolCall) -> Self {
        Self::Tool { call, preamble: None }
    }
}

/// A decision plus the identity of the backend that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutedDecision {
    pub decision: Decision,
    pub provider_id: String,
    pub model: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoutedText {
    pub text: String,
    pub provider_id: String,
    pub model: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{provider}: authentication failed: {message}")]
    Auth { provider: String, message: String },
    #[error("{provider}: rate limited: {message}")]
    RateLimited { provider: String, message: String },
    #[error("{provider}: invalid request: {message}")]
    InvalidRequest { provider: String, message: String },
    #[error("{provider}: server error (status {status}): {message}")]
    Server { provider: String, status: u16, message: String },
    #[error("{provider}: network failure: {message}")]
    Network { provider: String, message: String },
    #[error("{provider}: malformed response: {message}")]
    Malformed { provider: String, message: String },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Decision, ToolCall};

    #[test]
    fn tool_call_builder_collects_arguments() {
        let call = ToolCall::new("search")
            .with_arg("query", json!("sneakers"))
            .with_arg("max_price", json!(100));

        assert_eq!(call.name, "search");
        assert_eq!(call.arguments.get("query"), Some(&json!("sneakers")));
        assert_eq!(call.arguments.get("max_price"), Some(&json!(100)));
    }

    #[test]
    fn decision_serializes_with_tag() {
        let decision = Decision::Message { text: "hello".to_string() };
        let value = serde_json::to_value(&decision).expect("serialize");
        assert_eq!(value["decision"], "message");
    }
}
