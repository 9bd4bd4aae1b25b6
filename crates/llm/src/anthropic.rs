use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

use crate::provider::{parse_http_error, ChatProvider};
use crate::types::{ChatMessage, ChatRole, Decision, ProviderError, ToolCall, ToolSpec};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

/// Anthropic-format backend. The messages API differs from the OpenAI shape
/// in three ways this module absorbs: system prompts are a top-level field,
/// tools carry `input_schema` instead of `parameters`, and tool invocations
/// arrive as `tool_use` content blocks.
pub struct AnthropicProvider {
    client: reqwest::Client,
    model: String,
    api_key: Option<SecretString>,
    base_url: Option<String>,
    timeout: Duration,
}

impl AnthropicProvider {
    pub fn new(
        model: impl Into<String>,
        api_key: Option<SecretString>,
        base_url: Option<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            model: model.into(),
            api_key,
            base_url,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn endpoint(&self) -> String {
        match &self.base_url {
            Some(base) => format!("{}/v1/messages", base.trim_end_matches('/')),
            None => ANTHROPIC_API_URL.to_string(),
        }
    }

    fn build_request_body(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Value {
        // System turns fold into one top-level system string; the messages
        // array may only contain user/assistant roles.
        let system: Vec<&str> = messages
            .iter()
            .filter(|message| message.role == ChatRole::System)
            .map(|message| message.content.as_str())
            .collect();

        let turns: Vec<Value> = messages
            .iter()
            .filter(|message| message.role != ChatRole::System)
            .map(|message| {
                let role = match message.role {
                    ChatRole::Assistant => "assistant",
                    _ => "user",
                };
                serde_json::json!({ "role": role, "content": message.content })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": turns,
        });

        if !system.is_empty() {
            body["system"] = Value::from(system.join("\n\n"));
        }

        if !tools.is_empty() {
            let anthropic_tools: Vec<Value> = tools.iter().map(tool_to_anthropic).collect();
            body["tools"] = Value::from(anthropic_tools);
        }

        body
    }

    async fn post(&self, body: &Value) -> Result<AnthropicResponse, ProviderError> {
        let api_key = match &self.api_key {
            Some(api_key) => api_key.expose_secret().to_string(),
            None if self.base_url.is_some() => String::new(),
            None => {
                return Err(ProviderError::Auth {
                    provider: self.id().to_string(),
                    message: "api key not configured".to_string(),
                })
            }
        };

        let mut request = self
            .client
            .post(self.endpoint())
            .timeout(self.timeout)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body);
        if !api_key.is_empty() {
            request = request.header("x-api-key", api_key);
        }

        let response = request.send().await.map_err(|error| ProviderError::Network {
            provider: self.id().to_string(),
            message: error.to_string(),
        })?;

        let status = response.status().as_u16();
        let body_text = response.text().await.map_err(|error| ProviderError::Network {
            provider: self.id().to_string(),
            message: error.to_string(),
        })?;

        if status != 200 {
            return Err(parse_http_error(self.id(), status, &body_text));
        }

        serde_json::from_str(&body_text).map_err(|error| ProviderError::Malformed {
            provider: self.id().to_string(),
            message: format!("could not parse message response: {error}"),
        })
    }

    fn normalize(&self, response: AnthropicResponse) -> Result<Decision, ProviderError> {
        let mut text_parts = Vec::new();
        for block in response.content {
            match block {
                ContentBlock::ToolUse { name, input } => {
                    let arguments = match input {
                        Value::Object(map) => map,
                        Value::Null => serde_json::Map::new(),
                        other => {
                            return Err(ProviderError::Malformed {
                                provider: self.id().to_string(),
                                message: format!("tool_use input is not an object: {other}"),
                            })
                        }
                    };
                    let preamble = (!text_parts.is_empty()).then(|| text_parts.join("\n"));
                    return Ok(Decision::Tool { call: ToolCall { name, arguments }, preamble });
                }
                ContentBlock::Text { text } => text_parts.push(text),
                ContentBlock::Other => {}
            }
        }

        let text = text_parts.join("\n");
        if text.trim().is_empty() {
            return Err(ProviderError::Malformed {
                provider: self.id().to_string(),
                message: "response carried neither tool_use nor text blocks".to_string(),
            });
        }
        Ok(Decision::Message { text })
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn decide(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<Decision, ProviderError> {
        let body = self.build_request_body(messages, tools);
        let response = self.post(&body).await?;
        self.normalize(response)
    }

    async fn respond(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let body = self.build_request_body(messages, &[]);
        let response = self.post(&body).await?;
        match self.normalize(response)? {
            Decision::Message { text } => Ok(text),
            Decision::Tool { call, .. } => Err(ProviderError::Malformed {
                provider: self.id().to_string(),
                message: format!("unexpected tool_use `{}` in plain completion", call.name),
            }),
        }
    }
}

fn tool_to_anthropic(tool: &ToolSpec) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    ToolUse { name: String, input: Value },
    #[serde(other)]
    Other,
}
