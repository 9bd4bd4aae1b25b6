use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

use crate::provider::{parse_http_error, ChatProvider};
use crate::types::{ChatMessage, ChatRole, Decision, ProviderError, ToolCall, ToolSpec};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-format backend. Also covers OpenAI-compatible endpoints (local
/// gateways, proxies) via `base_url`.
pub struct OpenAiProvider {
    client: reqwest::Client,
    model: String,
    api_key: Option<SecretString>,
    base_url: Option<String>,
    timeout: Duration,
}

impl OpenAiProvider {
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
            Some(base) => format!("{}/chat/completions", base.trim_end_matches('/')),
            None => OPENAI_API_URL.to_string(),
        }
    }

    fn build_request_body(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Value {
        let openai_messages: Vec<Value> =
            messages.iter().map(|message| message_to_openai(message)).collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": openai_messages,
        });

        if !tools.is_empty() {
            let openai_tools: Vec<Value> = tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::from(openai_tools);
            body["tool_choice"] = Value::from("auto");
        }

        body
    }

    async fn post(&self, body: &Value) -> Result<OpenAiResponse, ProviderError> {
        let mut request = self.client.post(self.endpoint()).timeout(self.timeout).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
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
            message: format!("could not parse chat completion: {error}"),
        })
    }

    fn normalize(&self, response: OpenAiResponse) -> Result<Decision, ProviderError> {
        let message = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .ok_or_else(|| ProviderError::Malformed {
                provider: self.id().to_string(),
                message: "response carried no choices".to_string(),
            })?;

        if let Some(call) = message.tool_calls.unwrap_or_default().into_iter().next() {
            let arguments: Value = serde_json::from_str(&call.function.arguments)
                .map_err(|error| ProviderError::Malformed {
                    provider: self.id().to_string(),
                    message: format!("tool arguments are not valid JSON: {error}"),
                })?;
            let arguments = match arguments {
                Value::Object(map) => map,
                Value::Null => serde_json::Map::new(),
                other => {
                    return Err(ProviderError::Malformed {
                        provider: self.id().to_string(),
                        message: format!("tool arguments are not an object: {other}"),
                    })
                }
            };
            let preamble = message.content.filter(|text| !text.trim().is_empty());
            return Ok(Decision::Tool {
                call: ToolCall { name: call.function.name, arguments },
                preamble,
            });
        }

        match message.content {
            Some(text) if !text.trim().is_empty() => Ok(Decision::Message { text }),
            _ => Err(ProviderError::Malformed {
                provider: self.id().to_string(),
                message: "response carried neither tool calls nor text".to_string(),
            }),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn id(&self) -> &str {
        "openai"
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
                message: format!("unexpected tool call `{}` in plain completion", call.name),
            }),
        }
    }
}

fn message_to_openai(message: &ChatMessage) -> Value {
    let role = match message.role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    };
    serde_json::json!({ "role": role, "content": message.content })
}

fn tool_to_openai(tool: &ToolSpec) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    function: OpenAiFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunction {
    name: String,
    arguments: String,
}
