use async_trait::async_trait;

use crate::types::{ChatMessage, Decision, ProviderError, ToolSpec};

/// One interchangeable model backend. `decide` drives Stage 1 (tool or
/// text); `respond` is the plain variant that drives Stage 2 and skips tool
/// schema translation entirely. Neither call has side effects beyond the
/// outbound request, so the router may freely resend the same prompt to the
/// next backend on failure.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stable identifier reported in responses, e.g. `openai`.
    fn id(&self) -> &str;

    fn model(&self) -> &str;

    async fn decide(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<Decision, ProviderError>;

    async fn respond(&self, messages: &[ChatMessage]) -> Result<String, ProviderError>;
}

/// Map an HTTP status to the provider error taxonomy. Anything non-2xx ends
/// up here; the router treats every variant the same way (skip to the next
/// backend) but the distinction matters for operators reading the audit
/// trail.
pub fn parse_http_error(provider: &str, status: u16, body: &str) -> ProviderError {
    let provider = provider.to_string();
    let message = truncate(body, 300);
    match status {
        401 | 403 => ProviderError::Auth { provider, message },
        429 => ProviderError::RateLimited { provider, message },
        400 | 404 | 422 => ProviderError::InvalidRequest { provider, message },
        500..=599 => ProviderError::Server { provider, status, message },
        _ => ProviderError::Network {
            provider,
            message: format!("unexpected status {status}: {message}"),
        },
    }
}

fn truncate(body: &str, limit: usize) -> String {
    if body.len() <= limit {
        return body.to_string();
    }
    let mut cut = limit;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &body[..cut])
}
