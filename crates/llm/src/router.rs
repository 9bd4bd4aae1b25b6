use std::sync::Arc;

use tracing::{debug, warn};

use crate::fallback::{RuleBasedDecider, FALLBACK_RESULT_TEXT};
use crate::provider::ChatProvider;
use crate::types::{ChatMessage, ProviderError, RoutedDecision, RoutedText, ToolSpec};

/// Identity reported when the deterministic decider answered instead of a
/// model backend.
pub const FALLBACK_PROVIDER_ID: &str = "rules";
pub const FALLBACK_MODEL: &str = "deterministic-v1";

/// Tries backends strictly in configured priority order; never in parallel.
/// Every provider failure is logged and swallowed; the next backend gets
/// the identical prompt, and when the list is exhausted the rule-based
/// decider still produces an answer.
pub struct ProviderRouter {
    providers: Vec<Arc<dyn ChatProvider>>,
    decider: RuleBasedDecider,
}

impl ProviderRouter {
    pub fn new(providers: Vec<Arc<dyn ChatProvider>>) -> Self {
        Self { providers, decider: RuleBasedDecider }
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|provider| format!("{}:{}", provider.id(), provider.model()))
            .collect()
    }

    pub async fn decide(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> RoutedDecision {
        for provider in &self.providers {
            match provider.decide(messages, tools).await {
                Ok(decision) => {
                    debug!(
                        event_name = "provider.decide_ok",
                        provider_id = provider.id(),
                        model = provider.model(),
                        "backend produced a stage-one decision"
                    );
                    return RoutedDecision {
                        decision,
                        provider_id: provider.id().to_string(),
                        model: provider.model().to_string(),
                    };
                }
                Err(error) => self.log_failover("decide", provider.as_ref(), &error),
            }
        }

        RoutedDecision {
            decision: self.decider.decide(messages, tools),
            provider_id: FALLBACK_PROVIDER_ID.to_string(),
            model: FALLBACK_MODEL.to_string(),
        }
    }

    pub async fn respond(&self, messages: &[ChatMessage]) -> RoutedText {
        for provider in &self.providers {
            match provider.respond(messages).await {
                Ok(text) => {
                    debug!(
                        event_name = "provider.respond_ok",
                        provider_id = provider.id(),
                        model = provider.model(),
                        "backend produced a plain completion"
                    );
                    return RoutedText {
                        text,
                        provider_id: provider.id().to_string(),
                        model: provider.model().to_string(),
                    };
                }
                Err(error) => self.log_failover("respond", provider.as_ref(), &error),
            }
        }

        RoutedText {
            text: FALLBACK_RESULT_TEXT.to_string(),
            provider_id: FALLBACK_PROVIDER_ID.to_string(),
            model: FALLBACK_MODEL.to_string(),
        }
    }

    fn log_failover(&self, operation: &str, provider: &dyn ChatProvider, error: &ProviderError) {
        warn!(
            event_name = "provider.failover",
            operation,
            provider_id = provider.id(),
            model = provider.model(),
            error = %error,
            "backend failed, continuing to next provider"
        );
    }
}
