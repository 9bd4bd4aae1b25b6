//! Provider router: N interchangeable model backends behind one interface.
//!
//! Each backend speaks its own native tool-calling dialect; this crate
//! translates the internal [`ToolSpec`] list into that dialect, normalizes
//! the native response into one [`ToolCall`] shape, and fails over through
//! the configured priority order. A deterministic rule-based decider backs
//! the whole stack so a decision is always produced.

pub mod anthropic;
pub mod fallback;
pub mod openai;
pub mod provider;
pub mod router;
pub mod scan;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use fallback::{RuleBasedDecider, FALLBACK_RESULT_TEXT, FALLBACK_TEXT};
pub use openai::OpenAiProvider;
pub use provider::ChatProvider;
pub use router::{ProviderRouter, FALLBACK_MODEL, FALLBACK_PROVIDER_ID};
pub use types::{
    ChatMessage, ChatRole, Decision, ProviderError, RoutedDecision, RoutedText, ToolCall, ToolSpec,
};
