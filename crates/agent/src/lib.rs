//! Orchestration pipeline for the conversational commerce assistant.
//!
//! A turn flows through four layers:
//! 1. **Rules** (`rules`): deterministic pre-model routing. Greetings
//!    short-circuit, unambiguous intents bypass the model entirely.
//! 2. **Stage 1**: the provider router decides "tool or text" using the
//!    tenant's enabled action set as tool definitions.
//! 3. **Action execution** (`actions`, `handlers`): registry-validated
//!    dispatch to a tenant-specific or generic handler.
//! 4. **Stage 2** (`grounding`): the response is phrased from the literal
//!    action result and checked against it.
//!
//! The model never touches prices, carts, or orders directly; handlers own
//! every state mutation and the registry decides what is callable at all.

pub mod actions;
pub mod grounding;
pub mod handlers;
pub mod pipeline;
pub mod rules;

pub use actions::{
    run_action, ActionContext, ActionHandler, ActionOutcome, AdapterBindings, AdapterResolution,
    AdapterSource,
};
pub use pipeline::{
    HistoryTurn, Orchestrator, PipelineError, TurnRequest, TurnResponse,
};
pub use rules::PreModelRoute;
