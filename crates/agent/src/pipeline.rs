//! The per-turn state machine:
//! `START -> [rules] -> {GREETING | FORCED_TOOL | STAGE1} -> ACTION_EXEC -> STAGE2`.
//!
//! Every path terminates in a response; provider failures, handler failures,
//! and registry gaps all degrade into honest text. Only two conditions
//! escape as errors: an unknown tenant and a broken default registry.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use concierge_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use concierge_core::catalog::ProductCatalog;
use concierge_core::domain::product::Product;
use concierge_core::errors::ActionError;
use concierge_core::registry::{ActionDescriptor, RegistryError, RegistryLoader};
use concierge_core::session::SessionStore;
use concierge_core::tenant::{TenantConfigLoader, TenantError, TenantProfile};
use concierge_llm::router::ProviderRouter;
use concierge_llm::types::{ChatMessage, Decision, ToolCall, ToolSpec};
use concierge_llm::{FALLBACK_MODEL, FALLBACK_PROVIDER_ID};

use crate::actions::{run_action, ActionContext, AdapterBindings};
use crate::grounding;
use crate::rules::{self, PreModelRoute};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TurnRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<HistoryTurn>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnResponse {
    Message {
        session_id: String,
        text: String,
        provider: String,
        model: String,
    },
    ToolResult {
        session_id: String,
        action: String,
        params: Map<String, Value>,
        tool_result: Value,
        grounded_text: String,
        provider: String,
        model: String,
    },
}

impl TurnResponse {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Message { session_id, .. } | Self::ToolResult { session_id, .. } => session_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown tenant `{0}`")]
    UnknownTenant(String),
    #[error("tenant profile unavailable: {0}")]
    Tenant(TenantError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub struct Orchestrator {
    router: ProviderRouter,
    bindings: AdapterBindings,
    registry_loader: Arc<dyn RegistryLoader>,
    tenant_loader: Arc<dyn TenantConfigLoader>,
    catalog: Arc<dyn ProductCatalog>,
    sessions: Arc<SessionStore>,
    audit: Arc<dyn AuditSink>,
}

impl Orchestrator {
    pub fn new(
        router: ProviderRouter,
        bindings: AdapterBindings,
        registry_loader: Arc<dyn RegistryLoader>,
        tenant_loader: Arc<dyn TenantConfigLoader>,
        catalog: Arc<dyn ProductCatalog>,
        sessions: Arc<SessionStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { router, bindings, registry_loader, tenant_loader, catalog, sessions, audit }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Configured backend identities in failover order, for health output.
    pub fn provider_ids(&self) -> Vec<String> {
        self.router.provider_ids()
    }

    pub async fn handle(&self, request: TurnRequest) -> Result<TurnResponse, PipelineError> {
        let correlation_id = Uuid::new_v4().to_string();
        let profile = self.tenant_loader.load(&request.tenant_id).map_err(|error| match error {
            TenantError::NotFound(tenant) => PipelineError::UnknownTenant(tenant),
            other => PipelineError::Tenant(other),
        })?;
        let session_id =
            request.session_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let audit_ctx = AuditContext::new(
            request.tenant_id.clone(),
            Some(session_id.clone()),
            correlation_id.clone(),
            "pipeline",
        );

        self.record(
            AuditEvent::new(&audit_ctx, "turn.received", AuditCategory::Ingress, AuditOutcome::Success)
                .with_metadata("message_chars", request.message.len().to_string()),
        );

        // Loaded once per turn, immutable afterwards.
        let registry = self.registry_loader.load(&request.tenant_id)?;
        if let Some(reason) = &registry.meta.tenant_fallback_reason {
            warn!(
                event_name = "registry.tenant_fallback",
                tenant_id = %request.tenant_id,
                correlation_id = %correlation_id,
                reason = %reason,
                "serving default registry instead of tenant registry"
            );
        }
        let enabled: BTreeSet<String> =
            registry.enabled().map(|descriptor| descriptor.name.clone()).collect();

        // Deterministic layers first: the rule list both short-circuits
        // greetings and force-routes unambiguous intents.
        let (call, stage1_preamble, stage1_provider, stage1_model) =
            match rules::evaluate(&request.message, &enabled) {
                Some(PreModelRoute::Greeting) => {
                    self.record(AuditEvent::new(
                        &audit_ctx,
                        "routing.greeting",
                        AuditCategory::Routing,
                        AuditOutcome::Success,
                    ));
                    return Ok(TurnResponse::Message {
                        session_id,
                        text: rules::greeting_text(&profile.display_name),
                        provider: FALLBACK_PROVIDER_ID.to_string(),
                        model: FALLBACK_MODEL.to_string(),
                    });
                }
                Some(PreModelRoute::Forced { rule, call }) => {
                    self.record(
                        AuditEvent::new(
                            &audit_ctx,
                            "routing.forced_route",
                            AuditCategory::Routing,
                            AuditOutcome::Success,
                        )
                        .with_metadata("rule", rule)
                        .with_metadata("action", call.name.clone()),
                    );
                    (call, None, FALLBACK_PROVIDER_ID.to_string(), FALLBACK_MODEL.to_string())
                }
                None => {
                    let messages = self.stage1_messages(&profile, &request, &session_id);
                    let tool_specs: Vec<ToolSpec> =
                        registry.enabled().map(tool_spec_for).collect();
                    let routed = self.router.decide(&messages, &tool_specs).await;
                    self.record(
                        AuditEvent::new(
                            &audit_ctx,
                            "routing.stage1",
                            AuditCategory::Provider,
                            AuditOutcome::Success,
                        )
                        .with_metadata("provider", routed.provider_id.clone())
                        .with_metadata("model", routed.model.clone()),
                    );

                    match routed.decision {
                        Decision::Tool { call, preamble } => {
                            (call, preamble, routed.provider_id, routed.model)
                        }
                        Decision::Message { text } => {
                            match self.style_override(&request, &session_id, &enabled) {
                                Some(call) => {
                                    self.record(
                                        AuditEvent::new(
                                            &audit_ctx,
                                            "routing.style_override",
                                            AuditCategory::Routing,
                                            AuditOutcome::Success,
                                        )
                                        .with_metadata("action", call.name.clone()),
                                    );
                                    (call, Some(text), routed.provider_id, routed.model)
                                }
                                None => {
                                    return Ok(TurnResponse::Message {
                                        session_id,
                                        text,
                                        provider: routed.provider_id,
                                        model: routed.model,
                                    });
                                }
                            }
                        }
                    }
                }
            };

        // ACTION_EXEC
        let action_ctx = ActionContext {
            tenant_id: request.tenant_id.clone(),
            session_id: session_id.clone(),
            catalog: Arc::clone(&self.catalog),
            sessions: Arc::clone(&self.sessions),
        };
        let outcome = match run_action(&self.bindings, &registry, &call, &action_ctx).await {
            Ok(outcome) => outcome,
            Err(error) => {
                self.record(
                    AuditEvent::new(
                        &audit_ctx,
                        "action.failed",
                        AuditCategory::Action,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("action", call.name.clone())
                    .with_metadata("error", error.to_string()),
                );
                return Ok(self.honest_failure(
                    session_id,
                    stage1_preamble,
                    &error,
                    stage1_provider,
                    stage1_model,
                ));
            }
        };
        self.record(
            AuditEvent::new(&audit_ctx, "action.completed", AuditCategory::Action, AuditOutcome::Success)
                .with_metadata("action", outcome.action.clone())
                .with_metadata("handler", outcome.handler.clone())
                .with_metadata("source", format!("{:?}", outcome.source))
                .with_metadata("duration_ms", outcome.duration_ms.to_string()),
        );

        // Session update: remember what was shown, fold preferences. Cart
        // and order writes already happened inside the handler.
        if let Some(items) = result_products(&outcome.result) {
            let matched_ids = items.iter().map(|product| product.id.clone()).collect();
            self.sessions.save_results(
                &request.tenant_id,
                &session_id,
                items.clone(),
                matched_ids,
            );
            self.sessions.update_profile(&request.tenant_id, &session_id, &items);
        }

        // STAGE2: phrase the literal result, then enforce grounding.
        let preference_hint = self
            .sessions
            .snapshot(&request.tenant_id, &session_id)
            .preference_profile
            .summary();
        let stage2_messages = grounding::build_stage2_messages(
            &profile.display_name,
            preference_hint.as_deref(),
            &outcome.action,
            &outcome.result,
        );
        let routed_text = self.router.respond(&stage2_messages).await;

        let names = grounding::result_item_names(&outcome.result);
        let (grounded_text, appended) = grounding::enforce(&routed_text.text, &names);
        if appended {
            self.record(
                AuditEvent::new(
                    &audit_ctx,
                    "stage2.grounding_appended",
                    AuditCategory::Action,
                    AuditOutcome::Success,
                )
                .with_metadata("action", outcome.action.clone())
                .with_metadata("item_count", names.len().to_string()),
            );
        }

        Ok(TurnResponse::ToolResult {
            session_id,
            action: outcome.action,
            params: call.arguments,
            tool_result: outcome.result,
            grounded_text,
            provider: routed_text.provider_id,
            model: routed_text.model,
        })
    }

    fn stage1_messages(
        &self,
        profile: &TenantProfile,
        request: &TurnRequest,
        session_id: &str,
    ) -> Vec<ChatMessage> {
        let mut system = format!(
            "You are the shopping assistant for {}. Decide whether to call one of the \
             available tools or answer directly. Prefer a tool whenever the shopper asks \
             about products, recommendations, comparisons, their cart, or an order.",
            profile.display_name
        );
        let hint = self
            .sessions
            .snapshot(&request.tenant_id, session_id)
            .preference_profile
            .summary();
        if let Some(hint) = hint {
            system.push_str(&format!(" The shopper has shown interest in: {hint}."));
        }

        let mut messages = vec![ChatMessage::system(system)];
        for turn in &request.conversation_history {
            let message = match turn.role.as_str() {
                "assistant" => ChatMessage::assistant(&turn.content),
                "system" => ChatMessage::system(&turn.content),
                _ => ChatMessage::user(&turn.content),
            };
            messages.push(message);
        }
        messages.push(ChatMessage::user(&request.message));
        messages
    }

    /// The model answered in prose, but the turn reads like the shopper is
    /// steering the previous result set. Synthesize a recommendation call:
    /// a documented, intentional override of the model's own decision.
    fn style_override(
        &self,
        request: &TurnRequest,
        session_id: &str,
        enabled: &BTreeSet<String>,
    ) -> Option<ToolCall> {
        if !enabled.contains("recommend") || !rules::is_style_adjustment(&request.message) {
            return None;
        }
        let snapshot = self.sessions.snapshot(&request.tenant_id, session_id);
        if snapshot.last_products.is_empty() {
            return None;
        }
        Some(
            ToolCall::new("recommend")
                .with_arg("query", Value::from(request.message.trim()))
                .with_arg("adjustment", Value::from(true)),
        )
    }

    fn honest_failure(
        &self,
        session_id: String,
        stage1_preamble: Option<String>,
        error: &ActionError,
        provider: String,
        model: String,
    ) -> TurnResponse {
        let note = error.user_message();
        let text = match stage1_preamble {
            Some(preamble) if !preamble.trim().is_empty() => format!("{} {note}", preamble.trim()),
            _ => note.to_string(),
        };
        TurnResponse::Message { session_id, text, provider, model }
    }

    fn record(&self, event: AuditEvent) {
        self.audit.record(event);
    }
}

/// Build the wire tool definition for one registry entry. Known commerce
/// actions get informative parameter schemas; anything else is advertised
/// with an open object so a tenant can register custom actions without
/// touching this crate.
fn tool_spec_for(descriptor: &ActionDescriptor) -> ToolSpec {
    let parameters = match descriptor.name.as_str() {
        "search" => json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Free-text product query"},
                "max_price": {"type": "number", "description": "Upper price bound"},
                "category": {"type": "string", "description": "Catalog category filter"}
            }
        }),
        "recommend" => json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What the shopper is after"}
            }
        }),
        "compare" => json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Sentence naming the products to compare"},
                "items": {"type": "array", "items": {"type": "string"}, "description": "Exact product names"}
            }
        }),
        "outfit" | "add_outfit" => json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Occasion, style, or color constraints"}
            }
        }),
        "add_to_cart" => json!({
            "type": "object",
            "properties": {
                "product_id": {"type": "string"},
                "query": {"type": "string", "description": "Product name if the id is unknown"},
                "quantity": {"type": "integer", "minimum": 1}
            }
        }),
        "remove_from_cart" => json!({
            "type": "object",
            "properties": {
                "product_id": {"type": "string"},
                "query": {"type": "string"}
            }
        }),
        "view_cart" | "checkout" => json!({"type": "object", "properties": {}}),
        "order_status" => json!({
            "type": "object",
            "properties": {
                "order_id": {"type": "string", "description": "Defaults to the most recent order"}
            }
        }),
        _ => json!({"type": "object", "additionalProperties": true}),
    };

    ToolSpec {
        name: descriptor.name.clone(),
        description: descriptor.description.clone(),
        parameters,
    }
}

/// Items arrays produced by the handlers deserialize straight back into
/// products; cart- and order-shaped results do not and return None.
fn result_products(result: &Value) -> Option<Vec<Product>> {
    let items = result.get("items")?.clone();
    let products: Vec<Product> = serde_json::from_value(items).ok()?;
    (!products.is_empty()).then_some(products)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use concierge_core::audit::InMemoryAuditSink;
    use concierge_core::catalog::InMemoryCatalog;
    use concierge_core::registry::{ActionDescriptor, StaticRegistryLoader};
    use concierge_core::session::SessionStore;
    use concierge_core::tenant::{StaticTenantLoader, TenantProfile};
    use concierge_llm::provider::ChatProvider;
    use concierge_llm::router::ProviderRouter;
    use concierge_llm::types::{ChatMessage, Decision, ProviderError, ToolSpec};

    use crate::actions::AdapterBindings;
    use crate::handlers;

    use super::{Orchestrator, PipelineError, TurnRequest, TurnResponse};

    fn descriptors() -> Vec<ActionDescriptor> {
        [
            ("search", "commerce.search", "Search the product catalog"),
            ("recommend", "commerce.recommend", "Recommend products for this shopper"),
            ("compare", "commerce.compare", "Compare two or more products"),
            ("outfit", "commerce.outfit", "Assemble an outfit"),
            ("add_outfit", "commerce.add_outfit", "Assemble an outfit and add it to the cart"),
            ("add_to_cart", "commerce.add_to_cart", "Add a product to the cart"),
            ("remove_from_cart", "commerce.remove_from_cart", "Remove a product from the cart"),
            ("view_cart", "commerce.view_cart", "Show the cart"),
            ("checkout", "commerce.checkout", "Convert the cart into an order"),
            ("order_status", "commerce.order_status", "Look up an order"),
        ]
        .into_iter()
        .map(|(name, handler, description)| ActionDescriptor {
            name: name.to_string(),
            enabled: true,
            handler: handler.to_string(),
            description: description.to_string(),
        })
        .collect()
    }

    struct Fixture {
        orchestrator: Orchestrator,
        audit: InMemoryAuditSink,
        sessions: Arc<SessionStore>,
    }

    fn fixture_with_providers(
        providers: Vec<Arc<dyn ChatProvider>>,
    ) -> Fixture {
        let audit = InMemoryAuditSink::default();
        let sessions = Arc::new(SessionStore::new());
        let mut bindings = AdapterBindings::new();
        handlers::bind_defaults(&mut bindings);

        let tenant_loader = StaticTenantLoader::default().with_tenant(TenantProfile {
            tenant_id: "acme".to_string(),
            display_name: "Acme Outfitters".to_string(),
            brand_color: "#e03c31".to_string(),
            features: vec![],
            api_gateway: None,
        });

        let orchestrator = Orchestrator::new(
            ProviderRouter::new(providers),
            bindings,
            Arc::new(StaticRegistryLoader::new(descriptors())),
            Arc::new(tenant_loader),
            Arc::new(InMemoryCatalog::demo()),
            Arc::clone(&sessions),
            Arc::new(audit.clone()),
        );
        Fixture { orchestrator, audit, sessions }
    }

    fn fixture() -> Fixture {
        fixture_with_providers(vec![])
    }

    fn request(message: &str) -> TurnRequest {
        TurnRequest {
            tenant_id: "acme".to_string(),
            session_id: Some("sess-1".to_string()),
            message: message.to_string(),
            conversation_history: vec![],
        }
    }

    #[tokio::test]
    async fn price_bounded_search_bypasses_stage_one() {
        let fixture = fixture();
        let response =
            fixture.orchestrator.handle(request("sneakers under $100")).await.expect("turn");

        match response {
            TurnResponse::ToolResult { action, params, tool_result, grounded_text, .. } => {
                assert_eq!(action, "search");
                assert_eq!(params.get("max_price"), Some(&json!(100.0)));
                assert!(!tool_result["items"].as_array().expect("items").is_empty());
                // Grounding: at least two catalog names verbatim.
                assert!(grounded_text.contains("Aero Glide 90"));
                assert!(grounded_text.contains("Court Classic Low"));
            }
            TurnResponse::Message { .. } => panic!("expected tool result"),
        }

        let events = fixture.audit.events();
        assert!(events.iter().any(|event| event.event_type == "routing.forced_route"));
        // Stage 1 was never consulted.
        assert!(!events.iter().any(|event| event.event_type == "routing.stage1"));
    }

    #[tokio::test]
    async fn greeting_short_circuits_without_state_mutation() {
        let fixture = fixture();
        let response = fixture.orchestrator.handle(request("hello")).await.expect("turn");

        match response {
            TurnResponse::Message { text, provider, .. } => {
                assert!(text.contains("Acme Outfitters"));
                assert_eq!(provider, "rules");
            }
            TurnResponse::ToolResult { .. } => panic!("greeting must not call tools"),
        }
        assert!(fixture.sessions.is_empty(), "greeting must not touch the session store");
        assert!(fixture
            .audit
            .events()
            .iter()
            .any(|event| event.event_type == "routing.greeting"));
    }

    #[tokio::test]
    async fn explicit_comparison_returns_both_items() {
        let fixture = fixture();
        let response = fixture
            .orchestrator
            .handle(request("compare Aero Glide 90 and Court Classic Low"))
            .await
            .expect("turn");

        match response {
            TurnResponse::ToolResult { action, tool_result, .. } => {
                assert_eq!(action, "compare");
                assert_eq!(tool_result["items"].as_array().expect("items").len(), 2);
            }
            TurnResponse::Message { .. } => panic!("expected tool result"),
        }
    }

    #[tokio::test]
    async fn cart_to_order_flow_keeps_totals_and_clears_cart() {
        let fixture = fixture();

        fixture
            .orchestrator
            .handle(request("add Aero Glide 90 to my cart"))
            .await
            .expect("add one");
        fixture
            .orchestrator
            .handle(request("add Court Classic Low to my cart please"))
            .await
            .expect("add two");

        let response =
            fixture.orchestrator.handle(request("checkout please")).await.expect("checkout");
        match response {
            TurnResponse::ToolResult { action, tool_result, .. } => {
                assert_eq!(action, "checkout");
                assert_eq!(tool_result["order"]["total_amount"], "164.98");
            }
            TurnResponse::Message { text, .. } => panic!("expected order, got message: {text}"),
        }

        let context = fixture.sessions.snapshot("acme", "sess-1");
        assert!(context.cart.is_empty());
        assert_eq!(context.orders.len(), 1);
    }

    #[tokio::test]
    async fn failed_action_is_reported_honestly() {
        let fixture = fixture();
        let response = fixture
            .orchestrator
            .handle(request("compare Aero Glide 90 and Unicorn Boots"))
            .await
            .expect("turn");

        match response {
            TurnResponse::Message { text, .. } => {
                assert!(text.contains("ran into a problem"));
            }
            TurnResponse::ToolResult { .. } => panic!("failed action must not claim success"),
        }
        assert!(fixture
            .audit
            .events()
            .iter()
            .any(|event| event.event_type == "action.failed"));
    }

    #[tokio::test]
    async fn unknown_tenant_is_rejected() {
        let fixture = fixture();
        let error = fixture
            .orchestrator
            .handle(TurnRequest {
                tenant_id: "nobody".to_string(),
                session_id: None,
                message: "hi".to_string(),
                conversation_history: vec![],
            })
            .await
            .expect_err("unknown tenant");
        assert!(matches!(error, PipelineError::UnknownTenant(tenant) if tenant == "nobody"));
    }

    #[tokio::test]
    async fn missing_session_id_is_minted_and_echoed() {
        let fixture = fixture();
        let response = fixture
            .orchestrator
            .handle(TurnRequest {
                tenant_id: "acme".to_string(),
                session_id: None,
                message: "hello".to_string(),
                conversation_history: vec![],
            })
            .await
            .expect("turn");
        assert!(!response.session_id().is_empty());
    }

    struct ProseProvider;

    #[async_trait]
    impl ChatProvider for ProseProvider {
        fn id(&self) -> &str {
            "prose"
        }

        fn model(&self) -> &str {
            "prose-model"
        }

        async fn decide(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> Result<Decision, ProviderError> {
            Ok(Decision::Message { text: "Sure, happy to chat about styles.".to_string() })
        }

        async fn respond(&self, _messages: &[ChatMessage]) -> Result<String, ProviderError> {
            Ok("Based on those items, here are close matches.".to_string())
        }
    }

    #[tokio::test]
    async fn style_adjustment_overrides_a_prose_decision() {
        let fixture = fixture_with_providers(vec![Arc::new(ProseProvider)]);

        // Seed the session with previously shown products.
        let shown: Vec<_> = concierge_core::catalog::demo_products().into_iter().take(3).collect();
        let ids = shown.iter().map(|product| product.id.clone()).collect();
        fixture.sessions.save_results("acme", "sess-1", shown, ids);

        let response = fixture
            .orchestrator
            .handle(request("hmm, something cheaper maybe?"))
            .await
            .expect("turn");

        match response {
            TurnResponse::ToolResult { action, .. } => assert_eq!(action, "recommend"),
            TurnResponse::Message { text, .. } => {
                panic!("style adjustment should force a recommendation, got: {text}")
            }
        }
        assert!(fixture
            .audit
            .events()
            .iter()
            .any(|event| event.event_type == "routing.style_override"));
    }

    #[tokio::test]
    async fn prose_without_style_signal_stays_prose() {
        let fixture = fixture_with_providers(vec![Arc::new(ProseProvider)]);
        let response = fixture
            .orchestrator
            .handle(request("tell me about your return policy"))
            .await
            .expect("turn");

        match response {
            TurnResponse::Message { provider, .. } => assert_eq!(provider, "prose"),
            TurnResponse::ToolResult { .. } => panic!("expected prose answer"),
        }
    }
}
