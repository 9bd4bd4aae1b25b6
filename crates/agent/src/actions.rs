use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use concierge_core::catalog::ProductCatalog;
use concierge_core::errors::ActionError;
use concierge_core::registry::{HandlerRef, LoadedRegistry};
use concierge_core::session::SessionStore;
use concierge_llm::types::ToolCall;

/// Everything a handler may touch. Handlers never reach around this context;
/// that keeps them swappable per tenant.
#[derive(Clone)]
pub struct ActionContext {
    pub tenant_id: String,
    pub session_id: String,
    pub catalog: Arc<dyn ProductCatalog>,
    pub sessions: Arc<SessionStore>,
}

/// A concrete implementation of one `namespace.function`. Arguments arrive
/// untyped; the handler owns validation.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn call(
        &self,
        ctx: &ActionContext,
        arguments: &Map<String, Value>,
    ) -> anyhow::Result<Value>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterSource {
    TenantSpecific,
    Generic,
}

pub struct AdapterResolution {
    pub handler: Arc<dyn ActionHandler>,
    pub source: AdapterSource,
}

/// Startup-registered implementation map. Tenant bindings shadow generic
/// ones at function granularity: a tenant overrides exactly the functions it
/// needs and inherits the rest.
#[derive(Default)]
pub struct AdapterBindings {
    generic: HashMap<(String, String), Arc<dyn ActionHandler>>,
    tenant: HashMap<(String, String, String), Arc<dyn ActionHandler>>,
}

impl AdapterBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_generic(
        &mut self,
        namespace: impl Into<String>,
        function: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) {
        self.generic.insert((namespace.into(), function.into()), handler);
    }

    pub fn bind_tenant(
        &mut self,
        tenant_id: impl Into<String>,
        namespace: impl Into<String>,
        function: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) {
        self.tenant.insert((tenant_id.into(), namespace.into(), function.into()), handler);
    }

    /// Tenant binding first, generic second, resolved fresh per call.
    pub fn resolve(
        &self,
        tenant_id: &str,
        handler_ref: &HandlerRef,
    ) -> Result<AdapterResolution, ActionError> {
        let tenant_key = (
            tenant_id.to_string(),
            handler_ref.namespace.clone(),
            handler_ref.function.clone(),
        );
        if let Some(handler) = self.tenant.get(&tenant_key) {
            return Ok(AdapterResolution {
                handler: Arc::clone(handler),
                source: AdapterSource::TenantSpecific,
            });
        }

        let generic_key = (handler_ref.namespace.clone(), handler_ref.function.clone());
        if let Some(handler) = self.generic.get(&generic_key) {
            return Ok(AdapterResolution {
                handler: Arc::clone(handler),
                source: AdapterSource::Generic,
            });
        }

        Err(ActionError::FunctionNotFound {
            namespace: handler_ref.namespace.clone(),
            function: handler_ref.function.clone(),
        })
    }
}

/// Execution envelope around the raw handler result.
#[derive(Clone, Debug, Serialize)]
pub struct ActionOutcome {
    pub action: String,
    pub handler: String,
    pub source: AdapterSource,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub result: Value,
}

/// Validate, resolve, and invoke one tool call against the loaded registry.
/// Handler failures are rethrown with action context attached, never
/// swallowed.
pub async fn run_action(
    bindings: &AdapterBindings,
    registry: &LoadedRegistry,
    call: &ToolCall,
    ctx: &ActionContext,
) -> Result<ActionOutcome, ActionError> {
    let descriptor = registry
        .get(&call.name)
        .ok_or_else(|| ActionError::NotFound { action: call.name.clone() })?;

    if !descriptor.enabled {
        return Err(ActionError::Disabled { action: call.name.clone() });
    }

    let handler_ref = HandlerRef::parse(&descriptor.handler).map_err(|_| {
        ActionError::InvalidHandler {
            action: call.name.clone(),
            handler: descriptor.handler.clone(),
        }
    })?;

    let resolution = bindings.resolve(&ctx.tenant_id, &handler_ref)?;

    let started = Instant::now();
    let result =
        resolution.handler.call(ctx, &call.arguments).await.map_err(|error| {
            ActionError::Execution {
                action: call.name.clone(),
                handler: descriptor.handler.clone(),
                message: error.to_string(),
            }
        })?;

    Ok(ActionOutcome {
        action: call.name.clone(),
        handler: descriptor.handler.clone(),
        source: resolution.source,
        duration_ms: started.elapsed().as_millis() as u64,
        timestamp: Utc::now(),
        result,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    use concierge_core::catalog::InMemoryCatalog;
    use concierge_core::errors::ActionError;
    use concierge_core::registry::{ActionDescriptor, HandlerRef, RegistryLoader, StaticRegistryLoader};
    use concierge_core::session::SessionStore;
    use concierge_llm::types::ToolCall;

    use super::{run_action, ActionContext, ActionHandler, AdapterBindings, AdapterSource};

    struct EchoHandler {
        label: &'static str,
    }

    #[async_trait]
    impl ActionHandler for EchoHandler {
        async fn call(
            &self,
            _ctx: &ActionContext,
            arguments: &Map<String, Value>,
        ) -> anyhow::Result<Value> {
            Ok(json!({ "label": self.label, "echo": Value::Object(arguments.clone()) }))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl ActionHandler for FailingHandler {
        async fn call(
            &self,
            _ctx: &ActionContext,
            _arguments: &Map<String, Value>,
        ) -> anyhow::Result<Value> {
            anyhow::bail!("catalog backend unreachable")
        }
    }

    fn context() -> ActionContext {
        ActionContext {
            tenant_id: "acme".to_string(),
            session_id: "sess-1".to_string(),
            catalog: Arc::new(InMemoryCatalog::demo()),
            sessions: Arc::new(SessionStore::new()),
        }
    }

    fn descriptor(name: &str, enabled: bool, handler: &str) -> ActionDescriptor {
        ActionDescriptor {
            name: name.to_string(),
            enabled,
            handler: handler.to_string(),
            description: format!("{name} action"),
        }
    }

    fn registry(actions: Vec<ActionDescriptor>) -> concierge_core::registry::LoadedRegistry {
        StaticRegistryLoader::new(actions).load("acme").expect("static load")
    }

    #[test]
    fn tenant_binding_shadows_generic_at_function_granularity() {
        let mut bindings = AdapterBindings::new();
        bindings.bind_generic("commerce", "search", Arc::new(EchoHandler { label: "generic" }));
        bindings.bind_generic("commerce", "recommend", Arc::new(EchoHandler { label: "generic" }));
        bindings.bind_tenant("acme", "commerce", "search", Arc::new(EchoHandler { label: "acme" }));

        let search = HandlerRef::parse("commerce.search").expect("ref");
        let recommend = HandlerRef::parse("commerce.recommend").expect("ref");

        let resolved = bindings.resolve("acme", &search).expect("resolve");
        assert_eq!(resolved.source, AdapterSource::TenantSpecific);

        // Same tenant, unoverridden function: inherits the generic binding.
        let resolved = bindings.resolve("acme", &recommend).expect("resolve");
        assert_eq!(resolved.source, AdapterSource::Generic);

        // Other tenants never see acme's override.
        let resolved = bindings.resolve("globex", &search).expect("resolve");
        assert_eq!(resolved.source, AdapterSource::Generic);
    }

    #[test]
    fn unbound_function_is_a_deployment_defect() {
        let bindings = AdapterBindings::new();
        let missing = HandlerRef::parse("commerce.search").expect("ref");
        let error = bindings.resolve("acme", &missing).expect_err("must fail");
        assert!(matches!(error, ActionError::FunctionNotFound { .. }));
    }

    #[tokio::test]
    async fn run_action_validates_before_invoking() {
        let mut bindings = AdapterBindings::new();
        bindings.bind_generic("commerce", "search", Arc::new(EchoHandler { label: "generic" }));
        let registry = registry(vec![
            descriptor("search", true, "commerce.search"),
            descriptor("checkout", false, "commerce.checkout"),
            descriptor("broken", true, "not-a-handler"),
        ]);
        let ctx = context();

        let error = run_action(&bindings, &registry, &ToolCall::new("unknown"), &ctx)
            .await
            .expect_err("unknown action");
        assert!(matches!(error, ActionError::NotFound { .. }));

        let error = run_action(&bindings, &registry, &ToolCall::new("checkout"), &ctx)
            .await
            .expect_err("disabled action");
        assert!(matches!(error, ActionError::Disabled { .. }));

        let error = run_action(&bindings, &registry, &ToolCall::new("broken"), &ctx)
            .await
            .expect_err("malformed handler");
        assert!(matches!(error, ActionError::InvalidHandler { .. }));
    }

    #[tokio::test]
    async fn handler_failures_carry_action_context() {
        let mut bindings = AdapterBindings::new();
        bindings.bind_generic("commerce", "search", Arc::new(FailingHandler));
        let registry = registry(vec![descriptor("search", true, "commerce.search")]);

        let error = run_action(&bindings, &registry, &ToolCall::new("search"), &context())
            .await
            .expect_err("handler failure");

        match error {
            ActionError::Execution { action, handler, message } => {
                assert_eq!(action, "search");
                assert_eq!(handler, "commerce.search");
                assert!(message.contains("unreachable"));
            }
            other => panic!("expected execution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pure_handlers_are_idempotent_modulo_envelope() {
        let mut bindings = AdapterBindings::new();
        bindings.bind_generic("commerce", "search", Arc::new(EchoHandler { label: "generic" }));
        let registry = registry(vec![descriptor("search", true, "commerce.search")]);
        let ctx = context();
        let call = ToolCall::new("search").with_arg("query", json!("boots"));

        let first = run_action(&bindings, &registry, &call, &ctx).await.expect("first run");
        let second = run_action(&bindings, &registry, &call, &ctx).await.expect("second run");

        assert_eq!(first.result, second.result);
        assert_eq!(first.action, second.action);
        assert_eq!(first.handler, second.handler);
        // timestamp and duration_ms are allowed to differ
    }
}
