use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use concierge_agent::handlers;
use concierge_agent::{AdapterBindings, Orchestrator};
use concierge_core::audit::{AuditEvent, AuditSink};
use concierge_core::catalog::InMemoryCatalog;
use concierge_core::config::{AppConfig, ConfigError, LoadOptions, ProviderKind};
use concierge_core::registry::{FileRegistryLoader, RegistryError, RegistryLoader};
use concierge_core::session::SessionStore;
use concierge_core::tenant::TomlTenantLoader;
use concierge_llm::provider::ChatProvider;
use concierge_llm::router::ProviderRouter;
use concierge_llm::{AnthropicProvider, OpenAiProvider};

pub struct Application {
    pub config: AppConfig,
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The default registry is the deployment floor; failing to load it at
    /// startup is fatal, not a per-tenant gap.
    #[error("default action registry unavailable: {0}")]
    Registry(#[from] RegistryError),
}

/// Audit events double as structured log lines in the server process. The
/// sink must never fail the caller, and tracing cannot.
struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            event_name = %event.event_type,
            category = ?event.category,
            outcome = ?event.outcome,
            tenant_id = %event.tenant_id,
            session_id = event.session_id.as_deref().unwrap_or("unknown"),
            correlation_id = %event.correlation_id,
            metadata = ?event.metadata,
            "audit event"
        );
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let registry_loader = FileRegistryLoader::new(&config.registry.dir);
    // Fail fast on a broken deployment rather than on the first request.
    let default_registry = registry_loader.load("startup-probe")?;
    info!(
        event_name = "system.bootstrap.registry_loaded",
        correlation_id = "bootstrap",
        action_count = default_registry.actions.len(),
        "default action registry loaded"
    );

    let providers = build_providers(&config);
    info!(
        event_name = "system.bootstrap.providers_configured",
        correlation_id = "bootstrap",
        provider_count = providers.len(),
        "model backends configured in priority order"
    );

    let mut bindings = AdapterBindings::new();
    handlers::bind_defaults(&mut bindings);

    // The real catalog store sits behind another service; the in-memory
    // assortment keeps the orchestrator honest until one is wired in.
    let catalog = Arc::new(InMemoryCatalog::demo());
    let sessions = Arc::new(SessionStore::new());
    let tenant_loader = Arc::new(TomlTenantLoader::new(&config.tenants.dir));

    let orchestrator = Arc::new(Orchestrator::new(
        ProviderRouter::new(providers),
        bindings,
        Arc::new(registry_loader),
        tenant_loader,
        catalog,
        sessions,
        Arc::new(TracingAuditSink),
    ));

    Ok(Application { config, orchestrator })
}

fn build_providers(config: &AppConfig) -> Vec<Arc<dyn ChatProvider>> {
    config
        .providers
        .iter()
        .map(|provider| -> Arc<dyn ChatProvider> {
            match provider.kind {
                ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(
                    provider.model.clone(),
                    provider.api_key.clone(),
                    provider.base_url.clone(),
                    provider.timeout_secs,
                )),
                ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
                    provider.model.clone(),
                    provider.api_key.clone(),
                    provider.base_url.clone(),
                    provider.timeout_secs,
                )),
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs;

    use concierge_core::config::{ConfigOverrides, LoadOptions};
    use tempfile::TempDir;

    use super::{bootstrap, BootstrapError};

    pub(crate) const DEFAULT_REGISTRY: &str = r#"
[[action]]
name = "search"
enabled = true
handler = "commerce.search"
description = "Search the product catalog"

[[action]]
name = "checkout"
enabled = true
handler = "commerce.checkout"
description = "Convert the cart into an order"
"#;

    pub(crate) const ACME_TENANT: &str = r#"
tenant_id = "acme"
display_name = "Acme Outfitters"
brand_color = "#e03c31"
features = ["outfits"]
"#;

    pub(crate) fn config_dirs() -> (TempDir, ConfigOverrides) {
        let dir = TempDir::new().expect("temp dir");
        let registry_dir = dir.path().join("registry");
        let tenants_dir = dir.path().join("tenants");
        fs::create_dir_all(&registry_dir).expect("registry dir");
        fs::create_dir_all(&tenants_dir).expect("tenants dir");
        fs::write(registry_dir.join("default.toml"), DEFAULT_REGISTRY).expect("default registry");
        fs::write(tenants_dir.join("acme.toml"), ACME_TENANT).expect("tenant profile");

        let overrides = ConfigOverrides {
            registry_dir: Some(registry_dir),
            tenants_dir: Some(tenants_dir),
            ..ConfigOverrides::default()
        };
        (dir, overrides)
    }

    #[tokio::test]
    async fn bootstrap_succeeds_with_valid_directories() {
        let (_guard, overrides) = config_dirs();
        let app = bootstrap(LoadOptions { overrides, ..LoadOptions::default() })
            .await
            .expect("bootstrap");
        assert!(app.config.providers.is_empty());
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_default_registry() {
        let dir = TempDir::new().expect("temp dir");
        let empty_registry = dir.path().join("registry");
        std::fs::create_dir_all(&empty_registry).expect("dir");

        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                registry_dir: Some(empty_registry),
                tenants_dir: Some(dir.path().to_path_buf()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(matches!(result, Err(BootstrapError::Registry(_))));
    }

    #[tokio::test]
    async fn bootstrap_rejects_invalid_config() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                log_level: Some("verbose".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(matches!(result, Err(BootstrapError::Config(_))));
    }
}
