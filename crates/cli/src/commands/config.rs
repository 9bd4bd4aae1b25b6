use secrecy::ExposeSecret;

use concierge_core::config::{AppConfig, LoadOptions, ProviderKind};

/// Render the effective configuration. Secrets are reported by presence
/// only, never by value.
pub fn run() -> String {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => render(&config),
        Err(error) => format!("config error: {error}"),
    }
}

fn render(config: &AppConfig) -> String {
    let mut lines = Vec::new();
    lines.push("effective configuration".to_string());
    lines.push(format!("  server.bind_address = {}", config.server.bind_address));
    lines.push(format!("  server.port = {}", config.server.port));
    lines.push(format!(
        "  server.graceful_shutdown_secs = {}",
        config.server.graceful_shutdown_secs
    ));

    if config.providers.is_empty() {
        lines.push("  providers = [] (deterministic decider only)".to_string());
    }
    for (index, provider) in config.providers.iter().enumerate() {
        let kind = match provider.kind {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        };
        let key = match &provider.api_key {
            Some(key) if !key.expose_secret().trim().is_empty() => "set (redacted)",
            _ => "missing",
        };
        lines.push(format!(
            "  provider[{index}] = kind={kind} model={} api_key={key} base_url={} timeout_secs={}",
            provider.model,
            provider.base_url.as_deref().unwrap_or("default"),
            provider.timeout_secs,
        ));
    }

    lines.push(format!("  registry.dir = {}", config.registry.dir.display()));
    lines.push(format!("  tenants.dir = {}", config.tenants.dir.display()));
    lines.push(format!("  logging.level = {}", config.logging.level));
    lines.push(format!("  logging.format = {:?}", config.logging.format));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use concierge_core::config::AppConfig;

    use super::render;

    #[test]
    fn render_reports_defaults_without_secrets() {
        let output = render(&AppConfig::default());
        assert!(output.contains("server.port = 8080"));
        assert!(output.contains("deterministic decider only"));
        assert!(output.contains("registry.dir = config/registry"));
        assert!(!output.contains("sk-"));
    }
}
