use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub providers: Vec<ProviderConfig>,
    pub registry: RegistryDirConfig,
    pub tenants: TenantDirConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// One model backend in failover priority order: the first entry is tried
/// first, the last entry is the last resort before the deterministic decider.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RegistryDirConfig {
    pub dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct TenantDirConfig {
    pub dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub registry_dir: Option<PathBuf>,
    pub tenants_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub providers: Option<Vec<ProviderConfig>>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            providers: Vec::new(),
            registry: RegistryDirConfig { dir: PathBuf::from("config/registry") },
            tenants: TenantDirConfig { dir: PathBuf::from("config/tenants") },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(ConfigError::Validation(format!(
                "unsupported provider kind `{other}` (expected openai|anthropic)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("concierge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if !patch.provider.is_empty() {
            self.providers = patch
                .provider
                .into_iter()
                .map(|provider| ProviderConfig {
                    kind: provider.kind,
                    model: provider.model,
                    api_key: provider.api_key.map(SecretString::from),
                    base_url: provider.base_url,
                    timeout_secs: provider.timeout_secs.unwrap_or(30),
                })
                .collect();
        }

        if let Some(registry) = patch.registry {
            if let Some(dir) = registry.dir {
                self.registry.dir = dir;
            }
        }

        if let Some(tenants) = patch.tenants {
            if let Some(dir) = tenants.dir {
                self.tenants.dir = dir;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CONCIERGE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CONCIERGE_SERVER_PORT") {
            self.server.port = parse_u16("CONCIERGE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_REGISTRY_DIR") {
            self.registry.dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("CONCIERGE_TENANTS_DIR") {
            self.tenants.dir = PathBuf::from(value);
        }

        let log_level =
            read_env("CONCIERGE_LOGGING_LEVEL").or_else(|| read_env("CONCIERGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONCIERGE_LOGGING_FORMAT").or_else(|| read_env("CONCIERGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(registry_dir) = overrides.registry_dir {
            self.registry.dir = registry_dir;
        }
        if let Some(tenants_dir) = overrides.tenants_dir {
            self.tenants.dir = tenants_dir;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(providers) = overrides.providers {
            self.providers = providers;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_server(&self.server)?;
        for provider in &self.providers {
            validate_provider(provider)?;
        }
        validate_dirs(&self.registry, &self.tenants)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("concierge.toml"), PathBuf::from("config/concierge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_provider(provider: &ProviderConfig) -> Result<(), ConfigError> {
    if provider.model.trim().is_empty() {
        return Err(ConfigError::Validation("provider.model must not be empty".to_string()));
    }

    if provider.timeout_secs == 0 || provider.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "provider.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    // Hosted endpoints need a key; a custom base_url may point at a local
    // gateway that injects its own credentials.
    let missing_key = provider
        .api_key
        .as_ref()
        .map(|value| value.expose_secret().trim().is_empty())
        .unwrap_or(true);
    if missing_key && provider.base_url.is_none() {
        return Err(ConfigError::Validation(format!(
            "provider.api_key is required for {:?} unless base_url is set",
            provider.kind
        )));
    }

    Ok(())
}

fn validate_dirs(registry: &RegistryDirConfig, tenants: &TenantDirConfig) -> Result<(), ConfigError> {
    if registry.dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation("registry.dir must not be empty".to_string()));
    }
    if tenants.dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation("tenants.dir must not be empty".to_string()));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    server: Option<ServerPatch>,
    #[serde(default)]
    provider: Vec<ProviderPatch>,
    registry: Option<RegistryPatch>,
    tenants: Option<TenantsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ProviderPatch {
    kind: ProviderKind,
    model: String,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RegistryPatch {
    dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct TenantsPatch {
    dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
