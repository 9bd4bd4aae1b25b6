use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One registered action: what the model may call and which implementation
/// satisfies it. Loaded once per request and immutable thereafter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub enabled: bool,
    pub handler: String,
    pub description: String,
}

/// Parsed `namespace.function` handler reference. Exactly two non-empty
/// segments; anything else is a deployment defect.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandlerRef {
    pub namespace: String,
    pub function: String,
}

impl HandlerRef {
    pub fn parse(handler: &str) -> Result<Self, RegistryError> {
        let mut segments = handler.split('.');
        match (segments.next(), segments.next(), segments.next()) {
            (Some(namespace), Some(function), None)
                if !namespace.is_empty() && !function.is_empty() =>
            {
                Ok(Self { namespace: namespace.to_string(), function: function.to_string() })
            }
            _ => Err(RegistryError::InvalidHandlerRef { handler: handler.to_string() }),
        }
    }
}

impl std::fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.namespace, self.function)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrySource {
    Tenant,
    Default,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryMeta {
    pub loaded_from: RegistrySource,
    pub path: Option<PathBuf>,
    /// Set when a tenant file existed but could not be used; the default
    /// registry served instead. Callers log it, the loader does not.
    pub tenant_fallback_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedRegistry {
    pub actions: BTreeMap<String, ActionDescriptor>,
    pub meta: RegistryMeta,
}

impl LoadedRegistry {
    pub fn get(&self, action: &str) -> Option<&ActionDescriptor> {
        self.actions.get(action)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &ActionDescriptor> {
        self.actions.values().filter(|descriptor| descriptor.enabled)
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The default registry is the deployment floor; its absence is fatal.
    #[error("default action registry not found at `{0}`")]
    MissingDefault(PathBuf),
    #[error("could not read default action registry `{path}`: {source}")]
    ReadDefault { path: PathBuf, source: std::io::Error },
    #[error("could not parse default action registry `{path}`: {source}")]
    ParseDefault { path: PathBuf, source: toml::de::Error },
    #[error("malformed handler reference `{handler}` (expected `namespace.function`)")]
    InvalidHandlerRef { handler: String },
}

pub trait RegistryLoader: Send + Sync {
    fn load(&self, tenant_id: &str) -> Result<LoadedRegistry, RegistryError>;
}

/// Loads `<dir>/<tenant>.toml`, falling back to `<dir>/default.toml`. Tenant
/// file problems are per-tenant gaps served from the default; default file
/// problems are fatal.
pub struct FileRegistryLoader {
    dir: PathBuf,
}

impl FileRegistryLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn load_default(&self) -> Result<LoadedRegistry, RegistryError> {
        let path = self.dir.join("default.toml");
        if !path.exists() {
            return Err(RegistryError::MissingDefault(path));
        }
        let raw = fs::read_to_string(&path)
            .map_err(|source| RegistryError::ReadDefault { path: path.clone(), source })?;
        let actions = parse_registry_file(&raw)
            .map_err(|source| RegistryError::ParseDefault { path: path.clone(), source })?;
        Ok(LoadedRegistry {
            actions,
            meta: RegistryMeta {
                loaded_from: RegistrySource::Default,
                path: Some(path),
                tenant_fallback_reason: None,
            },
        })
    }
}

impl RegistryLoader for FileRegistryLoader {
    fn load(&self, tenant_id: &str) -> Result<LoadedRegistry, RegistryError> {
        if !safe_tenant_id(tenant_id) {
            let mut registry = self.load_default()?;
            registry.meta.tenant_fallback_reason =
                Some(format!("tenant id `{tenant_id}` is not a valid registry file name"));
            return Ok(registry);
        }

        let tenant_path = self.dir.join(format!("{tenant_id}.toml"));
        if !tenant_path.exists() {
            return self.load_default();
        }

        match fs::read_to_string(&tenant_path) {
            Ok(raw) => match parse_registry_file(&raw) {
                Ok(actions) => Ok(LoadedRegistry {
                    actions,
                    meta: RegistryMeta {
                        loaded_from: RegistrySource::Tenant,
                        path: Some(tenant_path),
                        tenant_fallback_reason: None,
                    },
                }),
                Err(source) => {
                    let mut registry = self.load_default()?;
                    registry.meta.tenant_fallback_reason =
                        Some(format!("tenant registry `{}` is malformed: {source}", tenant_path.display()));
                    Ok(registry)
                }
            },
            Err(source) => {
                let mut registry = self.load_default()?;
                registry.meta.tenant_fallback_reason =
                    Some(format!("tenant registry `{}` is unreadable: {source}", tenant_path.display()));
                Ok(registry)
            }
        }
    }
}

/// In-memory loader for tests and embedded setups.
#[derive(Default)]
pub struct StaticRegistryLoader {
    default: Vec<ActionDescriptor>,
    tenants: HashMap<String, Vec<ActionDescriptor>>,
}

impl StaticRegistryLoader {
    pub fn new(default: Vec<ActionDescriptor>) -> Self {
        Self { default, tenants: HashMap::new() }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>, actions: Vec<ActionDescriptor>) -> Self {
        self.tenants.insert(tenant_id.into(), actions);
        self
    }
}

impl RegistryLoader for StaticRegistryLoader {
    fn load(&self, tenant_id: &str) -> Result<LoadedRegistry, RegistryError> {
        let (actions, loaded_from) = match self.tenants.get(tenant_id) {
            Some(actions) => (actions, RegistrySource::Tenant),
            None => (&self.default, RegistrySource::Default),
        };
        Ok(LoadedRegistry {
            actions: actions
                .iter()
                .map(|descriptor| (descriptor.name.clone(), descriptor.clone()))
                .collect(),
            meta: RegistryMeta { loaded_from, path: None, tenant_fallback_reason: None },
        })
    }
}

fn safe_tenant_id(tenant_id: &str) -> bool {
    !tenant_id.is_empty()
        && tenant_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'))
}

fn parse_registry_file(raw: &str) -> Result<BTreeMap<String, ActionDescriptor>, toml::de::Error> {
    #[derive(Deserialize)]
    struct RegistryFile {
        #[serde(default)]
        action: Vec<ActionDescriptor>,
    }

    let file: RegistryFile = toml::from_str(raw)?;
    Ok(file
        .action
        .into_iter()
        .map(|descriptor| (descriptor.name.clone(), descriptor))
        .collect())
}
