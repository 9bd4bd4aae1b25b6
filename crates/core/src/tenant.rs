use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantProfile {
    pub tenant_id: String,
    pub display_name: String,
    pub brand_color: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub api_gateway: Option<String>,
}

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("unknown tenant `{0}`")]
    NotFound(String),
    #[error("could not read tenant profile `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse tenant profile `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
}

pub trait TenantConfigLoader: Send + Sync {
    fn load(&self, tenant_id: &str) -> Result<TenantProfile, TenantError>;
}

/// Reads `<dir>/<tenant>.toml`.
pub struct TomlTenantLoader {
    dir: PathBuf,
}

impl TomlTenantLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl TenantConfigLoader for TomlTenantLoader {
    fn load(&self, tenant_id: &str) -> Result<TenantProfile, TenantError> {
        let valid_name = !tenant_id.is_empty()
            && tenant_id.chars().all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'));
        if !valid_name {
            return Err(TenantError::NotFound(tenant_id.to_string()));
        }

        let path = self.dir.join(format!("{tenant_id}.toml"));
        if !path.exists() {
            return Err(TenantError::NotFound(tenant_id.to_string()));
        }

        let raw = fs::read_to_string(&path)
            .map_err(|source| TenantError::ReadFile { path: path.clone(), source })?;
        toml::from_str(&raw).map_err(|source| TenantError::ParseFile { path, source })
    }
}

/// In-memory loader for tests and embedded setups.
#[derive(Default)]
pub struct StaticTenantLoader {
    tenants: HashMap<String, TenantProfile>,
}

impl StaticTenantLoader {
    pub fn with_tenant(mut self, profile: TenantProfile) -> Self {
        self.tenants.insert(profile.tenant_id.clone(), profile);
        self
    }
}

impl TenantConfigLoader for StaticTenantLoader {
    fn load(&self, tenant_id: &str) -> Result<TenantProfile, TenantError> {
        self.tenants
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| TenantError::NotFound(tenant_id.to_string()))
    }
}
