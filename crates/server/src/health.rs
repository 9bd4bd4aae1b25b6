use std::path::PathBuf;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use concierge_core::registry::{FileRegistryLoader, RegistryLoader};

#[derive(Clone)]
pub struct HealthState {
    registry_dir: PathBuf,
    provider_ids: Vec<String>,
}

impl HealthState {
    pub fn new(registry_dir: PathBuf, provider_ids: Vec<String>) -> Self {
        Self { registry_dir, provider_ids }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub registry: HealthCheck,
    pub providers: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let registry = registry_check(&state.registry_dir);
    let ready = registry.status == "ready";

    let providers = if state.provider_ids.is_empty() {
        HealthCheck {
            status: "ready",
            detail: "no model backends configured; deterministic decider active".to_string(),
        }
    } else {
        HealthCheck {
            status: "ready",
            detail: format!("failover order: {}", state.provider_ids.join(" -> ")),
        }
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "concierge-server runtime initialized".to_string(),
        },
        registry,
        providers,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn registry_check(registry_dir: &PathBuf) -> HealthCheck {
    let loader = FileRegistryLoader::new(registry_dir);
    match loader.load("health-probe") {
        Ok(registry) => HealthCheck {
            status: "ready",
            detail: format!("default registry with {} actions", registry.actions.len()),
        },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("registry load failed: {error}") }
        }
    }
}
