use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Ingress,
    Routing,
    Provider,
    Action,
    Session,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub tenant_id: String,
    pub session_id: Option<String>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        tenant_id: impl Into<String>,
        session_id: Option<String>,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            session_id,
            correlation_id: correlation_id.into(),
            actor: actor.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub tenant_id: String,
    pub session_id: Option<String>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        context: &AuditContext,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            tenant_id: context.tenant_id.clone(),
            session_id: context.session_id.clone(),
            correlation_id: context.correlation_id.clone(),
            event_type: event_type.into(),
            category,
            actor: context.actor.clone(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One-way event sink. Implementations must not fail the caller: a sink that
/// cannot record an event swallows the problem itself.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
