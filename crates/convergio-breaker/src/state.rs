use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// The three independent gating dimensions. Admission requires all three
/// relevant scopes to be CLOSED (or overridden) — see spec §4.5.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Global,
    Provider(String),
    Agent(String),
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Provider(p) => write!(f, "provider:{p}"),
            Scope::Agent(a) => write!(f, "agent:{a}"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ScopeState {
    pub state: CircuitState,
    pub consecutive_errors: u32,
    pub half_open_successes: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub override_until: Option<DateTime<Utc>>,
    pub override_approver: Option<String>,
    /// `true` while a HALF_OPEN probe call is outstanding, to enforce "at
    /// most one probe" (spec §3 BreakerState invariant).
    pub probe_in_flight: bool,
}

impl Default for ScopeState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_errors: 0,
            half_open_successes: 0,
            opened_at: None,
            reason: None,
            override_until: None,
            override_approver: None,
            probe_in_flight: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdmitRequest {
    pub provider: String,
    pub agent_id: String,
    pub user_id: String,
    pub estimated_cost: rust_decimal::Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmitDecision {
    pub allowed: bool,
    pub denied_scope: Option<Scope>,
    pub reason: Option<String>,
    /// Set when this admission is the single permitted HALF_OPEN probe; the
    /// caller must report the outcome via `CircuitBreaker::report_outcome`.
    pub is_probe: bool,
}

impl AdmitDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            denied_scope: None,
            reason: None,
            is_probe: false,
        }
    }

    pub fn allow_probe() -> Self {
        Self {
            allowed: true,
            denied_scope: None,
            reason: None,
            is_probe: true,
        }
    }

    pub fn deny(scope: Scope, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            denied_scope: Some(scope),
            reason: Some(reason.into()),
            is_probe: false,
        }
    }
}

/// One row of the emergency-override audit trail. Overrides are never
/// deleted once recorded, only superseded by expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideAuditEntry {
    pub scope: String,
    pub approver_id: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
