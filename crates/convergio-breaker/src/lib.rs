mod anomaly;
mod breaker;
mod state;

pub use breaker::{BreakerConfig, CircuitBreaker};
pub use state::{AdmitDecision, AdmitRequest, CircuitState, OverrideAuditEntry, Scope};
