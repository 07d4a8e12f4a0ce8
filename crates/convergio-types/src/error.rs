use serde::{Deserialize, Serialize};

/// Stable error vocabulary shared across every component, matching the
/// error kinds enumerated in the orchestration design (budget, safety,
/// provider, timeout, cancellation, registry, validation, internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BudgetExceeded,
    ProviderUnavailable,
    SafetyBlocked,
    RetrievalDegraded,
    Timeout,
    Cancelled,
    UnknownAgent,
    ValidationError,
    Internal,
}

impl ErrorKind {
    /// Transient kinds are recovered locally (retry/degrade) and never
    /// close the conversation by themselves.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::RetrievalDegraded | ErrorKind::ProviderUnavailable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BudgetExceeded => "budget_exceeded",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::SafetyBlocked => "safety_blocked",
            ErrorKind::RetrievalDegraded => "retrieval_degraded",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::UnknownAgent => "unknown_agent",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
