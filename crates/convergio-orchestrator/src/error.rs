use convergio_types::ErrorKind;

/// Stable error vocabulary for the orchestrator boundary (§7), with
/// `#[from]` conversions from every component-local error enum so
/// `?` composes across the whole core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConvergioError {
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("safety blocked: {0}")]
    SafetyBlocked(String),
    #[error("retrieval degraded: {0}")]
    RetrievalDegraded(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("cancelled")]
    Cancelled,
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("internal error (correlation_id={correlation_id}): {detail}")]
    Internal { correlation_id: String, detail: String },
}

impl ConvergioError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvergioError::BudgetExceeded(_) => ErrorKind::BudgetExceeded,
            ConvergioError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            ConvergioError::SafetyBlocked(_) => ErrorKind::SafetyBlocked,
            ConvergioError::RetrievalDegraded(_) => ErrorKind::RetrievalDegraded,
            ConvergioError::Timeout(_) => ErrorKind::Timeout,
            ConvergioError::Cancelled => ErrorKind::Cancelled,
            ConvergioError::UnknownAgent(_) => ErrorKind::UnknownAgent,
            ConvergioError::ValidationError(_) => ErrorKind::ValidationError,
            ConvergioError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind().is_transient()
    }
}

impl From<convergio_registry::RegistryError> for ConvergioError {
    fn from(e: convergio_registry::RegistryError) -> Self {
        match e {
            convergio_registry::RegistryError::UnknownAgent(id) => ConvergioError::UnknownAgent(id),
            other => ConvergioError::ValidationError(other.to_string()),
        }
    }
}

impl From<convergio_ledger::LedgerError> for ConvergioError {
    fn from(e: convergio_ledger::LedgerError) -> Self {
        ConvergioError::Internal {
            correlation_id: convergio_types::new_id("corr"),
            detail: e.to_string(),
        }
    }
}

impl From<convergio_approvals::ApprovalError> for ConvergioError {
    fn from(e: convergio_approvals::ApprovalError) -> Self {
        ConvergioError::SafetyBlocked(e.to_string())
    }
}

pub type ConvergioResult<T> = Result<T, ConvergioError>;
