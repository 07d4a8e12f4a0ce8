#[derive(Debug, Clone, thiserror::Error)]
pub enum ApprovalError {
    #[error("conversation `{0}` already has a pending approval request")]
    AlreadyPending(String),
    #[error("approval request `{0}` not found")]
    NotFound(String),
    #[error("approval request `{0}` is already in a terminal state")]
    AlreadyDecided(String),
}

pub type ApprovalResult<T> = Result<T, ApprovalError>;
