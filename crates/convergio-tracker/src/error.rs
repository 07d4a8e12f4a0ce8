#[derive(Debug, Clone, thiserror::Error)]
pub enum TrackerError {
    #[error("conversation `{0}` has no tracked timeline; call start_conversation first")]
    UnknownConversation(String),
}

pub type TrackerResult<T> = Result<T, TrackerError>;
