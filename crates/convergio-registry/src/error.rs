use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("agent definition invalid: {0}")]
    Validation(String),

    #[error("unknown agent `{0}`")]
    UnknownAgent(String),

    #[error("no valid agent definitions were found in the scanned directory")]
    EmptyRegistry,

    #[error("failed to read agent directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to watch agent directory: {0}")]
    Watch(#[from] notify::Error),
}
