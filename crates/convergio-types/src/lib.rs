mod agent;
mod cost;
mod error;

pub use agent::{AgentStatus, AgentTier, ConversationStatus, MessageRole};
pub use cost::Cost;
pub use error::ErrorKind;

pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4())
}
