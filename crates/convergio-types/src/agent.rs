use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTier {
    Executive,
    Director,
    Manager,
    Specialist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Beta,
    Deprecated,
}

impl Default for AgentStatus {
    fn default() -> Self {
        AgentStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
    System,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Running,
    Done,
    BudgetExceeded,
    SafetyBlocked,
    Cancelled,
    Timeout,
    Error,
}

impl ConversationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ConversationStatus::Running)
    }
}
