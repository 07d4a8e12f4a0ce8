use chrono::{DateTime, Utc};
use convergio_types::{Cost, MessageRole};
use serde::{Deserialize, Serialize};

pub use convergio_types::ConversationStatus;

/// One message in a conversation's append-only transcript (§3 Message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub speaker_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<serde_json::Value>,
    #[serde(default)]
    pub tool_results: Vec<serde_json::Value>,
    pub token_usage: Option<MessageTokenUsage>,
    pub created_at: DateTime<Utc>,
    pub turn_index: u32,
    /// `true` when the guardian redacted PII from this message's content
    /// before it was stored (§4.6).
    #[serde(default)]
    pub redacted: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MessageTokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A live or concluded group conversation (§3 Conversation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conv_id: String,
    pub user_id: String,
    pub messages: Vec<Message>,
    pub turn_count: u32,
    pub budget_limit_usd: Cost,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: ConversationStatus,
    pub agents_used: Vec<String>,
}

impl Conversation {
    pub fn new(conv_id: impl Into<String>, user_id: impl Into<String>, budget_limit_usd: Cost) -> Self {
        Self {
            conv_id: conv_id.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
            turn_count: 0,
            budget_limit_usd,
            started_at: Utc::now(),
            ended_at: None,
            status: ConversationStatus::Running,
            agents_used: Vec::new(),
        }
    }

    /// Append a message, enforcing the monotonic-`turn_index` and
    /// terminal-conversation invariants (§3).
    pub fn push_message(&mut self, message: Message) {
        debug_assert!(self.status == ConversationStatus::Running, "cannot append to a terminal conversation");
        if let Some(last) = self.messages.last() {
            debug_assert!(message.turn_index >= last.turn_index, "turn_index must be monotonic");
        }
        if let Some(speaker) = &message.speaker_id {
            if !self.agents_used.contains(speaker) {
                self.agents_used.push(speaker.clone());
            }
        }
        self.messages.push(message);
    }

    pub fn finish(&mut self, status: ConversationStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }
}
