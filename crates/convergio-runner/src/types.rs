use async_trait::async_trait;
use convergio_types::Cost;
use serde::{Deserialize, Serialize};

/// Why the turn's model stream stopped (§4.9 `final`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    Stop,
    Length,
    Tool,
    Cancelled,
    Error,
}

impl CompletionReason {
    pub fn from_finish_reason(raw: &str) -> Self {
        match raw {
            "length" => CompletionReason::Length,
            "tool" | "tool_calls" => CompletionReason::Tool,
            "cancelled" => CompletionReason::Cancelled,
            "error" => CompletionReason::Error,
            _ => CompletionReason::Stop,
        }
    }
}

/// Tagged union emitted by the streaming runner. Sequence numbers are
/// strictly increasing per turn starting at 0, across every variant
/// including `Heartbeat` (§3 StreamEvent, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Delta {
        seq: u64,
        content: String,
    },
    ToolCall {
        seq: u64,
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        seq: u64,
        call_id: String,
        result: Option<serde_json::Value>,
        error: Option<String>,
    },
    Handoff {
        seq: u64,
        from: String,
        to: String,
        reason: String,
    },
    Heartbeat {
        seq: u64,
    },
    Final {
        seq: u64,
        total_tokens: u64,
        completion_reason: CompletionReason,
        cost_estimate: Cost,
    },
    Error {
        seq: u64,
        kind: String,
        retryable: bool,
    },
}

impl StreamEvent {
    pub fn seq(&self) -> u64 {
        match self {
            StreamEvent::Delta { seq, .. }
            | StreamEvent::ToolCall { seq, .. }
            | StreamEvent::ToolResult { seq, .. }
            | StreamEvent::Handoff { seq, .. }
            | StreamEvent::Heartbeat { seq }
            | StreamEvent::Final { seq, .. }
            | StreamEvent::Error { seq, .. } => *seq,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Final { .. } | StreamEvent::Error { .. })
    }
}

/// Boundary to whatever actually executes a tool call (filesystem, HTTP,
/// business API...). Out of scope for this crate's contract beyond this
/// trait; the runner only guarantees every `ToolCall` it emits is followed
/// by exactly one matching `ToolResult` before `final` (§8 invariant).
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_name: &str, arguments: &serde_json::Value) -> Result<serde_json::Value, String>;
}

/// Executor that always succeeds with an empty object, for turns with no
/// real tool wiring configured.
pub struct NoopToolExecutor;

#[async_trait]
impl ToolExecutor for NoopToolExecutor {
    async fn execute(&self, _tool_name: &str, _arguments: &serde_json::Value) -> Result<serde_json::Value, String> {
        Ok(serde_json::json!({}))
    }
}
