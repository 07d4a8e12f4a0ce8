use convergio_runner::CompletionReason;
use convergio_types::Cost;
use serde::{Deserialize, Serialize};

use crate::model::ConversationStatus;

/// `orchestrate`/`stream` input options (§6 Orchestrator request).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OrchestratorOptions {
    pub budget_limit_usd: Option<Cost>,
    pub rag_in_loop: Option<bool>,
    pub hitl_enabled: Option<bool>,
    pub max_turns: Option<u32>,
    pub timeout_s: Option<u64>,
}

impl OrchestratorOptions {
    pub fn rag_in_loop(&self) -> bool {
        self.rag_in_loop.unwrap_or(true)
    }

    pub fn hitl_enabled(&self) -> bool {
        self.hitl_enabled.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorRequest {
    pub conv_id: Option<String>,
    pub user_id: String,
    pub message: String,
    #[serde(default)]
    pub options: OrchestratorOptions,
}

/// Transport-agnostic event stream chunks (§6). `stream()` yields these
/// verbatim; `orchestrate()` drains them internally and returns only the
/// final `OrchestrationOutcome`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    TurnStarted {
        turn_index: u32,
        speaker_id: String,
    },
    Delta {
        turn_index: u32,
        seq: u64,
        content: String,
    },
    ToolCall {
        turn_index: u32,
        seq: u64,
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        turn_index: u32,
        seq: u64,
        call_id: String,
        result: Option<serde_json::Value>,
        error: Option<String>,
    },
    Heartbeat {
        turn_index: u32,
        seq: u64,
    },
    TurnEnded {
        turn_index: u32,
        completion_reason: CompletionReason,
        tokens: u64,
        cost: Cost,
    },
    OrchestratorFinal {
        status: ConversationStatus,
        total_tokens: u64,
        total_cost: Cost,
        agents_used: Vec<String>,
        message: String,
    },
    Error {
        kind: String,
        retryable: bool,
        details: String,
    },
}

/// What `orchestrate()` returns: the terminal state of one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationOutcome {
    pub conv_id: String,
    pub status: ConversationStatus,
    pub message: String,
    pub total_tokens: u64,
    pub total_cost: Cost,
    pub agents_used: Vec<String>,
}
