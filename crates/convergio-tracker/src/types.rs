use convergio_types::Cost;
use serde::{Deserialize, Serialize};

/// One recorded turn (§3 TurnRecord).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnRecord {
    pub conv_id: String,
    pub turn_index: u32,
    pub speaker_id: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: Cost,
    pub duration_ms: u64,
}

/// Input to `TurnTracker::record_turn`; `cost_usd` is computed internally
/// from the price table rather than supplied by the caller (§4.8).
#[derive(Debug, Clone)]
pub struct RecordTurnInput {
    pub conv_id: String,
    pub turn_index: u32,
    pub speaker_id: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetEventKind {
    Warning,
    Breach,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetEvent {
    pub conv_id: String,
    pub kind: BudgetEventKind,
    pub utilization_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conv_id: String,
    pub turn_count: u32,
    pub total_tokens: u64,
    pub total_cost: Cost,
    pub budget_limit_usd: Cost,
    pub utilization_pct: f64,
}
