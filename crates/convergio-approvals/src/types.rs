use chrono::{DateTime, Utc};
use convergio_safety::RiskLevel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

/// Caller-supplied decision; `decide()` maps it onto a terminal
/// `ApprovalStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

/// What `await_decision` ultimately resolves to: either an explicit human
/// decision or a timeout, which spec §12 Q1 fixes to `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitOutcome {
    Approved,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewApprovalRequest {
    pub conv_id: String,
    pub turn_index: u32,
    pub action_type: String,
    pub payload: serde_json::Value,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub conv_id: String,
    pub turn_index: u32,
    pub action_type: String,
    pub payload: serde_json::Value,
    pub risk_level: RiskLevel,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub approver_id: Option<String>,
    pub notes: Option<String>,
}
