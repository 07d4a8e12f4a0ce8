use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One retrieved fact. `trust` is a per-source reliability score in
/// `[0.0, 1.0]` configured by the retrieval store integration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fact {
    pub source_id: String,
    pub text: String,
    pub trust: f64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub conv_id: String,
    pub speaker_id: String,
    pub last_user_message: String,
    pub recent_turns: Vec<String>,
}

/// Bounded context bundle handed to the orchestrator for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagContext {
    pub facts: Vec<Fact>,
    pub sources: Vec<String>,
    pub cache_key: String,
    pub built_at: DateTime<Utc>,
    pub ttl_secs: i64,
    /// `true` when retrieval failed and this bundle is an empty fallback —
    /// the orchestrator proceeds without injection rather than failing the
    /// turn (spec §4.3 failure policy).
    pub degraded: bool,
    pub conflict_note: Option<String>,
}

impl RagContext {
    pub fn empty_degraded(cache_key: String, ttl_secs: i64) -> Self {
        Self {
            facts: Vec::new(),
            sources: Vec::new(),
            cache_key,
            built_at: Utc::now(),
            ttl_secs,
            degraded: true,
            conflict_note: None,
        }
    }
}
