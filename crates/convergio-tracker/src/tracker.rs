use std::collections::HashMap;

use convergio_providers::PriceTable;
use convergio_types::Cost;
use tokio::sync::RwLock;

use crate::error::{TrackerError, TrackerResult};
use crate::types::{BudgetEvent, BudgetEventKind, ConversationSummary, RecordTurnInput, TurnRecord};

const WARNING_THRESHOLD_PCT: f64 = 75.0;
const BREACH_THRESHOLD_PCT: f64 = 100.0;

struct Timeline {
    budget_limit_usd: Cost,
    records: Vec<TurnRecord>,
    total_cost: Cost,
    total_tokens: u64,
    warned: bool,
    breached: bool,
}

impl Timeline {
    fn new(budget_limit_usd: Cost) -> Self {
        Self {
            budget_limit_usd,
            records: Vec::new(),
            total_cost: Cost::ZERO,
            total_tokens: 0,
            warned: false,
            breached: false,
        }
    }

    fn utilization_pct(&self) -> f64 {
        if self.budget_limit_usd.is_zero() {
            if self.total_cost.is_zero() {
                0.0
            } else {
                100.0
            }
        } else {
            (self.total_cost.as_f64() / self.budget_limit_usd.as_f64()) * 100.0
        }
    }

    fn summary(&self, conv_id: &str) -> ConversationSummary {
        ConversationSummary {
            conv_id: conv_id.to_string(),
            turn_count: self.records.len() as u32,
            total_tokens: self.total_tokens,
            total_cost: self.total_cost,
            budget_limit_usd: self.budget_limit_usd,
            utilization_pct: self.utilization_pct(),
        }
    }
}

/// Per-conversation token/cost timeline tied to a `budget_limit_usd` (C8).
/// One `Timeline` per conversation; `record_turn` appends, updates running
/// totals, and reports threshold crossings exactly once each.
pub struct TurnTracker {
    timelines: RwLock<HashMap<String, Timeline>>,
}

impl Default for TurnTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnTracker {
    pub fn new() -> Self {
        Self {
            timelines: RwLock::new(HashMap::new()),
        }
    }

    pub async fn start_conversation(&self, conv_id: impl Into<String>, budget_limit_usd: Cost) {
        self.timelines
            .write()
            .await
            .insert(conv_id.into(), Timeline::new(budget_limit_usd));
    }

    /// Record one turn, pricing it from `price_table`, and return the
    /// stored record plus any budget threshold events newly crossed.
    pub async fn record_turn(
        &self,
        input: RecordTurnInput,
        price_table: &PriceTable,
    ) -> TrackerResult<(TurnRecord, Vec<BudgetEvent>)> {
        let (price, known) = price_table.lookup(&input.provider, &input.model);
        if !known {
            tracing::warn!(provider = %input.provider, model = %input.model, "unknown model, using fallback price");
        }
        let cost_usd = Cost::from_tokens(input.prompt_tokens, price.input_per_1k)
            + Cost::from_tokens(input.completion_tokens, price.output_per_1k);

        let record = TurnRecord {
            conv_id: input.conv_id.clone(),
            turn_index: input.turn_index,
            speaker_id: input.speaker_id,
            model: input.model,
            prompt_tokens: input.prompt_tokens,
            completion_tokens: input.completion_tokens,
            cost_usd,
            duration_ms: input.duration_ms,
        };

        let mut timelines = self.timelines.write().await;
        let timeline = timelines
            .entry(input.conv_id.clone())
            .or_insert_with(|| Timeline::new(Cost::ZERO));

        timeline.total_cost = timeline.total_cost + cost_usd;
        timeline.total_tokens += input.prompt_tokens + input.completion_tokens;
        timeline.records.push(record.clone());

        let pct = timeline.utilization_pct();
        let mut events = Vec::new();
        if pct >= BREACH_THRESHOLD_PCT && !timeline.breached {
            timeline.breached = true;
            timeline.warned = true;
            events.push(BudgetEvent {
                conv_id: input.conv_id.clone(),
                kind: BudgetEventKind::Breach,
                utilization_pct: pct,
            });
        } else if pct >= WARNING_THRESHOLD_PCT && !timeline.warned {
            timeline.warned = true;
            events.push(BudgetEvent {
                conv_id: input.conv_id.clone(),
                kind: BudgetEventKind::Warning,
                utilization_pct: pct,
            });
        }

        Ok((record, events))
    }

    pub async fn summary(&self, conv_id: &str) -> TrackerResult<ConversationSummary> {
        self.timelines
            .read()
            .await
            .get(conv_id)
            .map(|t| t.summary(conv_id))
            .ok_or_else(|| TrackerError::UnknownConversation(conv_id.to_string()))
    }

    pub async fn is_budget_exceeded(&self, conv_id: &str) -> bool {
        self.timelines
            .read()
            .await
            .get(conv_id)
            .map(|t| t.utilization_pct() >= BREACH_THRESHOLD_PCT)
            .unwrap_or(false)
    }

    /// Opaque serialization of the full turn timeline for export/debugging.
    pub async fn export_timeline(&self, conv_id: &str) -> TrackerResult<Vec<TurnRecord>> {
        self.timelines
            .read()
            .await
            .get(conv_id)
            .map(|t| t.records.clone())
            .ok_or_else(|| TrackerError::UnknownConversation(conv_id.to_string()))
    }
}
