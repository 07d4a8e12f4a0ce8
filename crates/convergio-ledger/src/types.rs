use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// One append-only cost observation. Never updated or deleted after
/// `record()` durably writes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostLedgerEntry {
    pub ts: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub agent_id: String,
    pub conv_id: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: Decimal,
    pub session_id: Option<String>,
}

/// Dimension an aggregate query groups by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LedgerScope {
    Global,
    Provider(String),
    Agent(String),
    Conversation(String),
}

/// Narrower scope set budget limits are actually defined over; used by
/// `utilization` and breaker threshold checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BudgetScope {
    DailyGlobal,
    MonthlyGlobal,
    Provider(String),
    Conversation(String),
}

#[derive(Debug, Clone, Copy)]
pub enum UsageWindow {
    Day(NaiveDate),
    Month { year: i32, month: u32 },
    Range(DateTime<Utc>, DateTime<Utc>),
    AllTime,
}

impl UsageWindow {
    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            UsageWindow::Day(date) => {
                let start = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
                (start, start + chrono::Duration::days(1))
            }
            UsageWindow::Month { year, month } => {
                let start = NaiveDate::from_ymd_opt(*year, *month, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    .and_utc();
                let (next_year, next_month) = if *month == 12 {
                    (*year + 1, 1)
                } else {
                    (*year, *month + 1)
                };
                let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    .and_utc();
                (start, end)
            }
            UsageWindow::Range(start, end) => (*start, *end),
            UsageWindow::AllTime => (DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageSummary {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: Decimal,
    pub calls: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub expected_cost: Decimal,
    pub confidence: f64,
}

/// Spending ceilings. `per_provider_usd` and `per_conversation_usd` are
/// sparse: an absent key means "no limit configured for that scope".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub daily_usd: Decimal,
    pub monthly_usd: Decimal,
    #[serde(default)]
    pub per_provider_usd: std::collections::HashMap<String, Decimal>,
    pub per_conversation_usd: Decimal,
}

impl BudgetLimits {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.daily_usd < Decimal::ZERO
            || self.monthly_usd < Decimal::ZERO
            || self.per_conversation_usd < Decimal::ZERO
        {
            return Err(LedgerError::InvalidLimits(
                "budget limits must be non-negative".to_string(),
            ));
        }
        if self.per_provider_usd.values().any(|v| *v < Decimal::ZERO) {
            return Err(LedgerError::InvalidLimits(
                "per-provider budget limits must be non-negative".to_string(),
            ));
        }
        if self.daily_usd > self.monthly_usd && self.monthly_usd > Decimal::ZERO {
            return Err(LedgerError::InvalidLimits(
                "daily_usd must not exceed monthly_usd".to_string(),
            ));
        }
        Ok(())
    }
}

/// Alert severity assigned to a crossed utilization threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
    Info,
    Warn,
    Critical,
    Exhausted,
}

impl AlertLevel {
    pub fn for_threshold(pct: u8) -> Option<AlertLevel> {
        match pct {
            50 => Some(AlertLevel::Info),
            75 => Some(AlertLevel::Warn),
            90 => Some(AlertLevel::Critical),
            100 => Some(AlertLevel::Exhausted),
            _ => None,
        }
    }
}

/// Ascending crossing points checked on every `record()`. A threshold only
/// fires once per (scope, window) pair — see `AlertTracker`.
pub const ALERT_THRESHOLDS: [u8; 4] = [50, 75, 90, 100];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub scope_key: String,
    pub window_key: String,
    pub threshold_pct: u8,
    pub level: AlertLevel,
    pub utilization_pct: f64,
    pub fired_at: DateTime<Utc>,
}
