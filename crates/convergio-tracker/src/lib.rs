//! Turn Token Tracker (C8): per-conversation timeline of `TurnRecord`s with
//! running totals and budget threshold events.

mod error;
mod tracker;
mod types;

pub use error::{TrackerError, TrackerResult};
pub use tracker::TurnTracker;
pub use types::{BudgetEvent, BudgetEventKind, ConversationSummary, RecordTurnInput, TurnRecord};
