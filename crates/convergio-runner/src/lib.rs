//! Streaming Runner (C9): drives a single agent turn against a `Provider`
//! and emits a finite, tool-aware sequence of `StreamEvent`s.

mod runner;
mod types;

pub use runner::{run_turn, RunTurnInput, RunnerConfig};
pub use types::{CompletionReason, NoopToolExecutor, StreamEvent, ToolExecutor};
