//! Group Orchestrator (C10): composes every MAOC component into one bounded
//! group-chat state machine (ADMIT -> PREPARE -> SELECT -> RETRIEVE ->
//! VALIDATE_INPUT -> RUN_TURN -> POST_VALIDATE -> RECORD -> DECIDE_CONT).

mod context;
mod engine;
mod error;
mod events;
mod model;

pub use context::OrchestratorContext;
pub use engine::GroupOrchestrator;
pub use error::{ConvergioError, ConvergioResult};
pub use events::{OrchestrationOutcome, OrchestratorEvent, OrchestratorOptions, OrchestratorRequest};
pub use model::{Conversation, ConversationStatus, Message, MessageTokenUsage};
