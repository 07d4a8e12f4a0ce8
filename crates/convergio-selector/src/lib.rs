//! Intelligent speaker selection (C5): mission-routing classification of the
//! opening message plus weighted in-loop scoring for subsequent turns.

mod classify;
mod routing;
mod score;
mod types;

pub use classify::classify;
pub use routing::route_opening_message;
pub use score::select_next_speaker;
pub use types::{
    MessageClass, RoutingDecision, SelectionContext, SelectionOutcome, SpeakerCandidate,
    TerminationReason, TurnPolicy,
};
