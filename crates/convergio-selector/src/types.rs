use convergio_types::Cost;

/// Mission-routing classification of the opening user message (§4.2, mode 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Greeting,
    Simple,
    Standard,
    Complex,
}

impl MessageClass {
    /// Per-classification `{max_turns, timeout}` policy.
    pub fn policy(self) -> TurnPolicy {
        match self {
            MessageClass::Greeting => TurnPolicy { max_turns: 1, timeout_secs: 30 },
            MessageClass::Simple => TurnPolicy { max_turns: 2, timeout_secs: 30 },
            MessageClass::Standard => TurnPolicy { max_turns: 5, timeout_secs: 60 },
            MessageClass::Complex => TurnPolicy { max_turns: 10, timeout_secs: 120 },
        }
    }

    /// Greeting/simple messages never leave the orchestrator agent.
    pub fn is_single_agent(self) -> bool {
        matches!(self, MessageClass::Greeting | MessageClass::Simple)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnPolicy {
    pub max_turns: u32,
    pub timeout_secs: u64,
}

/// Result of mission-routing the opening message: always the orchestrator
/// agent, with a flag for whether it may delegate.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub class: MessageClass,
    pub agent_id: String,
    pub single_agent: bool,
    pub policy: TurnPolicy,
}

/// One agent eligible to speak next, as seen by the in-loop scorer.
#[derive(Debug, Clone)]
pub struct SpeakerCandidate {
    pub agent_id: String,
    /// Free-form text describing what the agent is for (category, tags,
    /// name) — matched against the last message for the relevance factor.
    pub expertise: String,
    pub dependencies: Vec<String>,
    pub estimated_cost: Cost,
    /// Turn index this agent last spoke at, if any.
    pub last_spoken_turn: Option<u32>,
}

/// State the scorer needs beyond the candidate list itself.
#[derive(Debug, Clone)]
pub struct SelectionContext<'a> {
    pub turn_index: u32,
    pub last_message: &'a str,
    /// Agent ids in the order they spoke, most recent last.
    pub speaker_history: &'a [String],
    /// Agent ids that have already spoken at least once this conversation.
    pub spoken_agents: &'a [String],
    pub remaining_budget: Cost,
    pub max_turns: u32,
    pub single_agent_mode: bool,
    /// Anti-starvation window: an agent may not be picked for more than
    /// this many consecutive turns while another eligible agent exists.
    pub consecutive_repeat_limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    TurnBudgetMet,
    ExplicitMarker,
    MaxTurnsReached,
    SingleAgentAnswered,
    NoEligibleSpeakers,
}

#[derive(Debug, Clone)]
pub enum SelectionOutcome {
    Speak { agent_id: String, score: f64 },
    Terminate(TerminationReason),
}
