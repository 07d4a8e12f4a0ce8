use crate::classify::classify;
use crate::types::RoutingDecision;

/// Mission-routing mode (§4.2, mode 1): classify the opening message and
/// always return the orchestrator agent, with `single_agent` set for
/// greeting/simple classes and delegation left open for standard/complex.
pub fn route_opening_message(message: &str, orchestrator_agent_id: &str) -> RoutingDecision {
    let class = classify(message);
    RoutingDecision {
        class,
        agent_id: orchestrator_agent_id.to_string(),
        single_agent: class.is_single_agent(),
        policy: class.policy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageClass;

    #[test]
    fn greeting_routes_to_single_agent() {
        let decision = route_opening_message("hello", "orchestrator");
        assert_eq!(decision.class, MessageClass::Greeting);
        assert!(decision.single_agent);
        assert_eq!(decision.agent_id, "orchestrator");
        assert_eq!(decision.policy.max_turns, 1);
    }

    #[test]
    fn complex_routes_with_delegation_allowed() {
        let msg = "Please architect a comprehensive, end-to-end migration strategy and \
                    a phased roadmap covering every downstream service we own.";
        let decision = route_opening_message(msg, "orchestrator");
        assert_eq!(decision.class, MessageClass::Complex);
        assert!(!decision.single_agent);
        assert_eq!(decision.policy.max_turns, 10);
    }
}
