use std::collections::HashSet;

use crate::types::{SelectionContext, SelectionOutcome, SpeakerCandidate, TerminationReason};

const WEIGHT_RELEVANCE: f64 = 0.40;
const WEIGHT_DIVERSITY: f64 = 0.20;
const WEIGHT_DEPENDENCY: f64 = 0.15;
const WEIGHT_COST_FIT: f64 = 0.15;
const WEIGHT_RECENCY: f64 = 0.10;

const TERMINATION_MARKERS: &[&str] = &["done", "final answer", "conclusion"];

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
}

fn word_overlap(a: &str, b: &str) -> f64 {
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count() as f64;
    let union = words_a.union(&words_b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn relevance(candidate: &SpeakerCandidate, last_message_norm: &str) -> f64 {
    word_overlap(&normalize(&candidate.expertise), last_message_norm)
}

/// Penalizes a speaker used in the last `consecutive_repeat_limit` turns of
/// `speaker_history`; 1.0 if they were not among those recent speakers.
fn diversity(candidate: &SpeakerCandidate, ctx: &SelectionContext) -> f64 {
    let window_start = ctx.speaker_history.len().saturating_sub(ctx.consecutive_repeat_limit as usize);
    let recent = &ctx.speaker_history[window_start..];
    if recent.iter().any(|id| id == &candidate.agent_id) {
        0.0
    } else {
        1.0
    }
}

fn dependency_satisfaction(candidate: &SpeakerCandidate, ctx: &SelectionContext) -> f64 {
    if candidate.dependencies.is_empty() {
        return 1.0;
    }
    let satisfied = candidate
        .dependencies
        .iter()
        .filter(|dep| ctx.spoken_agents.iter().any(|spoken| spoken == *dep))
        .count();
    satisfied as f64 / candidate.dependencies.len() as f64
}

fn cost_fit(candidate: &SpeakerCandidate, ctx: &SelectionContext) -> f64 {
    let budget = ctx.remaining_budget.as_f64();
    if budget <= 0.0 {
        return 0.0;
    }
    (1.0 - candidate.estimated_cost.as_f64() / budget).clamp(0.0, 1.0)
}

/// Rewards agents that have gone longer without speaking (or never spoke),
/// distinct from `diversity`'s hard within-window veto.
fn recency(candidate: &SpeakerCandidate, ctx: &SelectionContext) -> f64 {
    match candidate.last_spoken_turn {
        None => 1.0,
        Some(last_turn) => {
            let turns_since = ctx.turn_index.saturating_sub(last_turn) as f64;
            (turns_since / ctx.max_turns.max(1) as f64).clamp(0.0, 1.0)
        }
    }
}

fn weighted_score(candidate: &SpeakerCandidate, ctx: &SelectionContext, last_message_norm: &str) -> f64 {
    WEIGHT_RELEVANCE * relevance(candidate, last_message_norm)
        + WEIGHT_DIVERSITY * diversity(candidate, ctx)
        + WEIGHT_DEPENDENCY * dependency_satisfaction(candidate, ctx)
        + WEIGHT_COST_FIT * cost_fit(candidate, ctx)
        + WEIGHT_RECENCY * recency(candidate, ctx)
}

fn has_termination_marker(message: &str) -> bool {
    let norm = message.to_lowercase();
    TERMINATION_MARKERS.iter().any(|marker| norm.contains(marker))
}

/// In-loop mode (§4.2, mode 2): score every eligible candidate and either
/// pick the highest scorer or terminate, per the conditions in order —
/// turn budget, explicit marker, max turns, single-agent-answered.
pub fn select_next_speaker(candidates: &[SpeakerCandidate], ctx: &SelectionContext) -> SelectionOutcome {
    if ctx.turn_index >= ctx.max_turns {
        return SelectionOutcome::Terminate(TerminationReason::MaxTurnsReached);
    }
    if ctx.turn_index > 0 && has_termination_marker(ctx.last_message) {
        return SelectionOutcome::Terminate(TerminationReason::ExplicitMarker);
    }
    if ctx.single_agent_mode && !ctx.spoken_agents.is_empty() {
        return SelectionOutcome::Terminate(TerminationReason::SingleAgentAnswered);
    }
    if candidates.is_empty() {
        return SelectionOutcome::Terminate(TerminationReason::NoEligibleSpeakers);
    }

    // Anti-starvation (§8): a speaker used for more than `consecutive_repeat_limit`
    // consecutive turns is excluded outright whenever another eligible agent
    // passes the check; if every candidate is in the repeat window (e.g. a
    // single-agent pool), the veto is lifted rather than starving selection.
    let eligible: Vec<&SpeakerCandidate> = candidates.iter().filter(|c| diversity(c, ctx) > 0.0).collect();
    let pool: Vec<&SpeakerCandidate> = if eligible.is_empty() { candidates.iter().collect() } else { eligible };

    let last_message_norm = normalize(ctx.last_message);

    let mut best: Option<(&SpeakerCandidate, f64)> = None;
    for candidate in pool {
        let score = weighted_score(candidate, ctx, &last_message_norm);
        best = Some(match best {
            None => (candidate, score),
            Some((current, current_score)) => {
                if score > current_score {
                    (candidate, score)
                } else if (score - current_score).abs() < f64::EPSILON {
                    // tie-break: lower estimated cost, then stable id ordering
                    if candidate.estimated_cost < current.estimated_cost
                        || (candidate.estimated_cost == current.estimated_cost && candidate.agent_id < current.agent_id)
                    {
                        (candidate, score)
                    } else {
                        (current, current_score)
                    }
                } else {
                    (current, current_score)
                }
            }
        });
    }

    let (winner, score) = best.expect("candidates is non-empty");
    SelectionOutcome::Speak { agent_id: winner.agent_id.clone(), score }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergio_types::Cost;

    fn candidate(id: &str, expertise: &str, cost: f64, last_spoken: Option<u32>) -> SpeakerCandidate {
        SpeakerCandidate {
            agent_id: id.to_string(),
            expertise: expertise.to_string(),
            dependencies: vec![],
            estimated_cost: Cost::from(cost),
            last_spoken_turn: last_spoken,
        }
    }

    fn ctx<'a>(history: &'a [String], spoken: &'a [String], last_message: &'a str, turn_index: u32) -> SelectionContext<'a> {
        SelectionContext {
            turn_index,
            last_message,
            speaker_history: history,
            spoken_agents: spoken,
            remaining_budget: Cost::from(1.0),
            max_turns: 5,
            single_agent_mode: false,
            consecutive_repeat_limit: 2,
        }
    }

    #[test]
    fn picks_most_relevant_eligible_agent() {
        let candidates = vec![
            candidate("billing", "billing invoices payments refund", 0.01, None),
            candidate("weather", "weather forecast temperature", 0.01, None),
        ];
        let c = ctx(&[], &[], "can you explain this refund to the customer", 1);
        match select_next_speaker(&candidates, &c) {
            SelectionOutcome::Speak { agent_id, .. } => assert_eq!(agent_id, "billing"),
            other => panic!("expected a speaker, got {other:?}"),
        }
    }

    #[test]
    fn never_repeats_the_same_speaker_beyond_the_limit() {
        let candidates = vec![
            candidate("a", "general assistant", 0.01, Some(2)),
            candidate("b", "general assistant", 0.01, None),
        ];
        let history = vec!["a".to_string(), "a".to_string()];
        let c = ctx(&history, &history, "continue please", 3);
        match select_next_speaker(&candidates, &c) {
            SelectionOutcome::Speak { agent_id, .. } => assert_eq!(agent_id, "b"),
            other => panic!("expected a speaker, got {other:?}"),
        }
    }

    #[test]
    fn terminates_on_explicit_marker() {
        let candidates = vec![candidate("a", "general", 0.01, None)];
        let c = ctx(&[], &[], "That's my final answer.", 2);
        assert!(matches!(
            select_next_speaker(&candidates, &c),
            SelectionOutcome::Terminate(TerminationReason::ExplicitMarker)
        ));
    }

    #[test]
    fn terminates_when_max_turns_reached() {
        let candidates = vec![candidate("a", "general", 0.01, None)];
        let mut c = ctx(&[], &[], "keep going", 5);
        c.max_turns = 5;
        assert!(matches!(
            select_next_speaker(&candidates, &c),
            SelectionOutcome::Terminate(TerminationReason::MaxTurnsReached)
        ));
    }

    #[test]
    fn single_agent_mode_terminates_after_one_answer() {
        let candidates = vec![candidate("orchestrator", "general", 0.01, None)];
        let spoken = vec!["orchestrator".to_string()];
        let mut c = ctx(&[], &spoken, "hello", 1);
        c.single_agent_mode = true;
        assert!(matches!(
            select_next_speaker(&candidates, &c),
            SelectionOutcome::Terminate(TerminationReason::SingleAgentAnswered)
        ));
    }

    #[test]
    fn equal_scores_break_ties_by_stable_id_ordering() {
        let candidates = vec![
            candidate("zeta", "unrelated", 0.02, None),
            candidate("alpha", "unrelated", 0.02, None),
        ];
        let c = ctx(&[], &[], "no overlap here", 1);
        match select_next_speaker(&candidates, &c) {
            SelectionOutcome::Speak { agent_id, .. } => assert_eq!(agent_id, "alpha"),
            other => panic!("expected a speaker, got {other:?}"),
        }
    }

    #[test]
    fn lower_estimated_cost_wins_when_otherwise_equal() {
        let candidates = vec![
            candidate("zeta", "unrelated", 0.05, None),
            candidate("alpha", "unrelated", 0.01, None),
        ];
        let c = ctx(&[], &[], "no overlap here", 1);
        match select_next_speaker(&candidates, &c) {
            SelectionOutcome::Speak { agent_id, .. } => assert_eq!(agent_id, "alpha"),
            other => panic!("expected a speaker, got {other:?}"),
        }
    }
}
