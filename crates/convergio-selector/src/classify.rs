//! Mission-routing classifier — pure heuristic, no LLM call, signal scoring
//! over the opening user message.

use std::sync::OnceLock;

use crate::types::MessageClass;

static RE_GREETING: OnceLock<regex::Regex> = OnceLock::new();
static RE_SIMPLE_KW: OnceLock<regex::Regex> = OnceLock::new();
static RE_COMPLEX_KW: OnceLock<regex::Regex> = OnceLock::new();
static RE_MULTI_PART: OnceLock<regex::Regex> = OnceLock::new();

fn re_greeting() -> &'static regex::Regex {
    RE_GREETING.get_or_init(|| {
        regex::Regex::new(r"(?i)^\s*(hi|hello|hey|good (morning|afternoon|evening)|greetings|yo|thanks|thank you|bye|goodbye)[\s!.,]*$")
            .expect("greeting regex")
    })
}

fn re_simple_kw() -> &'static regex::Regex {
    RE_SIMPLE_KW.get_or_init(|| {
        regex::Regex::new(r"(?i)\b(what is|what's|define|spell|translate|convert|when is|who is|how do you say)\b")
            .expect("simple keyword regex")
    })
}

fn re_complex_kw() -> &'static regex::Regex {
    RE_COMPLEX_KW.get_or_init(|| {
        regex::Regex::new(r"(?i)\b(audit|architect|strategy|comprehensive|end.to.end|multi.?step|analysis|research|investigate|design a|plan for|roadmap)\b")
            .expect("complex keyword regex")
    })
}

fn re_multi_part() -> &'static regex::Regex {
    RE_MULTI_PART.get_or_init(|| regex::Regex::new(r"(?i)\b(and then|after that|also|additionally|step \d|\d+\)|\d+\.)\b").expect("multi-part regex"))
}

/// Classify the opening user message into one of four mission-routing
/// buckets. Word count and keyword signals combine into a score; greeting
/// is checked first as a whole-message match since it otherwise scores
/// identically to "simple".
pub fn classify(message: &str) -> MessageClass {
    let trimmed = message.trim();
    if trimmed.is_empty() || re_greeting().is_match(trimmed) {
        return MessageClass::Greeting;
    }

    let word_count = trimmed.split_whitespace().count();
    let mut score: i32 = 0;

    if re_complex_kw().is_match(trimmed) {
        score += 4;
    }
    if re_multi_part().is_match(trimmed) {
        score += 2;
    }
    if re_simple_kw().is_match(trimmed) {
        score -= 2;
    }
    if word_count > 40 {
        score += 3;
    } else if word_count > 15 {
        score += 1;
    } else if word_count <= 6 {
        score -= 1;
    }

    match score {
        i32::MIN..=-1 => MessageClass::Simple,
        0..=2 => MessageClass::Standard,
        _ => MessageClass::Complex,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greets_are_classified_as_greeting() {
        assert_eq!(classify("hello"), MessageClass::Greeting);
        assert_eq!(classify("  Hi!  "), MessageClass::Greeting);
        assert_eq!(classify("thanks"), MessageClass::Greeting);
    }

    #[test]
    fn short_factual_question_is_simple() {
        assert_eq!(classify("What is the capital of France?"), MessageClass::Simple);
    }

    #[test]
    fn mid_length_request_is_standard() {
        assert_eq!(
            classify("Can you write a function that parses this config file and validates it?"),
            MessageClass::Standard
        );
    }

    #[test]
    fn long_multi_part_analysis_is_complex() {
        let msg = "Please write a comprehensive architecture audit of our billing system, \
                    covering data flow, failure modes, and a migration roadmap. Also include \
                    a cost analysis. Step 1: inventory the services. Step 2: identify risks. \
                    Step 3: propose a phased plan with timelines and owners for each phase.";
        assert_eq!(classify(msg), MessageClass::Complex);
    }

    #[test]
    fn empty_message_is_greeting() {
        assert_eq!(classify(""), MessageClass::Greeting);
    }
}
