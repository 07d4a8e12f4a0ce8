//! Regex pattern tables for prompt-injection, disallowed-content, PII, and
//! high-risk-action detection. Pure pattern matching, no LLM call — same
//! heuristic-classifier style as `convergio_selector::classify`.

use std::sync::OnceLock;

use regex::Regex;

macro_rules! lazy_regex {
    ($name:ident, $pattern:expr) => {
        pub fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect(concat!(stringify!($name), " regex")))
        }
    };
}

lazy_regex!(
    injection,
    r"(?i)\b(ignore (all |the )?(previous|prior|above) (instructions|prompts?)|disregard (the )?(above|previous)|you are now|forget (your|all) (instructions|rules)|system prompt|reveal your (system )?prompt|jailbreak|developer mode|act as if there (are|is) no (restrictions|rules))\b"
);

lazy_regex!(
    exfiltration,
    r"(?i)\b(dump|export|exfiltrate|print out) (the |all )?(database|user data|credentials|api keys?|secrets?|customer records)\b"
);

lazy_regex!(
    disallowed_content,
    r"(?i)\b(how to (make|build|synthesize) (a bomb|explosives|a weapon)|child (sexual|exploitation))\b"
);

lazy_regex!(
    high_risk_action,
    r"(?i)\b(delete (all|every) (production|prod)?\s*(data|database|records?)|drop (table|database)|wire transfer|transfer \$?\d|rm -rf|shut ?down production|grant (admin|root|superuser) access|terminate all (instances|accounts))\b"
);

lazy_regex!(email, r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b");

lazy_regex!(
    phone,
    r"\b(\+?1[-. ]?)?\(?\d{3}\)?[-. ]\d{3}[-. ]\d{4}\b"
);

lazy_regex!(ssn, r"\b\d{3}-\d{2}-\d{4}\b");

lazy_regex!(credit_card, r"\b(?:\d[ -]*?){13,16}\b");

lazy_regex!(api_key, r"\b(sk|pk|rk)-[A-Za-z0-9]{16,}\b");
