use std::collections::HashSet;

use chrono::Utc;

use crate::types::Fact;

/// Antonym pairs used as a cheap conflict trigger: two facts that each
/// contain one side of a pair are flagged as directly contradicting.
const ANTONYM_TRIGGERS: &[(&str, &str)] = &[
    ("increase", "decrease"),
    ("increased", "decreased"),
    ("enabled", "disabled"),
    ("supports", "does not support"),
    ("deprecated", "active"),
    ("available", "unavailable"),
    ("approved", "rejected"),
];

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop facts that are duplicates by `(source_id, normalized text)`, or
/// whose normalized text exactly matches one already kept from any source
/// (near-duplicate across sources).
pub fn dedup(facts: Vec<Fact>) -> Vec<Fact> {
    let mut seen_by_source: HashSet<(String, String)> = HashSet::new();
    let mut seen_text: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(facts.len());
    for fact in facts {
        let norm = normalize(&fact.text);
        let key = (fact.source_id.clone(), norm.clone());
        if seen_by_source.contains(&key) || seen_text.contains(&norm) {
            continue;
        }
        seen_by_source.insert(key);
        seen_text.insert(norm);
        out.push(fact);
    }
    out
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

/// Score = relevance (word overlap with the query) x recency (exponential
/// decay, half-life 24h) x source trust. Highest score first.
pub fn rerank(mut facts: Vec<Fact>, query: &str) -> Vec<Fact> {
    let query_norm = normalize(query);
    let now = Utc::now();
    facts.sort_by(|a, b| {
        let score_a = score(a, &query_norm, now);
        let score_b = score(b, &query_norm, now);
        score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
    });
    facts
}

fn score(fact: &Fact, query_norm: &str, now: chrono::DateTime<Utc>) -> f64 {
    let relevance = word_overlap(&normalize(&fact.text), query_norm);
    let age_hours = (now - fact.ts).num_seconds().max(0) as f64 / 3600.0;
    let recency = 0.5f64.powf(age_hours / 24.0);
    let trust = fact.trust.clamp(0.0, 1.0);
    // Facts with zero word overlap still carry some weight from recency and
    // trust so a store that can't compute fine-grained relevance doesn't
    // starve every result.
    (relevance + 0.05) * recency * trust
}

fn extract_number(text: &str) -> Option<f64> {
    let mut current = String::new();
    let mut found: Option<f64> = None;
    for ch in text.chars().chain(std::iter::once(' ')) {
        if ch.is_ascii_digit() || ch == '.' {
            current.push(ch);
        } else if !current.is_empty() {
            if let Ok(n) = current.parse::<f64>() {
                found = Some(n);
            }
            current.clear();
        }
    }
    found
}

fn directly_contradicts(a: &Fact, b: &Fact) -> bool {
    let na = normalize(&a.text);
    let nb = normalize(&b.text);
    for (left, right) in ANTONYM_TRIGGERS {
        if (na.contains(left) && nb.contains(right)) || (na.contains(right) && nb.contains(left)) {
            return true;
        }
    }
    if let (Some(x), Some(y)) = (extract_number(&a.text), extract_number(&b.text)) {
        let base = x.abs().max(y.abs());
        if base > 0.0 && (x - y).abs() / base > 0.10 {
            return true;
        }
    }
    false
}

/// Pairwise conflict check across the already-reranked, already-truncated
/// fact set. On a detected conflict, drops the lower-trust fact and
/// returns a human-readable note; keeps the first conflict found (facts
/// are few by the time this runs, so exhaustive re-scanning is cheap).
pub fn detect_and_resolve_conflicts(facts: &mut Vec<Fact>) -> Option<String> {
    let mut note = None;
    let mut i = 0;
    while i < facts.len() {
        let mut j = i + 1;
        let mut conflict_at = None;
        while j < facts.len() {
            if directly_contradicts(&facts[i], &facts[j]) {
                conflict_at = Some(j);
                break;
            }
            j += 1;
        }
        if let Some(j) = conflict_at {
            let (keep, drop) = if facts[i].trust >= facts[j].trust { (i, j) } else { (j, i) };
            note = Some(format!(
                "conflict between source {} and source {}; kept higher-trust source {}",
                facts[i].source_id, facts[j].source_id, facts[keep].source_id
            ));
            facts.remove(drop);
            continue;
        }
        i += 1;
    }
    note
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn fact(source: &str, text: &str, trust: f64, age_hours: i64) -> Fact {
        Fact {
            source_id: source.to_string(),
            text: text.to_string(),
            trust,
            ts: Utc::now() - Duration::hours(age_hours),
        }
    }

    #[test]
    fn dedup_removes_same_source_duplicate() {
        let facts = vec![
            fact("s1", "The API supports retries.", 0.9, 1),
            fact("s1", "The API supports retries.", 0.9, 1),
        ];
        assert_eq!(dedup(facts).len(), 1);
    }

    #[test]
    fn dedup_removes_cross_source_near_duplicate() {
        let facts = vec![
            fact("s1", "the api supports retries", 0.9, 1),
            fact("s2", "The API Supports Retries!", 0.5, 1),
        ];
        assert_eq!(dedup(facts).len(), 1);
    }

    #[test]
    fn rerank_prefers_more_relevant_and_recent() {
        let facts = vec![
            fact("s1", "unrelated topic entirely", 1.0, 200),
            fact("s2", "retry policy for the payments api", 1.0, 1),
        ];
        let ranked = rerank(facts, "payments api retry policy");
        assert_eq!(ranked[0].source_id, "s2");
    }

    #[test]
    fn detects_antonym_conflict_and_keeps_higher_trust() {
        let mut facts = vec![
            fact("s1", "the feature is enabled by default", 0.9, 1),
            fact("s2", "the feature is disabled by default", 0.4, 1),
        ];
        let note = detect_and_resolve_conflicts(&mut facts);
        assert!(note.is_some());
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].source_id, "s1");
    }

    #[test]
    fn detects_numeric_disagreement_over_ten_percent() {
        let mut facts = vec![
            fact("s1", "the limit is 100 requests per minute", 0.8, 1),
            fact("s2", "the limit is 150 requests per minute", 0.3, 1),
        ];
        let note = detect_and_resolve_conflicts(&mut facts);
        assert!(note.is_some());
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].source_id, "s1");
    }

    #[test]
    fn no_conflict_for_close_numbers() {
        let mut facts = vec![
            fact("s1", "the limit is 100 requests per minute", 0.8, 1),
            fact("s2", "the limit is 105 requests per minute", 0.3, 1),
        ];
        let note = detect_and_resolve_conflicts(&mut facts);
        assert!(note.is_none());
        assert_eq!(facts.len(), 2);
    }
}
