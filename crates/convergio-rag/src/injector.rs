use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::cache::RagCache;
use crate::rerank::{dedup, detect_and_resolve_conflicts, rerank};
use crate::store::RetrievalStore;
use crate::types::{Fact, RagContext, RetrievalQuery};

const DEFAULT_TTL_SECS: i64 = 60;
const DEFAULT_MAX_FACTS: usize = 5;
const MAX_CONTEXT_FRACTION: f64 = 0.20;
const CANDIDATE_FANOUT: usize = 20;

pub struct RagContextInjector {
    store: Arc<dyn RetrievalStore>,
    cache: RagCache,
    ttl_secs: i64,
    max_facts: usize,
}

impl RagContextInjector {
    pub fn new(store: Arc<dyn RetrievalStore>, cache: RagCache) -> Self {
        Self {
            store,
            cache,
            ttl_secs: DEFAULT_TTL_SECS,
            max_facts: DEFAULT_MAX_FACTS,
        }
    }

    pub fn with_ttl_secs(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_max_facts(mut self, max_facts: usize) -> Self {
        self.max_facts = max_facts;
        self
    }

    fn cache_key(query: &RetrievalQuery) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.speaker_id.as_bytes());
        hasher.update(b"|");
        hasher.update(query.last_user_message.as_bytes());
        hasher.update(b"|");
        for turn in &query.recent_turns {
            hasher.update(turn.as_bytes());
            hasher.update(b"\x1e");
        }
        format!("{:x}", hasher.finalize())
    }

    /// Build (or fetch cached) context for one turn. Never fails the
    /// caller's turn: a retrieval error produces an empty `degraded`
    /// bundle instead of propagating (spec §4.3 failure policy).
    pub async fn build_context(&self, query: &RetrievalQuery, max_context_tokens: u32) -> RagContext {
        let cache_key = Self::cache_key(query);

        if let Ok(Some(cached)) = self.cache.get(&cache_key).await {
            return cached;
        }

        let candidates = match self.store.search(query, CANDIDATE_FANOUT).await {
            Ok(facts) => facts,
            Err(e) => {
                tracing::warn!(error = %e, speaker_id = %query.speaker_id, "rag retrieval failed, returning degraded bundle");
                return RagContext::empty_degraded(cache_key, self.ttl_secs);
            }
        };

        let deduped = dedup(candidates);
        let ranked = rerank(deduped, &query.last_user_message);

        let token_budget = ((max_context_tokens as f64) * MAX_CONTEXT_FRACTION) as u64;
        let mut selected: Vec<Fact> = Vec::new();
        let mut used_tokens: u64 = 0;
        for fact in ranked {
            if selected.len() >= self.max_facts {
                break;
            }
            let fact_tokens = convergio_providers::estimate_tokens(&fact.text);
            if used_tokens + fact_tokens > token_budget && !selected.is_empty() {
                break;
            }
            used_tokens += fact_tokens;
            selected.push(fact);
        }

        let conflict_note = detect_and_resolve_conflicts(&mut selected);
        let sources = selected.iter().map(|f| f.source_id.clone()).collect();

        let context = RagContext {
            facts: selected,
            sources,
            cache_key: cache_key.clone(),
            built_at: Utc::now(),
            ttl_secs: self.ttl_secs,
            degraded: false,
            conflict_note,
        };

        if let Err(e) = self.cache.put(&context).await {
            tracing::warn!(error = %e, "failed to cache rag context bundle");
        }

        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockRetrievalStore;
    use chrono::Duration;

    fn query() -> RetrievalQuery {
        RetrievalQuery {
            conv_id: "conv-1".to_string(),
            speaker_id: "agent-a".to_string(),
            last_user_message: "what is the retry policy".to_string(),
            recent_turns: vec!["hello".to_string()],
        }
    }

    fn fact(source: &str, text: &str) -> Fact {
        Fact {
            source_id: source.to_string(),
            text: text.to_string(),
            trust: 0.8,
            ts: Utc::now() - Duration::hours(1),
        }
    }

    async fn injector(store: Arc<dyn RetrievalStore>) -> RagContextInjector {
        let cache = RagCache::open_in_memory().await.unwrap();
        RagContextInjector::new(store, cache)
    }

    #[tokio::test]
    async fn builds_bundle_from_store_and_caches_it() {
        let store = Arc::new(MockRetrievalStore::with_facts(vec![fact(
            "s1",
            "the retry policy allows 3 attempts",
        )]));
        let injector = injector(store).await;
        let context = injector.build_context(&query(), 8000).await;
        assert!(!context.degraded);
        assert_eq!(context.facts.len(), 1);

        let cached = injector.build_context(&query(), 8000).await;
        assert_eq!(cached.cache_key, context.cache_key);
    }

    #[tokio::test]
    async fn retrieval_failure_yields_degraded_empty_bundle() {
        let store = Arc::new(MockRetrievalStore::failing());
        let injector = injector(store).await;
        let context = injector.build_context(&query(), 8000).await;
        assert!(context.degraded);
        assert!(context.facts.is_empty());
    }

    #[tokio::test]
    async fn truncates_to_max_facts() {
        let facts: Vec<Fact> = (0..10)
            .map(|i| fact(&format!("s{i}"), &format!("distinct fact number {i} about retries")))
            .collect();
        let store = Arc::new(MockRetrievalStore::with_facts(facts));
        let injector = injector(store).await;
        let context = injector.build_context(&query(), 8000).await;
        assert!(context.facts.len() <= 5);
    }
}
