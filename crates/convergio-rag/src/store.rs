use async_trait::async_trait;

use crate::error::RagError;
use crate::types::{Fact, RetrievalQuery};

/// Boundary to an external retrieval backend (vector store, search index,
/// knowledge graph...). Vector store internals are out of scope for this
/// crate; implementors own embedding and indexing.
#[async_trait]
pub trait RetrievalStore: Send + Sync {
    async fn search(&self, query: &RetrievalQuery, limit: usize) -> Result<Vec<Fact>, RagError>;
}

/// Deterministic in-memory store for tests: returns a scripted fact set,
/// optionally filtered by speaker, or a scripted failure.
pub struct MockRetrievalStore {
    facts: Vec<Fact>,
    fail: bool,
}

impl MockRetrievalStore {
    pub fn with_facts(facts: Vec<Fact>) -> Self {
        Self { facts, fail: false }
    }

    pub fn failing() -> Self {
        Self {
            facts: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl RetrievalStore for MockRetrievalStore {
    async fn search(&self, _query: &RetrievalQuery, limit: usize) -> Result<Vec<Fact>, RagError> {
        if self.fail {
            return Err(RagError::Retrieval("mock store unavailable".to_string()));
        }
        Ok(self.facts.iter().take(limit).cloned().collect())
    }
}
