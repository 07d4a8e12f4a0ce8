use std::collections::HashMap;
use std::sync::Arc;

use convergio_approvals::ApprovalStore;
use convergio_breaker::CircuitBreaker;
use convergio_ledger::CostLedger;
use convergio_providers::{PriceTable, ProviderRegistry};
use convergio_rag::RagContextInjector;
use convergio_registry::AgentRegistry;
use convergio_runner::ToolExecutor;
use convergio_safety::SafetyGuardian;
use convergio_tracker::TurnTracker;
use tokio::sync::RwLock;

use crate::model::Conversation;

/// Every MAOC component handle the orchestrator depends on, constructed
/// once at process startup and shared by `Arc` (§9: "explicit process-scoped
/// services constructed at startup and passed by handle; no ambient
/// globals").
pub struct OrchestratorContext {
    pub registry: Arc<AgentRegistry>,
    pub providers: Arc<ProviderRegistry>,
    pub price_table: Arc<PriceTable>,
    pub ledger: Arc<CostLedger>,
    pub breaker: Arc<CircuitBreaker>,
    pub rag: Arc<RagContextInjector>,
    pub guardian: SafetyGuardian,
    pub approvals: Arc<ApprovalStore>,
    pub tracker: Arc<TurnTracker>,
    pub tool_executor: Arc<dyn ToolExecutor>,
    /// The agent id mission-routing always returns on the opening turn
    /// (§4.2 mode 1); must resolve in the registry.
    pub orchestrator_agent_id: String,
    /// Default provider consulted for every turn. Routing a model
    /// preference to a specific provider id is an external/config concern
    /// (vendor SDK selection is out of scope per §1); this field stands in
    /// for that external routing table.
    pub default_provider_id: String,
    pub conversations: RwLock<HashMap<String, Conversation>>,
}

impl OrchestratorContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AgentRegistry>,
        providers: Arc<ProviderRegistry>,
        price_table: Arc<PriceTable>,
        ledger: Arc<CostLedger>,
        breaker: Arc<CircuitBreaker>,
        rag: Arc<RagContextInjector>,
        approvals: Arc<ApprovalStore>,
        tracker: Arc<TurnTracker>,
        tool_executor: Arc<dyn ToolExecutor>,
        orchestrator_agent_id: impl Into<String>,
        default_provider_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            providers,
            price_table,
            ledger,
            breaker,
            rag,
            guardian: SafetyGuardian::new(),
            approvals,
            tracker,
            tool_executor,
            orchestrator_agent_id: orchestrator_agent_id.into(),
            default_provider_id: default_provider_id.into(),
            conversations: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_conversation(&self, conv_id: &str) -> Option<Conversation> {
        self.conversations.read().await.get(conv_id).cloned()
    }
}
