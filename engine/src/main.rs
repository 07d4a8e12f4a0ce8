use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use convergio_approvals::ApprovalStore;
use convergio_breaker::{BreakerConfig, CircuitBreaker};
use convergio_ledger::CostLedger;
use convergio_observability::{emit_event, init_process_logging, ObservabilityEvent, ProcessKind};
use convergio_orchestrator::{
    GroupOrchestrator, OrchestratorContext, OrchestratorEvent, OrchestratorOptions, OrchestratorRequest,
};
use convergio_providers::{HttpCompatibleProvider, MockProvider, PriceTable, Provider, ProviderRegistry};
use convergio_rag::{MockRetrievalStore, RagCache, RagContextInjector};
use convergio_registry::AgentRegistry;
use convergio_runner::NoopToolExecutor;
use convergio_tracker::TurnTracker;
use convergio_types::Cost;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

/// On-disk configuration shape (§10.3): everything a deployment might want
/// to override has a sane default baked in, so the engine runs with zero
/// config; the provider API key is the one thing that only ever comes from
/// the environment, never from this file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EngineConfig {
    agents_dir: PathBuf,
    state_dir: PathBuf,
    provider_id: String,
    provider_base_url: String,
    model: String,
    orchestrator_agent_id: String,
    #[serde(skip, default)]
    breaker: BreakerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agents_dir: PathBuf::from("agents"),
            state_dir: PathBuf::from(".convergio"),
            provider_id: "openai".to_string(),
            provider_base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            orchestrator_agent_id: "orchestrator".to_string(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl EngineConfig {
    fn load(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}

#[derive(Parser, Debug)]
#[command(name = "convergio-engine")]
#[command(about = "Composition root for the Multi-Agent Orchestration Core")]
struct Cli {
    /// Optional JSON config file (see `EngineConfig`); unset fields fall
    /// back to the built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one conversation to completion and print the final outcome.
    Run {
        message: String,
        #[arg(long, default_value = "cli-user")]
        user_id: String,
        #[arg(long)]
        conv_id: Option<String>,
        #[arg(long)]
        budget_limit_usd: Option<String>,
        #[arg(long)]
        max_turns: Option<u32>,
        #[arg(long, default_value_t = false)]
        no_rag: bool,
        #[arg(long, default_value_t = false)]
        no_hitl: bool,
    },
    /// Run one conversation, printing every `OrchestratorEvent` as JSON
    /// lines as they happen.
    Stream {
        message: String,
        #[arg(long, default_value = "cli-user")]
        user_id: String,
        #[arg(long)]
        conv_id: Option<String>,
        #[arg(long)]
        budget_limit_usd: Option<String>,
        #[arg(long)]
        max_turns: Option<u32>,
        #[arg(long, default_value_t = false)]
        no_rag: bool,
        #[arg(long, default_value_t = false)]
        no_hitl: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_ref())?;

    let (_guard, logging_info) = init_process_logging(ProcessKind::Engine, &config.state_dir.join("logs"), 7)
        .context("initializing process logging")?;
    info!(logs_dir = %logging_info.logs_dir, "convergio-engine starting");

    match cli.command {
        Command::Run { message, user_id, conv_id, budget_limit_usd, max_turns, no_rag, no_hitl } => {
            let ctx = build_context(&config).await?;
            let orchestrator = GroupOrchestrator::new(ctx);
            let request = build_request(conv_id, user_id, message, budget_limit_usd, max_turns, no_rag, no_hitl)?;
            let outcome = orchestrator.orchestrate(request, CancellationToken::new()).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Stream { message, user_id, conv_id, budget_limit_usd, max_turns, no_rag, no_hitl } => {
            let ctx = build_context(&config).await?;
            let orchestrator = GroupOrchestrator::new(ctx);
            let request = build_request(conv_id, user_id, message, budget_limit_usd, max_turns, no_rag, no_hitl)?;
            let mut events = orchestrator.stream(request, CancellationToken::new());
            while let Some(event) = events.next().await {
                println!("{}", serde_json::to_string(&event)?);
                if matches!(event, OrchestratorEvent::OrchestratorFinal { .. }) {
                    break;
                }
            }
        }
    }

    Ok(())
}

fn build_request(
    conv_id: Option<String>,
    user_id: String,
    message: String,
    budget_limit_usd: Option<String>,
    max_turns: Option<u32>,
    no_rag: bool,
    no_hitl: bool,
) -> anyhow::Result<OrchestratorRequest> {
    let budget_limit_usd = budget_limit_usd
        .map(|raw| raw.parse::<Cost>())
        .transpose()
        .context("invalid --budget-limit-usd")?;
    Ok(OrchestratorRequest {
        conv_id,
        user_id,
        message,
        options: OrchestratorOptions {
            budget_limit_usd,
            rag_in_loop: Some(!no_rag),
            hitl_enabled: Some(!no_hitl),
            max_turns,
            timeout_s: None,
        },
    })
}

async fn build_context(config: &EngineConfig) -> anyhow::Result<Arc<OrchestratorContext>> {
    std::fs::create_dir_all(&config.state_dir).context("creating state directory")?;
    std::fs::create_dir_all(&config.agents_dir).context("creating agents directory")?;

    let registry = Arc::new(AgentRegistry::new(config.agents_dir.clone(), HashSet::new()));
    let loaded = registry.scan_and_load().await.context("loading agent definitions")?;
    emit_event(Level::INFO, ProcessKind::Engine, ObservabilityEvent {
        detail: Some(&format!("loaded {loaded} agent definitions")),
        ..ObservabilityEvent::new("registry_loaded", "engine")
    });

    let providers = Arc::new(ProviderRegistry::new());
    let provider: Arc<dyn Provider> = match std::env::var("CONVERGIO_API_KEY") {
        Ok(api_key) if !api_key.trim().is_empty() => Arc::new(HttpCompatibleProvider::new(
            config.provider_id.clone(),
            config.provider_id.clone(),
            config.provider_base_url.clone(),
            Some(api_key),
        )),
        _ => {
            tracing::warn!("CONVERGIO_API_KEY not set, falling back to the deterministic mock provider");
            Arc::new(MockProvider::new(config.provider_id.clone()))
        }
    };
    providers.register(provider).await;

    let price_table = Arc::new(PriceTable::default());
    let ledger = Arc::new(CostLedger::open(&config.state_dir.join("ledger.sqlite3")).await.context("opening cost ledger")?);
    let breaker = Arc::new(CircuitBreaker::new(ledger.clone(), config.breaker.clone()));

    let rag_store = Arc::new(MockRetrievalStore::with_facts(Vec::new()));
    let rag_cache = RagCache::open(&config.state_dir.join("rag_cache.sqlite3")).await.context("opening RAG cache")?;
    let rag = Arc::new(RagContextInjector::new(rag_store, rag_cache));

    let approvals = Arc::new(ApprovalStore::new());
    let tracker = Arc::new(TurnTracker::new());
    let tool_executor = Arc::new(NoopToolExecutor);

    Ok(Arc::new(OrchestratorContext::new(
        registry,
        providers,
        price_table,
        ledger,
        breaker,
        rag,
        approvals,
        tracker,
        tool_executor,
        config.orchestrator_agent_id.clone(),
        config.provider_id.clone(),
    )))
}
