use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use chrono::Utc;
use convergio_approvals::{AwaitOutcome, NewApprovalRequest};
use convergio_breaker::{AdmitRequest, Scope};
use convergio_ledger::CostLedgerEntry;
use convergio_observability::{emit_event, ObservabilityEvent, ProcessKind};
use convergio_providers::ChatMessage;
use convergio_registry::AgentFilter;
use convergio_runner::{run_turn, CompletionReason, RunTurnInput, RunnerConfig};
use convergio_safety::{OutputVerdict, PromptVerdict};
use convergio_selector::{route_opening_message, select_next_speaker, SelectionContext, SelectionOutcome, SpeakerCandidate, TerminationReason};
use convergio_tracker::RecordTurnInput;
use convergio_types::{new_id, Cost, MessageRole};
use futures::{Stream, StreamExt};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::context::OrchestratorContext;
use crate::model::{Conversation, ConversationStatus, Message, MessageTokenUsage};
use crate::events::{OrchestratorEvent, OrchestratorRequest, OrchestrationOutcome};

const APPROVAL_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TURN_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_MAX_TURNS: u32 = 10;
const DEFAULT_TIMEOUT_SECS: u64 = 120;
/// Used when a request carries no `budget_limit_usd`: a generous ceiling
/// rather than a hard cap, so the budget machinery still runs end to end
/// for requests that opt out of setting one explicitly.
const UNBOUNDED_BUDGET_USD: &str = "1000000";

/// Outcome of one internal stage that can either continue the turn loop or
/// terminate the conversation.
enum Termination {
    Done,
    BudgetExceeded,
    SafetyBlocked(String),
    ProviderUnavailable(String),
    Timeout,
    Cancelled,
    Error(String),
}

impl Termination {
    fn status(&self) -> ConversationStatus {
        match self {
            Termination::Done => ConversationStatus::Done,
            Termination::BudgetExceeded => ConversationStatus::BudgetExceeded,
            Termination::SafetyBlocked(_) => ConversationStatus::SafetyBlocked,
            Termination::ProviderUnavailable(_) => ConversationStatus::Error,
            Termination::Timeout => ConversationStatus::Timeout,
            Termination::Cancelled => ConversationStatus::Cancelled,
            Termination::Error(_) => ConversationStatus::Error,
        }
    }

    fn message(&self, fallback: &str) -> String {
        match self {
            Termination::Done => fallback.to_string(),
            Termination::BudgetExceeded => "conversation budget exhausted".to_string(),
            Termination::SafetyBlocked(reason) => reason.clone(),
            Termination::ProviderUnavailable(reason) => reason.clone(),
            Termination::Timeout => "conversation deadline exceeded".to_string(),
            Termination::Cancelled => "cancelled".to_string(),
            Termination::Error(reason) => reason.clone(),
        }
    }
}

/// Composes every MAOC component into the bounded group-chat state machine
/// (C10, spec §4.10): ADMIT -> PREPARE -> SELECT -> RETRIEVE ->
/// VALIDATE_INPUT -> RUN_TURN -> POST_VALIDATE -> RECORD -> DECIDE_CONT.
pub struct GroupOrchestrator {
    ctx: Arc<OrchestratorContext>,
}

impl GroupOrchestrator {
    pub fn new(ctx: Arc<OrchestratorContext>) -> Self {
        Self { ctx }
    }

    /// Drive one request to completion, returning only the terminal
    /// outcome. Internally drains `stream()`.
    pub async fn orchestrate(&self, request: OrchestratorRequest, cancel: CancellationToken) -> OrchestrationOutcome {
        let conv_id = request.conv_id.clone().unwrap_or_else(|| new_id("conv"));
        let mut events = Box::pin(self.stream(request, cancel));
        let mut outcome = OrchestrationOutcome {
            conv_id: conv_id.clone(),
            status: ConversationStatus::Error,
            message: "conversation produced no final event".to_string(),
            total_tokens: 0,
            total_cost: Cost::ZERO,
            agents_used: Vec::new(),
        };
        while let Some(event) = events.next().await {
            if let OrchestratorEvent::OrchestratorFinal { status, total_tokens, total_cost, agents_used, message } = event {
                outcome = OrchestrationOutcome {
                    conv_id: conv_id.clone(),
                    status,
                    message,
                    total_tokens,
                    total_cost,
                    agents_used,
                };
            }
        }
        outcome
    }

    /// Stream every event of one request as it happens (spec §6).
    pub fn stream(&self, request: OrchestratorRequest, cancel: CancellationToken) -> Pin<Box<dyn Stream<Item = OrchestratorEvent> + Send>> {
        let ctx = self.ctx.clone();
        Box::pin(stream! {
            let conv_id = request.conv_id.clone().unwrap_or_else(|| new_id("conv"));
            let budget_limit = request
                .options
                .budget_limit_usd
                .unwrap_or_else(|| UNBOUNDED_BUDGET_USD.parse().expect("valid decimal literal"));
            let max_turns_override = request.options.max_turns;
            let deadline = Instant::now() + Duration::from_secs(request.options.timeout_s.unwrap_or(DEFAULT_TIMEOUT_SECS));

            let mut conversation = Conversation::new(conv_id.clone(), request.user_id.clone(), budget_limit);
            ctx.tracker.start_conversation(conv_id.clone(), budget_limit).await;

            // ADMIT
            // A zero budget must deny admission before any provider call is
            // attempted, independent of the breaker's own ledger utilization
            // check (which only trips once cost has actually been recorded).
            let admit_termination = if budget_limit.is_zero() {
                Some(Termination::BudgetExceeded)
            } else {
                let admit = ctx
                    .breaker
                    .admit(&AdmitRequest {
                        provider: ctx.default_provider_id.clone(),
                        agent_id: ctx.orchestrator_agent_id.clone(),
                        user_id: request.user_id.clone(),
                        estimated_cost: rust_decimal::Decimal::new(1, 2),
                    })
                    .await;
                if admit.allowed {
                    None
                } else {
                    let reason = admit.reason.unwrap_or_else(|| "circuit breaker open".to_string());
                    if matches!(admit.denied_scope, Some(Scope::Global)) && reason == "budget_exceeded" {
                        Some(Termination::BudgetExceeded)
                    } else {
                        Some(Termination::ProviderUnavailable(format!("admission denied: {reason}")))
                    }
                }
            };
            if let Some(termination) = admit_termination {
                let status = termination.status();
                let message = termination.message("");
                emit_event(Level::WARN, ProcessKind::Orchestrator, ObservabilityEvent {
                    status: Some(status_label(status)),
                    detail: Some(&message),
                    conv_id: Some(&conv_id),
                    ..ObservabilityEvent::new("admission_denied", "orchestrator")
                });
                yield OrchestratorEvent::Error { kind: status_label(status).to_string(), retryable: false, details: message.clone() };
                conversation.finish(status);
                ctx.conversations.write().await.insert(conv_id.clone(), conversation);
                yield OrchestratorEvent::OrchestratorFinal {
                    status,
                    total_tokens: 0,
                    total_cost: Cost::ZERO,
                    agents_used: Vec::new(),
                    message,
                };
                return;
            }

            // PREPARE
            conversation.push_message(Message {
                role: MessageRole::User,
                speaker_id: None,
                content: request.message.clone(),
                tool_calls: Vec::new(),
                tool_results: Vec::new(),
                token_usage: None,
                created_at: Utc::now(),
                turn_index: 0,
                redacted: false,
            });

            let mut turn_index: u32 = 0;
            let mut last_message = request.message.clone();
            let mut speaker_history: Vec<String> = Vec::new();
            let mut max_turns = DEFAULT_MAX_TURNS;
            let mut single_agent_mode = false;
            let mut termination: Option<Termination> = None;

            loop {
                if cancel.is_cancelled() {
                    termination = Some(Termination::Cancelled);
                    break;
                }
                if Instant::now() >= deadline {
                    termination = Some(Termination::Timeout);
                    break;
                }

                // SELECT
                let speaker_id = if turn_index == 0 {
                    let routing = route_opening_message(&last_message, &ctx.orchestrator_agent_id);
                    max_turns = max_turns_override.unwrap_or(routing.policy.max_turns);
                    single_agent_mode = routing.single_agent;
                    routing.agent_id
                } else {
                    let candidates = build_candidates(&ctx, &speaker_history).await;
                    let remaining_budget = budget_limit.saturating_sub(
                        ctx.tracker
                            .summary(&conv_id)
                            .await
                            .map(|s| s.total_cost)
                            .unwrap_or(Cost::ZERO),
                    );
                    let selection_ctx = SelectionContext {
                        turn_index,
                        last_message: &last_message,
                        speaker_history: &speaker_history,
                        spoken_agents: &speaker_history,
                        remaining_budget,
                        max_turns,
                        single_agent_mode,
                        consecutive_repeat_limit: 2,
                    };
                    match select_next_speaker(&candidates, &selection_ctx) {
                        SelectionOutcome::Speak { agent_id, .. } => agent_id,
                        SelectionOutcome::Terminate(reason) => {
                            termination = Some(termination_for_selection(reason));
                            break;
                        }
                    }
                };

                emit_event(Level::INFO, ProcessKind::Orchestrator, ObservabilityEvent {
                    conv_id: Some(&conv_id),
                    turn_index: Some(turn_index as u64),
                    agent_id: Some(&speaker_id),
                    ..ObservabilityEvent::new("turn_started", "orchestrator")
                });
                yield OrchestratorEvent::TurnStarted { turn_index, speaker_id: speaker_id.clone() };

                let agent_def = match ctx.registry.get(&speaker_id).await {
                    Ok(def) => def,
                    Err(e) => {
                        termination = Some(Termination::Error(e.to_string()));
                        break;
                    }
                };

                // RETRIEVE
                let mut composed = last_message.clone();
                if request.options.rag_in_loop() {
                    let query = convergio_rag::RetrievalQuery {
                        conv_id: conv_id.clone(),
                        speaker_id: speaker_id.clone(),
                        last_user_message: last_message.clone(),
                        recent_turns: conversation.messages.iter().rev().take(5).map(|m| m.content.clone()).collect(),
                    };
                    let rag_context = ctx.rag.build_context(&query, agent_def.max_context_tokens).await;
                    if !rag_context.facts.is_empty() {
                        let facts_joined = rag_context
                            .facts
                            .iter()
                            .map(|f| format!("- {}", f.text))
                            .collect::<Vec<_>>()
                            .join("\n");
                        composed = format!("{composed}\n\nRelevant context:\n{facts_joined}");
                        if let Some(note) = &rag_context.conflict_note {
                            composed = format!("{composed}\n\nNote: {note}");
                        }
                    }
                }

                // VALIDATE_INPUT
                match ctx.guardian.validate_prompt(&composed) {
                    PromptVerdict::Allow => {}
                    PromptVerdict::Block { reason } => {
                        termination = Some(Termination::SafetyBlocked(reason));
                        break;
                    }
                    PromptVerdict::RequireApproval { risk, reason } => {
                        if !request.options.hitl_enabled() {
                            termination = Some(Termination::SafetyBlocked(reason));
                            break;
                        }
                        let approval_id = match ctx
                            .approvals
                            .create(NewApprovalRequest {
                                conv_id: conv_id.clone(),
                                turn_index,
                                action_type: "high_risk_prompt".to_string(),
                                payload: serde_json::json!({ "reason": reason, "message": composed }),
                                risk_level: risk,
                            })
                            .await
                        {
                            Ok(id) => id,
                            Err(e) => {
                                termination = Some(Termination::SafetyBlocked(e.to_string()));
                                break;
                            }
                        };
                        let decision = ctx.approvals.await_decision(&approval_id, APPROVAL_TIMEOUT).await;
                        match decision {
                            Ok(AwaitOutcome::Approved) => {}
                            Ok(AwaitOutcome::Rejected) | Ok(AwaitOutcome::Expired) => {
                                termination = Some(Termination::SafetyBlocked(format!("approval not granted: {reason}")));
                                break;
                            }
                            Err(e) => {
                                termination = Some(Termination::SafetyBlocked(e.to_string()));
                                break;
                            }
                        }
                    }
                }

                // RUN_TURN (with bounded retry on transient provider errors)
                let provider = match ctx.providers.get(Some(&ctx.default_provider_id)).await {
                    Ok(p) => p,
                    Err(e) => {
                        termination = Some(Termination::ProviderUnavailable(e.to_string()));
                        break;
                    }
                };
                let model = agent_def.model_preference.clone().unwrap_or_else(|| "mock-echo".to_string());
                let messages = vec![
                    ChatMessage { role: "system".to_string(), content: agent_def.system_prompt.clone() },
                    ChatMessage { role: "user".to_string(), content: composed.clone() },
                ];

                let turn_started_at = Instant::now();
                let mut attempt: u32 = 0;
                let mut turn_result: Option<(String, u64, u64, CompletionReason, Cost)> = None;
                let mut retryable_failure: Option<String> = None;

                'attempts: loop {
                    attempt += 1;
                    let turn_cancel = cancel.child_token();
                    let run_input = RunTurnInput {
                        provider: provider.clone(),
                        provider_id: ctx.default_provider_id.clone(),
                        model: model.clone(),
                        messages: messages.clone(),
                        tools: None,
                        tool_executor: ctx.tool_executor.clone(),
                        price_table: ctx.price_table.clone(),
                        cancel: turn_cancel,
                        config: RunnerConfig::default(),
                    };

                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let per_turn_budget = Duration::from_secs(60).min(remaining);
                    let turn_deadline = sleep(per_turn_budget);
                    tokio::pin!(turn_deadline);
                    let mut event_stream = run_turn(run_input);
                    let mut accumulated = String::new();
                    let mut completion: Option<(CompletionReason, u64, Cost)> = None;
                    let mut failure: Option<(String, bool)> = None;
                    let mut timed_out = false;

                    loop {
                        tokio::select! {
                            _ = &mut turn_deadline => {
                                timed_out = true;
                                break;
                            }
                            next = event_stream.next() => {
                                match next {
                                    None => break,
                                    Some(convergio_runner::StreamEvent::Delta { seq, content }) => {
                                        accumulated.push_str(&content);
                                        yield OrchestratorEvent::Delta { turn_index, seq, content };
                                    }
                                    Some(convergio_runner::StreamEvent::ToolCall { seq, call_id, tool_name, arguments }) => {
                                        yield OrchestratorEvent::ToolCall { turn_index, seq, call_id, tool_name, arguments };
                                    }
                                    Some(convergio_runner::StreamEvent::ToolResult { seq, call_id, result, error }) => {
                                        yield OrchestratorEvent::ToolResult { turn_index, seq, call_id, result, error };
                                    }
                                    Some(convergio_runner::StreamEvent::Heartbeat { seq }) => {
                                        yield OrchestratorEvent::Heartbeat { turn_index, seq };
                                    }
                                    Some(convergio_runner::StreamEvent::Handoff { .. }) => {}
                                    Some(convergio_runner::StreamEvent::Final { total_tokens, completion_reason, cost_estimate, .. }) => {
                                        completion = Some((completion_reason, total_tokens, cost_estimate));
                                        break;
                                    }
                                    Some(convergio_runner::StreamEvent::Error { kind, retryable, .. }) => {
                                        failure = Some((kind, retryable));
                                        break;
                                    }
                                }
                            }
                        }
                    }

                    if timed_out {
                        retryable_failure = Some("turn timed out".to_string());
                        if attempt >= MAX_TURN_ATTEMPTS {
                            break 'attempts;
                        }
                        sleep(RETRY_BASE_DELAY * attempt).await;
                        continue 'attempts;
                    }

                    if let Some((kind, retryable)) = failure {
                        ctx.breaker.report_outcome(&ctx.default_provider_id, &speaker_id, false).await;
                        if retryable && attempt < MAX_TURN_ATTEMPTS {
                            retryable_failure = Some(kind);
                            sleep(RETRY_BASE_DELAY * attempt).await;
                            continue 'attempts;
                        }
                        retryable_failure = Some(kind);
                        break 'attempts;
                    }

                    if let Some((reason, total_tokens, cost_estimate)) = completion {
                        ctx.breaker.report_outcome(&ctx.default_provider_id, &speaker_id, true).await;
                        let prompt_tokens = convergio_providers::estimate_tokens(&composed);
                        let completion_tokens = total_tokens.saturating_sub(prompt_tokens);
                        turn_result = Some((accumulated, prompt_tokens, completion_tokens, reason, cost_estimate));
                    }
                    break 'attempts;
                }

                let (response_text, prompt_tokens, completion_tokens, completion_reason, _cost_estimate) = match turn_result {
                    Some(v) => v,
                    None => {
                        termination = Some(Termination::ProviderUnavailable(
                            retryable_failure.unwrap_or_else(|| "provider call failed".to_string()),
                        ));
                        break;
                    }
                };

                // POST_VALIDATE
                let (stored_content, redacted, blocked_reason) = match ctx.guardian.validate_output(&response_text) {
                    OutputVerdict::Allow => (response_text.clone(), false, None),
                    OutputVerdict::Sanitize { output, .. } => (output, true, None),
                    OutputVerdict::Block { reason } => (String::new(), false, Some(reason)),
                };
                if let Some(reason) = blocked_reason {
                    termination = Some(Termination::SafetyBlocked(reason));
                    break;
                }

                // RECORD
                conversation.push_message(Message {
                    role: MessageRole::Agent,
                    speaker_id: Some(speaker_id.clone()),
                    content: stored_content.clone(),
                    tool_calls: Vec::new(),
                    tool_results: Vec::new(),
                    token_usage: Some(MessageTokenUsage { prompt_tokens, completion_tokens }),
                    created_at: Utc::now(),
                    turn_index,
                    redacted,
                });

                let duration_ms = Instant::now().saturating_duration_since(turn_started_at).as_millis() as u64;
                let (turn_record, budget_events) = match ctx
                    .tracker
                    .record_turn(
                        RecordTurnInput {
                            conv_id: conv_id.clone(),
                            turn_index,
                            speaker_id: speaker_id.clone(),
                            provider: ctx.default_provider_id.clone(),
                            model: model.clone(),
                            prompt_tokens,
                            completion_tokens,
                            duration_ms,
                        },
                        &ctx.price_table,
                    )
                    .await
                {
                    Ok(v) => v,
                    Err(e) => {
                        termination = Some(Termination::Error(e.to_string()));
                        break;
                    }
                };
                for event in &budget_events {
                    tracing::info!(conv_id = %conv_id, kind = ?event.kind, pct = event.utilization_pct, "budget threshold crossed");
                }

                if let Err(e) = ctx
                    .ledger
                    .record(&CostLedgerEntry {
                        ts: Utc::now(),
                        provider: ctx.default_provider_id.clone(),
                        model: model.clone(),
                        agent_id: speaker_id.clone(),
                        conv_id: conv_id.clone(),
                        tokens_in: prompt_tokens,
                        tokens_out: completion_tokens,
                        cost_usd: turn_record.cost_usd.as_decimal(),
                        session_id: None,
                    })
                    .await
                {
                    tracing::warn!(error = %e, "failed to persist ledger entry");
                }

                emit_event(Level::INFO, ProcessKind::Orchestrator, ObservabilityEvent {
                    conv_id: Some(&conv_id),
                    turn_index: Some(turn_index as u64),
                    agent_id: Some(&speaker_id),
                    detail: Some(&format!("{completion_reason:?}")),
                    ..ObservabilityEvent::new("turn_ended", "orchestrator")
                });
                yield OrchestratorEvent::TurnEnded {
                    turn_index,
                    completion_reason,
                    tokens: prompt_tokens + completion_tokens,
                    cost: turn_record.cost_usd,
                };

                // DECIDE_CONT
                speaker_history.push(speaker_id.clone());
                last_message = stored_content;
                turn_index += 1;

                if ctx.tracker.is_budget_exceeded(&conv_id).await {
                    termination = Some(Termination::BudgetExceeded);
                    break;
                }
                if turn_index >= max_turns {
                    termination = Some(Termination::Done);
                    break;
                }
            }

            let termination = termination.unwrap_or(Termination::Done);
            let status = termination.status();
            let message = termination.message(&last_message);
            conversation.finish(status);
            let summary = ctx.tracker.summary(&conv_id).await.ok();
            let (total_tokens, total_cost) = summary
                .map(|s| (s.total_tokens, s.total_cost))
                .unwrap_or((0, Cost::ZERO));
            let agents_used = conversation.agents_used.clone();
            ctx.conversations.write().await.insert(conv_id.clone(), conversation);

            let final_level = if status.is_terminal() && status != ConversationStatus::Done {
                Level::WARN
            } else {
                Level::INFO
            };
            emit_event(final_level, ProcessKind::Orchestrator, ObservabilityEvent {
                conv_id: Some(&conv_id),
                status: Some(status_label(status)),
                detail: Some(&message),
                ..ObservabilityEvent::new("conversation_finished", "orchestrator")
            });

            yield OrchestratorEvent::OrchestratorFinal {
                status,
                total_tokens,
                total_cost,
                agents_used,
                message,
            };
        })
    }
}

async fn build_candidates(ctx: &Arc<OrchestratorContext>, speaker_history: &[String]) -> Vec<SpeakerCandidate> {
    let agents = ctx.registry.list(&AgentFilter::default()).await;
    agents
        .into_iter()
        .map(|def| {
            let last_spoken_turn = speaker_history
                .iter()
                .enumerate()
                .filter(|(_, id)| *id == &def.id)
                .map(|(i, _)| i as u32)
                .last();
            SpeakerCandidate {
                agent_id: def.id.clone(),
                expertise: format!("{} {} {}", def.category, def.name, def.tags.join(" ")),
                dependencies: def.dependencies.clone(),
                estimated_cost: def.cost_per_interaction,
                last_spoken_turn,
            }
        })
        .collect()
}

fn termination_for_selection(reason: TerminationReason) -> Termination {
    match reason {
        TerminationReason::TurnBudgetMet
        | TerminationReason::ExplicitMarker
        | TerminationReason::MaxTurnsReached
        | TerminationReason::SingleAgentAnswered => Termination::Done,
        TerminationReason::NoEligibleSpeakers => Termination::Error("no eligible speakers remain".to_string()),
    }
}

fn status_label(status: ConversationStatus) -> &'static str {
    match status {
        ConversationStatus::Running => "running",
        ConversationStatus::Done => "done",
        ConversationStatus::BudgetExceeded => "budget_exceeded",
        ConversationStatus::SafetyBlocked => "safety_blocked",
        ConversationStatus::Cancelled => "cancelled",
        ConversationStatus::Timeout => "timeout",
        ConversationStatus::Error => "error",
    }
}
