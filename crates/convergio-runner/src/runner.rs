use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use convergio_providers::{ChatMessage, Provider, PriceTable, StreamChunk, ToolSchema};
use convergio_types::Cost;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::types::{CompletionReason, NoopToolExecutor, StreamEvent, ToolExecutor};

const DEFAULT_MAILBOX_CAPACITY: usize = 64;
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CANCEL_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub mailbox_capacity: usize,
    pub heartbeat_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

pub struct RunTurnInput {
    pub provider: Arc<dyn Provider>,
    pub provider_id: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Option<Vec<ToolSchema>>,
    pub tool_executor: Arc<dyn ToolExecutor>,
    pub price_table: Arc<PriceTable>,
    pub cancel: CancellationToken,
    pub config: RunnerConfig,
}

impl RunTurnInput {
    /// Convenience constructor using a no-op tool executor and default
    /// mailbox/heartbeat settings — the common case for turns with no
    /// tool wiring configured.
    pub fn new(provider: Arc<dyn Provider>, provider_id: impl Into<String>, model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            provider,
            provider_id: provider_id.into(),
            model: model.into(),
            messages,
            tools: None,
            tool_executor: Arc::new(NoopToolExecutor),
            price_table: Arc::new(PriceTable::default()),
            cancel: CancellationToken::new(),
            config: RunnerConfig::default(),
        }
    }
}

/// Drive one agent turn against `provider`, returning a finite stream of
/// `StreamEvent`s terminated by exactly one `Final` or `Error` (§4.9).
///
/// Two concurrent producers feed one bounded mailbox (capacity from
/// `config.mailbox_capacity`, default 64, §5): the main loop forwards
/// model/tool events with a blocking send (back-pressure when the consumer
/// is slow), while a heartbeat ticker emits idle-keepalive events with a
/// non-blocking `try_send` — a heartbeat is dropped, not queued, if the
/// mailbox is full.
pub fn run_turn(input: RunTurnInput) -> ReceiverStream<StreamEvent> {
    let RunTurnInput {
        provider,
        provider_id,
        model,
        messages,
        tools,
        tool_executor,
        price_table,
        cancel,
        config,
    } = input;

    let (tx, rx) = tokio::sync::mpsc::channel(config.mailbox_capacity.max(1));
    let seq = Arc::new(AtomicU64::new(0));
    let last_activity = Arc::new(Mutex::new(Instant::now()));
    let done = CancellationToken::new();

    spawn_heartbeat(tx.clone(), seq.clone(), last_activity.clone(), done.clone(), config.heartbeat_interval);
    spawn_main_loop(
        tx,
        seq,
        last_activity,
        done,
        provider,
        provider_id,
        model,
        messages,
        tools,
        tool_executor,
        price_table,
        cancel,
    );

    ReceiverStream::new(rx)
}

fn spawn_heartbeat(
    tx: tokio::sync::mpsc::Sender<StreamEvent>,
    seq: Arc<AtomicU64>,
    last_activity: Arc<Mutex<Instant>>,
    done: CancellationToken,
    interval: Duration,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = done.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            let elapsed = last_activity.lock().await.elapsed();
            if elapsed >= interval {
                let event = StreamEvent::Heartbeat {
                    seq: seq.fetch_add(1, Ordering::SeqCst),
                };
                // Non-blocking: a full mailbox means the consumer is busy
                // processing real events, so the heartbeat is simply
                // skipped rather than queued (§5).
                let _ = tx.try_send(event);
            }
        }
    });
}

#[allow(clippy::too_many_arguments)]
fn spawn_main_loop(
    tx: tokio::sync::mpsc::Sender<StreamEvent>,
    seq: Arc<AtomicU64>,
    last_activity: Arc<Mutex<Instant>>,
    done: CancellationToken,
    provider: Arc<dyn Provider>,
    provider_id: String,
    model: String,
    messages: Vec<ChatMessage>,
    tools: Option<Vec<ToolSchema>>,
    tool_executor: Arc<dyn ToolExecutor>,
    price_table: Arc<PriceTable>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let next_seq = || seq.fetch_add(1, Ordering::SeqCst);
        let touch = || async { *last_activity.lock().await = Instant::now() };

        let stream = match provider.stream(messages, &model, tools, cancel.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        seq: next_seq(),
                        kind: "provider_unavailable".to_string(),
                        retryable: true,
                    })
                    .await;
                tracing::warn!(error = %e, "provider stream failed to start");
                done.cancel();
                return;
            }
        };
        tokio::pin!(stream);

        let mut pending_tools: HashMap<String, (String, String)> = HashMap::new();

        loop {
            if cancel.is_cancelled() {
                let event = StreamEvent::Final {
                    seq: next_seq(),
                    total_tokens: 0,
                    completion_reason: CompletionReason::Cancelled,
                    cost_estimate: Cost::ZERO,
                };
                let _ = tokio::time::timeout(CANCEL_FLUSH_TIMEOUT, tx.send(event)).await;
                break;
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => continue,
                item = stream.next() => item,
            };

            match next {
                None => {
                    let event = StreamEvent::Final {
                        seq: next_seq(),
                        total_tokens: 0,
                        completion_reason: CompletionReason::Stop,
                        cost_estimate: Cost::ZERO,
                    };
                    let _ = tx.send(event).await;
                    break;
                }
                Some(Err(e)) => {
                    if cancel.is_cancelled() {
                        let event = StreamEvent::Final {
                            seq: next_seq(),
                            total_tokens: 0,
                            completion_reason: CompletionReason::Cancelled,
                            cost_estimate: Cost::ZERO,
                        };
                        let _ = tokio::time::timeout(CANCEL_FLUSH_TIMEOUT, tx.send(event)).await;
                        break;
                    }
                    let _ = tx
                        .send(StreamEvent::Error {
                            seq: next_seq(),
                            kind: "provider_unavailable".to_string(),
                            retryable: true,
                        })
                        .await;
                    tracing::warn!(error = %e, "provider stream chunk failed");
                    break;
                }
                Some(Ok(chunk)) => {
                    touch().await;
                    match chunk {
                        StreamChunk::TextDelta(content) => {
                            let _ = tx
                                .send(StreamEvent::Delta {
                                    seq: next_seq(),
                                    content,
                                })
                                .await;
                        }
                        StreamChunk::ToolCallStart { call_id, name } => {
                            pending_tools.insert(call_id, (name, String::new()));
                        }
                        StreamChunk::ToolCallDelta { call_id, args_delta } => {
                            if let Some((_, buf)) = pending_tools.get_mut(&call_id) {
                                buf.push_str(&args_delta);
                            }
                        }
                        StreamChunk::ToolCallEnd { call_id } => {
                            if let Some((tool_name, args_buf)) = pending_tools.remove(&call_id) {
                                let arguments = serde_json::from_str(&args_buf)
                                    .unwrap_or_else(|_| serde_json::Value::String(args_buf));
                                let _ = tx
                                    .send(StreamEvent::ToolCall {
                                        seq: next_seq(),
                                        call_id: call_id.clone(),
                                        tool_name: tool_name.clone(),
                                        arguments: arguments.clone(),
                                    })
                                    .await;

                                let outcome = tool_executor.execute(&tool_name, &arguments).await;
                                let result_event = match outcome {
                                    Ok(value) => StreamEvent::ToolResult {
                                        seq: next_seq(),
                                        call_id,
                                        result: Some(value),
                                        error: None,
                                    },
                                    Err(err) => StreamEvent::ToolResult {
                                        seq: next_seq(),
                                        call_id,
                                        result: None,
                                        error: Some(err),
                                    },
                                };
                                let _ = tx.send(result_event).await;
                            }
                        }
                        StreamChunk::Done { finish_reason, usage } => {
                            let usage = usage.unwrap_or_default();
                            let (price, _) = price_table.lookup(&provider_id, &model);
                            let cost_estimate = Cost::from_tokens(usage.prompt_tokens, price.input_per_1k)
                                + Cost::from_tokens(usage.completion_tokens, price.output_per_1k);
                            let event = StreamEvent::Final {
                                seq: next_seq(),
                                total_tokens: usage.total(),
                                completion_reason: CompletionReason::from_finish_reason(&finish_reason),
                                cost_estimate,
                            };
                            let _ = tx.send(event).await;
                            break;
                        }
                    }
                }
            }
        }

        done.cancel();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergio_providers::{MockProvider, TokenUsage};

    async fn collect(stream: ReceiverStream<StreamEvent>) -> Vec<StreamEvent> {
        stream.collect().await
    }

    #[tokio::test]
    async fn stream_ends_with_exactly_one_final() {
        let mock = Arc::new(MockProvider::new("mock"));
        mock.push_response(
            "hello there",
            TokenUsage {
                prompt_tokens: 3,
                completion_tokens: 2,
            },
        )
        .await;

        let input = RunTurnInput::new(
            mock,
            "mock",
            "mock-echo",
            vec![ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
        );
        let events = collect(run_turn(input)).await;

        let finals = events.iter().filter(|e| matches!(e, StreamEvent::Final { .. })).count();
        assert_eq!(finals, 1);
        assert!(matches!(events.last().unwrap(), StreamEvent::Final { .. }));
    }

    #[tokio::test]
    async fn sequence_numbers_strictly_increase() {
        let mock = Arc::new(MockProvider::new("mock"));
        mock.push_response(
            "one two three",
            TokenUsage {
                prompt_tokens: 3,
                completion_tokens: 3,
            },
        )
        .await;

        let input = RunTurnInput::new(
            mock,
            "mock",
            "mock-echo",
            vec![ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
        );
        let events = collect(run_turn(input)).await;

        let mut last_seq: Option<u64> = None;
        for event in &events {
            if let Some(prev) = last_seq {
                assert!(event.seq() > prev, "sequence must strictly increase");
            }
            last_seq = Some(event.seq());
        }
    }

    #[tokio::test]
    async fn deltas_concatenate_to_the_full_response() {
        let mock = Arc::new(MockProvider::new("mock"));
        mock.push_response(
            "hello world today",
            TokenUsage {
                prompt_tokens: 1,
                completion_tokens: 1,
            },
        )
        .await;

        let input = RunTurnInput::new(
            mock,
            "mock",
            "mock-echo",
            vec![ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
        );
        let events = collect(run_turn(input)).await;

        let mut text = String::new();
        for event in &events {
            if let StreamEvent::Delta { content, .. } = event {
                text.push_str(content);
            }
        }
        assert_eq!(text, "hello world today");
    }

    #[tokio::test]
    async fn provider_failure_emits_error_not_final() {
        let mock = Arc::new(MockProvider::new("mock"));
        mock.push_failure("boom").await;

        let input = RunTurnInput::new(
            mock,
            "mock",
            "mock-echo",
            vec![ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
        );
        let events = collect(run_turn(input)).await;

        assert!(events.iter().any(|e| matches!(e, StreamEvent::Error { .. })));
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Final { .. })));
    }

    #[tokio::test]
    async fn cancellation_flushes_a_cancelled_final_quickly() {
        let mock = Arc::new(MockProvider::new("mock"));
        mock.push_response(
            "a very long response that would take a while to stream out fully",
            TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 10,
            },
        )
        .await;

        let mut input = RunTurnInput::new(
            mock,
            "mock",
            "mock-echo",
            vec![ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
        );
        let cancel = CancellationToken::new();
        input.cancel = cancel.clone();

        let start = Instant::now();
        let stream = run_turn(input);
        cancel.cancel();
        let events = collect(stream).await;
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(matches!(
            events.last().unwrap(),
            StreamEvent::Final {
                completion_reason: CompletionReason::Cancelled,
                ..
            }
        ));
    }
}
