mod price;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub use price::{ModelPrice, PriceTable};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone)]
pub enum StreamChunk {
    TextDelta(String),
    ToolCallStart { call_id: String, name: String },
    ToolCallDelta { call_id: String, args_delta: String },
    ToolCallEnd { call_id: String },
    Done {
        finish_reason: String,
        usage: Option<TokenUsage>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider_id: String,
    pub display_name: String,
    pub context_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    pub healthy: bool,
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamChunk>> + Send>>;

/// The only boundary to an external LLM SDK/provider. Everything beyond this
/// trait (HTTP transport, vendor auth, retries at the wire level) is an
/// external collaborator per the orchestration core's scope.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    fn info(&self) -> ProviderInfo;

    async fn complete(&self, prompt: &str, model: &str) -> anyhow::Result<String>;

    /// Default implementation turns a non-streaming completion into a
    /// two-chunk stream (one `TextDelta`, one `Done`). Providers backed by a
    /// real SSE endpoint override this for token-level granularity.
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        _tools: Option<Vec<ToolSchema>>,
        _cancel: CancellationToken,
    ) -> anyhow::Result<ChunkStream> {
        let prompt = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let response = self.complete(&prompt, model).await?;
        let prompt_tokens = estimate_tokens(&prompt);
        let completion_tokens = estimate_tokens(&response);
        let stream = futures::stream::iter(vec![
            Ok(StreamChunk::TextDelta(response)),
            Ok(StreamChunk::Done {
                finish_reason: "stop".to_string(),
                usage: Some(TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                }),
            }),
        ]);
        Ok(Box::pin(stream))
    }
}

/// Rough token estimate (chars / 4) used only when a provider doesn't report
/// real usage. Real providers report exact counts from the API response.
pub fn estimate_tokens(text: &str) -> u64 {
    ((text.len() as f64) / 4.0).ceil() as u64
}

/// Generic OpenAI-wire-compatible HTTP provider. Works against any endpoint
/// speaking the `/chat/completions` dialect; vendor-specific SDKs are out of
/// scope, so this is the one concrete network implementation kept here.
#[derive(Debug)]
pub struct HttpCompatibleProvider {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpCompatibleProvider {
    pub fn new(id: impl Into<String>, name: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            base_url: base_url.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provider for HttpCompatibleProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            healthy: true,
            models: Vec::new(),
        }
    }

    async fn complete(&self, prompt: &str, model: &str) -> anyhow::Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(url).json(&serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": false,
        }));
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }
        let response = req.send().await?;
        let status = response.status();
        let value: serde_json::Value = response.json().await?;
        if !status.is_success() {
            anyhow::bail!("provider `{}` request failed with status {}", self.id, status);
        }
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("provider `{}` returned no completion content", self.id))
    }
}

/// Deterministic provider for tests and for running the core without a
/// configured network provider. Scripted responses and failures are
/// consumed in order; once exhausted it echoes the last user message.
#[derive(Debug)]
pub struct MockProvider {
    id: String,
    scripted: RwLock<Vec<MockTurn>>,
    calls: AtomicUsize,
}

#[derive(Debug)]
pub enum MockTurn {
    Respond { text: String, usage: TokenUsage },
    Fail(String),
}

impl MockProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scripted: RwLock::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub async fn push_response(&self, text: impl Into<String>, usage: TokenUsage) {
        self.scripted.write().await.push(MockTurn::Respond {
            text: text.into(),
            usage,
        });
    }

    pub async fn push_failure(&self, reason: impl Into<String>) {
        self.scripted.write().await.push(MockTurn::Fail(reason.into()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: "Mock".to_string(),
            healthy: true,
            models: vec![ModelInfo {
                id: "mock-echo".to_string(),
                provider_id: self.id.clone(),
                display_name: "mock-echo".to_string(),
                context_window: 32_000,
            }],
        }
    }

    async fn complete(&self, prompt: &str, _model: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut scripted = self.scripted.write().await;
        if scripted.is_empty() {
            return Ok(format!("echo: {prompt}"));
        }
        match scripted.remove(0) {
            MockTurn::Respond { text, .. } => Ok(text),
            MockTurn::Fail(reason) => anyhow::bail!(reason),
        }
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        _model: &str,
        _tools: Option<Vec<ToolSchema>>,
        cancel: CancellationToken,
    ) -> anyhow::Result<ChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut scripted = self.scripted.write().await;
        let turn = if scripted.is_empty() {
            let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            MockTurn::Respond {
                text: format!("echo: {prompt}"),
                usage: TokenUsage {
                    prompt_tokens: estimate_tokens(&prompt),
                    completion_tokens: estimate_tokens(&prompt),
                },
            }
        } else {
            scripted.remove(0)
        };
        drop(scripted);

        match turn {
            MockTurn::Fail(reason) => Err(anyhow::anyhow!(reason)),
            MockTurn::Respond { text, usage } => {
                let words: Vec<String> = text.split_whitespace().map(str::to_string).collect();
                let mut chunks: Vec<anyhow::Result<StreamChunk>> = Vec::new();
                if words.is_empty() {
                    chunks.push(Ok(StreamChunk::TextDelta(text)));
                } else {
                    for (i, w) in words.iter().enumerate() {
                        let delta = if i == 0 { w.clone() } else { format!(" {w}") };
                        chunks.push(Ok(StreamChunk::TextDelta(delta)));
                    }
                }
                chunks.push(Ok(StreamChunk::Done {
                    finish_reason: "stop".to_string(),
                    usage: Some(usage),
                }));
                let stream = futures::stream::iter(chunks).then(move |item| {
                    let cancel = cancel.clone();
                    async move {
                        tokio::task::yield_now().await;
                        if cancel.is_cancelled() {
                            return Err(anyhow::anyhow!("cancelled"));
                        }
                        item
                    }
                });
                Ok(Box::pin(stream))
            }
        }
    }
}

/// Holds every configured provider and resolves `(provider_id, model_id)` to
/// a concrete client, falling back to the first registered provider so the
/// core never has to special-case "no provider configured".
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Arc<RwLock<HashMap<String, Arc<dyn Provider>>>>,
    default_provider: Arc<RwLock<Option<String>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: Arc::new(RwLock::new(HashMap::new())),
            default_provider: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn register(&self, provider: Arc<dyn Provider>) {
        let id = provider.info().id;
        let mut providers = self.providers.write().await;
        let is_first = providers.is_empty();
        providers.insert(id.clone(), provider);
        if is_first {
            *self.default_provider.write().await = Some(id);
        }
    }

    pub async fn list(&self) -> Vec<ProviderInfo> {
        self.providers.read().await.values().map(|p| p.info()).collect()
    }

    pub async fn get(&self, provider_id: Option<&str>) -> anyhow::Result<Arc<dyn Provider>> {
        let providers = self.providers.read().await;
        if let Some(id) = provider_id {
            return providers
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("provider `{id}` is not configured"));
        }
        let default_id = self.default_provider.read().await.clone();
        if let Some(id) = default_id {
            if let Some(provider) = providers.get(&id) {
                return Ok(provider.clone());
            }
        }
        providers
            .values()
            .next()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no provider configured"))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_falls_back_to_first_registered_provider() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProvider::new("mock"))).await;
        let provider = registry.get(None).await.unwrap();
        assert_eq!(provider.info().id, "mock");
    }

    #[tokio::test]
    async fn registry_errors_on_unknown_provider_id() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProvider::new("mock"))).await;
        let err = registry.get(Some("nope")).await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn mock_provider_streams_scripted_response() {
        let mock = MockProvider::new("mock");
        mock.push_response(
            "hello world",
            TokenUsage {
                prompt_tokens: 5,
                completion_tokens: 2,
            },
        )
        .await;
        let cancel = CancellationToken::new();
        let mut stream = mock
            .stream(
                vec![ChatMessage {
                    role: "user".to_string(),
                    content: "hi".to_string(),
                }],
                "mock-echo",
                None,
                cancel,
            )
            .await
            .unwrap();
        let mut deltas = String::new();
        let mut saw_done = false;
        while let Some(chunk) = stream.next().await {
            match chunk.unwrap() {
                StreamChunk::TextDelta(text) => deltas.push_str(&text),
                StreamChunk::Done { usage, .. } => {
                    saw_done = true;
                    assert_eq!(usage.unwrap().total(), 7);
                }
                _ => {}
            }
        }
        assert_eq!(deltas, "hello world");
        assert!(saw_done);
    }
}
