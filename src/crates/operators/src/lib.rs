//! One executor per vertex kind. Operators are looked up from a dispatch
//! table keyed on `VertexKind` rather than via inheritance — adding a kind
//! means adding one table entry and one module.

pub mod ops;
mod voting;

use async_trait::async_trait;
use event_bus::VertexPublisher;
use graph_model::{Port, Vertex, VertexKind};
use model_gateway::{Gateway, TokenSink};
use search_client::SearchClient;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use voting::{majority_vote, normalize_answer};

/// Per-session services an operator is allowed to reach: the gateway, the
/// search client, its own event publisher, and the cancellation token.
pub struct OperatorServices {
    pub gateway: Arc<Gateway>,
    pub search: Arc<dyn SearchClient>,
    pub publisher: VertexPublisher,
    pub cancellation: CancellationToken,
}

/// Adapts a `VertexPublisher` into a `model_gateway::TokenSink` so streamed
/// completions can publish `token_stream` events directly.
pub struct PublisherSink {
    pub publisher: VertexPublisher,
    pub prefix: Option<String>,
}

#[async_trait]
impl TokenSink for PublisherSink {
    async fn token(&mut self, text: &str) {
        if let Some(prefix) = self.prefix.take() {
            self.publisher.token_stream(prefix);
        }
        self.publisher.token_stream(text);
    }
}

/// The resolved inbound payload and the vertex being executed.
#[derive(Debug, Clone)]
pub struct OperatorInput {
    pub vertex: Vertex,
    pub payload: String,
    /// `None` on a `loop` vertex's initial admission; `Some(k)` on the
    /// k-th back-edge delivery. Unused by every other kind.
    pub iteration: Option<u32>,
}

/// What an operator produced, and which outgoing ports it enabled.
#[derive(Debug, Clone)]
pub struct OperatorOutput {
    pub text: String,
    /// Empty means "the single unnamed port", enabled on success.
    pub enabled_ports: Vec<Port>,
}

#[derive(Debug, Error, Clone)]
pub enum OperatorError {
    #[error("invalid operator config: {0}")]
    InvalidConfig(String),
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("model timed out")]
    ModelTimeout,
    #[error("search unavailable: {0}")]
    SearchUnavailable(String),
    #[error("cancelled")]
    Cancelled,
}

impl OperatorError {
    pub fn kind(&self) -> &'static str {
        match self {
            OperatorError::InvalidConfig(_) => "operator-invalid-config",
            OperatorError::ModelUnavailable(_) => "model-unavailable",
            OperatorError::ModelTimeout => "model-timeout",
            OperatorError::SearchUnavailable(_) => "search-unavailable",
            OperatorError::Cancelled => "cancelled",
        }
    }
}

impl From<model_gateway::GatewayError> for OperatorError {
    fn from(e: model_gateway::GatewayError) -> Self {
        match e {
            model_gateway::GatewayError::Timeout => OperatorError::ModelTimeout,
            other => OperatorError::ModelUnavailable(other.to_string()),
        }
    }
}

impl From<search_client::SearchError> for OperatorError {
    fn from(e: search_client::SearchError) -> Self {
        OperatorError::SearchUnavailable(e.to_string())
    }
}

/// Shared contract: publish `node_start` before doing I/O, and either
/// `node_finish`/`node_failed` before returning.
#[async_trait]
pub trait Operator: Send + Sync {
    async fn execute(
        &self,
        input: OperatorInput,
        services: &OperatorServices,
    ) -> Result<OperatorOutput, OperatorError>;
}

/// Returns early with `OperatorError::Cancelled` if the session's token
/// fires before `fut` resolves.
async fn run_cancellable<T>(
    cancellation: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T, OperatorError>>,
) -> Result<T, OperatorError> {
    tokio::select! {
        biased;
        _ = cancellation.cancelled() => Err(OperatorError::Cancelled),
        result = fut => result,
    }
}

fn config_str(config: &serde_json::Value, key: &str) -> Option<String> {
    config.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn require_str(config: &serde_json::Value, key: &str) -> Result<String, OperatorError> {
    config_str(config, key).ok_or_else(|| OperatorError::InvalidConfig(format!("missing field '{key}'")))
}

fn config_f64(config: &serde_json::Value, key: &str, default: f64) -> f64 {
    config.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

fn config_u64(config: &serde_json::Value, key: &str, default: u64) -> u64 {
    config.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
}

/// Builds the dispatch table from vertex kind to operator implementation.
pub fn registry() -> HashMap<VertexKind, Arc<dyn Operator>> {
    let mut table: HashMap<VertexKind, Arc<dyn Operator>> = HashMap::new();
    table.insert(VertexKind::Input, Arc::new(ops::input::InputOperator));
    table.insert(VertexKind::Output, Arc::new(ops::output::OutputOperator));
    table.insert(VertexKind::Llm, Arc::new(ops::llm::LlmOperator));
    table.insert(VertexKind::Search, Arc::new(ops::search::SearchOperator));
    table.insert(VertexKind::Condition, Arc::new(ops::condition::ConditionOperator));
    table.insert(VertexKind::Loop, Arc::new(ops::loop_op::LoopOperator));
    table.insert(VertexKind::Splitter, Arc::new(ops::splitter::SplitterOperator));
    table.insert(VertexKind::Reducer, Arc::new(ops::reducer::ReducerOperator));
    table.insert(
        VertexKind::SelfConsistency,
        Arc::new(ops::self_consistency::SelfConsistencyOperator),
    );
    table.insert(VertexKind::MoaProposer, Arc::new(ops::moa_proposer::MoaProposerOperator));
    table.insert(
        VertexKind::MoaAggregator,
        Arc::new(ops::moa_aggregator::MoaAggregatorOperator),
    );
    table.insert(VertexKind::Debate, Arc::new(ops::debate::DebateOperator));
    table.insert(VertexKind::Voting, Arc::new(ops::voting::VotingOperator));
    table
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use event_bus::EventBus;
    use graph_model::VertexId;
    use model_gateway::{CompletionOutcome, CompletionRequest, GatewayError, ModelClient, TokenUsage};
    use search_client::{SearchError, SearchRequest, SearchResult};
    use std::sync::Mutex;
    use tokio::sync::mpsc::Receiver;

    /// A scripted model client: returns canned (possibly failing)
    /// responses in call order, recording every request it saw.
    pub struct ScriptedClient {
        responses: Mutex<Vec<Result<String, GatewayError>>>,
        pub seen: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedClient {
        pub fn new(responses: Vec<Result<String, GatewayError>>) -> Self {
            ScriptedClient {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn always(text: impl Into<String>) -> Self {
            ScriptedClient {
                responses: Mutex::new(vec![Ok(text.into()); 64]),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn complete(&self, req: &CompletionRequest) -> Result<CompletionOutcome, GatewayError> {
            self.seen.lock().unwrap().push(req.clone());
            let next = self.responses.lock().unwrap().pop();
            match next {
                Some(Ok(text)) => Ok(CompletionOutcome {
                    usage: TokenUsage::estimate(req.system_prompt.as_deref(), &req.user_text, &text),
                    model_used: req.model.clone(),
                    text,
                }),
                Some(Err(e)) => Err(e),
                None => Err(GatewayError::Upstream("scripted responses exhausted".into())),
            }
        }

        async fn stream(
            &self,
            req: &CompletionRequest,
            sink: &mut dyn TokenSink,
        ) -> Result<CompletionOutcome, GatewayError> {
            let outcome = self.complete(req).await?;
            sink.token(&outcome.text).await;
            Ok(outcome)
        }

        fn clone_box(&self) -> Box<dyn ModelClient> {
            unimplemented!("not needed in tests")
        }
    }

    pub struct EmptySearch;

    #[async_trait]
    impl SearchClient for EmptySearch {
        async fn search(&self, _req: &SearchRequest) -> Result<Vec<SearchResult>, SearchError> {
            Ok(Vec::new())
        }
    }

    pub fn bare_vertex(id: &str, kind: VertexKind) -> Vertex {
        Vertex {
            id: VertexId::from(id),
            kind,
            config: serde_json::json!({}),
            seed: None,
        }
    }

    /// Builds services backed by a single-response scripted client and an
    /// empty search client, plus the event receiver so assertions can
    /// inspect what was published.
    pub fn test_services(vertex_id: &str) -> (OperatorServices, Receiver<event_bus::Event>) {
        test_services_with(vertex_id, ScriptedClient::always("response"))
    }

    pub fn test_services_with(
        vertex_id: &str,
        client: ScriptedClient,
    ) -> (OperatorServices, Receiver<event_bus::Event>) {
        let (bus, rx) = EventBus::new(64);
        let services = OperatorServices {
            gateway: Arc::new(Gateway::new(Arc::new(client))),
            search: Arc::new(EmptySearch),
            publisher: bus.publisher(VertexId::from(vertex_id)),
            cancellation: CancellationToken::new(),
        };
        (services, rx)
    }
}
