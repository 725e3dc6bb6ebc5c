//! Bridges one submitted graph to a running `Scheduler`, translating the
//! engine's event stream into wire frames for the connection that owns it.

use std::sync::Arc;

use event_bus::EventBus;
use graph_model::{Graph, GraphDocument};
use model_gateway::{Gateway, HttpModelClient};
use scheduler::Scheduler;
use search_client::HttpSearchClient;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{GatewayConfig, SearchConfig};
use crate::proto::{ClientFrame, ServerFrame};
use crate::{OrchestratorError, Result};

/// Builds the `Gateway`/`SearchClient` pair a session's scheduler runs
/// against, from the controller's static upstream configuration.
pub struct Upstreams {
    pub gateway: Arc<Gateway>,
    pub search: Arc<HttpSearchClient>,
}

impl Upstreams {
    pub fn build(gateway_cfg: &GatewayConfig, search_cfg: &SearchConfig) -> Self {
        let api_key = gateway_cfg.api_key.clone().unwrap_or_default();
        let primary = Arc::new(HttpModelClient::new(gateway_cfg.base_url.clone(), api_key.clone()));
        let mut gateway = Gateway::new(primary);
        if let Some(fallback_model) = &gateway_cfg.fallback_model {
            let fallback = Arc::new(HttpModelClient::new(gateway_cfg.base_url.clone(), api_key));
            gateway = gateway.with_fallback(fallback_model.clone(), fallback);
        }
        let search = HttpSearchClient::new(
            search_cfg.base_url.clone(),
            search_cfg.api_key.clone().unwrap_or_default(),
        );
        Upstreams {
            gateway: Arc::new(gateway),
            search: Arc::new(search),
        }
    }
}

/// One submitted graph's run: owns the cancellation token the connection
/// handler can fire on disconnect, and the receiver side of its event bus.
pub struct Session {
    pub frames: mpsc::Receiver<ServerFrame>,
    pub cancellation: CancellationToken,
}

/// Parses, validates, and starts running a client's submitted graph.
/// Returns immediately; the scheduler runs on a spawned task and frames
/// arrive on `Session::frames` as the run progresses.
pub fn start(frame: ClientFrame, upstreams: &Upstreams, concurrency: usize) -> Result<Session> {
    let doc = GraphDocument {
        vertices: frame.nodes,
        edges: frame.edges,
    };
    let graph = Graph::from_document(doc).map_err(|e| OrchestratorError::InvalidGraph(e.to_string()))?;

    let (event_bus, mut event_rx) = EventBus::new(256);
    let event_bus = Arc::new(event_bus);
    let cancellation = CancellationToken::new();

    let scheduler = Scheduler::new(
        graph,
        operators::registry(),
        upstreams.gateway.clone(),
        upstreams.search.clone(),
        event_bus,
        cancellation.clone(),
    )
    .with_concurrency(concurrency);

    let (frame_tx, frame_rx) = mpsc::channel(256);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if frame_tx.send(ServerFrame::from(event)).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        if let Err(err) = scheduler.run().await {
            tracing::error!(error = %err, "scheduler run ended with an error");
        }
    });

    Ok(Session {
        frames: frame_rx,
        cancellation,
    })
}
