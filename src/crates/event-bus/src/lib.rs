//! Ordered event emission for a running session.
//!
//! Each vertex gets its own serial queue; a forwarder task drains that
//! queue in send order and relays onto the shared channel the session
//! consumer reads from. That gives every vertex's events a total order
//! (`node_start` before any `token_stream`/`node_usage`, `node_finish` or
//! `node_failed` last) without serializing unrelated vertices against each
//! other on the shared channel.

use graph_model::VertexId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One event in the execution stream. Internal engine representation; the
/// session controller maps these onto wire frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    NodeStart {
        vertex_id: VertexId,
        sequence: u64,
    },
    TokenStream {
        vertex_id: VertexId,
        sequence: u64,
        token: String,
    },
    NodeUsage {
        vertex_id: VertexId,
        sequence: u64,
        input_tokens: u64,
        output_tokens: u64,
    },
    NodeFinish {
        vertex_id: VertexId,
        sequence: u64,
        output: String,
    },
    NodeFailed {
        vertex_id: VertexId,
        sequence: u64,
        kind: String,
        message: String,
    },
    NodeSkipped {
        vertex_id: VertexId,
        sequence: u64,
        reason: String,
    },
    ExecutionComplete {
        sequence: u64,
    },
    ExecutionError {
        kind: String,
        message: String,
    },
}

/// The shared, many-producer single-consumer event stream for one session.
pub struct EventBus {
    tx: mpsc::Sender<Event>,
    run_sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Creates a bus and returns the consumer-side receiver.
    pub fn new(buffer: usize) -> (EventBus, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            EventBus {
                tx,
                run_sequence: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Builds a publisher for one vertex, backed by its own serial queue.
    pub fn publisher(&self, vertex_id: VertexId) -> VertexPublisher {
        let (local_tx, mut local_rx) = mpsc::unbounded_channel::<Event>();
        let shared_tx = self.tx.clone();
        tokio::spawn(async move {
            while let Some(event) = local_rx.recv().await {
                if shared_tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        VertexPublisher {
            vertex_id,
            tx: local_tx,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sent directly on the shared channel by the scheduler once every
    /// vertex has reached a terminal state; must be the run's last event.
    pub async fn execution_complete(&self) {
        let seq = self.run_sequence.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(Event::ExecutionComplete { sequence: seq }).await;
    }

    /// Sent directly on the shared channel for whole-run failures that
    /// never reach vertex granularity (e.g. a malformed graph submission).
    pub async fn execution_error(&self, kind: impl Into<String>, message: impl Into<String>) {
        let _ = self
            .tx
            .send(Event::ExecutionError {
                kind: kind.into(),
                message: message.into(),
            })
            .await;
    }
}

/// Per-vertex publisher. Cheap to clone-by-construction (one per vertex
/// execution attempt); never shared across vertices.
#[derive(Clone)]
pub struct VertexPublisher {
    vertex_id: VertexId,
    tx: mpsc::UnboundedSender<Event>,
    sequence: Arc<AtomicU64>,
}

impl VertexPublisher {
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    pub fn node_start(&self) {
        let _ = self.tx.send(Event::NodeStart {
            vertex_id: self.vertex_id.clone(),
            sequence: self.next_sequence(),
        });
    }

    pub fn token_stream(&self, token: impl Into<String>) {
        let _ = self.tx.send(Event::TokenStream {
            vertex_id: self.vertex_id.clone(),
            sequence: self.next_sequence(),
            token: token.into(),
        });
    }

    pub fn node_usage(&self, input_tokens: u64, output_tokens: u64) {
        let _ = self.tx.send(Event::NodeUsage {
            vertex_id: self.vertex_id.clone(),
            sequence: self.next_sequence(),
            input_tokens,
            output_tokens,
        });
    }

    pub fn node_finish(&self, output: impl Into<String>) {
        let _ = self.tx.send(Event::NodeFinish {
            vertex_id: self.vertex_id.clone(),
            sequence: self.next_sequence(),
            output: output.into(),
        });
    }

    pub fn node_failed(&self, kind: impl Into<String>, message: impl Into<String>) {
        let _ = self.tx.send(Event::NodeFailed {
            vertex_id: self.vertex_id.clone(),
            sequence: self.next_sequence(),
            kind: kind.into(),
            message: message.into(),
        });
    }

    pub fn node_skipped(&self, reason: impl Into<String>) {
        let _ = self.tx.send(Event::NodeSkipped {
            vertex_id: self.vertex_id.clone(),
            sequence: self.next_sequence(),
            reason: reason.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn node_start_precedes_token_stream() {
        let (bus, mut rx) = EventBus::new(16);
        let publisher = bus.publisher(VertexId::from("v1"));
        publisher.node_start();
        publisher.token_stream("hi");
        publisher.node_finish("hi");
        drop(publisher);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Event::NodeStart { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, Event::TokenStream { .. }));
        let third = rx.recv().await.unwrap();
        assert!(matches!(third, Event::NodeFinish { .. }));
    }

    #[tokio::test]
    async fn execution_complete_is_last() {
        let (bus, mut rx) = EventBus::new(16);
        let publisher = bus.publisher(VertexId::from("v1"));
        publisher.node_start();
        publisher.node_finish("done");
        drop(publisher);
        bus.execution_complete().await;

        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            let is_complete = matches!(ev, Event::ExecutionComplete { .. });
            events.push(ev);
            if is_complete {
                break;
            }
        }
        assert!(matches!(events.last().unwrap(), Event::ExecutionComplete { .. }));
    }

    #[tokio::test]
    async fn sequence_numbers_increase_per_vertex() {
        let (bus, mut rx) = EventBus::new(16);
        let publisher = bus.publisher(VertexId::from("v1"));
        publisher.node_start();
        publisher.node_finish("x");
        drop(publisher);

        let Event::NodeStart { sequence: s0, .. } = rx.recv().await.unwrap() else {
            panic!("expected NodeStart")
        };
        let Event::NodeFinish { sequence: s1, .. } = rx.recv().await.unwrap() else {
            panic!("expected NodeFinish")
        };
        assert!(s1 > s0);
    }
}
