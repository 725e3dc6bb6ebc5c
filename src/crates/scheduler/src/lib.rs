//! Data-driven ready-set scheduler. Not a topological walk: `loop` vertices
//! become ready on every back-edge delivery, not once when all predecessors
//! have fired, so the dispatch loop tracks per-edge delivery state rather
//! than walking the graph in a fixed order.

use event_bus::EventBus;
use graph_model::{Edge, EdgeId, Graph, Port, Vertex, VertexId, VertexKind};
use operators::{Operator, OperatorError, OperatorInput, OperatorServices};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default bound on concurrently running vertices.
pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Ready,
    Running,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("internal invariant violated: vertex left without a terminal state")]
    Stuck,
}

impl SchedulerError {
    pub fn kind(&self) -> &'static str {
        "scheduler-stuck"
    }
}

struct VertexState {
    normal_incoming_total: usize,
    delivered: HashMap<EdgeId, Option<String>>,
    admitted_once: bool,
    iteration: u32,
    status: Status,
}

struct PendingWork {
    vertex_id: VertexId,
    payload: String,
    iteration: Option<u32>,
}

enum WorkerOutcome {
    Success { vertex_id: VertexId, output: String, enabled_ports: Vec<Port> },
    Failed { vertex_id: VertexId },
}

/// Drives one submitted, already-validated graph to completion, publishing
/// every vertex's progress to `event_bus` and terminating with exactly one
/// `execution_complete` or `execution_error`.
pub struct Scheduler {
    graph: Graph,
    registry: HashMap<VertexKind, Arc<dyn Operator>>,
    gateway: Arc<model_gateway::Gateway>,
    search: Arc<dyn search_client::SearchClient>,
    event_bus: Arc<EventBus>,
    cancellation: CancellationToken,
    concurrency: usize,
}

impl Scheduler {
    pub fn new(
        graph: Graph,
        registry: HashMap<VertexKind, Arc<dyn Operator>>,
        gateway: Arc<model_gateway::Gateway>,
        search: Arc<dyn search_client::SearchClient>,
        event_bus: Arc<EventBus>,
        cancellation: CancellationToken,
    ) -> Self {
        Scheduler {
            graph,
            registry,
            gateway,
            search,
            event_bus,
            cancellation,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub async fn run(self) -> Result<(), SchedulerError> {
        let back_edges = self.graph.back_edges();
        let mut outgoing: HashMap<VertexId, Vec<Edge>> = HashMap::new();
        let mut incoming: HashMap<VertexId, Vec<Edge>> = HashMap::new();
        for v in self.graph.vertices() {
            outgoing.insert(v.id.clone(), Vec::new());
            incoming.insert(v.id.clone(), Vec::new());
        }
        for e in self.graph.edges() {
            outgoing.get_mut(&e.source).unwrap().push(e.clone());
            incoming.get_mut(&e.target).unwrap().push(e.clone());
        }

        let mut states: HashMap<VertexId, VertexState> = HashMap::new();
        for v in self.graph.vertices() {
            let normal_total = incoming[&v.id]
                .iter()
                .filter(|e| !back_edges.contains(&e.id))
                .count();
            states.insert(
                v.id.clone(),
                VertexState {
                    normal_incoming_total: normal_total,
                    delivered: HashMap::new(),
                    admitted_once: false,
                    iteration: 0,
                    status: Status::Pending,
                },
            );
        }

        let vertex_by_id: HashMap<VertexId, &Vertex> =
            self.graph.vertices().iter().map(|v| (v.id.clone(), v)).collect();

        let mut ready_queue: VecDeque<PendingWork> = VecDeque::new();
        let mut initial: Vec<VertexId> = self
            .graph
            .vertices()
            .iter()
            .filter(|v| states[&v.id].normal_incoming_total == 0)
            .map(|v| v.id.clone())
            .collect();
        initial.sort();
        for id in initial {
            let state = states.get_mut(&id).unwrap();
            state.admitted_once = true;
            state.status = Status::Ready;
            ready_queue.push_back(PendingWork {
                vertex_id: id,
                payload: String::new(),
                iteration: None,
            });
        }

        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<WorkerOutcome>();
        let mut in_flight = 0usize;
        let total_vertices = self.graph.vertices().len();
        let mut terminal_count = 0usize;

        loop {
            if self.cancellation.is_cancelled() {
                ready_queue.clear();
            }

            while in_flight < self.concurrency {
                let Some(work) = ready_queue.pop_front() else { break };
                states.get_mut(&work.vertex_id).unwrap().status = Status::Running;
                in_flight += 1;
                self.spawn_worker(work, &vertex_by_id, result_tx.clone());
            }

            if in_flight == 0 && ready_queue.is_empty() {
                break;
            }

            match result_rx.recv().await {
                Some(outcome) => {
                    in_flight -= 1;
                    terminal_count += self.handle_outcome(
                        outcome,
                        &mut states,
                        &outgoing,
                        &back_edges,
                        &vertex_by_id,
                        &mut ready_queue,
                    );
                }
                None => break,
            }
        }

        if terminal_count < total_vertices {
            self.event_bus
                .execution_error("scheduler-stuck", "vertex left without a terminal state")
                .await;
            return Err(SchedulerError::Stuck);
        }

        self.event_bus.execution_complete().await;
        Ok(())
    }

    fn spawn_worker(
        &self,
        work: PendingWork,
        vertex_by_id: &HashMap<VertexId, &Vertex>,
        result_tx: mpsc::UnboundedSender<WorkerOutcome>,
    ) {
        let vertex = (*vertex_by_id.get(&work.vertex_id).unwrap()).clone();
        let operator = self.registry.get(&vertex.kind).cloned();
        let publisher = self.event_bus.publisher(work.vertex_id.clone());
        let services = OperatorServices {
            gateway: self.gateway.clone(),
            search: self.search.clone(),
            publisher,
            cancellation: self.cancellation.clone(),
        };
        let input = OperatorInput {
            vertex,
            payload: work.payload,
            iteration: work.iteration,
        };
        let vertex_id = work.vertex_id;

        tokio::spawn(async move {
            let outcome = match operator {
                Some(op) => op.execute(input, &services).await,
                None => Err(OperatorError::InvalidConfig("no operator registered for this kind".into())),
            };
            let message = match outcome {
                Ok(output) => WorkerOutcome::Success {
                    vertex_id,
                    output: output.text,
                    enabled_ports: output.enabled_ports,
                },
                Err(_) => WorkerOutcome::Failed { vertex_id },
            };
            let _ = result_tx.send(message);
        });
    }

    fn handle_outcome(
        &self,
        outcome: WorkerOutcome,
        states: &mut HashMap<VertexId, VertexState>,
        outgoing: &HashMap<VertexId, Vec<Edge>>,
        back_edges: &HashSet<EdgeId>,
        vertex_by_id: &HashMap<VertexId, &Vertex>,
        ready_queue: &mut VecDeque<PendingWork>,
    ) -> usize {
        let (vertex_id, output, enabled_ports, failed) = match outcome {
            WorkerOutcome::Success { vertex_id, output, enabled_ports } => (vertex_id, output, enabled_ports, false),
            WorkerOutcome::Failed { vertex_id } => (vertex_id, String::new(), Vec::new(), true),
        };
        states.get_mut(&vertex_id).unwrap().status = if failed { Status::Failed } else { Status::Success };
        1 + self.propagate(&vertex_id, &enabled_ports, output, states, outgoing, back_edges, vertex_by_id, ready_queue)
    }

    /// Delivers or disables every outgoing edge of `vertex_id`, admitting,
    /// re-admitting (loop back-edges), or transitively skipping successors
    /// as needed. Returns the number of additional vertices that reached a
    /// terminal state as a result (skips cascading through the graph).
    fn propagate(
        &self,
        vertex_id: &VertexId,
        enabled_ports: &[Port],
        output: String,
        states: &mut HashMap<VertexId, VertexState>,
        outgoing: &HashMap<VertexId, Vec<Edge>>,
        back_edges: &HashSet<EdgeId>,
        vertex_by_id: &HashMap<VertexId, &Vertex>,
        ready_queue: &mut VecDeque<PendingWork>,
    ) -> usize {
        let mut newly_terminal = 0;
        let succeeded = states[vertex_id].status == Status::Success;
        let edges = outgoing.get(vertex_id).cloned().unwrap_or_default();
        let mut newly_ready: Vec<PendingWork> = Vec::new();

        for edge in edges {
            let enabled = match edge.source_port {
                Some(p) => enabled_ports.contains(&p),
                None => succeeded,
            };

            let target = &edge.target;
            let is_back_edge = back_edges.contains(&edge.id);

            if is_back_edge {
                debug_assert_eq!(vertex_by_id[target].kind, VertexKind::Loop);
                if enabled {
                    let state = states.get_mut(target).unwrap();
                    state.iteration += 1;
                    let iter = state.iteration;
                    state.status = Status::Ready;
                    newly_ready.push(PendingWork {
                        vertex_id: target.clone(),
                        payload: output.clone(),
                        iteration: Some(iter),
                    });
                }
                continue;
            }

            let state = states.get_mut(target).unwrap();
            state
                .delivered
                .insert(edge.id.clone(), if enabled { Some(output.clone()) } else { None });

            let all_delivered = state.delivered.len() == state.normal_incoming_total;
            if all_delivered && !state.admitted_once {
                state.admitted_once = true;
                let all_disabled = state.normal_incoming_total > 0 && state.delivered.values().all(|v| v.is_none());
                if all_disabled {
                    state.status = Status::Skipped;
                    let target_id = target.clone();
                    self.event_bus
                        .publisher(target_id.clone())
                        .node_skipped("every inbound edge had a disabled source port");
                    newly_terminal += 1;
                    newly_terminal += self.propagate(
                        &target_id,
                        &[],
                        String::new(),
                        states,
                        outgoing,
                        back_edges,
                        vertex_by_id,
                        ready_queue,
                    );
                } else {
                    let mut pairs: Vec<(VertexId, String)> = Vec::new();
                    for (edge_id, maybe_payload) in state.delivered.iter() {
                        if let Some(payload) = maybe_payload {
                            let source = outgoing
                                .values()
                                .flatten()
                                .find(|e| &e.id == edge_id)
                                .map(|e| e.source.clone())
                                .unwrap();
                            pairs.push((source, payload.clone()));
                        }
                    }
                    pairs.sort_by(|a, b| a.0.cmp(&b.0));
                    let payload = pairs.into_iter().map(|(_, p)| p).collect::<Vec<_>>().join("\n\n");
                    state.status = Status::Ready;
                    newly_ready.push(PendingWork {
                        vertex_id: target.clone(),
                        payload,
                        iteration: None,
                    });
                }
            }
        }

        newly_ready.sort_by(|a, b| a.vertex_id.cmp(&b.vertex_id));
        for work in newly_ready {
            ready_queue.push_back(work);
        }
        newly_terminal
    }
}
