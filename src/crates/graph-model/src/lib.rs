//! Graph model and topology validator.
//!
//! Parses a submitted computation graph (vertices + edges, as produced by the
//! visual editor) into a validated [`Graph`], or rejects it with
//! [`GraphError::InvalidGraph`]. Validation order follows the checks listed
//! in the component design: schema, reference integrity, kind-specific port
//! legality, then the generalized acyclicity rule.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

/// Stable vertex identifier, assigned by the graph editor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexId(pub String);

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VertexId {
    fn from(s: &str) -> Self {
        VertexId(s.to_string())
    }
}

/// Stable edge identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub String);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of vertex kinds the engine knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VertexKind {
    Input,
    Output,
    Llm,
    Search,
    Condition,
    Loop,
    Splitter,
    Reducer,
    SelfConsistency,
    MoaProposer,
    MoaAggregator,
    Debate,
    Voting,
}

impl VertexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VertexKind::Input => "input",
            VertexKind::Output => "output",
            VertexKind::Llm => "llm",
            VertexKind::Search => "search",
            VertexKind::Condition => "condition",
            VertexKind::Loop => "loop",
            VertexKind::Splitter => "splitter",
            VertexKind::Reducer => "reducer",
            VertexKind::SelfConsistency => "self-consistency",
            VertexKind::MoaProposer => "moa-proposer",
            VertexKind::MoaAggregator => "moa-aggregator",
            VertexKind::Debate => "debate",
            VertexKind::Voting => "voting",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "input" => VertexKind::Input,
            "output" => VertexKind::Output,
            "llm" => VertexKind::Llm,
            "search" => VertexKind::Search,
            "condition" => VertexKind::Condition,
            "loop" => VertexKind::Loop,
            "splitter" => VertexKind::Splitter,
            "reducer" => VertexKind::Reducer,
            "self-consistency" => VertexKind::SelfConsistency,
            "moa-proposer" => VertexKind::MoaProposer,
            "moa-aggregator" => VertexKind::MoaAggregator,
            "debate" => VertexKind::Debate,
            "voting" => VertexKind::Voting,
            _ => return None,
        })
    }
}

impl fmt::Display for VertexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named outgoing channel on a vertex. Only `condition` and `loop`
/// vertices have more than one; every other kind has a single, unnamed,
/// always-enabled-on-success port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Port {
    True,
    False,
    Loop,
    Done,
}

impl Port {
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "true" => Port::True,
            "false" => Port::False,
            "loop" => Port::Loop,
            "done" => Port::Done,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Port::True => "true",
            Port::False => "false",
            Port::Loop => "loop",
            Port::Done => "done",
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A vertex in the computation graph. Immutable after submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vertex {
    pub id: VertexId,
    pub kind: VertexKind,
    /// Kind-specific configuration, interpreted by the matching operator.
    pub config: serde_json::Value,
    /// Authoring-time seed value, used only by `input` vertices.
    pub seed: Option<String>,
}

/// A directed edge between two vertices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: VertexId,
    pub target: VertexId,
    /// Distinguishes multi-output vertices (`true`/`false`, `loop`/`done`).
    pub source_port: Option<Port>,
    /// Preserved for round-tripping; unused by execution semantics.
    pub target_port: Option<String>,
}

/// A validated, immutable graph ready for execution.
#[derive(Debug, Clone)]
pub struct Graph {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    index: HashMap<VertexId, usize>,
}

impl Graph {
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn vertex(&self, id: &VertexId) -> Option<&Vertex> {
        self.index.get(id).map(|&i| &self.vertices[i])
    }

    pub fn outgoing(&self, id: &VertexId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| &e.source == id)
    }

    pub fn incoming(&self, id: &VertexId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| &e.target == id)
    }

    /// Edges targeting a `loop` vertex whose source is forward-reachable
    /// from that loop vertex along non-back edges. Computed once, at
    /// validation time, since the graph is immutable afterward.
    pub fn back_edges(&self) -> HashSet<EdgeId> {
        compute_back_edges(&self.vertices, &self.edges)
    }
}

/// Wire-shape vertex as submitted by the client (see session protocol).
#[derive(Debug, Clone, Deserialize)]
pub struct VertexDoc {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: VertexDataDoc,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VertexDataDoc {
    #[serde(default)]
    pub node_config: serde_json::Value,
    #[serde(default, rename = "inputValue")]
    pub input_value: Option<String>,
}

/// Wire-shape edge as submitted by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeDoc {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, rename = "sourceHandle")]
    pub source_handle: Option<String>,
    #[serde(default, rename = "targetHandle")]
    pub target_handle: Option<String>,
}

/// The submitted graph document: an ordered sequence of vertices and edges.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphDocument {
    #[serde(rename = "nodes")]
    pub vertices: Vec<VertexDoc>,
    pub edges: Vec<EdgeDoc>,
}

/// Errors raised while validating a submitted graph.
#[derive(Debug, Error, Clone)]
pub enum GraphError {
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
}

impl GraphError {
    /// Stable error-kind string, per the error taxonomy.
    pub fn kind(&self) -> &'static str {
        "invalid-graph"
    }
}

type Result<T> = std::result::Result<T, GraphError>;

impl Graph {
    /// Validate a submitted graph document, in order: schema, reference
    /// integrity, kind-specific port legality, generalized acyclicity.
    pub fn from_document(doc: GraphDocument) -> Result<Graph> {
        // --- schema ---
        let mut vertices = Vec::with_capacity(doc.vertices.len());
        let mut seen_ids = HashSet::new();
        for v in &doc.vertices {
            if v.id.is_empty() {
                return Err(GraphError::InvalidGraph("vertex id must not be empty".into()));
            }
            if !seen_ids.insert(v.id.clone()) {
                return Err(GraphError::InvalidGraph(format!("duplicate vertex id: {}", v.id)));
            }
            let kind = VertexKind::parse(&v.kind)
                .ok_or_else(|| GraphError::InvalidGraph(format!("unknown vertex kind: {}", v.kind)))?;
            vertices.push(Vertex {
                id: VertexId(v.id.clone()),
                kind,
                config: v.data.node_config.clone(),
                seed: v.data.input_value.clone(),
            });
        }

        let mut edges = Vec::with_capacity(doc.edges.len());
        for e in &doc.edges {
            let source_port = match &e.source_handle {
                Some(raw) if !raw.is_empty() => Some(
                    Port::parse(raw)
                        .ok_or_else(|| GraphError::InvalidGraph(format!("unknown port: {}", raw)))?,
                ),
                _ => None,
            };
            edges.push(Edge {
                id: EdgeId(e.id.clone()),
                source: VertexId(e.source.clone()),
                target: VertexId(e.target.clone()),
                source_port,
                target_port: e.target_handle.clone(),
            });
        }

        // --- reference integrity ---
        let index: HashMap<VertexId, usize> = vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (v.id.clone(), i))
            .collect();
        for e in &edges {
            if !index.contains_key(&e.source) {
                return Err(GraphError::InvalidGraph(format!(
                    "edge {} references unknown source vertex {}",
                    e.id, e.source
                )));
            }
            if !index.contains_key(&e.target) {
                return Err(GraphError::InvalidGraph(format!(
                    "edge {} references unknown target vertex {}",
                    e.id, e.target
                )));
            }
        }

        // --- kind-specific port legality ---
        for v in &vertices {
            let outgoing: Vec<&Edge> = edges.iter().filter(|e| e.source == v.id).collect();
            match v.kind {
                VertexKind::Condition => {
                    for e in &outgoing {
                        match e.source_port {
                            Some(Port::True) | Some(Port::False) => {}
                            _ => {
                                return Err(GraphError::InvalidGraph(format!(
                                    "condition vertex {} has an outgoing edge with an illegal port",
                                    v.id
                                )))
                            }
                        }
                    }
                }
                VertexKind::Loop => {
                    for e in &outgoing {
                        match e.source_port {
                            Some(Port::Loop) | Some(Port::Done) => {}
                            _ => {
                                return Err(GraphError::InvalidGraph(format!(
                                    "loop vertex {} has an outgoing edge with an illegal port",
                                    v.id
                                )))
                            }
                        }
                    }
                    // Direct self-loops are disallowed; a worker chain of
                    // length >= 2 back to the loop is fine.
                    for e in &outgoing {
                        if e.target == v.id {
                            return Err(GraphError::InvalidGraph(format!(
                                "loop vertex {} has a direct self-loop",
                                v.id
                            )));
                        }
                    }
                }
                _ => {
                    for e in &outgoing {
                        if e.source_port.is_some() {
                            return Err(GraphError::InvalidGraph(format!(
                                "vertex {} of kind {} must not use a named output port",
                                v.id, v.kind
                            )));
                        }
                    }
                }
            }
        }

        // --- generalized acyclicity: cycles permitted only through `loop` ---
        let back_edges = compute_back_edges(&vertices, &edges);
        if has_cycle_excluding(&vertices, &edges, &back_edges) {
            return Err(GraphError::InvalidGraph(
                "graph contains a cycle not passing through a loop vertex".into(),
            ));
        }

        // --- at least one sink reachable from some source ---
        let sources: Vec<&VertexId> = vertices
            .iter()
            .filter(|v| !edges.iter().any(|e| e.target == v.id))
            .map(|v| &v.id)
            .collect();
        let sinks: HashSet<&VertexId> = vertices
            .iter()
            .filter(|v| !edges.iter().any(|e| e.source == v.id))
            .map(|v| &v.id)
            .collect();
        if sinks.is_empty() || sources.is_empty() {
            return Err(GraphError::InvalidGraph(
                "graph must have at least one source and one sink".into(),
            ));
        }
        let reaches_sink = sources.iter().any(|s| {
            let mut visited = HashSet::new();
            let mut queue = VecDeque::from([(*s).clone()]);
            while let Some(cur) = queue.pop_front() {
                if sinks.contains(&cur) {
                    return true;
                }
                if !visited.insert(cur.clone()) {
                    continue;
                }
                for e in edges.iter().filter(|e| e.source == cur) {
                    queue.push_back(e.target.clone());
                }
            }
            false
        });
        if !reaches_sink {
            return Err(GraphError::InvalidGraph(
                "no sink is reachable from any source".into(),
            ));
        }

        Ok(Graph { vertices, edges, index })
    }
}

fn compute_back_edges(vertices: &[Vertex], edges: &[Edge]) -> HashSet<EdgeId> {
    let loop_ids: HashSet<&VertexId> = vertices
        .iter()
        .filter(|v| v.kind == VertexKind::Loop)
        .map(|v| &v.id)
        .collect();

    let mut back_edges = HashSet::new();
    for e in edges {
        if !loop_ids.contains(&e.target) {
            continue;
        }
        // Is e.source forward-reachable from e.target, using every edge
        // except this one?
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([e.target.clone()]);
        let mut found = false;
        while let Some(cur) = queue.pop_front() {
            if !visited.insert(cur.clone()) {
                continue;
            }
            for other in edges.iter().filter(|o| o.source == cur && o.id != e.id) {
                if other.target == e.source {
                    found = true;
                    break;
                }
                queue.push_back(other.target.clone());
            }
            if found {
                break;
            }
        }
        if found {
            back_edges.insert(e.id.clone());
        }
    }
    back_edges
}

fn has_cycle_excluding(vertices: &[Vertex], edges: &[Edge], excluded: &HashSet<EdgeId>) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks: HashMap<VertexId, Mark> =
        vertices.iter().map(|v| (v.id.clone(), Mark::Unvisited)).collect();

    fn visit(
        v: &VertexId,
        edges: &[Edge],
        excluded: &HashSet<EdgeId>,
        marks: &mut HashMap<VertexId, Mark>,
    ) -> bool {
        match marks.get(v) {
            Some(Mark::InProgress) => return true,
            Some(Mark::Done) => return false,
            _ => {}
        }
        marks.insert(v.clone(), Mark::InProgress);
        for e in edges.iter().filter(|e| &e.source == v && !excluded.contains(&e.id)) {
            if visit(&e.target, edges, excluded, marks) {
                return true;
            }
        }
        marks.insert(v.clone(), Mark::Done);
        false
    }

    for v in vertices {
        if visit(&v.id, edges, excluded, &mut marks) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(vertices: Vec<VertexDoc>, edges: Vec<EdgeDoc>) -> GraphDocument {
        GraphDocument { vertices, edges }
    }

    fn v(id: &str, kind: &str) -> VertexDoc {
        VertexDoc {
            id: id.to_string(),
            kind: kind.to_string(),
            data: VertexDataDoc::default(),
        }
    }

    fn e(id: &str, source: &str, target: &str, port: Option<&str>) -> EdgeDoc {
        EdgeDoc {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: port.map(|p| p.to_string()),
            target_handle: None,
        }
    }

    #[test]
    fn linear_graph_is_valid() {
        let g = doc(
            vec![v("a", "input"), v("b", "llm"), v("c", "output")],
            vec![e("e1", "a", "b", None), e("e2", "b", "c", None)],
        );
        let graph = Graph::from_document(g).unwrap();
        assert_eq!(graph.vertices().len(), 3);
    }

    #[test]
    fn unknown_kind_rejected() {
        let g = doc(vec![v("a", "mystery")], vec![]);
        assert!(Graph::from_document(g).is_err());
    }

    #[test]
    fn dangling_edge_rejected() {
        let g = doc(vec![v("a", "input")], vec![e("e1", "a", "ghost", None)]);
        assert!(Graph::from_document(g).is_err());
    }

    #[test]
    fn condition_illegal_port_rejected() {
        let g = doc(
            vec![v("a", "condition"), v("b", "output")],
            vec![e("e1", "a", "b", Some("loop"))],
        );
        assert!(Graph::from_document(g).is_err());
    }

    #[test]
    fn cycle_without_loop_rejected() {
        let g = doc(
            vec![v("a", "llm"), v("b", "llm")],
            vec![e("e1", "a", "b", None), e("e2", "b", "a", None)],
        );
        assert!(Graph::from_document(g).is_err());
    }

    #[test]
    fn cycle_through_loop_is_valid() {
        let g = doc(
            vec![v("a", "input"), v("l", "loop"), v("w", "llm"), v("o", "output")],
            vec![
                e("e1", "a", "l", None),
                e("e2", "l", "w", Some("loop")),
                e("e3", "w", "l", None),
                e("e4", "l", "o", Some("done")),
            ],
        );
        let graph = Graph::from_document(g).unwrap();
        let back = graph.back_edges();
        assert_eq!(back.len(), 1);
        assert!(back.contains(&EdgeId("e3".to_string())));
    }

    #[test]
    fn direct_self_loop_rejected() {
        let g = doc(vec![v("l", "loop")], vec![e("e1", "l", "l", Some("loop"))]);
        assert!(Graph::from_document(g).is_err());
    }

    #[test]
    fn no_sink_rejected() {
        let g = doc(
            vec![v("a", "llm"), v("b", "llm")],
            vec![e("e1", "a", "b", None), e("e2", "b", "a", None), e("e3", "a", "a", None)],
        );
        // a has a self-loop edge which is not a loop kind -> also a cycle
        // without a loop vertex, caught by acyclicity check first.
        assert!(Graph::from_document(g).is_err());
    }
}
