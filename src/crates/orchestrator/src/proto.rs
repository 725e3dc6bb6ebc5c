//! Wire protocol for the duplex session connection: one client frame
//! submits a graph, the server replies with a stream of tagged frames,
//! one per engine event, terminated by `executionComplete` or
//! `executionError`.

use graph_model::{EdgeDoc, VertexDoc};
use serde::{Deserialize, Serialize};

/// The only frame a client ever sends: the graph to run, plus whatever
/// upstream credential the session needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    pub nodes: Vec<VertexDoc>,
    pub edges: Vec<EdgeDoc>,
}

/// One server->client frame. Tagged by `type` so a thin client can match
/// on the discriminant without deserializing the whole enum eagerly.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "nodeStart")]
    NodeStart { #[serde(rename = "nodeId")] node_id: String, sequence: u64 },

    #[serde(rename = "tokenStream")]
    TokenStream {
        #[serde(rename = "nodeId")]
        node_id: String,
        sequence: u64,
        token: String,
    },

    #[serde(rename = "nodeUsage")]
    NodeUsage {
        #[serde(rename = "nodeId")]
        node_id: String,
        sequence: u64,
        #[serde(rename = "inputTokens")]
        input_tokens: u64,
        #[serde(rename = "outputTokens")]
        output_tokens: u64,
    },

    #[serde(rename = "nodeFinish")]
    NodeFinish {
        #[serde(rename = "nodeId")]
        node_id: String,
        sequence: u64,
        output: String,
    },

    #[serde(rename = "nodeFailed")]
    NodeFailed {
        #[serde(rename = "nodeId")]
        node_id: String,
        sequence: u64,
        kind: String,
        message: String,
    },

    #[serde(rename = "nodeSkipped")]
    NodeSkipped {
        #[serde(rename = "nodeId")]
        node_id: String,
        sequence: u64,
        reason: String,
    },

    #[serde(rename = "executionComplete")]
    ExecutionComplete { sequence: u64 },

    #[serde(rename = "executionError")]
    ExecutionError { kind: String, message: String },
}

impl From<event_bus::Event> for ServerFrame {
    fn from(event: event_bus::Event) -> Self {
        use event_bus::Event as E;
        match event {
            E::NodeStart { vertex_id, sequence } => ServerFrame::NodeStart {
                node_id: vertex_id.to_string(),
                sequence,
            },
            E::TokenStream { vertex_id, sequence, token } => ServerFrame::TokenStream {
                node_id: vertex_id.to_string(),
                sequence,
                token,
            },
            E::NodeUsage { vertex_id, sequence, input_tokens, output_tokens } => ServerFrame::NodeUsage {
                node_id: vertex_id.to_string(),
                sequence,
                input_tokens,
                output_tokens,
            },
            E::NodeFinish { vertex_id, sequence, output } => ServerFrame::NodeFinish {
                node_id: vertex_id.to_string(),
                sequence,
                output,
            },
            E::NodeFailed { vertex_id, sequence, kind, message } => ServerFrame::NodeFailed {
                node_id: vertex_id.to_string(),
                sequence,
                kind,
                message,
            },
            E::NodeSkipped { vertex_id, sequence, reason } => ServerFrame::NodeSkipped {
                node_id: vertex_id.to_string(),
                sequence,
                reason,
            },
            E::ExecutionComplete { sequence } => ServerFrame::ExecutionComplete { sequence },
            E::ExecutionError { kind, message } => ServerFrame::ExecutionError { kind, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_parses_camel_case_api_key() {
        let raw = r#"{"apiKey": "secret", "nodes": [], "edges": []}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.api_key, "secret");
    }

    #[test]
    fn server_frame_tags_node_finish() {
        let frame = ServerFrame::NodeFinish {
            node_id: "a".to_string(),
            sequence: 1,
            output: "hi".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"nodeFinish\""));
        assert!(json.contains("\"nodeId\":\"a\""));
    }

    #[test]
    fn execution_complete_event_converts() {
        let frame: ServerFrame = event_bus::Event::ExecutionComplete { sequence: 5 }.into();
        assert!(matches!(frame, ServerFrame::ExecutionComplete { sequence: 5 }));
    }
}
