use async_trait::async_trait;
use graph_model::Port;

use crate::{config_str, config_u64, Operator, OperatorError, OperatorInput, OperatorOutput, OperatorServices};

/// Config: `max_iterations` >= 1, optional `target_text`. A controllable
/// re-entry point with two outgoing ports, `loop` and `done`.
///
/// The scheduler supplies `input.iteration`: `None` on initial admission
/// (counter 0), `Some(k)` on the k-th back-edge delivery (counter k).
pub struct LoopOperator;

#[async_trait]
impl Operator for LoopOperator {
    async fn execute(
        &self,
        input: OperatorInput,
        services: &OperatorServices,
    ) -> Result<OperatorOutput, OperatorError> {
        services.publisher.node_start();

        let max_iterations = config_u64(&input.vertex.config, "max_iterations", 1).max(1);
        let target_text = config_str(&input.vertex.config, "target_text");

        let counter = input.iteration.unwrap_or(0) as u64;
        let target_hit = match (&target_text, input.iteration) {
            (Some(t), Some(_)) => input.payload.contains(t.as_str()),
            _ => false,
        };
        let keep_looping = counter < max_iterations && !target_hit;

        services.publisher.node_finish(input.payload.clone());
        Ok(OperatorOutput {
            text: input.payload,
            enabled_ports: vec![if keep_looping { Port::Loop } else { Port::Done }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bare_vertex, test_services};
    use graph_model::VertexKind;

    fn vertex_with_max(max: u64) -> graph_model::Vertex {
        let mut v = bare_vertex("l", VertexKind::Loop);
        v.config = serde_json::json!({"max_iterations": max});
        v
    }

    #[tokio::test]
    async fn initial_admission_enables_loop() {
        let (services, _rx) = test_services("l");
        let input = OperatorInput {
            vertex: vertex_with_max(3),
            payload: "x".to_string(),
            iteration: None,
        };
        let output = LoopOperator.execute(input, &services).await.unwrap();
        assert_eq!(output.enabled_ports, vec![Port::Loop]);
    }

    #[tokio::test]
    async fn reaches_done_at_max_iterations() {
        let (services, _rx) = test_services("l");
        let input = OperatorInput {
            vertex: vertex_with_max(3),
            payload: "x".to_string(),
            iteration: Some(3),
        };
        let output = LoopOperator.execute(input, &services).await.unwrap();
        assert_eq!(output.enabled_ports, vec![Port::Done]);
    }

    #[tokio::test]
    async fn target_text_match_exits_early() {
        let (services, _rx) = test_services("l");
        let mut vertex = vertex_with_max(5);
        vertex.config = serde_json::json!({"max_iterations": 5, "target_text": "done marker"});
        let input = OperatorInput {
            vertex,
            payload: "we are done marker here".to_string(),
            iteration: Some(1),
        };
        let output = LoopOperator.execute(input, &services).await.unwrap();
        assert_eq!(output.enabled_ports, vec![Port::Done]);
    }
}
