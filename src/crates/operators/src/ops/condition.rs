use async_trait::async_trait;
use graph_model::Port;

use crate::{require_str, Operator, OperatorError, OperatorInput, OperatorOutput, OperatorServices};

/// Config: `operator` in {contains, equals, not_contains}, `target`.
/// Result text is literal "true"/"false"; exactly one of the `true`/`false`
/// ports is enabled.
pub struct ConditionOperator;

#[async_trait]
impl Operator for ConditionOperator {
    async fn execute(
        &self,
        input: OperatorInput,
        services: &OperatorServices,
    ) -> Result<OperatorOutput, OperatorError> {
        services.publisher.node_start();

        let op = match require_str(&input.vertex.config, "operator") {
            Ok(o) => o,
            Err(e) => {
                services.publisher.node_failed(e.kind(), e.to_string());
                return Err(e);
            }
        };
        let target = match require_str(&input.vertex.config, "target") {
            Ok(t) => t,
            Err(e) => {
                services.publisher.node_failed(e.kind(), e.to_string());
                return Err(e);
            }
        };

        let verdict = match op.as_str() {
            "contains" => input.payload.contains(&target),
            "not_contains" => !input.payload.contains(&target),
            "equals" => input.payload == target,
            other => {
                let e = OperatorError::InvalidConfig(format!("unknown condition operator '{other}'"));
                services.publisher.node_failed(e.kind(), e.to_string());
                return Err(e);
            }
        };

        let text = if verdict { "true" } else { "false" }.to_string();
        services.publisher.node_finish(text.clone());
        Ok(OperatorOutput {
            text,
            enabled_ports: vec![if verdict { Port::True } else { Port::False }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bare_vertex, test_services};
    use graph_model::VertexKind;

    #[tokio::test]
    async fn contains_true_enables_true_port() {
        let (services, _rx) = test_services("c");
        let mut vertex = bare_vertex("c", VertexKind::Condition);
        vertex.config = serde_json::json!({"operator": "contains", "target": "unacceptable"});
        let input = OperatorInput {
            vertex,
            payload: "alpha unacceptable beta".to_string(),
            iteration: None,
        };
        let output = ConditionOperator.execute(input, &services).await.unwrap();
        assert_eq!(output.text, "true");
        assert_eq!(output.enabled_ports, vec![Port::True]);
    }

    #[tokio::test]
    async fn not_contains_false_enables_false_port() {
        let (services, _rx) = test_services("c");
        let mut vertex = bare_vertex("c", VertexKind::Condition);
        vertex.config = serde_json::json!({"operator": "not_contains", "target": "zzz"});
        let input = OperatorInput {
            vertex,
            payload: "zzz present".to_string(),
            iteration: None,
        };
        let output = ConditionOperator.execute(input, &services).await.unwrap();
        assert_eq!(output.text, "false");
        assert_eq!(output.enabled_ports, vec![Port::False]);
    }
}
