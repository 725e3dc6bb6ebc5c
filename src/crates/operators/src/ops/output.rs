use async_trait::async_trait;

use crate::{Operator, OperatorError, OperatorInput, OperatorOutput, OperatorServices};

/// Terminal vertex kind; output equals the inbound payload unchanged.
pub struct OutputOperator;

#[async_trait]
impl Operator for OutputOperator {
    async fn execute(
        &self,
        input: OperatorInput,
        services: &OperatorServices,
    ) -> Result<OperatorOutput, OperatorError> {
        services.publisher.node_start();
        services.publisher.node_finish(input.payload.clone());
        Ok(OperatorOutput {
            text: input.payload,
            enabled_ports: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bare_vertex, test_services};
    use graph_model::VertexKind;

    #[tokio::test]
    async fn passes_payload_through() {
        let (services, _rx) = test_services("o");
        let input = OperatorInput {
            vertex: bare_vertex("o", VertexKind::Output),
            payload: "hello".to_string(),
            iteration: None,
        };
        let output = OutputOperator.execute(input, &services).await.unwrap();
        assert_eq!(output.text, "hello");
    }
}
