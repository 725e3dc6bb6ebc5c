use async_trait::async_trait;

use crate::{Operator, OperatorError, OperatorInput, OperatorOutput, OperatorServices};

/// Output is the authoring-time seed value; no I/O, no predecessors.
pub struct InputOperator;

#[async_trait]
impl Operator for InputOperator {
    async fn execute(
        &self,
        input: OperatorInput,
        services: &OperatorServices,
    ) -> Result<OperatorOutput, OperatorError> {
        services.publisher.node_start();
        let text = input.vertex.seed.clone().unwrap_or_default();
        services.publisher.node_finish(text.clone());
        Ok(OperatorOutput {
            text,
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
    async fn outputs_seed_value() {
        let (services, _rx) = test_services("a");
        let mut vertex = bare_vertex("a", VertexKind::Input);
        vertex.seed = Some("hi".to_string());
        let input = OperatorInput {
            vertex,
            payload: String::new(),
            iteration: None,
        };
        let output = InputOperator.execute(input, &services).await.unwrap();
        assert_eq!(output.text, "hi");
    }
}
