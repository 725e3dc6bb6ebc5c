use async_trait::async_trait;

use crate::{config_str, run_cancellable, Operator, OperatorError, OperatorInput, OperatorOutput, OperatorServices};
use search_client::SearchRequest;

/// Config: optional override `query`. Uses the override when non-empty,
/// else the inbound payload.
pub struct SearchOperator;

#[async_trait]
impl Operator for SearchOperator {
    async fn execute(
        &self,
        input: OperatorInput,
        services: &OperatorServices,
    ) -> Result<OperatorOutput, OperatorError> {
        services.publisher.node_start();

        let override_query = config_str(&input.vertex.config, "query").unwrap_or_default();
        let query = if !override_query.is_empty() {
            override_query
        } else {
            input.payload.clone()
        };

        let request = SearchRequest {
            query,
            max_results: None,
        };

        let result = run_cancellable(&services.cancellation, async {
            let results = services.search.search(&request).await?;
            Ok(search_client::format_results(&results))
        })
        .await;

        match result {
            Ok(text) => {
                services.publisher.node_finish(text.clone());
                Ok(OperatorOutput {
                    text,
                    enabled_ports: Vec::new(),
                })
            }
            Err(e) => {
                services.publisher.node_failed(e.kind(), e.to_string());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bare_vertex, test_services};
    use graph_model::VertexKind;

    #[tokio::test]
    async fn empty_results_return_empty_string() {
        let (services, _rx) = test_services("s");
        let input = OperatorInput {
            vertex: bare_vertex("s", VertexKind::Search),
            payload: "weather today".to_string(),
            iteration: None,
        };
        let output = SearchOperator.execute(input, &services).await.unwrap();
        assert_eq!(output.text, "");
    }
}
