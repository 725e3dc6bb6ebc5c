use async_trait::async_trait;

use crate::{
    config_f64, require_str, run_cancellable, Operator, OperatorError, OperatorInput, OperatorOutput,
    OperatorServices, PublisherSink,
};
use model_gateway::CompletionRequest;

/// Config: `model`, `temperature` in [0,2], optional `system_prompt`.
pub struct LlmOperator;

#[async_trait]
impl Operator for LlmOperator {
    async fn execute(
        &self,
        input: OperatorInput,
        services: &OperatorServices,
    ) -> Result<OperatorOutput, OperatorError> {
        services.publisher.node_start();

        let model = match require_str(&input.vertex.config, "model") {
            Ok(m) => m,
            Err(e) => {
                services.publisher.node_failed(e.kind(), e.to_string());
                return Err(e);
            }
        };
        let temperature = config_f64(&input.vertex.config, "temperature", 0.7).clamp(0.0, 2.0);
        let system_prompt = input
            .vertex
            .config
            .get("system_prompt")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let request = CompletionRequest {
            model,
            system_prompt,
            user_text: input.payload.clone(),
            temperature: Some(temperature as f32),
            max_tokens: None,
        };

        let mut sink = PublisherSink {
            publisher: services.publisher.clone(),
            prefix: None,
        };

        let result = run_cancellable(&services.cancellation, async {
            services.gateway.stream(&request, &mut sink).await.map_err(OperatorError::from)
        })
        .await;

        match result {
            Ok(outcome) => {
                services.publisher.node_usage(outcome.usage.input_tokens, outcome.usage.output_tokens);
                services.publisher.node_finish(outcome.text.clone());
                Ok(OperatorOutput {
                    text: outcome.text,
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
    use crate::test_support::{bare_vertex, test_services_with, ScriptedClient};
    use graph_model::VertexKind;

    #[tokio::test]
    async fn calls_gateway_with_payload_as_user_text() {
        let client = ScriptedClient::always("HI");
        let (services, _rx) = test_services_with("b", client);
        let mut vertex = bare_vertex("b", VertexKind::Llm);
        vertex.config = serde_json::json!({"model": "m1", "temperature": 0.0, "system_prompt": "uppercase"});
        let input = OperatorInput {
            vertex,
            payload: "hi".to_string(),
            iteration: None,
        };
        let output = LlmOperator.execute(input, &services).await.unwrap();
        assert_eq!(output.text, "HI");
    }

    #[tokio::test]
    async fn missing_model_is_invalid_config() {
        let (services, _rx) = test_services_with("b", ScriptedClient::always("x"));
        let vertex = bare_vertex("b", VertexKind::Llm);
        let input = OperatorInput {
            vertex,
            payload: "hi".to_string(),
            iteration: None,
        };
        let err = LlmOperator.execute(input, &services).await.unwrap_err();
        assert_eq!(err.kind(), "operator-invalid-config");
    }
}
