use async_trait::async_trait;

use crate::{config_f64, require_str, run_cancellable, Operator, OperatorError, OperatorInput, OperatorOutput, OperatorServices, PublisherSink};
use model_gateway::CompletionRequest;

/// Config: `model`, `temperature`, `strategy` in {synthesis, critique,
/// best}. Invokes the model once over the inbound payload (the JSON from
/// a preceding `moa-proposer`) with a strategy-specific system prompt.
pub struct MoaAggregatorOperator;

fn system_prompt_for(strategy: &str) -> Result<&'static str, OperatorError> {
    match strategy {
        "synthesis" => Ok(
            "You are given several proposed answers as a JSON object mapping model name to \
             proposal. Combine the strongest elements of each into a single best answer.",
        ),
        "critique" => Ok(
            "You are given several proposed answers as a JSON object mapping model name to \
             proposal. Critique each briefly, then select the strongest one, explaining why.",
        ),
        "best" => Ok(
            "You are given several proposed answers as a JSON object mapping model name to \
             proposal. Select the single best proposal and reproduce it verbatim.",
        ),
        other => Err(OperatorError::InvalidConfig(format!("unknown aggregator strategy '{other}'"))),
    }
}

#[async_trait]
impl Operator for MoaAggregatorOperator {
    async fn execute(
        &self,
        input: OperatorInput,
        services: &OperatorServices,
    ) -> Result<OperatorOutput, OperatorError> {
        services.publisher.node_start();

        let config_result = (|| -> Result<(String, f64, &'static str), OperatorError> {
            let model = require_str(&input.vertex.config, "model")?;
            let temperature = config_f64(&input.vertex.config, "temperature", 0.5).clamp(0.0, 2.0);
            let strategy = require_str(&input.vertex.config, "strategy")?;
            let system_prompt = system_prompt_for(&strategy)?;
            Ok((model, temperature, system_prompt))
        })();

        let (model, temperature, system_prompt) = match config_result {
            Ok(v) => v,
            Err(e) => {
                services.publisher.node_failed(e.kind(), e.to_string());
                return Err(e);
            }
        };

        let request = CompletionRequest {
            model,
            system_prompt: Some(system_prompt.to_string()),
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
    async fn synthesis_calls_gateway_once() {
        let client = ScriptedClient::always("combined answer");
        let (services, _rx) = test_services_with("ma", client);
        let mut vertex = bare_vertex("ma", VertexKind::MoaAggregator);
        vertex.config = serde_json::json!({"model": "m1", "temperature": 0.5, "strategy": "synthesis"});
        let input = OperatorInput {
            vertex,
            payload: r#"{"m1":"a","m2":"b"}"#.to_string(),
            iteration: None,
        };
        let output = MoaAggregatorOperator.execute(input, &services).await.unwrap();
        assert_eq!(output.text, "combined answer");
    }
}
