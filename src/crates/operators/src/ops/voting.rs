use async_trait::async_trait;

use crate::{config_f64, majority_vote, require_str, run_cancellable, Operator, OperatorError, OperatorInput,
    OperatorOutput, OperatorServices, PublisherSink};
use model_gateway::CompletionRequest;

/// Config: `model`, `method` in {majority, judge, consensus}, `temperature`.
/// Treats the inbound payload as the material to judge.
pub struct VotingOperator;

#[async_trait]
impl Operator for VotingOperator {
    async fn execute(
        &self,
        input: OperatorInput,
        services: &OperatorServices,
    ) -> Result<OperatorOutput, OperatorError> {
        services.publisher.node_start();

        let method = match require_str(&input.vertex.config, "method") {
            Ok(m) => m,
            Err(e) => {
                services.publisher.node_failed(e.kind(), e.to_string());
                return Err(e);
            }
        };

        let result: Result<String, OperatorError> = match method.as_str() {
            "majority" => {
                let candidates: Vec<String> = input
                    .payload
                    .split(|c| c == ',' || c == '\n')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                Ok(majority_vote(&candidates))
            }
            "judge" => {
                call_judge(
                    services,
                    &input,
                    "You are judging the following candidate answers. Produce a reasoned verdict \
                     naming the single best answer.",
                )
                .await
            }
            "consensus" => {
                call_judge(
                    services,
                    &input,
                    "You are given several positions. State the narrowest statement all of them \
                     would agree with.",
                )
                .await
            }
            other => Err(OperatorError::InvalidConfig(format!("unknown voting method '{other}'"))),
        };

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

async fn call_judge(
    services: &OperatorServices,
    input: &OperatorInput,
    system_prompt: &str,
) -> Result<String, OperatorError> {
    let model = require_str(&input.vertex.config, "model")?;
    let temperature = config_f64(&input.vertex.config, "temperature", 0.3).clamp(0.0, 2.0);
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
    run_cancellable(&services.cancellation, async {
        let outcome = services.gateway.stream(&request, &mut sink).await?;
        services.publisher.node_usage(outcome.usage.input_tokens, outcome.usage.output_tokens);
        Ok(outcome.text)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bare_vertex, test_services_with, ScriptedClient};
    use graph_model::VertexKind;

    #[tokio::test]
    async fn majority_parses_comma_and_newline_separated_candidates() {
        let (services, _rx) = test_services_with("v", ScriptedClient::always("unused"));
        let mut vertex = bare_vertex("v", VertexKind::Voting);
        vertex.config = serde_json::json!({"model": "m1", "method": "majority", "temperature": 0.0});
        let input = OperatorInput {
            vertex,
            payload: "42, 42\n41".to_string(),
            iteration: None,
        };
        let output = VotingOperator.execute(input, &services).await.unwrap();
        assert_eq!(output.text, "42");
    }

    #[tokio::test]
    async fn judge_calls_gateway() {
        let client = ScriptedClient::always("verdict: A wins");
        let (services, _rx) = test_services_with("v", client);
        let mut vertex = bare_vertex("v", VertexKind::Voting);
        vertex.config = serde_json::json!({"model": "m1", "method": "judge", "temperature": 0.0});
        let input = OperatorInput {
            vertex,
            payload: "A: foo\nB: bar".to_string(),
            iteration: None,
        };
        let output = VotingOperator.execute(input, &services).await.unwrap();
        assert_eq!(output.text, "verdict: A wins");
    }
}
