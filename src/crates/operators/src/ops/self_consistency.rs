use async_trait::async_trait;
use std::sync::Mutex;

use crate::{
    config_f64, config_u64, majority_vote, require_str, run_cancellable, Operator, OperatorError, OperatorInput,
    OperatorOutput, OperatorServices, PublisherSink,
};
use model_gateway::CompletionRequest;

/// Config: `model`, `samples` >= 2, `voting` in {majority, longest, first},
/// `temperature` >= 0. Issues `samples` parallel calls at temperatures
/// `temperature + k*0.1`; per-sample token streams interleave on the same
/// vertex id, which the event bus permits.
pub struct SelfConsistencyOperator;

#[async_trait]
impl Operator for SelfConsistencyOperator {
    async fn execute(
        &self,
        input: OperatorInput,
        services: &OperatorServices,
    ) -> Result<OperatorOutput, OperatorError> {
        services.publisher.node_start();

        let config_result = (|| -> Result<(String, u64, String, f64), OperatorError> {
            let model = require_str(&input.vertex.config, "model")?;
            let samples = config_u64(&input.vertex.config, "samples", 0);
            if samples < 2 {
                return Err(OperatorError::InvalidConfig("samples must be >= 2".into()));
            }
            let voting = require_str(&input.vertex.config, "voting")?;
            let temperature = config_f64(&input.vertex.config, "temperature", 0.0).max(0.0);
            Ok((model, samples, voting, temperature))
        })();

        let (model, samples, voting, base_temperature) = match config_result {
            Ok(v) => v,
            Err(e) => {
                services.publisher.node_failed(e.kind(), e.to_string());
                return Err(e);
            }
        };

        let completion_log: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let result = run_cancellable(&services.cancellation, async {
            let futures = (0..samples).map(|k| {
                let model = model.clone();
                let payload = input.payload.clone();
                let temperature = (base_temperature + (k as f64) * 0.1).clamp(0.0, 2.0);
                let completion_log = &completion_log;
                async move {
                    let request = CompletionRequest {
                        model,
                        system_prompt: None,
                        user_text: payload,
                        temperature: Some(temperature as f32),
                        max_tokens: None,
                    };
                    let mut sink = PublisherSink {
                        publisher: services.publisher.clone(),
                        prefix: None,
                    };
                    let outcome = services.gateway.stream(&request, &mut sink).await?;
                    services
                        .publisher
                        .node_usage(outcome.usage.input_tokens, outcome.usage.output_tokens);
                    completion_log.lock().unwrap().push(outcome.text.clone());
                    Ok::<String, OperatorError>(outcome.text)
                }
            });
            let results: Vec<Result<String, OperatorError>> = futures::future::join_all(futures).await;
            let texts: Vec<String> = results.into_iter().collect::<Result<Vec<_>, _>>()?;
            Ok(texts)
        })
        .await;

        let texts = match result {
            Ok(t) => t,
            Err(e) => {
                services.publisher.node_failed(e.kind(), e.to_string());
                return Err(e);
            }
        };

        let completion_order = completion_log.into_inner().unwrap();
        let chosen = match voting.as_str() {
            "majority" => majority_vote(&completion_order),
            "longest" => texts
                .iter()
                .max_by_key(|t| t.chars().count())
                .cloned()
                .unwrap_or_default(),
            "first" => completion_order.first().cloned().unwrap_or_default(),
            other => {
                let e = OperatorError::InvalidConfig(format!("unknown voting method '{other}'"));
                services.publisher.node_failed(e.kind(), e.to_string());
                return Err(e);
            }
        };

        services.publisher.node_finish(chosen.clone());
        Ok(OperatorOutput {
            text: chosen,
            enabled_ports: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bare_vertex, test_services_with, ScriptedClient};
    use graph_model::VertexKind;

    #[tokio::test]
    async fn majority_picks_most_common_normalized_answer() {
        let client = ScriptedClient::new(vec![Ok("41".into()), Ok("42".into()), Ok("42".into())]);
        let (services, _rx) = test_services_with("sc", client);
        let mut vertex = bare_vertex("sc", VertexKind::SelfConsistency);
        vertex.config = serde_json::json!({"model": "m1", "samples": 3, "voting": "majority", "temperature": 0.0});
        let input = OperatorInput {
            vertex,
            payload: "what is the answer".to_string(),
            iteration: None,
        };
        let output = SelfConsistencyOperator.execute(input, &services).await.unwrap();
        assert_eq!(output.text, "42");
    }
}
