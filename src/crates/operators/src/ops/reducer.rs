use async_trait::async_trait;

use crate::{config_f64, require_str, run_cancellable, Operator, OperatorError, OperatorInput, OperatorOutput,
    OperatorServices, PublisherSink};
use model_gateway::CompletionRequest;

/// Config: `strategy` in {hierarchical, concatenate}, `model`,
/// `temperature`, `prompt`. Recognizes a JSON chunk list from `splitter`;
/// otherwise treats the inbound payload as a single chunk.
pub struct ReducerOperator;

#[async_trait]
impl Operator for ReducerOperator {
    async fn execute(
        &self,
        input: OperatorInput,
        services: &OperatorServices,
    ) -> Result<OperatorOutput, OperatorError> {
        services.publisher.node_start();

        let chunks: Vec<String> =
            serde_json::from_str(&input.payload).unwrap_or_else(|_| vec![input.payload.clone()]);

        let strategy = match require_str(&input.vertex.config, "strategy") {
            Ok(s) => s,
            Err(e) => {
                services.publisher.node_failed(e.kind(), e.to_string());
                return Err(e);
            }
        };

        let result: Result<String, OperatorError> = match strategy.as_str() {
            "concatenate" => Ok(chunks.join("\n\n")),
            "hierarchical" => match (require_str(&input.vertex.config, "model"), require_str(&input.vertex.config, "prompt")) {
                (Ok(model), Ok(prompt)) => {
                    let temperature = config_f64(&input.vertex.config, "temperature", 0.3).clamp(0.0, 2.0);
                    run_cancellable(&services.cancellation, async {
                        hierarchical_reduce(services, &model, &prompt, temperature, chunks).await
                    })
                    .await
                }
                (Err(e), _) | (_, Err(e)) => Err(e),
            },
            other => Err(OperatorError::InvalidConfig(format!("unknown reducer strategy '{other}'"))),
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

async fn summarize(
    services: &OperatorServices,
    model: &str,
    prompt: &str,
    temperature: f64,
    text: &str,
) -> Result<String, OperatorError> {
    let request = CompletionRequest {
        model: model.to_string(),
        system_prompt: Some(prompt.to_string()),
        user_text: text.to_string(),
        temperature: Some(temperature as f32),
        max_tokens: None,
    };
    let mut sink = PublisherSink {
        publisher: services.publisher.clone(),
        prefix: None,
    };
    let outcome = services.gateway.stream(&request, &mut sink).await?;
    services.publisher.node_usage(outcome.usage.input_tokens, outcome.usage.output_tokens);
    Ok(outcome.text)
}

async fn hierarchical_reduce(
    services: &OperatorServices,
    model: &str,
    prompt: &str,
    temperature: f64,
    chunks: Vec<String>,
) -> Result<String, OperatorError> {
    if chunks.is_empty() {
        return Ok(String::new());
    }
    let mut level = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        level.push(summarize(services, model, prompt, temperature, chunk).await?);
    }
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut iter = level.into_iter();
        while let Some(a) = iter.next() {
            match iter.next() {
                Some(b) => {
                    let combined = format!("{a}\n\n{b}");
                    next.push(summarize(services, model, prompt, temperature, &combined).await?);
                }
                None => next.push(a),
            }
        }
        level = next;
    }
    Ok(level.into_iter().next().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bare_vertex, test_services_with, ScriptedClient};
    use graph_model::VertexKind;

    #[tokio::test]
    async fn concatenate_joins_chunks_with_blank_line() {
        let (services, _rx) = test_services_with("r", ScriptedClient::always("unused"));
        let mut vertex = bare_vertex("r", VertexKind::Reducer);
        vertex.config = serde_json::json!({"strategy": "concatenate"});
        let input = OperatorInput {
            vertex,
            payload: serde_json::to_string(&vec!["a", "b"]).unwrap(),
            iteration: None,
        };
        let output = ReducerOperator.execute(input, &services).await.unwrap();
        assert_eq!(output.text, "a\n\nb");
    }

    #[tokio::test]
    async fn non_json_payload_treated_as_single_chunk() {
        let (services, _rx) = test_services_with("r", ScriptedClient::always("unused"));
        let mut vertex = bare_vertex("r", VertexKind::Reducer);
        vertex.config = serde_json::json!({"strategy": "concatenate"});
        let input = OperatorInput {
            vertex,
            payload: "plain text".to_string(),
            iteration: None,
        };
        let output = ReducerOperator.execute(input, &services).await.unwrap();
        assert_eq!(output.text, "plain text");
    }

    #[tokio::test]
    async fn hierarchical_recurses_to_one_summary() {
        let client = ScriptedClient::always("summary");
        let (services, _rx) = test_services_with("r", client);
        let mut vertex = bare_vertex("r", VertexKind::Reducer);
        vertex.config = serde_json::json!({"strategy": "hierarchical", "model": "m1", "prompt": "summarize", "temperature": 0.2});
        let input = OperatorInput {
            vertex,
            payload: serde_json::to_string(&vec!["chunk one", "chunk two", "chunk three"]).unwrap(),
            iteration: None,
        };
        let output = ReducerOperator.execute(input, &services).await.unwrap();
        assert_eq!(output.text, "summary");
    }
}
