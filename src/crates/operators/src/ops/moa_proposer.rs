use async_trait::async_trait;

use crate::{config_f64, run_cancellable, Operator, OperatorError, OperatorInput, OperatorOutput, OperatorServices, PublisherSink};
use model_gateway::CompletionRequest;

/// Config: ordered list `models` (length >= 1), `temperature`. One call
/// per model in parallel; a single proposer's failure (after the
/// gateway's own retry/fallback budget) degrades that entry to
/// `"<unavailable>"` rather than failing the whole vertex.
pub struct MoaProposerOperator;

#[async_trait]
impl Operator for MoaProposerOperator {
    async fn execute(
        &self,
        input: OperatorInput,
        services: &OperatorServices,
    ) -> Result<OperatorOutput, OperatorError> {
        services.publisher.node_start();

        let models: Vec<String> = match input.vertex.config.get("models").and_then(|v| v.as_array()) {
            Some(arr) if !arr.is_empty() => arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            _ => {
                let e = OperatorError::InvalidConfig("missing or empty field 'models'".into());
                services.publisher.node_failed(e.kind(), e.to_string());
                return Err(e);
            }
        };
        let temperature = config_f64(&input.vertex.config, "temperature", 0.7).clamp(0.0, 2.0);

        let outcome = run_cancellable(&services.cancellation, async {
            let futures = models.iter().map(|model| {
                let model = model.clone();
                let payload = input.payload.clone();
                async move {
                    let request = CompletionRequest {
                        model: model.clone(),
                        system_prompt: None,
                        user_text: payload,
                        temperature: Some(temperature as f32),
                        max_tokens: None,
                    };
                    let mut sink = PublisherSink {
                        publisher: services.publisher.clone(),
                        prefix: None,
                    };
                    match services.gateway.stream(&request, &mut sink).await {
                        Ok(o) => {
                            services.publisher.node_usage(o.usage.input_tokens, o.usage.output_tokens);
                            (model, o.text)
                        }
                        Err(_) => (model, "<unavailable>".to_string()),
                    }
                }
            });
            Ok::<_, OperatorError>(futures::future::join_all(futures).await)
        })
        .await;

        let pairs = match outcome {
            Ok(p) => p,
            Err(e) => {
                services.publisher.node_failed(e.kind(), e.to_string());
                return Err(e);
            }
        };

        let text = format!(
            "{{{}}}",
            pairs
                .iter()
                .map(|(model, text)| format!("{}:{}", serde_json::to_string(model).unwrap(), serde_json::to_string(text).unwrap()))
                .collect::<Vec<_>>()
                .join(",")
        );

        services.publisher.node_finish(text.clone());
        Ok(OperatorOutput {
            text,
            enabled_ports: Vec::new(),
        })
    }
}
