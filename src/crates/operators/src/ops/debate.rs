use async_trait::async_trait;

use crate::{config_f64, config_u64, require_str, run_cancellable, Operator, OperatorError, OperatorInput,
    OperatorOutput, OperatorServices, PublisherSink};
use model_gateway::CompletionRequest;

const BASE_POSITIONS: [&str; 3] = ["PRO", "CON", "NEUTRAL"];

/// Config: `model`, `debaters` in [2,5], `rounds` in [1,5], `temperature`.
/// Runs `rounds` sequential rounds; each round every debater produces a
/// statement in parallel given the topic plus transcript so far.
pub struct DebateOperator;

fn position_name(index: usize) -> String {
    BASE_POSITIONS
        .get(index)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("POSITION_{}", index + 1))
}

#[async_trait]
impl Operator for DebateOperator {
    async fn execute(
        &self,
        input: OperatorInput,
        services: &OperatorServices,
    ) -> Result<OperatorOutput, OperatorError> {
        services.publisher.node_start();

        let config_result = (|| -> Result<(String, u64, u64, f64), OperatorError> {
            let model = require_str(&input.vertex.config, "model")?;
            let debaters = config_u64(&input.vertex.config, "debaters", 0);
            if !(2..=5).contains(&debaters) {
                return Err(OperatorError::InvalidConfig("debaters must be in [2,5]".into()));
            }
            let rounds = config_u64(&input.vertex.config, "rounds", 0);
            if !(1..=5).contains(&rounds) {
                return Err(OperatorError::InvalidConfig("rounds must be in [1,5]".into()));
            }
            let temperature = config_f64(&input.vertex.config, "temperature", 0.7).clamp(0.0, 2.0);
            Ok((model, debaters, rounds, temperature))
        })();

        let (model, debaters, rounds, temperature) = match config_result {
            Ok(v) => v,
            Err(e) => {
                services.publisher.node_failed(e.kind(), e.to_string());
                return Err(e);
            }
        };

        let positions: Vec<String> = (0..debaters).map(|i| position_name(i as usize)).collect();
        let topic = input.payload.clone();

        let result = run_cancellable(&services.cancellation, async {
            run_debate(services, &model, temperature, rounds, &positions, &topic).await
        })
        .await;

        match result {
            Ok(transcript) => {
                services.publisher.node_finish(transcript.clone());
                Ok(OperatorOutput {
                    text: transcript,
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

async fn run_debate(
    services: &OperatorServices,
    model: &str,
    temperature: f64,
    rounds: u64,
    positions: &[String],
    topic: &str,
) -> Result<String, OperatorError> {
    let mut transcript = String::new();
    for round in 1..=rounds {
        let futures = positions.iter().map(|position| {
            let model = model.to_string();
            let topic = topic.to_string();
            let transcript_so_far = transcript.clone();
            let position = position.clone();
            async move {
                let header = format!("\n\n=== Round {round} / {position} ===\n");
                let user_text = format!("Topic: {topic}\n\nTranscript so far:\n{transcript_so_far}");
                let request = CompletionRequest {
                    model,
                    system_prompt: Some(format!(
                        "You are debating from the {position} position. Respond with a single statement."
                    )),
                    user_text,
                    temperature: Some(temperature as f32),
                    max_tokens: None,
                };
                let mut sink = PublisherSink {
                    publisher: services.publisher.clone(),
                    prefix: Some(header),
                };
                let outcome = services.gateway.stream(&request, &mut sink).await?;
                services.publisher.node_usage(outcome.usage.input_tokens, outcome.usage.output_tokens);
                Ok::<(String, String), OperatorError>((position, outcome.text))
            }
        });
        let statements: Vec<Result<(String, String), OperatorError>> = futures::future::join_all(futures).await;
        for statement in statements {
            let (position, text) = statement?;
            transcript.push_str(&format!("Round {round} — {position}: {text}\n"));
        }
    }
    Ok(transcript)
}
