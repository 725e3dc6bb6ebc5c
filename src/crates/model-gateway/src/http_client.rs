//! Default HTTP adapter to a hosted completion gateway, shaped after the
//! teacher's `OpenAiClient`: builds a chat-completions request, maps HTTP
//! status codes onto `GatewayError`, and reports provider-supplied usage
//! when present.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{CompletionOutcome, CompletionRequest, GatewayError, ModelClient, TokenSink, TokenUsage};

#[derive(Debug, Clone)]
pub struct HttpModelClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpModelClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        HttpModelClient {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("building reqwest client"),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> GatewayError {
    match status.as_u16() {
        401 | 403 => GatewayError::Upstream(format!("{status} unauthorized: {body}")),
        404 => GatewayError::Upstream(format!("{status} not found: {body}")),
        429 => GatewayError::Upstream(format!("{status} rate limit exceeded: {body}")),
        s if s >= 500 => GatewayError::Upstream(format!("{status} server error: {body}")),
        _ => GatewayError::Upstream(format!("{status}: {body}")),
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionOutcome, GatewayError> {
        let mut messages = Vec::new();
        if let Some(sys) = &req.system_prompt {
            messages.push(ChatMessage { role: "system", content: sys });
        }
        messages.push(ChatMessage { role: "user", content: &req.user_text });

        let body = ChatRequest {
            model: &req.model,
            messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Upstream(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Upstream(format!("malformed response body: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        let usage = match parsed.usage {
            Some(u) => TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                estimated: false,
            },
            None => TokenUsage::estimate(req.system_prompt.as_deref(), &req.user_text, &text),
        };

        Ok(CompletionOutcome {
            text,
            usage,
            model_used: parsed.model.unwrap_or_else(|| req.model.clone()),
        })
    }

    async fn stream(
        &self,
        req: &CompletionRequest,
        sink: &mut dyn TokenSink,
    ) -> Result<CompletionOutcome, GatewayError> {
        // Token-level streaming against the hosted gateway is out of scope
        // for this adapter; deliver the full completion as one token so
        // callers driving a `TokenSink` still observe at least one event.
        let outcome = self.complete(req).await?;
        sink.token(&outcome.text).await;
        Ok(outcome)
    }

    fn clone_box(&self) -> Box<dyn ModelClient> {
        Box::new(self.clone())
    }
}
