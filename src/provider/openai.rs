//! Hosted backend over the OpenAI chat completions API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    GenerationOutput, GenerationRequest, ProviderClient, ProviderError, ProviderKind, http_client,
    map_http_error, map_transport_error, parse_retry_after,
};
use crate::extract::extract_json;

const BASE_URL: &str = "https://api.openai.com/v1";

/// Client for the OpenAI HTTP API.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt.clone(),
        });

        let body = ChatCompletionRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(format!("{BASE_URL}/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| map_transport_error(ProviderKind::OpenAi, err))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_http_error(
                ProviderKind::OpenAi,
                status,
                body_text,
                retry_after,
            ));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|err| {
            ProviderError::Malformed(format!("openai response did not decode: {err}"))
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                ProviderError::Malformed("openai returned no content in the response".to_string())
            })?;

        Ok(GenerationOutput {
            structured: extract_json(&text),
            text,
            tokens_used: parsed.usage.and_then(|u| u.total_tokens),
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .get(format!("{BASE_URL}/models"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|err| map_transport_error(ProviderKind::OpenAi, err))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(ProviderKind::OpenAi, status, body, None));
        }

        let listing: ModelListResponse = response.json().await.map_err(|err| {
            ProviderError::Malformed(format!("openai model list did not decode: {err}"))
        })?;

        Ok(listing.data.into_iter().map(|m| m.id).collect())
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}
