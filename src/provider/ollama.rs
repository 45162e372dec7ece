//! Local-inference backend over the plain Ollama HTTP API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    GenerationOutput, GenerationRequest, ProviderClient, ProviderError, ProviderKind, http_client,
    map_http_error, map_transport_error, parse_retry_after,
};
use crate::extract::extract_json;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Client for a local Ollama server.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into();
        Self {
            client: http_client(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn full_prompt(request: &GenerationRequest) -> String {
        match &request.system_prompt {
            Some(system) => format!("{system}\n\nUser: {}\n\nAssistant:", request.prompt),
            None => request.prompt.clone(),
        }
    }
}

#[async_trait]
impl ProviderClient for OllamaClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        let body = GenerateRequest {
            model: request.model.clone(),
            prompt: Self::full_prompt(request),
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|err| map_transport_error(ProviderKind::Ollama, err))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_http_error(
                ProviderKind::Ollama,
                status,
                body_text,
                retry_after,
            ));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|err| {
            ProviderError::Malformed(format!("ollama response did not decode: {err}"))
        })?;

        Ok(GenerationOutput {
            structured: extract_json(&parsed.response),
            text: parsed.response,
            tokens_used: parsed.eval_count,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|err| map_transport_error(ProviderKind::Ollama, err))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(ProviderKind::Ollama, status, body, None));
        }

        let tags: TagsResponse = response.json().await.map_err(|err| {
            ProviderError::Malformed(format!("ollama tag list did not decode: {err}"))
        })?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TaggedModel>,
}

#[derive(Deserialize)]
struct TaggedModel {
    name: String,
}
