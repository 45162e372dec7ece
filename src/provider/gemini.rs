//! Hosted backend over the Gemini generateContent API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    GenerationOutput, GenerationRequest, ProviderClient, ProviderError, ProviderKind, http_client,
    map_http_error, map_transport_error, parse_retry_after,
};
use crate::extract::extract_json;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Client for the Gemini HTTP API.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: request.prompt.clone(),
                }],
            }],
            system_instruction: request.system_prompt.as_ref().map(|text| Content {
                role: "system",
                parts: vec![Part { text: text.clone() }],
            }),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };

        let url = format!(
            "{BASE_URL}/{}:generateContent?key={}",
            request.model, self.api_key
        );

        let started = Instant::now();
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| map_transport_error(ProviderKind::Gemini, err))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_http_error(
                ProviderKind::Gemini,
                status,
                body_text,
                retry_after,
            ));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|err| {
            ProviderError::Malformed(format!("gemini response did not decode: {err}"))
        })?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or_else(|| {
                ProviderError::Malformed("gemini returned no candidates".to_string())
            })?;

        Ok(GenerationOutput {
            structured: extract_json(&text),
            text,
            tokens_used: parsed
                .usage_metadata
                .and_then(|usage| usage.total_token_count),
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{BASE_URL}?key={}", self.api_key);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| map_transport_error(ProviderKind::Gemini, err))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(ProviderKind::Gemini, status, body, None));
        }

        let listing: ModelListResponse = response.json().await.map_err(|err| {
            ProviderError::Malformed(format!("gemini model list did not decode: {err}"))
        })?;

        // Names arrive as "models/gemini-2.5-flash".
        Ok(listing
            .models
            .into_iter()
            .map(|m| m.name.trim_start_matches("models/").to_string())
            .collect())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: Option<u64>,
}

#[derive(Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    name: String,
}
