//! Hosted backend over the Anthropic messages API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    GenerationOutput, GenerationRequest, ProviderClient, ProviderError, ProviderKind, http_client,
    map_http_error, map_transport_error, parse_retry_after,
};
use crate::extract::extract_json;

const BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Well-known Claude models, used for `list_models`; the messages API has
/// no listing endpoint.
const KNOWN_MODELS: [&str; 3] = [
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku-20241022",
    "claude-3-opus-20240229",
];

/// Client for the Anthropic HTTP API.
#[derive(Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        let body = CreateMessageRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system_prompt.clone(),
            messages: vec![Message {
                role: "user",
                content: request.prompt.clone(),
            }],
        };

        let started = Instant::now();
        let response = self
            .client
            .post(BASE_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| map_transport_error(ProviderKind::Claude, err))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_http_error(
                ProviderKind::Claude,
                status,
                body_text,
                retry_after,
            ));
        }

        let parsed: CreateMessageResponse = response.json().await.map_err(|err| {
            ProviderError::Malformed(format!("claude response did not decode: {err}"))
        })?;

        let text = parsed
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| {
                ProviderError::Malformed("claude returned no text content".to_string())
            })?;

        let tokens_used = parsed
            .usage
            .map(|u| u.input_tokens.unwrap_or(0) + u.output_tokens.unwrap_or(0));

        Ok(GenerationOutput {
            structured: extract_json(&text),
            text,
            tokens_used,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(KNOWN_MODELS.iter().map(|m| m.to_string()).collect())
    }
}

#[derive(Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let body = CreateMessageRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 2000,
            temperature: 0.7,
            system: Some("You output JSON actions.".to_string()),
            messages: vec![Message {
                role: "user",
                content: "Create a 20mm cube".to_string(),
            }],
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains(r#""system":"You output JSON actions.""#));
        assert!(json.contains(r#""role":"user""#));
    }

    #[test]
    fn system_omitted_when_absent() {
        let body = CreateMessageRequest {
            model: "claude-3-5-haiku-20241022".to_string(),
            max_tokens: 100,
            temperature: 0.0,
            system: None,
            messages: vec![],
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("system"));
    }

    #[test]
    fn response_parsing_sums_token_usage() {
        let parsed: CreateMessageResponse = serde_json::from_str(
            r#"{
                "content": [{"type": "text", "text": "{\"action\": \"create_box\"}"}],
                "usage": {"input_tokens": 30, "output_tokens": 12}
            }"#,
        )
        .unwrap();
        let usage = parsed.usage.unwrap();
        assert_eq!(
            usage.input_tokens.unwrap() + usage.output_tokens.unwrap(),
            42
        );
        assert!(parsed.content[0].text.as_deref().unwrap().contains("create_box"));
    }

    #[test]
    fn list_models_is_static() {
        let client = AnthropicClient::new("key", Duration::from_secs(1));
        assert_eq!(client.kind(), ProviderKind::Claude);
    }
}
