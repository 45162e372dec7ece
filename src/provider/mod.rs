//! Uniform capability interface over heterogeneous generative backends.
//!
//! Every backend satisfies the same [`ProviderClient`] contract; callers
//! never branch on provider identity beyond chain selection. Clients are
//! stateless with respect to business data — the shared `reqwest::Client`
//! connection pool is an internal performance detail.

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The backends the router can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
    Claude,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Claude => "claude",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ollama" => Ok(ProviderKind::Ollama),
            "openai" => Ok(ProviderKind::OpenAi),
            "gemini" => Ok(ProviderKind::Gemini),
            "claude" => Ok(ProviderKind::Claude),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("unknown provider '{0}'")]
pub struct UnknownProvider(pub String);

/// One generation request, fully resolved by the router.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Raw output of a successful generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub text: String,
    /// JSON object extracted from the text, when the backend offered a
    /// structured payload or one could be lifted out of the raw text.
    pub structured: Option<Value>,
    pub tokens_used: Option<u64>,
    pub latency_ms: f64,
}

/// Typed failures a provider call can produce.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("provider unreachable: {0}")]
    Unreachable(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::Auth(_) => ProviderErrorKind::Auth,
            ProviderError::RateLimited { .. } => ProviderErrorKind::RateLimited,
            ProviderError::Timeout(_) => ProviderErrorKind::Timeout,
            ProviderError::Unreachable(_) => ProviderErrorKind::Unreachable,
            ProviderError::Malformed(_) => ProviderErrorKind::Malformed,
        }
    }
}

/// Discriminant of [`ProviderError`], used in attempt diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Auth,
    RateLimited,
    Timeout,
    Unreachable,
    Malformed,
}

/// One failed invocation within a routing chain, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub provider: ProviderKind,
    pub model: String,
    /// Zero-based retry counter within this chain entry.
    pub retry_index: u32,
    pub error: ProviderErrorKind,
    pub message: String,
}

/// Uniform generate-text capability every backend implements.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn generate(&self, request: &GenerationRequest)
    -> Result<GenerationOutput, ProviderError>;

    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;
}

/// Builds the HTTP client all backends share settings for.
pub(crate) fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Maps a transport-level failure onto the error taxonomy.
pub(crate) fn map_transport_error(provider: ProviderKind, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(format!("{provider} request timed out: {err}"))
    } else if err.is_connect() {
        ProviderError::Unreachable(format!("{provider} connection failed: {err}"))
    } else {
        ProviderError::Unreachable(format!("{provider} request failed: {err}"))
    }
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Maps a non-success HTTP status onto the error taxonomy.
///
/// The hosted APIs all wrap failures as `{"error": {"message": ...}}`, so
/// one decoder covers them; an undecodable body falls back to the raw text.
pub(crate) fn map_http_error(
    provider: ProviderKind,
    status: StatusCode,
    body: String,
    retry_after: Option<Duration>,
) -> ProviderError {
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|wrapper| wrapper.error.message)
        .unwrap_or(body);
    let message = format!("{provider} returned {status}: {message}");

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            message,
            retry_after,
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ProviderError::Timeout(message)
        }
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE => ProviderError::Unreachable(message),
        _ => ProviderError::Malformed(message),
    }
}

pub(crate) fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    value.parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_round_trip() {
        for kind in [
            ProviderKind::Ollama,
            ProviderKind::OpenAi,
            ProviderKind::Gemini,
            ProviderKind::Claude,
        ] {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
        }
        assert!("cohere".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn serde_names_match_wire_format() {
        assert_eq!(
            serde_json::to_string(&ProviderKind::OpenAi).unwrap(),
            r#""openai""#
        );
        assert_eq!(
            serde_json::from_str::<ProviderKind>(r#""claude""#).unwrap(),
            ProviderKind::Claude
        );
    }

    #[test]
    fn auth_statuses_map_to_auth() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let err = map_http_error(ProviderKind::OpenAi, status, String::new(), None);
            assert_eq!(err.kind(), ProviderErrorKind::Auth);
        }
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = map_http_error(
            ProviderKind::Claude,
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"message": "slow down"}}"#.to_string(),
            Some(Duration::from_secs(7)),
        );
        match err {
            ProviderError::RateLimited {
                message,
                retry_after,
            } => {
                assert!(message.contains("slow down"));
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn server_errors_map_to_unreachable() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            let err = map_http_error(ProviderKind::Gemini, status, "down".to_string(), None);
            assert_eq!(err.kind(), ProviderErrorKind::Unreachable);
        }
    }

    #[test]
    fn error_body_message_is_extracted() {
        let err = map_http_error(
            ProviderKind::OpenAi,
            StatusCode::UNAUTHORIZED,
            r#"{"error": {"message": "Invalid API key provided"}}"#.to_string(),
            None,
        );
        assert!(err.to_string().contains("Invalid API key provided"));
    }

    #[test]
    fn retry_after_header_parses_seconds() {
        let header = HeaderValue::from_static("12");
        assert_eq!(
            parse_retry_after(Some(&header)),
            Some(Duration::from_secs(12))
        );
        let bad = HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT");
        assert_eq!(parse_retry_after(Some(&bad)), None);
    }
}
