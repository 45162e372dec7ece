//! Outbound response schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::normalize::NormalizedResult;
use crate::provider::{AttemptFailure, ProviderKind};
use crate::schema::action::CadAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
    ClarificationNeeded,
}

/// A question back to the user when the intent was ambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarifyingQuestion {
    pub question: String,
    #[serde(default)]
    pub context: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// Metadata about the winning generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMetadata {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// The winning provider's output plus its normalized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub provider: ProviderKind,
    pub model: String,
    pub raw_output: String,
    pub normalized: NormalizedResult,
    pub metadata: LlmMetadata,
}

/// Reply handed back to the request-handling layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpResponse {
    pub status: ResponseStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions_to_execute: Vec<CadAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_response: Option<LlmResponse>,
    /// Structured payload for non-generation commands (model listings,
    /// health reports).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Ordered attempt failures collected while walking the chain. On
    /// chain exhaustion this is the complete diagnostic list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<AttemptFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl McpResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
            actions_to_execute: Vec::new(),
            llm_response: None,
            data: None,
            diagnostics: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: message.into(),
            actions_to_execute: Vec::new(),
            llm_response: None,
            data: None,
            diagnostics: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<AttemptFailure>) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}
