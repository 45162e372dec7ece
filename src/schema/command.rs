//! Inbound command schema.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::provider::ProviderKind;

const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 2000;

/// Command verbs the router understands.
///
/// Anything else deserializes to `Unknown` and is rejected before routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    AskModel,
    ListModels,
    HealthCheck,
    #[serde(other)]
    Unknown,
}

/// Snapshot of the host's design state, passed through verbatim.
///
/// The core never interprets these values beyond echoing them into the
/// prompt preamble and the design-state cache records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignContext {
    #[serde(default = "default_component")]
    pub active_component: String,
    #[serde(default = "default_units")]
    pub units: String,
    #[serde(default = "default_state")]
    pub design_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_sketch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub geometry_count: HashMap<String, u64>,
}

fn default_component() -> String {
    "RootComponent".to_string()
}

fn default_units() -> String {
    "mm".to_string()
}

fn default_state() -> String {
    "empty".to_string()
}

impl Default for DesignContext {
    fn default() -> Self {
        Self {
            active_component: default_component(),
            units: default_units(),
            design_state: default_state(),
            active_sketch: None,
            material: None,
            parameters: HashMap::new(),
            geometry_count: HashMap::new(),
        }
    }
}

impl DesignContext {
    /// Renders the preamble prepended to the user prompt.
    pub fn prompt_preamble(&self) -> String {
        format!(
            "Design Context:\n- Active Component: {}\n- Units: {}\n- Design State: {}\n",
            self.active_component, self.units, self.design_state
        )
    }
}

/// Model selection and generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl ModelParams {
    /// Minimal parameter set: a bare prompt with defaults for the rest.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            provider: None,
            model: None,
            prompt: prompt.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Validates ranges before any provider is contacted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ValidationError::TemperatureOutOfRange(self.temperature));
        }
        if self.max_tokens == 0 {
            return Err(ValidationError::InvalidMaxTokens);
        }
        Ok(())
    }
}

/// One inbound request from the CAD host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpCommand {
    pub command: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ModelParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<DesignContext>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl McpCommand {
    pub fn ask_model(params: ModelParams) -> Self {
        Self {
            command: CommandKind::AskModel,
            params: Some(params),
            context: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_context(mut self, context: DesignContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Rejections raised before a command reaches the routing chain.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Missing model parameters")]
    MissingParams,
    #[error("Prompt must not be empty")]
    EmptyPrompt,
    #[error("Temperature {0} outside [0.0, 2.0]")]
    TemperatureOutOfRange(f32),
    #[error("max_tokens must be a positive integer")]
    InvalidMaxTokens,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_command_deserializes_to_unknown() {
        let cmd: McpCommand =
            serde_json::from_str(r#"{"command": "execute_action"}"#).unwrap();
        assert_eq!(cmd.command, CommandKind::Unknown);
    }

    #[test]
    fn ask_model_round_trip() {
        let json = r#"{
            "command": "ask_model",
            "params": {
                "provider": "openai",
                "model": "gpt-4o-mini",
                "prompt": "Create a 20mm cube"
            },
            "context": {"design_state": "has_geometry"}
        }"#;
        let cmd: McpCommand = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.command, CommandKind::AskModel);
        let params = cmd.params.unwrap();
        assert_eq!(params.provider, Some(ProviderKind::OpenAi));
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.max_tokens, 2000);
        let context = cmd.context.unwrap();
        assert_eq!(context.design_state, "has_geometry");
        assert_eq!(context.active_component, "RootComponent");
    }

    #[test]
    fn validate_rejects_bad_temperature() {
        let mut params = ModelParams::from_prompt("box");
        params.temperature = 2.5;
        assert_eq!(
            params.validate(),
            Err(ValidationError::TemperatureOutOfRange(2.5))
        );
    }

    #[test]
    fn validate_rejects_empty_prompt() {
        let params = ModelParams::from_prompt("   ");
        assert_eq!(params.validate(), Err(ValidationError::EmptyPrompt));
    }

    #[test]
    fn validate_rejects_zero_max_tokens() {
        let mut params = ModelParams::from_prompt("box");
        params.max_tokens = 0;
        assert_eq!(params.validate(), Err(ValidationError::InvalidMaxTokens));
    }

    #[test]
    fn preamble_lists_component_units_and_state() {
        let context = DesignContext::default();
        let preamble = context.prompt_preamble();
        assert!(preamble.contains("Active Component: RootComponent"));
        assert!(preamble.contains("Units: mm"));
        assert!(preamble.contains("Design State: empty"));
    }
}
