//! Command routing: chain construction, retry, fallback.
//!
//! The router owns one client per configured provider and walks an ordered
//! provider chain for each `ask_model` command. Attempts are strictly
//! sequential; the first successful generation wins and goes straight to
//! normalization. Every failed attempt is recorded so that a caller can see
//! exactly what was tried and why.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::cache::{
    ActionLogEntry, CacheError, CacheRecord, ContextCache, ConversationEntry, DesignStateSnapshot,
    JsonFileCache, SqliteCache,
};
use crate::config::{CacheBackend, Config};
use crate::normalize::{NormalizedResult, normalize};
use crate::provider::{
    AnthropicClient, AttemptFailure, GeminiClient, GenerationOutput, GenerationRequest,
    OllamaClient, OpenAiClient, ProviderClient, ProviderErrorKind, ProviderKind,
};
use crate::schema::command::{CommandKind, McpCommand, ModelParams, ValidationError};
use crate::schema::response::{LlmMetadata, LlmResponse, McpResponse, ResponseStatus};

/// Chain iteration order for provider maps, keeps output deterministic.
const PROVIDER_ORDER: [ProviderKind; 4] = [
    ProviderKind::Ollama,
    ProviderKind::OpenAi,
    ProviderKind::Gemini,
    ProviderKind::Claude,
];

/// One resolved target within a routing chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub provider: ProviderKind,
    pub model: String,
}

/// Parses a `provider:model` string; a bare model name routes to openai.
pub fn parse_chain_entry(raw: &str) -> Option<ChainEntry> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.split_once(':') {
        Some((provider, model)) => match ProviderKind::from_str(provider) {
            Ok(provider) => Some(ChainEntry {
                provider,
                model: model.to_string(),
            }),
            Err(err) => {
                warn!("skipping chain entry '{raw}': {err}");
                None
            }
        },
        None => Some(ChainEntry {
            provider: ProviderKind::OpenAi,
            model: raw.to_string(),
        }),
    }
}

fn default_model_for(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Ollama => "llama3.2",
        ProviderKind::OpenAi => "gpt-4o-mini",
        ProviderKind::Gemini => "gemini-1.5-flash",
        ProviderKind::Claude => "claude-3-5-sonnet-20241022",
    }
}

/// Routes commands to provider clients and persists context records.
pub struct Router {
    config: Config,
    clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
    cache: Option<Arc<dyn ContextCache>>,
}

impl Router {
    /// Assembles a router from pre-built parts. Useful when the caller
    /// wants to supply its own client implementations.
    pub fn new(
        config: Config,
        clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
        cache: Option<Arc<dyn ContextCache>>,
    ) -> Self {
        let configured: Vec<&str> = PROVIDER_ORDER
            .iter()
            .filter(|kind| clients.contains_key(kind))
            .map(|kind| kind.as_str())
            .collect();
        info!("router initialized with providers: {configured:?}");
        Self {
            config,
            clients,
            cache,
        }
    }

    /// Builds clients for every provider with configured credentials and
    /// opens the cache backend the configuration names.
    pub async fn from_config(config: Config) -> Result<Self, CacheError> {
        let timeout = config.timeout();
        let mut clients: HashMap<ProviderKind, Arc<dyn ProviderClient>> = HashMap::new();

        if !config.ollama_url.is_empty() {
            clients.insert(
                ProviderKind::Ollama,
                Arc::new(OllamaClient::new(config.ollama_url.clone(), timeout)),
            );
        }
        if let Some(key) = &config.openai_api_key {
            clients.insert(
                ProviderKind::OpenAi,
                Arc::new(OpenAiClient::new(key.clone(), timeout)),
            );
        }
        if let Some(key) = &config.gemini_api_key {
            clients.insert(
                ProviderKind::Gemini,
                Arc::new(GeminiClient::new(key.clone(), timeout)),
            );
        }
        if let Some(key) = &config.claude_api_key {
            clients.insert(
                ProviderKind::Claude,
                Arc::new(AnthropicClient::new(key.clone(), timeout)),
            );
        }

        let cache: Option<Arc<dyn ContextCache>> = if config.cache_enabled {
            match config.cache_backend {
                CacheBackend::Json => {
                    Some(Arc::new(JsonFileCache::open(&config.cache_path).await?))
                }
                CacheBackend::Sqlite => {
                    Some(Arc::new(SqliteCache::open(config.cache_path.as_ref())?))
                }
            }
        } else {
            None
        };

        Ok(Self::new(config, clients, cache))
    }

    pub fn configured_providers(&self) -> Vec<ProviderKind> {
        PROVIDER_ORDER
            .iter()
            .copied()
            .filter(|kind| self.clients.contains_key(kind))
            .collect()
    }

    /// Entry point for one inbound command.
    pub async fn route_command(
        &self,
        command: &McpCommand,
        system_prompt: Option<&str>,
    ) -> McpResponse {
        match command.command {
            CommandKind::AskModel => self.handle_ask_model(command, system_prompt).await,
            CommandKind::ListModels => self.handle_list_models().await,
            CommandKind::HealthCheck => self.handle_health_check(),
            CommandKind::Unknown => McpResponse::error("Unknown command"),
        }
    }

    async fn handle_ask_model(
        &self,
        command: &McpCommand,
        system_prompt: Option<&str>,
    ) -> McpResponse {
        let Some(params) = &command.params else {
            return McpResponse::error(ValidationError::MissingParams.to_string());
        };
        if let Err(err) = params.validate() {
            return McpResponse::error(err.to_string());
        }

        let prompt = match &command.context {
            Some(context) => format!("{}\n{}", context.prompt_preamble(), params.prompt),
            None => params.prompt.clone(),
        };

        let chain = self.build_chain(params.provider, params.model.as_deref());
        if chain.is_empty() {
            return McpResponse::error("No usable providers in routing chain");
        }

        let (winner, failures) = match self.run_chain(&chain, &prompt, system_prompt, params).await
        {
            Ok(outcome) => outcome,
            Err(failures) => {
                let last = failures
                    .last()
                    .map(|failure| failure.message.clone())
                    .unwrap_or_else(|| "Unknown error".to_string());
                let (provider, model) = failures
                    .last()
                    .map(|failure| (failure.provider.to_string(), failure.model.clone()))
                    .unwrap_or_else(|| ("none".to_string(), "none".to_string()));
                let message = format!("All providers failed: {last}");
                let mut response = McpResponse::error(message.clone()).with_diagnostics(failures);
                // The failed cycle is still part of the conversation record.
                self.persist(
                    command,
                    params.prompt.as_str(),
                    &provider,
                    &model,
                    &message,
                    &mut response,
                )
                .await;
                return response;
            }
        };

        let (entry, output) = winner;
        let normalized = normalize(&output.text, output.structured.as_ref());
        let llm_response = LlmResponse {
            provider: entry.provider,
            model: entry.model.clone(),
            raw_output: output.text.clone(),
            normalized: normalized.clone(),
            metadata: LlmMetadata {
                timestamp: Utc::now(),
                tokens_used: output.tokens_used,
                latency_ms: Some(output.latency_ms),
                temperature: Some(params.temperature),
            },
        };

        let mut response = match &normalized {
            NormalizedResult::Action(action) => {
                let mut response = McpResponse::success("Action generated successfully");
                response.actions_to_execute = vec![action.clone()];
                response
            }
            NormalizedResult::ActionSequence(sequence) => {
                let mut response = McpResponse::success("Action generated successfully");
                response.actions_to_execute = sequence.actions.clone();
                response
            }
            NormalizedResult::Clarification(_) => {
                let mut response = McpResponse::error("Need clarification");
                response.status = ResponseStatus::ClarificationNeeded;
                response
            }
            NormalizedResult::Error { message, .. } => McpResponse::error(message.clone()),
        };
        response.llm_response = Some(llm_response);
        response.diagnostics = failures;

        self.persist(
            command,
            params.prompt.as_str(),
            entry.provider.as_str(),
            &entry.model,
            &output.text,
            &mut response,
        )
        .await;
        response
    }

    /// Orders the chain: the head is the explicit selection when the
    /// command carries one, otherwise the configured default; the rest is
    /// the fallback list. Duplicates keep their first occurrence.
    fn build_chain(
        &self,
        provider: Option<ProviderKind>,
        model: Option<&str>,
    ) -> Vec<ChainEntry> {
        let mut chain = Vec::new();

        match (provider, model) {
            (Some(provider), Some(model)) => chain.push(ChainEntry {
                provider,
                model: model.to_string(),
            }),
            (Some(provider), None) => chain.push(ChainEntry {
                provider,
                model: default_model_for(provider).to_string(),
            }),
            (None, Some(model)) => chain.extend(parse_chain_entry(model)),
            (None, None) => chain.extend(parse_chain_entry(&self.config.default_model)),
        }

        for raw in &self.config.fallback_chain {
            chain.extend(parse_chain_entry(raw));
        }

        let mut seen = Vec::new();
        chain.retain(|entry| {
            if seen.contains(entry) {
                false
            } else {
                seen.push(entry.clone());
                true
            }
        });
        chain
    }

    /// Walks the chain. Returns the winning entry with its output and the
    /// failures accumulated along the way, or all failures on exhaustion.
    async fn run_chain(
        &self,
        chain: &[ChainEntry],
        prompt: &str,
        system_prompt: Option<&str>,
        params: &ModelParams,
    ) -> Result<((ChainEntry, GenerationOutput), Vec<AttemptFailure>), Vec<AttemptFailure>> {
        let mut failures = Vec::new();

        for entry in chain {
            let Some(client) = self.clients.get(&entry.provider) else {
                warn!("provider {} not configured, skipping", entry.provider);
                failures.push(AttemptFailure {
                    provider: entry.provider,
                    model: entry.model.clone(),
                    retry_index: 0,
                    error: ProviderErrorKind::Unreachable,
                    message: format!("Provider {} not configured", entry.provider),
                });
                continue;
            };

            let request = GenerationRequest {
                model: entry.model.clone(),
                prompt: prompt.to_string(),
                system_prompt: system_prompt.map(str::to_string),
                temperature: params.temperature,
                max_tokens: params.max_tokens,
            };

            for retry_index in 0..self.config.max_retries {
                debug!(
                    "attempt {} of {} for {}:{}",
                    retry_index + 1,
                    self.config.max_retries,
                    entry.provider,
                    entry.model
                );
                match client.generate(&request).await {
                    Ok(output) => return Ok(((entry.clone(), output), failures)),
                    Err(err) => {
                        warn!(
                            "attempt {} failed for {}:{}: {err}",
                            retry_index + 1,
                            entry.provider,
                            entry.model
                        );
                        failures.push(AttemptFailure {
                            provider: entry.provider,
                            model: entry.model.clone(),
                            retry_index,
                            error: err.kind(),
                            message: err.to_string(),
                        });
                        if retry_index + 1 < self.config.max_retries {
                            tokio::time::sleep(self.config.retry_delay()).await;
                        }
                    }
                }
            }
        }

        Err(failures)
    }

    /// Best-effort cache writes at the end of a routing cycle, successful
    /// or not; failures become response warnings, never an error status.
    async fn persist(
        &self,
        command: &McpCommand,
        prompt: &str,
        provider: &str,
        model: &str,
        response_text: &str,
        response: &mut McpResponse,
    ) {
        let Some(cache) = &self.cache else {
            return;
        };

        let mut records = vec![CacheRecord::Conversation(ConversationEntry {
            timestamp: Utc::now(),
            prompt: prompt.to_string(),
            response: response_text.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
        })];
        if let Some(context) = &command.context {
            records.push(CacheRecord::DesignState(DesignStateSnapshot {
                timestamp: Utc::now(),
                context: context.clone(),
            }));
        }
        for action in &response.actions_to_execute {
            records.push(CacheRecord::ActionLog(ActionLogEntry {
                timestamp: Utc::now(),
                action: action.clone(),
                success: true,
                error_message: None,
            }));
        }

        for record in records {
            let kind = record.kind();
            if let Err(err) = cache.append(record).await {
                warn!("cache append failed for {kind:?}: {err}");
                response
                    .warnings
                    .push(format!("cache append failed: {err}"));
            }
        }
    }

    async fn handle_list_models(&self) -> McpResponse {
        let mut models = serde_json::Map::new();
        for kind in self.configured_providers() {
            let Some(client) = self.clients.get(&kind) else {
                continue;
            };
            let listed = match client.list_models().await {
                Ok(listed) => listed,
                Err(err) => {
                    warn!("failed to list models for {kind}: {err}");
                    Vec::new()
                }
            };
            models.insert(kind.as_str().to_string(), json!(listed));
        }

        let mut response = McpResponse::success("Models listed successfully");
        response.data = Some(Value::Object(models));
        response
    }

    fn handle_health_check(&self) -> McpResponse {
        let providers: Vec<&str> = self
            .configured_providers()
            .into_iter()
            .map(|kind| kind.as_str())
            .collect();
        let mut response =
            McpResponse::success(format!("Healthy providers: {providers:?}"));
        response.data = Some(json!({ "providers": providers }));
        response
    }
}
