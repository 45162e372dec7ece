//! End-to-end routing behavior against scripted provider clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use cad_mcp_core::cache::{ContextCache, JsonFileCache, RecordKind};
use cad_mcp_core::normalize::NormalizedResult;
use cad_mcp_core::provider::{
    GenerationOutput, GenerationRequest, ProviderClient, ProviderError, ProviderErrorKind,
    ProviderKind,
};
use cad_mcp_core::schema::{DesignContext, McpCommand, ModelParams, ResponseStatus};
use cad_mcp_core::{Config, Router, extract_json};

/// Client that replays a fixed script of outcomes, one per call.
struct ScriptedClient {
    kind: ProviderKind,
    script: Mutex<Vec<Result<String, ProviderError>>>,
    calls: AtomicU32,
}

impl ScriptedClient {
    fn new(kind: ProviderKind, script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script: Mutex::new(script),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for ScriptedClient {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn generate(
        &self,
        _request: &GenerationRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().await;
        assert!(!script.is_empty(), "script exhausted for {}", self.kind);
        let text = script.remove(0)?;
        let structured = extract_json(&text);
        Ok(GenerationOutput {
            structured,
            text,
            tokens_used: Some(42),
            latency_ms: 1.0,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec![format!("{}-test-model", self.kind)])
    }
}

fn test_config() -> Config {
    Config {
        default_model: "ollama:llama3.2".to_string(),
        fallback_chain: Vec::new(),
        cache_enabled: false,
        max_retries: 3,
        retry_delay_seconds: 0.0,
        ..Config::default()
    }
}

fn cube_json() -> String {
    json!({
        "action": "create_box",
        "params": {"width": 20, "height": 20, "depth": 20, "units": "mm"},
        "explanation": "A 20mm cube"
    })
    .to_string()
}

fn ask(prompt: &str) -> McpCommand {
    McpCommand::ask_model(ModelParams::from_prompt(prompt))
}

fn router_with(
    config: Config,
    clients: Vec<Arc<ScriptedClient>>,
    cache: Option<Arc<dyn ContextCache>>,
) -> Router {
    let mut map: HashMap<ProviderKind, Arc<dyn ProviderClient>> = HashMap::new();
    for client in clients {
        map.insert(client.kind, client);
    }
    Router::new(config, map, cache)
}

#[tokio::test]
async fn cube_prompt_yields_executable_action() {
    let ollama = ScriptedClient::new(ProviderKind::Ollama, vec![Ok(cube_json())]);
    let router = router_with(test_config(), vec![ollama.clone()], None);

    let response = router
        .route_command(&ask("Create a 20mm cube"), None)
        .await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.message, "Action generated successfully");
    assert_eq!(response.actions_to_execute.len(), 1);
    assert_eq!(response.actions_to_execute[0].action, "create_box");
    assert!(response.diagnostics.is_empty());
    assert_eq!(ollama.calls(), 1);

    let llm = response.llm_response.expect("winning response attached");
    assert_eq!(llm.provider, ProviderKind::Ollama);
    assert_eq!(llm.model, "llama3.2");
    assert!(matches!(llm.normalized, NormalizedResult::Action(_)));
}

#[tokio::test]
async fn first_entry_exhausts_retries_before_fallback_wins() {
    let failing = ScriptedClient::new(
        ProviderKind::Ollama,
        vec![
            Err(ProviderError::Unreachable("connection refused".into())),
            Err(ProviderError::Unreachable("connection refused".into())),
            Err(ProviderError::Unreachable("connection refused".into())),
        ],
    );
    let openai = ScriptedClient::new(ProviderKind::OpenAi, vec![Ok(cube_json())]);

    let mut config = test_config();
    config.fallback_chain = vec!["openai:gpt-4o-mini".to_string()];
    let router = router_with(config, vec![failing.clone(), openai.clone()], None);

    let response = router.route_command(&ask("Create a cube"), None).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(failing.calls(), 3);
    assert_eq!(openai.calls(), 1);
    // Diagnostics from the losing entry survive on the successful response.
    assert_eq!(response.diagnostics.len(), 3);
    for (index, failure) in response.diagnostics.iter().enumerate() {
        assert_eq!(failure.provider, ProviderKind::Ollama);
        assert_eq!(failure.retry_index, index as u32);
        assert_eq!(failure.error, ProviderErrorKind::Unreachable);
    }
}

#[tokio::test]
async fn auth_errors_are_retried_then_fall_through() {
    let openai = ScriptedClient::new(
        ProviderKind::OpenAi,
        vec![
            Err(ProviderError::Auth("invalid key".into())),
            Err(ProviderError::Auth("invalid key".into())),
            Err(ProviderError::Auth("invalid key".into())),
        ],
    );
    let ollama = ScriptedClient::new(ProviderKind::Ollama, vec![Ok(cube_json())]);

    let mut config = test_config();
    config.default_model = "openai:gpt-4o-mini".to_string();
    config.fallback_chain = vec!["ollama:llama3.2".to_string()];
    let router = router_with(config, vec![openai.clone(), ollama.clone()], None);

    let response = router.route_command(&ask("Create a cube"), None).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(openai.calls(), 3);
    assert_eq!(response.diagnostics.len(), 3);
    assert!(
        response
            .diagnostics
            .iter()
            .all(|failure| failure.error == ProviderErrorKind::Auth)
    );
}

#[tokio::test]
async fn chain_exhaustion_reports_every_attempt() {
    let ollama = ScriptedClient::new(
        ProviderKind::Ollama,
        vec![
            Err(ProviderError::Timeout("deadline".into())),
            Err(ProviderError::Timeout("deadline".into())),
            Err(ProviderError::Timeout("deadline".into())),
        ],
    );
    let openai = ScriptedClient::new(
        ProviderKind::OpenAi,
        vec![
            Err(ProviderError::Unreachable("down".into())),
            Err(ProviderError::Unreachable("down".into())),
            Err(ProviderError::Unreachable("down".into())),
        ],
    );

    let mut config = test_config();
    config.fallback_chain = vec!["openai:gpt-4o-mini".to_string()];
    let router = router_with(config, vec![ollama, openai], None);

    let response = router.route_command(&ask("Create a cube"), None).await;

    assert_eq!(response.status, ResponseStatus::Error);
    assert!(response.message.starts_with("All providers failed:"));
    assert_eq!(response.diagnostics.len(), 6);
    assert_eq!(response.diagnostics[0].provider, ProviderKind::Ollama);
    assert_eq!(response.diagnostics[5].provider, ProviderKind::OpenAi);
    assert!(response.actions_to_execute.is_empty());
}

#[tokio::test]
async fn explicit_selection_skips_the_configured_default() {
    let claude = ScriptedClient::new(
        ProviderKind::Claude,
        vec![
            Err(ProviderError::Unreachable("down".into())),
            Err(ProviderError::Unreachable("down".into())),
            Err(ProviderError::Unreachable("down".into())),
        ],
    );
    let openai = ScriptedClient::new(ProviderKind::OpenAi, vec![Ok(cube_json())]);
    let ollama = ScriptedClient::new(ProviderKind::Ollama, vec![Ok(cube_json())]);

    let mut config = test_config();
    config.default_model = "openai:gpt-4o-mini".to_string();
    config.fallback_chain = vec!["ollama:llama3.2".to_string()];
    let router = router_with(
        config,
        vec![claude.clone(), openai.clone(), ollama.clone()],
        None,
    );

    let mut params = ModelParams::from_prompt("Create a cube");
    params.provider = Some(ProviderKind::Claude);
    params.model = Some("claude-3-opus-20240229".to_string());
    let response = router
        .route_command(&McpCommand::ask_model(params), None)
        .await;

    // Explicit selection replaces the default head: claude exhausts its
    // retries and routing moves straight to the fallback entry.
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(claude.calls(), 3);
    assert_eq!(openai.calls(), 0);
    assert_eq!(ollama.calls(), 1);
}

#[tokio::test]
async fn unconfigured_provider_fails_once_without_retries() {
    let ollama = ScriptedClient::new(ProviderKind::Ollama, vec![Ok(cube_json())]);

    let mut config = test_config();
    config.default_model = "gemini:gemini-1.5-flash".to_string();
    config.fallback_chain = vec!["ollama:llama3.2".to_string()];
    let router = router_with(config, vec![ollama], None);

    let response = router.route_command(&ask("Create a cube"), None).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.diagnostics.len(), 1);
    assert_eq!(response.diagnostics[0].provider, ProviderKind::Gemini);
    assert_eq!(response.diagnostics[0].error, ProviderErrorKind::Unreachable);
    assert!(
        response.diagnostics[0]
            .message
            .contains("not configured")
    );
}

#[tokio::test]
async fn clarification_sets_its_own_status() {
    let script = json!({
        "clarifying_questions": [
            {"question": "Which edges should be rounded?"}
        ]
    })
    .to_string();
    let ollama = ScriptedClient::new(ProviderKind::Ollama, vec![Ok(script)]);
    let router = router_with(test_config(), vec![ollama], None);

    let response = router
        .route_command(&ask("Round the edges"), None)
        .await;

    assert_eq!(response.status, ResponseStatus::ClarificationNeeded);
    assert_eq!(response.message, "Need clarification");
    assert!(response.actions_to_execute.is_empty());
}

#[tokio::test]
async fn invalid_geometry_is_not_retried() {
    let bad = json!({
        "action": "create_box",
        "params": {"width": -5, "height": 20, "depth": 20}
    })
    .to_string();
    let ollama = ScriptedClient::new(ProviderKind::Ollama, vec![Ok(bad)]);
    let router = router_with(test_config(), vec![ollama.clone()], None);

    let response = router.route_command(&ask("Create a box"), None).await;

    assert_eq!(response.status, ResponseStatus::Error);
    assert!(response.message.contains("positive"));
    // The generation itself succeeded, so the chain must not re-enter.
    assert_eq!(ollama.calls(), 1);
    assert!(response.actions_to_execute.is_empty());
}

#[tokio::test]
async fn prose_without_json_is_malformed_not_retried() {
    let ollama = ScriptedClient::new(
        ProviderKind::Ollama,
        vec![Ok("Sure! I would start by sketching a square.".to_string())],
    );
    let router = router_with(test_config(), vec![ollama.clone()], None);

    let response = router.route_command(&ask("Create a box"), None).await;

    assert_eq!(response.status, ResponseStatus::Error);
    assert_eq!(ollama.calls(), 1);
}

#[tokio::test]
async fn successful_generation_is_cached_with_context() {
    let dir = tempfile::tempdir().unwrap();
    let cache: Arc<dyn ContextCache> = Arc::new(
        JsonFileCache::open(dir.path().join("cache.json"))
            .await
            .unwrap(),
    );

    let ollama = ScriptedClient::new(ProviderKind::Ollama, vec![Ok(cube_json())]);
    let router = router_with(
        test_config(),
        vec![ollama],
        Some(cache.clone()),
    );

    let command = ask("Create a 20mm cube").with_context(DesignContext::default());
    let response = router.route_command(&command, None).await;
    assert_eq!(response.status, ResponseStatus::Success);
    assert!(response.warnings.is_empty());

    let conversations = cache.recent(RecordKind::Conversation, 10).await.unwrap();
    assert_eq!(conversations.len(), 1);
    let states = cache.recent(RecordKind::DesignState, 10).await.unwrap();
    assert_eq!(states.len(), 1);
    let actions = cache.recent(RecordKind::ActionLog, 10).await.unwrap();
    assert_eq!(actions.len(), 1);
}

#[tokio::test]
async fn exhausted_chain_still_records_the_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let cache: Arc<dyn ContextCache> = Arc::new(
        JsonFileCache::open(dir.path().join("cache.json"))
            .await
            .unwrap(),
    );

    let ollama = ScriptedClient::new(
        ProviderKind::Ollama,
        vec![
            Err(ProviderError::Unreachable("down".into())),
            Err(ProviderError::Unreachable("down".into())),
            Err(ProviderError::Unreachable("down".into())),
        ],
    );
    let router = router_with(test_config(), vec![ollama], Some(cache.clone()));

    let command = ask("Create a 20mm cube").with_context(DesignContext::default());
    let response = router.route_command(&command, None).await;
    assert_eq!(response.status, ResponseStatus::Error);

    let conversations = cache.recent(RecordKind::Conversation, 10).await.unwrap();
    assert_eq!(conversations.len(), 1);
    let states = cache.recent(RecordKind::DesignState, 10).await.unwrap();
    assert_eq!(states.len(), 1);
    // No action was produced, so nothing lands in the action log.
    let actions = cache.recent(RecordKind::ActionLog, 10).await.unwrap();
    assert!(actions.is_empty());
}

#[tokio::test]
async fn context_preamble_reaches_the_provider() {
    // Scripted client asserts on the request it receives.
    struct PromptAsserting;

    #[async_trait]
    impl ProviderClient for PromptAsserting {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Ollama
        }

        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> Result<GenerationOutput, ProviderError> {
            assert!(request.prompt.starts_with("Design Context:"));
            assert!(request.prompt.contains("- Units: mm"));
            assert!(request.prompt.ends_with("Create a 20mm cube"));
            let text = cube_json();
            Ok(GenerationOutput {
                structured: extract_json(&text),
                text,
                tokens_used: None,
                latency_ms: 0.5,
            })
        }

        async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
            Ok(Vec::new())
        }
    }

    let mut clients: HashMap<ProviderKind, Arc<dyn ProviderClient>> = HashMap::new();
    clients.insert(ProviderKind::Ollama, Arc::new(PromptAsserting));
    let router = Router::new(test_config(), clients, None);

    let command = ask("Create a 20mm cube").with_context(DesignContext::default());
    let response = router.route_command(&command, None).await;
    assert_eq!(response.status, ResponseStatus::Success);
}

#[tokio::test]
async fn list_models_aggregates_configured_providers() {
    let ollama = ScriptedClient::new(ProviderKind::Ollama, Vec::new());
    let openai = ScriptedClient::new(ProviderKind::OpenAi, Vec::new());
    let router = router_with(test_config(), vec![ollama, openai], None);

    let command = McpCommand {
        command: cad_mcp_core::CommandKind::ListModels,
        params: None,
        context: None,
        metadata: HashMap::new(),
    };
    let response = router.route_command(&command, None).await;

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.message, "Models listed successfully");
    let data = response.data.expect("model listing attached");
    assert_eq!(data["ollama"], json!(["ollama-test-model"]));
    assert_eq!(data["openai"], json!(["openai-test-model"]));
}
