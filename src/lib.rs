//! `cad-mcp-core` - LLM routing core for a CAD design assistant.
//!
//! This library sits between a CAD host and a set of generative model
//! providers. It accepts structured commands, walks an ordered provider
//! chain with per-entry retries, normalizes whatever the winning model
//! produced into a closed set of validated CAD action shapes, and keeps an
//! append-only record of conversations, design states, and issued actions.
//!
//! The pieces compose but stand alone:
//!
//! - [`provider`] — one [`provider::ProviderClient`] per backend (local
//!   Ollama plus the OpenAI, Gemini, and Anthropic HTTP APIs), sharing a
//!   typed error taxonomy.
//! - [`router`] — chain construction, sequential fallback, fixed-delay
//!   retry, and attempt diagnostics.
//! - [`normalize`] — raw model output to exactly one
//!   [`normalize::NormalizedResult`] variant, with geometry validation.
//! - [`cache`] — the [`cache::ContextCache`] contract with JSON-file and
//!   SQLite backends.
//! - [`schema`] — the inbound command and outbound response types.

pub mod cache;
pub mod config;
pub mod extract;
pub mod normalize;
pub mod provider;
pub mod router;
pub mod schema;

pub use cache::{CacheError, CacheRecord, ContextCache, JsonFileCache, RecordKind, SqliteCache};
pub use config::{CacheBackend, Config, ConfigError};
pub use extract::extract_json;
pub use normalize::{NormalizeErrorKind, NormalizedResult, normalize};
pub use provider::{
    AttemptFailure, GenerationOutput, GenerationRequest, ProviderClient, ProviderError,
    ProviderErrorKind, ProviderKind,
};
pub use router::{ChainEntry, Router, parse_chain_entry};
pub use schema::{
    ActionSequence, CadAction, CommandKind, DesignContext, GeometryViolation, LlmResponse,
    McpCommand, McpResponse, ModelParams, ResponseStatus, ValidationError,
};
