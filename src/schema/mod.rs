//! Wire schemas shared with the CAD host.
//!
//! `command` covers the inbound request, `action` the structured CAD
//! operations a model may emit, and `response` the normalized reply handed
//! back to the request-handling layer.

pub mod action;
pub mod command;
pub mod response;

pub use action::{ActionSequence, CadAction, GeometryViolation, RECOGNIZED_UNITS, validate_action};
pub use command::{CommandKind, DesignContext, McpCommand, ModelParams, ValidationError};
pub use response::{ClarifyingQuestion, LlmMetadata, LlmResponse, McpResponse, ResponseStatus};
