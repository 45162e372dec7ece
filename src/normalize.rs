//! Converts raw provider output into one canonical result shape.
//!
//! The recognized top-level shapes form a closed set; anything else is a
//! `MalformedResponse` error, never a best-guess action. Normalization is
//! pure and deterministic: identical input always yields identical output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extract::extract_json;
use crate::schema::action::{ActionSequence, CadAction, validate_action};
use crate::schema::response::ClarifyingQuestion;

/// Canonical result of one generation, exactly one variant populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NormalizedResult {
    Action(CadAction),
    ActionSequence(ActionSequence),
    Clarification(Vec<ClarifyingQuestion>),
    Error {
        kind: NormalizeErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeErrorKind {
    MalformedResponse,
    InvalidGeometry,
    /// The model itself reported `{error: {type, message}}`.
    ModelReported,
}

#[derive(Deserialize)]
struct ModelErrorWrapper {
    error: ModelErrorBody,
}

#[derive(Deserialize)]
struct ModelErrorBody {
    #[serde(default)]
    r#type: Option<String>,
    message: String,
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Sequence,
    Single,
    Clarification,
    ModelError,
}

fn recognized_shape(value: &Value) -> Option<Shape> {
    let object = value.as_object()?;
    if object.contains_key("actions") {
        Some(Shape::Sequence)
    } else if object.contains_key("action") {
        Some(Shape::Single)
    } else if object.contains_key("clarifying_questions") {
        Some(Shape::Clarification)
    } else if object.contains_key("error") {
        Some(Shape::ModelError)
    } else {
        None
    }
}

fn normalize_shape(shape: Shape, value: Value) -> NormalizedResult {
    match shape {
        Shape::Sequence => normalize_sequence(value),
        Shape::Single => normalize_single(value),
        Shape::Clarification => normalize_clarification(value),
        Shape::ModelError => normalize_model_error(value),
    }
}

/// Normalizes a provider result.
///
/// Structured-mode output is used when it matches a recognized shape;
/// anything else falls back to parsing the raw text for a JSON object.
pub fn normalize(raw_text: &str, structured: Option<&Value>) -> NormalizedResult {
    if let Some(value) = structured {
        if let Some(shape) = recognized_shape(value) {
            return normalize_shape(shape, value.clone());
        }
    }

    let Some(candidate) = extract_json(raw_text) else {
        return NormalizedResult::Error {
            kind: NormalizeErrorKind::MalformedResponse,
            message: "no JSON object found in model output".to_string(),
        };
    };

    match recognized_shape(&candidate) {
        Some(shape) => normalize_shape(shape, candidate),
        None => NormalizedResult::Error {
            kind: NormalizeErrorKind::MalformedResponse,
            message: "model output is not a recognized action shape".to_string(),
        },
    }
}

fn normalize_single(value: Value) -> NormalizedResult {
    let action: CadAction = match serde_json::from_value(value) {
        Ok(action) => action,
        Err(err) => {
            return NormalizedResult::Error {
                kind: NormalizeErrorKind::MalformedResponse,
                message: format!("action did not match schema: {err}"),
            };
        }
    };

    match validate_action(&action) {
        Ok(()) => NormalizedResult::Action(action),
        Err(violation) => NormalizedResult::Error {
            kind: NormalizeErrorKind::InvalidGeometry,
            message: violation.to_string(),
        },
    }
}

fn normalize_sequence(value: Value) -> NormalizedResult {
    let mut sequence: ActionSequence = match serde_json::from_value(value) {
        Ok(sequence) => sequence,
        Err(err) => {
            return NormalizedResult::Error {
                kind: NormalizeErrorKind::MalformedResponse,
                message: format!("action sequence did not match schema: {err}"),
            };
        }
    };

    if sequence.actions.is_empty() {
        return NormalizedResult::Error {
            kind: NormalizeErrorKind::MalformedResponse,
            message: "action sequence is empty".to_string(),
        };
    }

    for action in &sequence.actions {
        if let Err(violation) = validate_action(action) {
            return NormalizedResult::Error {
                kind: NormalizeErrorKind::InvalidGeometry,
                message: format!("step '{}': {violation}", action.action),
            };
        }
    }

    if sequence.total_steps == 0 {
        sequence.total_steps = sequence.actions.len();
    }

    NormalizedResult::ActionSequence(sequence)
}

fn normalize_clarification(value: Value) -> NormalizedResult {
    #[derive(Deserialize)]
    struct ClarificationWrapper {
        clarifying_questions: Vec<ClarifyingQuestion>,
    }

    match serde_json::from_value::<ClarificationWrapper>(value) {
        Ok(wrapper) => NormalizedResult::Clarification(wrapper.clarifying_questions),
        Err(err) => NormalizedResult::Error {
            kind: NormalizeErrorKind::MalformedResponse,
            message: format!("clarifying questions did not match schema: {err}"),
        },
    }
}

fn normalize_model_error(value: Value) -> NormalizedResult {
    match serde_json::from_value::<ModelErrorWrapper>(value) {
        Ok(wrapper) => {
            let kind = wrapper.error.r#type.unwrap_or_else(|| "error".to_string());
            NormalizedResult::Error {
                kind: NormalizeErrorKind::ModelReported,
                message: format!("{kind}: {}", wrapper.error.message),
            }
        }
        Err(err) => NormalizedResult::Error {
            kind: NormalizeErrorKind::MalformedResponse,
            message: format!("error payload did not match schema: {err}"),
        },
    }
}
