//! Structured CAD actions and their minimal safety schema.
//!
//! Validation is deliberately conservative: executing a mis-parsed geometry
//! action is unsafe, so any violation rejects the whole action instead of
//! salvaging the valid parts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Units the geometry checks accept.
pub const RECOGNIZED_UNITS: [&str; 5] = ["mm", "cm", "m", "in", "ft"];

/// Parameters that must be strictly positive when present.
const DIMENSION_PARAMS: [&str; 5] = ["width", "height", "depth", "radius", "diameter"];

/// One structured CAD operation for the host to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadAction {
    /// Action kind in verb_noun form, e.g. `create_box`.
    pub action: String,
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub safety_checks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

/// An ordered multi-step plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSequence {
    pub actions: Vec<CadAction>,
    #[serde(default)]
    pub total_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time_seconds: Option<f64>,
}

/// A geometry-schema violation. Any one of these rejects the action.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryViolation {
    #[error("action '{action}' is missing required parameter '{param}'")]
    MissingParam { action: String, param: String },
    #[error("parameter '{param}' must be a positive number, got {value}")]
    NonPositiveDimension { param: String, value: f64 },
    #[error("parameter '{param}' must be a number")]
    NonNumericDimension { param: String },
    #[error("unrecognized unit '{0}'")]
    UnrecognizedUnit(String),
}

fn required_params(action: &str) -> &'static [&'static str] {
    match action {
        "create_box" => &["width", "height", "depth"],
        "create_cylinder" => &["radius", "height"],
        "create_sphere" => &["radius"],
        "create_hole" => &["diameter", "position"],
        "create_sketch" => &["plane", "shapes"],
        "extrude" => &["profile", "distance"],
        "fillet" => &["edges", "radius"],
        "modify_parameter" => &["parameter_name", "value"],
        "apply_material" => &["material_name"],
        // Unknown kinds skip the presence check; positivity and the unit
        // check below still apply.
        _ => &[],
    }
}

/// Checks an action against the minimal safety schema.
pub fn validate_action(action: &CadAction) -> Result<(), GeometryViolation> {
    for param in required_params(&action.action) {
        if !action.params.contains_key(*param) {
            return Err(GeometryViolation::MissingParam {
                action: action.action.clone(),
                param: (*param).to_string(),
            });
        }
    }

    for param in DIMENSION_PARAMS {
        if let Some(value) = action.params.get(param) {
            match value.as_f64() {
                Some(number) if number > 0.0 => {}
                Some(number) => {
                    return Err(GeometryViolation::NonPositiveDimension {
                        param: param.to_string(),
                        value: number,
                    });
                }
                None => {
                    return Err(GeometryViolation::NonNumericDimension {
                        param: param.to_string(),
                    });
                }
            }
        }
    }

    if let Some(unit) = action.params.get("unit") {
        let unit = unit.as_str().unwrap_or_default();
        if !RECOGNIZED_UNITS.contains(&unit) {
            return Err(GeometryViolation::UnrecognizedUnit(unit.to_string()));
        }
    }

    Ok(())
}
