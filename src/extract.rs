//! JSON extraction from raw model output.
//!
//! Models frequently wrap the JSON they were asked for in prose or markdown
//! fences. The extractor tries a direct parse first and then falls back to
//! the slice between the first `{` and the last `}`.

use serde_json::Value;

/// Extracts the first JSON object from raw model output.
///
/// Returns `None` when no parseable object is present. Non-object JSON
/// (bare numbers, strings, arrays) is rejected: every recognized response
/// shape is a top-level object.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }

    serde_json::from_str::<Value>(&text[start..=end])
        .ok()
        .filter(Value::is_object)
}
