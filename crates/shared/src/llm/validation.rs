use jsonschema::JSONSchema;
use serde_json::Value;

use super::templates::OutputFormat;

/// Opportunistic decode of raw provider text into structured data.
///
/// Tries the whole body first, then a fenced ```json block, then the widest
/// `{...}` or `[...]` slice.
pub fn decode_response_text(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(fenced) = fenced_block(trimmed)
        && let Ok(value) = serde_json::from_str::<Value>(fenced)
    {
        return Some(value);
    }

    [('{', '}'), ('[', ']')].into_iter().find_map(|(open, close)| {
        let start = trimmed.find(open)?;
        let end = trimmed.rfind(close)?;
        if end <= start {
            return None;
        }
        serde_json::from_str::<Value>(&trimmed[start..=end]).ok()
    })
}

/// The value handed to [`validate`] for a given declared output format.
///
/// Structured formats must decode; text formats pass the raw text through.
pub fn response_value(format: OutputFormat, text: &str, parsed: Option<&Value>) -> Option<Value> {
    if format.is_structured() {
        return parsed.cloned();
    }
    Some(Value::String(text.to_string()))
}

/// Minimal acceptance check: the response decoded and is not null or blank.
///
/// When the schema declares an object or array root, a bare scalar is rejected
/// too. Field presence and types are not checked here; see
/// [`validate_structural`].
pub fn validate(response: Option<&Value>, schema: &Value) -> bool {
    let Some(response) = response else {
        return false;
    };

    let non_empty = match response {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        _ => true,
    };
    if !non_empty {
        return false;
    }

    match schema.get("type").and_then(Value::as_str) {
        Some("object" | "array") => response.is_object() || response.is_array(),
        _ => true,
    }
}

pub fn validate_structural(response: &Value, schema: &Value) -> Result<(), Vec<String>> {
    let validator = JSONSchema::compile(schema).map_err(|err| vec![err.to_string()])?;
    let result = validator
        .validate(response)
        .map_err(|errors| errors.map(|err| err.to_string()).collect::<Vec<_>>());
    result
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}
