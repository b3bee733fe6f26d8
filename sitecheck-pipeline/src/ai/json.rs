//! Tolerant extraction of a JSON object from model output
//!
//! Model replies may wrap the object in a fenced block or surround it with
//! prose. Extraction never fails loudly: callers get `None` and decide on a
//! default.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Contents of the first fenced block, or the trimmed input
fn strip_fence(content: &str) -> &str {
    let trimmed = content.trim();

    for fence in ["```json", "```JSON", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let after = &trimmed[start + fence.len()..];
            if let Some(end) = after.find("```") {
                return after[..end].trim();
            }
        }
    }
    trimmed
}

/// Byte index of the `}` closing the object that opens at `start`
///
/// Braces inside string literals (with escapes) are ignored.
fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Locate and strictly parse the first JSON object in `content`
///
/// Falls back to the last `}` when brace matching does not close.
pub fn extract_json_object(content: &str) -> Option<Value> {
    let text = strip_fence(content);
    let start = text.find('{')?;

    if let Some(end) = matching_brace(text, start) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str(&text[start..=end]) {
            return Some(value);
        }
    }

    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&text[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// [`extract_json_object`] followed by typed deserialization
pub fn extract_typed<T: DeserializeOwned>(content: &str) -> Option<T> {
    extract_json_object(content).and_then(|value| serde_json::from_value(value).ok())
}
