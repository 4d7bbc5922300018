//! Text delta extraction for buffered mode.

use serde_json::Value;
use tracing::warn;

use crate::error::{RelayError, Result};
use crate::frame::{repair_braces, NormalizedPayload};

/// Extract `choices[0].delta.content` from a data payload.
///
/// Returns `Some("")` for a parsed payload without content and `None` when the
/// line could not be parsed even after recovery; callers skip such lines.
pub fn extract_delta(payload: &NormalizedPayload) -> Option<String> {
    let content = payload.content();
    let repaired = repair_braces(content);

    let parsed = match serde_json::from_str::<Value>(&repaired) {
        Ok(v) => v,
        Err(first_err) => match recover_from_first_brace(content) {
            Some(v) => v,
            None => {
                warn!(error = %first_err, payload = %content, "skipping unparsable data line");
                return None;
            }
        },
    };

    Some(delta_content(&parsed).to_string())
}

/// Retry parsing from the first `{`, dropping leading noise such as log text.
fn recover_from_first_brace(content: &str) -> Option<Value> {
    let start = content.find('{')?;
    serde_json::from_str(content[start..].trim_end()).ok()
}

fn delta_content(value: &Value) -> &str {
    value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// Fallback when a buffered stream produced no text: read the whole body as one
/// JSON object and take its top-level `content`.
pub fn extract_whole_body(body: &str) -> Result<String> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()),
        _ => Err(RelayError::invalid_body(body)),
    }
}
