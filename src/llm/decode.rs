use serde_json::Value;
use tracing::debug;

/// Two-stage decode for free-form model output: strip known wrappers, then
/// parse leniently. Returns `None` instead of failing so callers can treat
/// malformed output as a no-result.
pub fn decode_model_json(raw: &str) -> Option<Value> {
    let stripped = strip_wrappers(raw);
    parse_lenient(&stripped)
}

/// Drops a leading think-aloud block and any markdown fence around the body.
fn strip_wrappers(input: &str) -> String {
    let mut text = input.trim();
    for tag in ["think", "reasoning"] {
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        if text.starts_with(open.as_str()) {
            if let Some(end) = text.find(close.as_str()) {
                text = text[end + close.len()..].trim_start();
            }
        }
    }
    strip_markdown_fence(text)
}

fn strip_markdown_fence(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut body = Vec::new();
    for line in trimmed.lines().skip(1) {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    body.join("\n")
}

fn parse_lenient(text: &str) -> Option<Value> {
    if text.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }
    // Chatty output around the object: take the outermost brace span.
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(target = "argus.llm", error = %err, "model_json_unparseable");
            None
        }
    }
}
