//! Best-effort normalization of reasoning-oracle output
//!
//! The oracle is asked for JSON but may wrap it in a fenced block, surround it
//! with prose, or return nothing usable. `normalize` never fails: the last
//! resort is `{"raw_text": <original>}`.

use serde_json::{json, Value};
use tracing::debug;

/// Normalize an oracle reply that may already be structured.
///
/// Objects and arrays pass through unchanged, strings are parsed, other
/// scalars are returned as-is.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::String(text) => normalize_text(&text),
        other => other,
    }
}

/// Parse free text into JSON: whole string, fenced blocks, first balanced
/// region, then the raw-text wrapper.
pub fn normalize_text(text: &str) -> Value {
    let trimmed = text.trim();

    if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
        return parsed;
    }

    if let Some(parsed) = parse_from_fences(trimmed) {
        debug!("Normalizer: parsed JSON from fenced block");
        return parsed;
    }

    if let Some(parsed) = parse_first_balanced(trimmed) {
        debug!("Normalizer: parsed first balanced JSON region");
        return parsed;
    }

    debug!("Normalizer: falling back to raw_text wrapper");
    json!({ "raw_text": text })
}

const FENCE: &str = "```";
const FENCE_LABELS: &[&str] = &["json", "javascript", "js", "ts", "python"];

/// Contents of every ```...``` block, language label stripped.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find(FENCE) {
        let after_open = &rest[open + FENCE.len()..];
        let Some(close) = after_open.find(FENCE) else {
            break;
        };
        blocks.push(strip_fence_label(&after_open[..close]).trim());
        rest = &after_open[close + FENCE.len()..];
    }

    blocks
}

fn strip_fence_label(block: &str) -> &str {
    for label in FENCE_LABELS {
        if block.len() >= label.len()
            && block.is_char_boundary(label.len())
            && block[..label.len()].eq_ignore_ascii_case(label)
        {
            let rest = &block[label.len()..];
            // Only a label if followed by whitespace, e.g. "json\n{...}"
            if rest.starts_with(char::is_whitespace) || rest.is_empty() {
                return rest;
            }
        }
    }
    block
}

fn parse_from_fences(text: &str) -> Option<Value> {
    fenced_blocks(text)
        .into_iter()
        .find_map(|block| serde_json::from_str::<Value>(block).ok())
}

/// Scan from the earliest `{` or `[` to its matching close, ignoring
/// brackets inside string literals.
fn parse_first_balanced(text: &str) -> Option<Value> {
    let start = text.find(|c: char| c == '{' || c == '[')?;
    let bytes = text.as_bytes();
    let opening = bytes[start];
    let closing = if opening == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        if byte == b'"' {
            in_string = true;
        } else if byte == opening {
            depth += 1;
        } else if byte == closing {
            depth -= 1;
            if depth == 0 {
                let candidate = &text[start..=start + offset];
                return serde_json::from_str(candidate).ok();
            }
        }
    }

    None
}

/// Turn a report reply into display markdown.
///
/// Unwraps a ```markdown fence, pulls `content`/`markdown` out of objects,
/// joins arrays, and pretty-prints any other object as a JSON block.
pub fn normalize_markdown(value: &Value) -> String {
    match value {
        Value::String(text) => unwrap_markdown_fence(text.trim()).to_string(),
        Value::Object(map) => {
            if let Some(content) = map.get("content").or_else(|| map.get("markdown")) {
                return match content {
                    Value::String(s) => s.trim().to_string(),
                    other => other.to_string(),
                };
            }
            let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            format!("```json\n{}\n```", pretty)
        }
        Value::Array(items) => items
            .iter()
            .map(normalize_markdown)
            .collect::<Vec<_>>()
            .join("\n\n"),
        other => other.to_string(),
    }
}

fn unwrap_markdown_fence(text: &str) -> &str {
    let Some(inner) = text.strip_prefix(FENCE) else {
        return text;
    };
    let Some(close) = inner.rfind(FENCE) else {
        return text;
    };
    let body = &inner[..close];
    let body = match body.get(..8) {
        Some(label) if label.eq_ignore_ascii_case("markdown") => &body[8..],
        _ => body,
    };
    body.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_values_pass_through() {
        let object = json!({"profiles": {"savings_habit": 1}, "reasoning": {}});
        assert_eq!(normalize(object.clone()), object);

        let array = json!([1, "two", {"three": 3}]);
        assert_eq!(normalize(array.clone()), array);

        assert_eq!(normalize(json!(42)), json!(42));
    }

    #[test]
    fn test_strict_parse() {
        assert_eq!(
            normalize_text("  {\"action\": \"approve\"}\n"),
            json!({"action": "approve"})
        );
    }

    #[test]
    fn test_fenced_block_with_prose() {
        let text = "prefix ```json\n{\"a\":1}\n``` suffix";
        assert_eq!(normalize_text(text), json!({"a": 1}));
    }

    #[test]
    fn test_unlabeled_fence_and_bad_first_block() {
        let text = "```\nnot json\n```\nthen\n```\n[1, 2]\n```";
        assert_eq!(normalize_text(text), json!([1, 2]));
    }

    #[test]
    fn test_balanced_region_ignores_braces_in_strings() {
        let text = r#"Sure! Here it is: {"comments": "use {curly} and ] freely", "action": "revise_terms"} hope it helps"#;
        assert_eq!(
            normalize_text(text),
            json!({"comments": "use {curly} and ] freely", "action": "revise_terms"})
        );
    }

    #[test]
    fn test_escaped_quote_inside_string() {
        let text = r#"result: {"reason": "he said \"no {\" twice"} end"#;
        assert_eq!(normalize_text(text), json!({"reason": "he said \"no {\" twice"}));
    }

    #[test]
    fn test_garbage_falls_back_to_raw_text() {
        assert_eq!(
            normalize_text("not json at all"),
            json!({"raw_text": "not json at all"})
        );
        assert_eq!(normalize(json!("{ broken")), json!({"raw_text": "{ broken"}));
    }

    #[test]
    fn test_markdown_normalization() {
        assert_eq!(
            normalize_markdown(&json!("```markdown\n# Report\nbody\n```")),
            "# Report\nbody"
        );
        assert_eq!(normalize_markdown(&json!({"content": " text "})), "text");
        assert_eq!(normalize_markdown(&json!(["a", "b"])), "a\n\nb");
        assert!(normalize_markdown(&json!({"x": 1})).starts_with("```json"));
    }
}
