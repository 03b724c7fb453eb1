//! Permissive JSON extraction from LM output.
//!
//! Models wrap JSON in markdown fences, prepend prose, and trail
//! commentary. These helpers find the first balanced JSON value in the
//! text and parse that, so cascade levels get a clean
//! [`CoreError::Parse`] instead of a panic when the model misbehaves.
//! Every caller pairs extraction with a rule-layer fallback.

use serde_json::Value;

use crate::error::{CoreError, Result};

/// Extract the first JSON object from model output.
pub fn extract_json(text: &str) -> Result<Value> {
    extract_value(text, '{', '}')
}

/// Extract the first JSON array from model output.
pub fn extract_json_array(text: &str) -> Result<Value> {
    extract_value(text, '[', ']')
}

fn extract_value(text: &str, open: char, close: char) -> Result<Value> {
    let cleaned = strip_code_fences(text);

    // Fast path: the whole thing parses.
    if let Ok(value) = serde_json::from_str::<Value>(cleaned.trim()) {
        if value_matches(&value, open) {
            return Ok(value);
        }
    }

    // Slow path: scan for the first balanced region.
    let candidate = balanced_slice(&cleaned, open, close)
        .ok_or_else(|| CoreError::Parse(format!("no JSON value found in: {}", preview(text))))?;

    serde_json::from_str(candidate)
        .map_err(|e| CoreError::Parse(format!("malformed JSON ({e}): {}", preview(candidate))))
}

fn value_matches(value: &Value, open: char) -> bool {
    match open {
        '{' => value.is_object(),
        '[' => value.is_array(),
        _ => false,
    }
}

/// Strip ```json ... ``` (or bare ```) fences, keeping the body.
fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.contains("```") {
        return trimmed.to_string();
    }

    let mut body = Vec::new();
    let mut inside = false;
    for line in trimmed.lines() {
        if line.trim_start().starts_with("```") {
            inside = !inside;
            continue;
        }
        if inside {
            body.push(line);
        }
    }

    if body.is_empty() {
        // Fences present but nothing captured (e.g. inline fences); fall
        // back to removing the markers.
        trimmed.replace("```json", "").replace("```", "")
    } else {
        body.join("\n")
    }
}

/// Find the first balanced `open..close` slice, respecting JSON strings.
fn balanced_slice(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start + offset + close.len_utf8();
                    debug_assert!(end <= bytes.len());
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= 80 {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(77).collect();
        format!("{head}...")
    }
}
