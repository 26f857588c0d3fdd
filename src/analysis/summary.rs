//! Normalization of the free-form `summary` field.
//!
//! Generated summaries arrive in three shapes: a plain sentence, a
//! structured object with `health_status` and `key_findings`, or a JSON
//! object embedded in text (often inside a markdown code fence). The shape
//! is decoded once into [`Summary`] so callers only ever ask for
//! [`Summary::text`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Placeholder narrative produced when the generator had nothing to say.
/// Shared by summaries, insights and recommendations.
const PLACEHOLDERS: &[&str] = &[
    "no major trends observed",
    "no recommendations",
    "analysis completed.",
    "analysis completed",
];

/// A decoded summary value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Summary {
    /// A plain text summary.
    Plain(String),
    /// A structured health assessment.
    Structured {
        health_status: String,
        key_findings: Vec<String>,
    },
    /// A JSON document carried as text, kept verbatim.
    EmbeddedJson(String),
}

impl Default for Summary {
    fn default() -> Self {
        Summary::Plain(String::new())
    }
}

impl Summary {
    /// Decode any JSON value. Never fails.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Summary::default(),
            Value::String(text) => Self::from_text(text),
            Value::Object(map) => Self::from_object(map),
            Value::Array(items) => Summary::Plain(
                items
                    .iter()
                    .map(value_text)
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            other => Summary::Plain(other.to_string()),
        }
    }

    fn from_text(text: String) -> Self {
        let candidate = strip_code_fences(&text);
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(_)) => Summary::EmbeddedJson(text),
            _ => Summary::Plain(text),
        }
    }

    fn from_object(mut map: Map<String, Value>) -> Self {
        if map.contains_key("health_status") || map.contains_key("key_findings") {
            let health_status = map
                .remove("health_status")
                .map(|v| value_text(&v))
                .unwrap_or_default();
            let key_findings = match map.remove("key_findings") {
                Some(Value::Object(findings)) => findings
                    .values()
                    .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
                    .collect(),
                Some(Value::Array(findings)) => findings
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
                    .collect(),
                Some(Value::String(s)) => vec![s.trim().to_string()],
                _ => Vec::new(),
            };
            return Summary::Structured {
                health_status,
                key_findings,
            };
        }

        if let Some(inner) = map.remove("summary") {
            return Self::from_value(inner);
        }

        Summary::Plain(
            map.values()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        )
    }

    /// Display text for the summary, trimmed.
    pub fn text(&self) -> String {
        match self {
            Summary::Plain(text) => text.trim().to_string(),
            Summary::Structured {
                health_status,
                key_findings,
            } => {
                let mut text = health_status.trim().to_string();
                let findings: Vec<&str> = key_findings
                    .iter()
                    .map(|f| f.trim())
                    .filter(|f| !f.is_empty())
                    .collect();
                if !findings.is_empty() {
                    text.push_str(" Key findings: ");
                    text.push_str(&findings.join(" "));
                }
                text.trim().to_string()
            }
            Summary::EmbeddedJson(raw) => {
                let stripped = strip_code_fences(raw);
                match serde_json::from_str::<Value>(stripped) {
                    Ok(value @ Value::Object(_)) => {
                        let text = Self::from_value(value).text();
                        if text.is_empty() {
                            stripped.trim().to_string()
                        } else {
                            text
                        }
                    }
                    _ => stripped.trim().to_string(),
                }
            }
        }
    }

    /// True when the summary is empty or a known placeholder.
    pub fn is_trivial(&self) -> bool {
        is_trivial(&self.text())
    }
}

impl From<Value> for Summary {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

impl From<Summary> for Value {
    fn from(summary: Summary) -> Self {
        match summary {
            Summary::Plain(text) | Summary::EmbeddedJson(text) => Value::String(text),
            Summary::Structured {
                health_status,
                key_findings,
            } => serde_json::json!({
                "health_status": health_status,
                "key_findings": key_findings,
            }),
        }
    }
}

impl From<&str> for Summary {
    fn from(text: &str) -> Self {
        Self::from_text(text.to_string())
    }
}

/// Whether a summary string is empty or a placeholder.
pub fn is_trivial(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    normalized.is_empty() || PLACEHOLDERS.contains(&normalized.as_str())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Remove a surrounding markdown code fence, if any.
///
/// Handles ```` ```json ```` and bare ```` ``` ```` fences; text without a
/// fence is returned trimmed.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };

    let after = start + 3;
    let inner = match trimmed[after..].find("```") {
        Some(end) => &trimmed[after..after + end],
        None => &trimmed[after..],
    };

    let tag_len = inner
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(inner.len());
    let (tag, rest) = inner.split_at(tag_len);
    if tag.is_empty() {
        return inner.trim();
    }

    // A tag ends at the line break, or directly precedes JSON on one line
    match rest.find('\n') {
        Some(nl) if rest[..nl].trim().is_empty() => rest[nl + 1..].trim(),
        _ if rest.trim_start().starts_with(['{', '[']) => rest.trim(),
        _ => inner.trim(),
    }
}

/// Locate a JSON object in free text: fenced first, then the outermost braces.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let fenced = strip_code_fences(text);
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(fenced) {
        return Some(value);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start >= end {
        return None;
    }

    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}
