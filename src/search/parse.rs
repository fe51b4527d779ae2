//! Parser for LLM strategy proposals.
//!
//! Accepted shapes, after stripping markdown fences:
//!
//! ```text
//! { "strategies": [ {name, class_weight, l2_C, ...}, ... ], "rationale": ... }
//! { "hypotheses": [ {name, config: {params: {...}}}, ... ], "rationale": ... }
//! ```
//!
//! Entries that fail to deserialize or validate are skipped with a warning.
//! An empty response, invalid JSON, an unrecognized shape or zero valid
//! entries are all `ProposerParse`.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Result, SearchError};
use crate::types::StrategyConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProposal {
    pub configs: Vec<StrategyConfig>,
    pub rationale: Option<String>,
    /// Entries dropped as malformed
    pub skipped: usize,
}

/// Recognized top-level payloads.
enum Payload {
    Strategies(Vec<Value>),
    Hypotheses(Vec<Value>),
}

/// Remove a surrounding ```json / ``` fence.
pub fn strip_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Parse as JSON, falling back to the outermost `{ ... }` span.
fn parse_object(text: &str) -> Result<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(v) => Ok(v),
        Err(first) => {
            let span = text
                .find('{')
                .zip(text.rfind('}'))
                .filter(|(start, end)| start < end)
                .map(|(start, end)| &text[start..=end]);
            span.and_then(|s| serde_json::from_str(s).ok())
                .ok_or_else(|| SearchError::ProposerParse(format!("invalid JSON: {first}")))
        }
    }
}

fn classify(value: &Value) -> Result<Payload> {
    let Value::Object(obj) = value else {
        return Err(SearchError::ProposerParse(format!(
            "expected a JSON object, got {}",
            kind_of(value)
        )));
    };

    match (obj.get("strategies"), obj.get("hypotheses")) {
        (Some(Value::Array(items)), _) => Ok(Payload::Strategies(items.clone())),
        (_, Some(Value::Array(items))) => Ok(Payload::Hypotheses(items.clone())),
        _ => Err(SearchError::ProposerParse(
            "expected a 'strategies' or 'hypotheses' list".to_string(),
        )),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Flatten `{name, config: {params: {...}}}` into a config object.
fn flatten_hypothesis(entry: &Value, index: usize) -> Option<Value> {
    let obj = entry.as_object()?;
    let params = obj.get("config")?.as_object()?;
    let params = params
        .get("params")
        .and_then(Value::as_object)
        .unwrap_or(params);

    let mut flat = Map::new();
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("strategy_{}", index));
    flat.insert("name".to_string(), Value::String(name));
    for (key, value) in params {
        if key != "name" && !value.is_null() {
            flat.insert(key.clone(), value.clone());
        }
    }
    Some(Value::Object(flat))
}

fn entry_to_config(entry: &Value, index: usize) -> std::result::Result<StrategyConfig, String> {
    let is_hypothesis = entry.get("config").is_some_and(Value::is_object);
    let value = if is_hypothesis {
        flatten_hypothesis(entry, index).ok_or("malformed hypothesis entry")?
    } else {
        entry.clone()
    };
    let config: StrategyConfig = serde_json::from_value(value).map_err(|e| e.to_string())?;
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn rationale_text(value: &Value) -> Option<String> {
    match value.get("rationale")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Parse a raw LLM response into strategy configs.
pub fn parse_strategies(raw: &str) -> Result<ParsedProposal> {
    let text = strip_fences(raw);
    if text.is_empty() {
        return Err(SearchError::ProposerParse(
            "empty response after cleaning".to_string(),
        ));
    }

    let value = parse_object(text)?;
    let entries = match classify(&value)? {
        Payload::Strategies(items) | Payload::Hypotheses(items) => items,
    };

    let mut configs = Vec::new();
    let mut skipped = 0;
    for (i, entry) in entries.iter().enumerate() {
        match entry_to_config(entry, i) {
            Ok(cfg) => configs.push(cfg),
            Err(e) => {
                skipped += 1;
                warn!(index = i, error = %e, "skipping invalid strategy entry");
            }
        }
    }

    if configs.is_empty() {
        return Err(SearchError::ProposerParse(format!(
            "no valid strategies in response ({} entries skipped)",
            skipped
        )));
    }

    Ok(ParsedProposal {
        configs,
        rationale: rationale_text(&value),
        skipped,
    })
}
