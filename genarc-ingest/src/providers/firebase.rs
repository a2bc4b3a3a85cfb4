//! Firestore listen-channel captures
//!
//! Browser captures of the Firestore `Listen` channel are a sequence of
//! length-prefixed JSON arrays (`123\n[[...]]456\n[[...]]`). Documents inside
//! use the typed value encoding (`{"stringValue": "x"}`), which is flattened
//! here into plain JSON.

use crate::error::AdapterError;
use genarc_common::time::parse_datetime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

const SOURCE: &str = "Firestore";

static RAW_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\s\[").expect("valid regex"));
static CHUNK_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\]\d+\s\[").expect("valid regex"));

/// Whether `text` looks like a listen-channel capture
pub fn is_firebase_raw(text: &str) -> bool {
    let head: String = text.chars().take(20).collect();
    RAW_PREFIX.is_match(&head)
}

/// Documents of collection `doc_type` changed in the capture, flattened
pub fn firebase_documents(text: &str, doc_type: &str) -> Result<Vec<Value>, AdapterError> {
    let start = text
        .find('[')
        .ok_or_else(|| AdapterError::invalid(SOURCE, "capture", "no JSON array found"))?;
    let chunks: Vec<&str> = CHUNK_BOUNDARY.split(text[start..].trim_end()).collect();
    let mut joined = String::with_capacity(text.len());
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            joined.push_str("],[");
        }
        joined.push_str(chunk);
    }
    let json = format!("[{}]", joined);
    let parsed: Value =
        serde_json::from_str(&json).map_err(|e| AdapterError::invalid(SOURCE, "capture", e.to_string()))?;

    let marker = format!("/documents/{}/", doc_type);
    let mut docs = Vec::new();
    collect_documents(&parsed, &marker, &mut docs)?;
    Ok(docs)
}

fn collect_documents(value: &Value, marker: &str, out: &mut Vec<Value>) -> Result<(), AdapterError> {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_documents(item, marker, out)?;
            }
        }
        Value::Object(obj) => {
            if let Some(doc) = obj.get("documentChange").and_then(|c| c.get("document")) {
                let named = doc.get("name").and_then(Value::as_str).map(|n| n.contains(marker)).unwrap_or(false);
                if named {
                    out.push(flatten_document(doc)?);
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Plain JSON object from a `{name, fields}` document
pub fn flatten_document(doc: &Value) -> Result<Value, AdapterError> {
    match doc.get("fields") {
        Some(Value::Object(fields)) => flatten_fields(fields),
        _ => Ok(Value::Object(Map::new())),
    }
}

fn flatten_fields(fields: &Map<String, Value>) -> Result<Value, AdapterError> {
    let mut out = Map::new();
    for (key, value) in fields {
        out.insert(key.clone(), flatten_value(value)?);
    }
    Ok(Value::Object(out))
}

fn flatten_value(value: &Value) -> Result<Value, AdapterError> {
    let Some(obj) = value.as_object() else {
        return Err(AdapterError::invalid(SOURCE, "value", "not a typed value"));
    };
    if let Some(v) = obj.get("stringValue") {
        return Ok(v.clone());
    }
    if let Some(v) = obj.get("booleanValue") {
        return Ok(v.clone());
    }
    if let Some(v) = obj.get("integerValue") {
        // Integers arrive as decimal strings
        return Ok(match v {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or_else(|_| v.clone()),
            other => other.clone(),
        });
    }
    if let Some(v) = obj.get("doubleValue") {
        return Ok(v.clone());
    }
    if let Some(v) = obj.get("timestampValue") {
        let millis = v
            .as_str()
            .and_then(parse_datetime)
            .map(|t| Value::from(t.timestamp_millis()))
            .unwrap_or(Value::Null);
        return Ok(millis);
    }
    if let Some(v) = obj.get("arrayValue") {
        let items = v
            .get("values")
            .and_then(Value::as_array)
            .map(|values| values.iter().map(flatten_value).collect::<Result<Vec<_>, _>>())
            .transpose()?
            .unwrap_or_default();
        return Ok(Value::Array(items));
    }
    if let Some(v) = obj.get("mapValue") {
        return match v.get("fields") {
            Some(Value::Object(fields)) => flatten_fields(fields),
            _ => Ok(Value::Object(Map::new())),
        };
    }
    if obj.contains_key("nullValue") {
        return Ok(Value::Null);
    }
    let kind = obj.keys().next().cloned().unwrap_or_default();
    Err(AdapterError::invalid(SOURCE, "value", format!("unrecognized value type `{}`", kind)))
}
