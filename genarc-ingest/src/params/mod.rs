//! Generation parameter block codec
//!
//! The parameter block is the comma-separated `Name: Value` list that image
//! generators embed after the prompt text. The grammar is informal and
//! ambiguous; the parser reproduces the established heuristics so files tagged
//! by earlier tools keep parsing the same way:
//!
//! - a value starting with `[` or `{` is JSON and runs to the end of the text
//! - a value starting with `"` runs to the next `", "`; if the quoted span
//!   contains `": "` it is a nested parameter list
//! - any other value runs to the next `", "` or the end of the text
//!
//! Serialization is the inverse for scalar values. Nested lists and JSON
//! values are quoted when followed by more pairs and JSON-encoded when last.

pub mod embedded;

pub use embedded::Embedded;

use serde_json::{Map, Number, Value};
use std::fmt;

/// Well-known parameter names
pub mod names {
    pub const STEPS: &str = "Steps";
    pub const SAMPLER: &str = "Sampler";
    pub const CFG_SCALE: &str = "CFG scale";
    pub const SEED: &str = "Seed";
    pub const SIZE: &str = "Size";
    pub const MODEL_HASH: &str = "Model hash";
    pub const MODEL: &str = "Model";
    pub const VAE_HASH: &str = "VAE hash";
    pub const VAE: &str = "VAE";
    pub const DENOISING_STRENGTH: &str = "Denoising strength";
    pub const CLIP_SKIP: &str = "Clip skip";
    pub const HIRES_UPSCALE: &str = "Hires upscale";
    pub const HIRES_STEPS: &str = "Hires steps";
    pub const HIRES_UPSCALER: &str = "Hires upscaler";
    pub const LORA_HASHES: &str = "Lora hashes";
    pub const TI_HASHES: &str = "TI hashes";
    pub const VERSION: &str = "Version";
    pub const HASHES: &str = "Hashes";
    pub const SERVICE: &str = "Service";
}

/// Placeholder written when a provider does not report a step count
pub const UNKNOWN_STEPS: &str = "unknown";

/// One parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Plain token, stored in its serialized string form
    Scalar(String),
    /// Nested parameter list (e.g. lora name to hash)
    Nested(Params),
    /// Array or object destined for literal JSON encoding
    Json(Value),
}

impl ParamValue {
    /// Convert a provider JSON value. Strings, numbers and booleans become scalars.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(Self::Scalar(s.clone())),
            Value::Number(n) => Some(Self::Scalar(number_to_string(n))),
            Value::Bool(b) => Some(Self::Scalar(b.to_string())),
            Value::Array(_) | Value::Object(_) => Some(Self::Json(value.clone())),
        }
    }

    /// Scalar text, if this is a scalar
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    fn serialize(&self, is_last: bool) -> String {
        match self {
            Self::Scalar(s) => s.clone(),
            Self::Nested(params) => {
                if is_last {
                    params.to_json().to_string()
                } else {
                    format!("\"{}\"", params.render(false))
                }
            }
            Self::Json(value) => serialize_json(value, is_last),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Scalar(s) => match serde_json::from_str::<Number>(s) {
                Ok(n) => Value::Number(n),
                Err(_) => Value::String(s.clone()),
            },
            Self::Nested(params) => params.to_json(),
            Self::Json(value) => value.clone(),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize(false))
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Scalar(value)
    }
}

impl From<&String> for ParamValue {
    fn from(value: &String) -> Self {
        Self::Scalar(value.clone())
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<Params> for ParamValue {
    fn from(value: Params) -> Self {
        Self::Nested(value)
    }
}

/// Render a JSON number the way it reads in a parameter block (`7`, not `7.0`)
pub fn number_to_string(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        i.to_string()
    } else if let Some(u) = n.as_u64() {
        u.to_string()
    } else if let Some(f) = n.as_f64() {
        f.to_string()
    } else {
        n.to_string()
    }
}

fn serialize_json(value: &Value, is_last: bool) -> String {
    match value {
        Value::Array(items) => {
            if is_last {
                value.to_string()
            } else {
                let inner: Vec<String> = items.iter().map(|v| serialize_json(v, false)).collect();
                format!("\"{}\"", inner.join(", "))
            }
        }
        Value::Object(entries) => {
            if is_last {
                value.to_string()
            } else {
                let inner: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, serialize_json(v, false)))
                    .collect();
                format!("\"{}\"", inner.join(", "))
            }
        }
        Value::String(s) => s.clone(),
        Value::Number(n) => number_to_string(n),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
    }
}

/// Ordered parameter list
///
/// Insertion order is significant. [`Params::set`] updates an existing entry
/// in place; [`Params::parse`] keeps duplicates exactly as they appear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, ParamValue)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First value stored under `name`
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Scalar text stored under `name`
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Upsert: replace the value in place, or append a new entry
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Upsert a provider JSON value; nulls are ignored
    pub fn set_json(&mut self, name: impl Into<String>, value: &Value) {
        if let Some(v) = ParamValue::from_json(value) {
            self.set(name, v);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<ParamValue> {
        let pos = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Make `Steps` the first entry, adding a placeholder when absent
    ///
    /// Parsers locate the block by a leading `Steps:`, so any non-empty block
    /// must start with it.
    pub fn ensure_steps_first(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        match self.entries.iter().position(|(n, _)| n == names::STEPS) {
            Some(0) => {}
            Some(pos) => {
                let entry = self.entries.remove(pos);
                self.entries.insert(0, entry);
            }
            None => self
                .entries
                .insert(0, (names::STEPS.to_string(), ParamValue::from(UNKNOWN_STEPS))),
        }
    }

    /// Serialize with an optional per-image seed stamped over `Seed`
    pub fn to_param_string(&self, seed_override: Option<&str>) -> String {
        let count = self.entries.len();
        self.entries
            .iter()
            .enumerate()
            .map(|(idx, (name, value))| {
                let text = match seed_override {
                    Some(seed) if name == names::SEED => seed.to_string(),
                    _ => value.serialize(idx + 1 == count),
                };
                format!("{}: {}", name, text)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn render(&self, top_level: bool) -> String {
        if top_level {
            return self.to_param_string(None);
        }
        self.entries
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value.serialize(false)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// JSON object form, used when a nested list is the final pair
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (name, value) in &self.entries {
            map.insert(name.clone(), value.to_json());
        }
        Value::Object(map)
    }

    /// Parse a parameter block (the text starting at `Steps:`)
    pub fn parse(text: &str) -> Self {
        let mut params = Params::new();
        let mut remaining = text;
        while let Some(name) = take_name(&mut remaining) {
            match take_value(&mut remaining) {
                Some(value) => params.entries.push((name.to_string(), value)),
                None => break,
            }
        }
        params
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_param_string(None))
    }
}

fn take_name<'a>(remaining: &mut &'a str) -> Option<&'a str> {
    let end = remaining.find(": ")?;
    if end == 0 {
        return None;
    }
    let name = &remaining[..end];
    *remaining = &remaining[end + 2..];
    Some(name)
}

fn take_value(remaining: &mut &str) -> Option<ParamValue> {
    let text = *remaining;
    match text.chars().next() {
        Some('[') | Some('{') => {
            // JSON must be the final pair; its commas are not delimiters
            *remaining = "";
            Some(match serde_json::from_str::<Value>(text) {
                Ok(value) => ParamValue::Json(value),
                Err(_) => ParamValue::Scalar(text.to_string()),
            })
        }
        Some('"') => {
            let span = match text.find("\", ") {
                Some(end) if end > 0 => {
                    *remaining = &text[end + 3..];
                    &text[..end + 1]
                }
                _ if text.len() > 1 && text.ends_with('"') => {
                    *remaining = "";
                    text
                }
                _ => return None,
            };
            if span.contains(": ") {
                Some(ParamValue::Nested(Params::parse(&span[1..span.len() - 1])))
            } else {
                Some(ParamValue::Scalar(span.to_string()))
            }
        }
        _ => match text.find(", ") {
            Some(end) => {
                *remaining = &text[end + 2..];
                Some(ParamValue::Scalar(text[..end].to_string()))
            }
            None => {
                *remaining = "";
                Some(ParamValue::Scalar(text.to_string()))
            }
        },
    }
}
