//! Provider adapters and source detection
//!
//! Each provider module exposes `is_match` (a cheap structural test) and
//! `normalize` (raw payload to [`Creation`]). [`detect`] tries providers in
//! [`DETECTION_ORDER`]; several predicates overlap, so the order is part of
//! the contract.

pub mod civitai;
pub mod dezgo;
pub mod firebase;
pub mod happyaccidents;
pub mod magespace;
pub mod nightcafe;
pub mod novita;
pub mod starryai;
pub mod unstability;

use crate::error::AdapterError;
use crate::model::{Creation, Headers};
use crate::services::HttpFetch;
use crate::store::{MemoryStore, ModelInfoStore};
use chrono::{DateTime, Utc};
use genarc_common::time::{from_millis, parse_datetime};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Model-info store shared between adapters
pub type SharedStore = Arc<Mutex<Box<dyn ModelInfoStore>>>;

/// Wrap a store for sharing
pub fn shared_store(store: impl ModelInfoStore + 'static) -> SharedStore {
    Arc::new(Mutex::new(Box::new(store)))
}

/// Options accepted by the pipeline and consulted by adapters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Transcode downloads to an efficient format
    pub compressed: bool,
    /// Skip non-upscale artifacts and reference-image capture
    pub upscales_only: bool,
}

/// Collaborators available to adapters during normalization
pub struct AdapterContext {
    pub fetch: Arc<dyn HttpFetch>,
    /// Civitai model versions keyed by file hash
    pub civitai_models: SharedStore,
    /// HappyAccidents model metadata keyed by model id
    pub happy_models: SharedStore,
    pub options: IngestOptions,
    /// Request headers per provider name
    pub provider_headers: BTreeMap<String, Headers>,
}

impl AdapterContext {
    /// Context with empty in-memory stores and no extra headers
    pub fn new(fetch: Arc<dyn HttpFetch>) -> Self {
        Self {
            fetch,
            civitai_models: shared_store(MemoryStore::new()),
            happy_models: shared_store(MemoryStore::new()),
            options: IngestOptions::default(),
            provider_headers: BTreeMap::new(),
        }
    }

    pub fn headers_for(&self, provider: Provider) -> Headers {
        self.provider_headers
            .get(provider.name())
            .cloned()
            .unwrap_or_default()
    }
}

/// Supported providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    StarryAi,
    Novita,
    NightCafe,
    Dezgo,
    HappyAccidents,
    Unstability,
    MageSpace,
    Civitai,
}

/// Fixed detection priority
pub const DETECTION_ORDER: [Provider; 8] = [
    Provider::StarryAi,
    Provider::Novita,
    Provider::NightCafe,
    Provider::Dezgo,
    Provider::HappyAccidents,
    Provider::Unstability,
    Provider::MageSpace,
    Provider::Civitai,
];

impl Provider {
    /// Name used in configuration and logs
    pub fn name(self) -> &'static str {
        match self {
            Self::StarryAi => "StarryAI",
            Self::Novita => "Novita",
            Self::NightCafe => "NightCafe",
            Self::Dezgo => "Dezgo",
            Self::HappyAccidents => "HappyAccidents",
            Self::Unstability => "Unstability",
            Self::MageSpace => "MageSpace",
            Self::Civitai => "Civitai",
        }
    }

    pub fn is_match(self, raw: &Value) -> bool {
        match self {
            Self::StarryAi => starryai::is_match(raw),
            Self::Novita => novita::is_match(raw),
            Self::NightCafe => nightcafe::is_match(raw),
            Self::Dezgo => dezgo::is_match(raw),
            Self::HappyAccidents => happyaccidents::is_match(raw),
            Self::Unstability => unstability::is_match(raw),
            Self::MageSpace => magespace::is_match(raw),
            Self::Civitai => civitai::is_match(raw),
        }
    }

    /// Build the canonical creation; the parameter list always leads with `Steps`
    pub async fn normalize(self, raw: &mut Value, ctx: &AdapterContext) -> Result<Creation, AdapterError> {
        let mut creation = match self {
            Self::StarryAi => starryai::normalize(raw, ctx)?,
            Self::Novita => novita::normalize(raw)?,
            Self::NightCafe => nightcafe::normalize(raw)?,
            Self::Dezgo => dezgo::normalize(raw, ctx).await?,
            Self::HappyAccidents => happyaccidents::normalize(raw, ctx).await?,
            Self::Unstability => unstability::normalize(raw, ctx)?,
            Self::MageSpace => magespace::normalize(raw)?,
            Self::Civitai => civitai::normalize(raw, ctx)?,
        };
        creation.normalize_params();
        debug!(
            provider = self.name(),
            creation = %creation.id,
            images = creation.images.len(),
            "Normalized payload"
        );
        Ok(creation)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// First provider in [`DETECTION_ORDER`] whose predicate accepts `raw`
pub fn detect(raw: &Value) -> Option<Provider> {
    DETECTION_ORDER.iter().copied().find(|p| p.is_match(raw))
}

/// Detect and normalize; `Ok(None)` for unrecognized payloads
pub async fn normalize(raw: &mut Value, ctx: &AdapterContext) -> Result<Option<(Provider, Creation)>, AdapterError> {
    match detect(raw) {
        Some(provider) => Ok(Some((provider, provider.normalize(raw, ctx).await?))),
        None => Ok(None),
    }
}

/// Best-effort id of a payload for progress reporting, before detection
pub fn payload_id(raw: &Value) -> Option<String> {
    ["id", "inferenceId", "_id", "prefix"]
        .iter()
        .find_map(|key| scalar_string(raw.get(*key)))
        .or_else(|| scalar_string(raw.pointer("/task/task_id")))
        .or_else(|| scalar_string(raw.pointer("/pageProps/cid")))
}

// Shared JSON access helpers. Provider payloads are loosely typed, so every
// accessor treats absent, null and wrongly typed values alike.

/// JavaScript-style truthiness
pub(crate) fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Non-empty string field
pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Strings and numbers as text
pub(crate) fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numbers and numeric strings
pub(crate) fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Non-negative integer seed
pub(crate) fn seed_value(value: Option<&Value>) -> Option<Value> {
    match value? {
        Value::Number(n) if n.as_f64().map(|f| f >= 0.0).unwrap_or(false) => Some(Value::Number(n.clone())),
        Value::String(s) => s.trim().parse::<i64>().ok().filter(|n| *n >= 0).map(Value::from),
        _ => None,
    }
}

/// Date strings, millisecond timestamps and `{_seconds}` objects
pub(crate) fn time_value(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => parse_datetime(s).or_else(|| s.trim().parse::<f64>().ok().and_then(float_millis)),
        Value::Number(n) => n.as_f64().and_then(float_millis),
        Value::Object(map) => map
            .get("_seconds")
            .and_then(Value::as_i64)
            .and_then(|s| s.checked_mul(1000))
            .and_then(from_millis),
        _ => None,
    }
}

/// Millisecond timestamp given as a float; NaN and out-of-range values are rejected
pub(crate) fn float_millis(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() || ms.abs() >= i64::MAX as f64 {
        return None;
    }
    from_millis(ms as i64)
}

/// `WxH` when both dimensions are known
pub(crate) fn size_text(width: Option<&Value>, height: Option<&Value>) -> Option<String> {
    let w = scalar_string(width).filter(|w| w != "0")?;
    let h = scalar_string(height).filter(|h| h != "0")?;
    Some(format!("{}x{}", w, h))
}

/// Array field, empty when absent
pub(crate) fn array_field<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Fetch through a model-info store, remembering successful lookups
///
/// `summarize` picks the fields worth caching from the remote answer. Lookup
/// failures are logged and reported as unknown.
pub(crate) async fn cached_lookup(
    store: &SharedStore,
    fetch: &dyn HttpFetch,
    key: &str,
    url: &str,
    headers: &Headers,
    summarize: impl Fn(&Value) -> Option<Value> + Send,
) -> Result<Option<Value>, AdapterError> {
    let mut store = store.lock().await;
    if let Some(hit) = store.get(key) {
        return Ok(Some(hit));
    }
    let remote = match fetch.get_json(url, headers).await {
        Ok(remote) => remote,
        Err(e) => {
            warn!(key, error = %e, "Model lookup failed");
            return Ok(None);
        }
    };
    let Some(summary) = summarize(&remote) else {
        return Ok(None);
    };
    store.put(key, summary.clone());
    store.flush().await?;
    Ok(Some(summary))
}
