//! Civitai generation requests, in both the flat and the `steps` layout

use super::{array_field, number, scalar_string, size_text, str_field, time_value, truthy, AdapterContext, Provider};
use crate::error::AdapterError;
use crate::model::{Creation, ImageVariant};
use crate::params::{names, ParamValue, Params};
use serde_json::{json, Value};

const PROVIDER: &str = "Civitai";

/// Model references of the form `@civitai/<modelVersionId>`
const MODEL_REF_PREFIX: &str = "@civitai/";

pub fn is_match(raw: &Value) -> bool {
    let flat = truthy(raw.get("status"))
        && truthy(raw.get("params"))
        && truthy(raw.get("resources"))
        && truthy(raw.get("baseModel"));
    flat || (truthy(raw.get("status"))
        && array_field(raw, "steps")
            .first()
            .map(|step| truthy(step.get("params")) && truthy(step.get("resources")))
            .unwrap_or(false))
}

/// A model or adapter used by a request
#[derive(Debug, Clone, PartialEq)]
struct Resource {
    id: Option<Value>,
    name: String,
    kind: String,
    weight: Option<Value>,
}

fn full_name(resource: &Value) -> String {
    [str_field(resource, "modelName"), str_field(resource, "name")]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
}

fn resources(request: &Value) -> Vec<Resource> {
    array_field(request, "resources")
        .iter()
        .map(|r| Resource {
            id: r.get("id").cloned(),
            name: full_name(r),
            kind: str_field(r, "modelType")
                .or_else(|| str_field(r, "type"))
                .unwrap_or_default()
                .to_lowercase(),
            weight: r.get("strength").filter(|s| truthy(Some(s))).cloned(),
        })
        .collect()
}

/// Name of the checkpoint an old-style `model` field refers to
fn referenced_model_name(model: &str, request: &Value) -> String {
    let lower = model.to_lowercase();
    lower
        .strip_prefix(MODEL_REF_PREFIX)
        .and_then(|rest| rest.parse::<i64>().ok())
        .and_then(|id| {
            array_field(request, "resources")
                .iter()
                .find(|r| r.get("id").and_then(Value::as_i64) == Some(id))
        })
        .map(full_name)
        .unwrap_or_else(|| model.to_string())
}

pub fn normalize(raw: &mut Value, ctx: &AdapterContext) -> Result<Creation, AdapterError> {
    let raw: &Value = raw;
    let id = scalar_string(raw.get("id")).ok_or_else(|| AdapterError::missing(PROVIDER, "id"))?;
    let mut creation = Creation::new(id, PROVIDER);
    creation.order_by_id = false;
    creation.created_at = time_value(raw.get("createdAt"));

    let (request, base) = if !truthy(raw.get("params")) && !array_field(raw, "steps").is_empty() {
        (&raw["steps"][0], "/steps/0")
    } else {
        (raw, "")
    };
    let used = resources(request);
    let meta = request.get("params").ok_or_else(|| AdapterError::missing(PROVIDER, "params"))?;
    let quantity = number(meta.get("quantity"))
        .or_else(|| number(request.get("quantity")))
        .unwrap_or(0.0);
    let images = array_field(request, "images");

    creation.prompt = str_field(meta, "prompt").map(str::to_string);
    creation.negative_prompt = str_field(meta, "negativePrompt").map(str::to_string);
    if let Some(steps) = meta.get("steps") {
        creation.params.set_json(names::STEPS, steps);
    }
    if let Some(sampler) = str_field(meta, "sampler").or_else(|| str_field(meta, "scheduler")) {
        creation.set_param(names::SAMPLER, sampler);
    }
    if truthy(meta.get("cfgScale")) {
        creation.params.set_json(names::CFG_SCALE, &meta["cfgScale"]);
    }
    if truthy(meta.get("seed")) {
        creation.params.set_json(names::SEED, &meta["seed"]);
    } else if quantity > 0.0 && images.first().map(|img| truthy(img.get("seed"))).unwrap_or(false) {
        creation.params.set_json(names::SEED, &images[0]["seed"]);
    }
    if let Some(size) = size_text(meta.get("width"), meta.get("height")) {
        creation.set_param(names::SIZE, size);
    }
    if let Some(model) = str_field(request, "model") {
        if let Some(hash) = scalar_string(request.get("modelHash")) {
            creation.set_param(names::MODEL_HASH, hash);
        }
        creation.set_param(names::MODEL, referenced_model_name(model, request));
    } else if let Some(checkpoint) = used.iter().find(|r| r.kind == "checkpoint") {
        creation.set_param(names::MODEL, checkpoint.name.clone());
    }
    if truthy(meta.get("clipSkip")) {
        creation.params.set_json(names::CLIP_SKIP, &meta["clipSkip"]);
    }
    let loras: Vec<&Resource> = used.iter().filter(|r| r.kind == "lora").collect();
    if !loras.is_empty() {
        let mut lora_hashes = Params::new();
        for lora in loras {
            lora_hashes.set(lora.name.clone(), "0");
        }
        creation.set_param(names::LORA_HASHES, lora_hashes);
    }
    if !used.is_empty() {
        let summary: Vec<Value> = used
            .iter()
            .map(|r| {
                let mut entry = json!({"type": r.kind});
                if let Some(weight) = &r.weight {
                    entry["weight"] = weight.clone();
                }
                entry["modelVersionId"] = r.id.clone().unwrap_or(Value::Null);
                entry
            })
            .collect();
        creation.params.set("Civitai resources", ParamValue::Json(Value::Array(summary)));
    }

    let headers = ctx.headers_for(Provider::Civitai);
    for (idx, img) in images.iter().enumerate() {
        let Some(url) = str_field(img, "url") else {
            continue;
        };
        let mut image = ImageVariant::new(url, ".jpg").with_headers(headers.clone());
        image.source_pointer = Some(format!("{}/images/{}", base, idx));
        image.created_at = time_value(img.get("completed")).or(creation.created_at);
        image.unique_id = scalar_string(img.get("id"));
        image.reel_name = scalar_string(img.get("requestId")).or_else(|| Some(creation.id.clone()));
        if quantity > 1.0 {
            image.image_number = Some(idx as u32 + 1);
        }
        image.seed_override = scalar_string(img.get("seed"));
        creation.images.push(image);
    }
    Ok(creation)
}
