//! mage.space creations

use super::{number, scalar_string, seed_value, size_text, str_field, time_value, truthy};
use crate::error::AdapterError;
use crate::model::filename::url_extension;
use crate::model::{Creation, ImageVariant};
use crate::params::names;
use serde_json::Value;

const PROVIDER: &str = "mage.space";

pub fn is_match(raw: &Value) -> bool {
    truthy(raw.get("metadata"))
        && truthy(raw.get("model_version"))
        && raw.get("metadata").map(|m| truthy(m.get("model_version"))).unwrap_or(false)
        && truthy(raw.get("blurhash"))
}

/// `name/version`, with the metadata's version appended when it disagrees
fn model_label(raw: &Value, meta: &Value) -> String {
    let name = str_field(raw, "model_name").or_else(|| str_field(meta, "model_name")).unwrap_or_default();
    let outer = scalar_string(raw.get("model_version"));
    let inner = scalar_string(meta.get("model_version"));
    let version = match (outer, inner) {
        (Some(outer), Some(inner)) if outer != inner => format!("{}/{}", outer, inner),
        (Some(v), _) | (None, Some(v)) => v,
        (None, None) => String::new(),
    };
    format!("{}/{}", name, version)
}

pub fn normalize(raw: &mut Value) -> Result<Creation, AdapterError> {
    let raw: &Value = raw;
    let id = scalar_string(raw.get("id")).ok_or_else(|| AdapterError::missing(PROVIDER, "id"))?;
    let mut creation = Creation::new(id, PROVIDER);
    creation.order_by_id = false;
    creation.created_at = time_value(raw.get("created_at"));

    let meta = &raw["metadata"];
    creation.prompt = str_field(meta, "prompt").map(str::to_string);
    creation.negative_prompt = str_field(meta, "negative_prompt").map(str::to_string);
    if let Some(steps) = meta.get("num_inference_steps") {
        creation.params.set_json(names::STEPS, steps);
    }
    let width = meta.get("width").filter(|w| truthy(Some(w))).or_else(|| raw.get("width"));
    let height = meta.get("height").filter(|h| truthy(Some(h))).or_else(|| raw.get("height"));
    if let Some(size) = size_text(width, height) {
        creation.set_param(names::SIZE, size);
    }
    if let Some(seed) = seed_value(meta.get("seed")).filter(|s| truthy(Some(s))) {
        creation.params.set_json(names::SEED, &seed);
    }
    creation.set_param("Method", PROVIDER);
    creation.set_param(names::MODEL, model_label(raw, meta));
    if let Some(scheduler) = str_field(meta, "scheduler") {
        creation.set_param(names::SAMPLER, scheduler);
    }
    if truthy(meta.get("guidance_scale")) {
        creation.params.set_json(names::CFG_SCALE, &meta["guidance_scale"]);
    }
    if truthy(meta.get("clip_skip")) {
        creation.set_param(names::CLIP_SKIP, 1u32);
    }
    if truthy(meta.get("use_refiner")) {
        if truthy(meta.get("refiner_strength")) {
            creation.params.set_json("Refiner strength", &meta["refiner_strength"]);
        } else if let Some(frac) = number(meta.get("denoising_frac")).filter(|f| *f != 0.0) {
            creation.set_param("Refiner denoise percentage", ((1.0 - frac) * 1000.0).round() / 1000.0);
        }
    }

    if let Some(url) = str_field(raw, "image_url") {
        let ext = url_extension(url).unwrap_or_else(|| ".png".to_string());
        let mut image = ImageVariant::new(url, ext);
        image.unique_id = Some(creation.id.clone());
        image.created_at = creation.created_at;
        creation.images.push(image);
    }
    Ok(creation)
}
