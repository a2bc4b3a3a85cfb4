//! unstability.ai generations

use super::{array_field, scalar_string, seed_value, size_text, str_field, time_value, truthy, AdapterContext};
use crate::error::AdapterError;
use crate::model::filename::{file_stem, url_extension, url_file_name};
use crate::model::{Creation, ImageVariant};
use crate::params::{names, UNKNOWN_STEPS};
use serde_json::Value;
use tracing::warn;

const PROVIDER: &str = "unstability.ai";

/// Display label of a lighting filter, recorded as the sampler
fn lighting_filter_label(filter: &str) -> Option<&'static str> {
    match filter {
        "chaotic-composition" => Some("Diverse Composition"),
        "dynamic-contrast" => Some("Dynamic Contrast"),
        "complementary-compositon" => Some("Complementary Composition"),
        "color-guidance" => Some("Color Guidance"),
        "dual-color-guidance" => Some("Dual Color Guidance"),
        _ => None,
    }
}

pub fn is_match(raw: &Value) -> bool {
    truthy(raw.get("genInfo"))
        && truthy(raw.get("original"))
        && raw.get("genInfo").map(|g| truthy(g.get("lighting_filter"))).unwrap_or(false)
}

/// Model label from genre and style; a style already prefixed by its genre stands alone
fn model_label(genre: Option<&str>, style: Option<&str>) -> Option<String> {
    match (genre, style) {
        (Some(genre), Some(style)) if style.starts_with(genre) => Some(style.to_string()),
        (Some(genre), Some(style)) => Some(format!("{}/{}", genre, style)),
        (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
        (None, None) => None,
    }
}

fn image_for(url: &str, creation: &Creation) -> ImageVariant {
    let ext = url_extension(url).unwrap_or_else(|| ".png".to_string());
    let mut image = ImageVariant::new(url, ext);
    image.reel_name = Some(creation.id.clone());
    image.unique_id = url_file_name(url).map(|name| file_stem(&name));
    image.created_at = creation.created_at;
    image
}

pub fn normalize(raw: &mut Value, ctx: &AdapterContext) -> Result<Creation, AdapterError> {
    let raw: &Value = raw;
    let id = scalar_string(raw.get("prefix")).ok_or_else(|| AdapterError::missing(PROVIDER, "prefix"))?;
    let mut creation = Creation::new(id, PROVIDER);
    creation.order_by_id = false;
    creation.created_at = time_value(raw.get("requested_at"));

    let info = &raw["genInfo"];
    creation.prompt = str_field(info, "prompt").map(str::to_string);
    creation.negative_prompt = str_field(info, "negative_prompt").map(str::to_string);
    creation.set_param(names::STEPS, UNKNOWN_STEPS);
    if let Some(size) = size_text(info.get("width"), info.get("height")) {
        creation.set_param(names::SIZE, size);
    }
    if let Some(ratio) = str_field(info, "aspect_ratio") {
        creation.set_param("Aspect Ratio", ratio);
    }
    if let Some(seed) = info.get("seed").filter(|s| s.is_number()).and_then(|s| seed_value(Some(s))) {
        creation.params.set_json(names::SEED, &seed);
    }
    if let Some(model) = model_label(str_field(info, "genre"), str_field(info, "style")) {
        creation.set_param(names::MODEL, model);
    }
    if let Some(filter) = str_field(info, "lighting_filter") {
        match lighting_filter_label(filter) {
            Some(label) => creation.set_param(names::SAMPLER, label),
            None => warn!(creation = %creation.id, filter, "Unrecognized lighting filter"),
        }
        let colored = matches!(filter, "complementary-compositon" | "color-guidance" | "dual-color-guidance");
        if colored {
            if let Some(color) = str_field(info, "lighting_filter_color") {
                creation.set_param("Lighting Color", color);
            }
            if filter == "dual-color-guidance" {
                if let Some(color) = str_field(info, "lighting_filter_negative_color") {
                    creation.set_param("Negative Lighting Color", color);
                }
            }
            if filter != "complementary-compositon" {
                if let Some(flat) = info.get("alternate_mode") {
                    creation.params.set_json("Flat Background", flat);
                }
            }
        }
    }
    for (key, name) in [
        ("lighting_filter_strength", "Sampler Strength"),
        ("detail_pass_strength", "High Frequency Detail"),
        ("saturation", "Saturation"),
    ] {
        if truthy(info.get(key)) {
            creation.params.set_json(name, &info[key]);
        }
    }

    let listed = array_field(raw, "images");
    if listed.is_empty() {
        if let Some(url) = str_field(raw, "original") {
            let image = image_for(url, &creation);
            creation.images.push(image);
        }
    } else if !ctx.options.upscales_only {
        for (idx, entry) in listed.iter().enumerate() {
            let Some(url) = str_field(entry, "original") else {
                continue;
            };
            let mut image = image_for(url, &creation);
            image.source_pointer = Some(format!("/images/{}", idx));
            image.image_number = Some(idx as u32 + 1);
            if let Some(entry_id) = str_field(entry, "id") {
                image.unique_id = Some(entry_id.rsplit('#').next().unwrap_or(entry_id).to_string());
            }
            creation.images.push(image);
        }
    }
    Ok(creation)
}
