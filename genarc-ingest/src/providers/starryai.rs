//! StarryAI creations (GraphQL `Creation`/`CreationV2` objects and exports)

use super::{array_field, number, scalar_string, seed_value, str_field, time_value, truthy, AdapterContext};
use crate::error::AdapterError;
use crate::model::filename::{file_stem, url_extension, url_file_name};
use crate::model::{Creation, ImageVariant, WeightedPrompt};
use crate::params::names;
use serde_json::Value;
use tracing::warn;

const PROVIDER: &str = "StarryAI";

const TYPENAMES: [&str; 4] = ["Creation", "publicCreation", "CreationV2", "publicCreationV2"];

pub fn is_match(raw: &Value) -> bool {
    str_field(raw, "sender") == Some("starRycover")
        || str_field(raw, "__typename").map(|t| TYPENAMES.contains(&t)).unwrap_or(false)
}

fn is_v2(raw: &Value) -> bool {
    matches!(str_field(raw, "__typename"), Some("CreationV2") | Some("publicCreationV2"))
}

/// Iteration counts map to the quality names shown in the app
fn steps_label(iterations: &Value) -> Option<String> {
    let label = match iterations.as_i64() {
        Some(50) => "fast".to_string(),
        Some(100) => "standard".to_string(),
        Some(150) => "detailed".to_string(),
        _ => scalar_string(Some(iterations))?,
    };
    Some(label)
}

fn seed_from_variations(variations: &[Value]) -> Option<Value> {
    variations
        .iter()
        .find(|v| truthy(v.get("seed")))
        .and_then(|v| seed_value(v.get("seed")))
}

pub fn normalize(raw: &mut Value, ctx: &AdapterContext) -> Result<Creation, AdapterError> {
    let raw: &Value = raw;
    let id = scalar_string(raw.get("id")).ok_or_else(|| AdapterError::missing(PROVIDER, "id"))?;
    let mut creation = Creation::new(id, PROVIDER);
    creation.order_by_id = true;
    creation.created_at = time_value(raw.get("createdAt"));
    creation.published_at = time_value(raw.get("publishedAt"));
    if creation.created_at.is_none() {
        creation.created_at = creation.published_at;
    }
    creation.title = str_field(raw, "title").map(str::to_string);
    creation.url = str_field(raw, "link").filter(|l| *l != "null").map(str::to_string);

    let prompts: Vec<WeightedPrompt> = array_field(raw, "prompts")
        .iter()
        .filter_map(|p| {
            Some(WeightedPrompt {
                prompt: p.get("prompt")?.as_str()?.to_string(),
                weight: number(p.get("weight")),
            })
        })
        .collect();
    creation.set_weighted_prompts(prompts);
    creation.offer_prompt(str_field(raw, "prompt"));
    creation.offer_negative_prompt(str_field(raw, "negativePrompt"));
    if creation.prompt.is_none() {
        creation.prompt = creation.title.clone();
    }
    if let Some(initial) = str_field(raw, "initialImage") {
        creation.set_source_image_url(initial);
    }

    if let Some(steps) = raw.get("iterations").filter(|v| truthy(Some(v))).and_then(steps_label) {
        creation.set_param(names::STEPS, steps);
    }
    if truthy(raw.get("width")) && truthy(raw.get("height")) {
        if let Some(size) = super::size_text(raw.get("width"), raw.get("height")) {
            creation.set_param(names::SIZE, size);
        }
    }
    let seed = seed_value(raw.get("seed"))
        .or_else(|| seed_from_variations(array_field(raw, "variations")))
        .or_else(|| seed_from_variations(array_field(raw, "variationsV1")));
    if let Some(seed) = seed {
        creation.params.set_json(names::SEED, &seed);
    }
    creation.set_param(names::SERVICE, PROVIDER);
    match (str_field(raw, "model"), str_field(raw, "modelName")) {
        (Some(model), Some(name)) if model.eq_ignore_ascii_case(name) => creation.set_param(names::MODEL, name),
        (Some(model), Some(name)) => creation.set_param(names::MODEL, format!("{} ({})", name, model)),
        (Some(model), None) => creation.set_param(names::MODEL, model),
        (None, Some(name)) => creation.set_param(names::MODEL, name),
        (None, None) => {}
    }

    if !ctx.options.upscales_only {
        add_variations(&mut creation, raw)?;
    }
    add_upscales(&mut creation, raw);
    Ok(creation)
}

fn add_variations(creation: &mut Creation, raw: &Value) -> Result<(), AdapterError> {
    let v2 = is_v2(raw);
    let mut last_number: Option<u32> = None;

    for (idx, img) in array_field(raw, "variations").iter().enumerate() {
        let url = str_field(img, "url");
        let compressed = str_field(img, "compressed");
        let compressed_ext = compressed
            .and_then(url_extension)
            .unwrap_or_else(|| ".webp".to_string());
        let mut image = match (url, compressed) {
            (Some(url), alt) => {
                let image = ImageVariant::new(url, url_extension(url).unwrap_or_else(|| ".png".to_string()));
                match alt {
                    Some(alt) => image.with_alt(alt, compressed_ext.clone()),
                    None => image,
                }
            }
            (None, Some(compressed)) => ImageVariant::new(compressed, compressed_ext.clone()),
            (None, None) => continue,
        };
        image.source_pointer = Some(format!("/variations/{}", idx));

        let var_id = scalar_string(img.get("id")).unwrap_or_default();
        let parts: Vec<&str> = var_id.split('-').collect();
        let kind = str_field(img, "type");

        if !v2 || parts.first() == Some(&"og") || kind == Some("original") {
            image.reel_name = parts.get(if v2 { 1 } else { 0 }).map(|s| s.to_string());
            let mut num_part = if v2 { 2 } else { 1 };
            let parsed = |i: usize| parts.get(i).and_then(|p| p.parse::<u32>().ok());
            if parsed(num_part).is_none() && parts.len() > num_part + 1 {
                num_part = parts.len() - 1;
            }
            let number = parsed(num_part).ok_or_else(|| {
                AdapterError::invalid(PROVIDER, "variations.id", format!("no image number in `{}`", var_id))
            })?;
            image.image_number = Some(number);
            last_number = Some(number);
            if let Some(name) = compressed.and_then(url_file_name) {
                image.unique_id = Some(file_stem(&name).replace('-', ""));
            }
        } else if kind.is_some() && str_field(img, "status") == Some("completed") {
            image.reel_name = parts.get(1).map(|s| s.to_string());
            match kind {
                Some("upscale") => {
                    if let Some(n) = last_number.take() {
                        image.image_number = Some(n);
                    }
                    if let Some(factor) = scalar_string(img.pointer("/upscaleSettings/factor")) {
                        image.fn_scale = Some(factor);
                    }
                }
                Some("enhance") => {
                    if let Some(init) = str_field(img, "initImage") {
                        image.image_number = enhanced_image_number(init, &creation.id);
                    }
                    let level = scalar_string(img.pointer("/enhanceSettings/level")).unwrap_or_default();
                    let style = scalar_string(img.pointer("/enhanceSettings/style")).unwrap_or_default();
                    image.fn_scale = Some(format!("enh{}-{}", level, style));
                }
                _ => warn!(creation = %creation.id, variation = %var_id, "Unrecognized variation type"),
            }
            if image.image_number.is_none() {
                image.image_number = parts.get(2).and_then(|p| p.parse().ok());
            }
            if let (Some(name), Some(num)) = (url.and_then(url_file_name), parts.get(2)) {
                let base = name.strip_suffix(".png").unwrap_or(&name);
                if let Some(stem) = base.strip_suffix(&format!("_{}", num)) {
                    image.unique_id = Some(stem.replace('-', ""));
                }
            }
        }
        creation.images.push(image);
    }
    Ok(())
}

/// Number of the variation an enhancement was made from (`enhance_<id>-<n>_...`)
fn enhanced_image_number(init_image: &str, creation_id: &str) -> Option<u32> {
    let marker = format!("enhance_{}-", creation_id);
    let start = init_image.find(&marker)? + marker.len();
    let rest = &init_image[start..];
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() || !rest[digits.len()..].starts_with('_') {
        return None;
    }
    digits.parse().ok()
}

fn add_upscales(creation: &mut Creation, raw: &Value) {
    for (idx, upscale) in array_field(raw, "upscales").iter().enumerate() {
        if str_field(upscale, "status") != Some("Complete") {
            continue;
        }
        let Some(url) = str_field(upscale, "url") else {
            continue;
        };
        let mut image = ImageVariant::new(url, url_extension(url).unwrap_or_else(|| ".png".to_string()));
        image.source_pointer = Some(format!("/upscales/{}", idx));
        let variation = str_field(upscale, "variationId").unwrap_or_default();
        let mut parts = variation.split('-');
        image.reel_name = parts.next().filter(|p| !p.is_empty()).map(str::to_string);
        image.image_number = parts.next().and_then(|p| p.parse().ok());
        image.fn_scale = scalar_string(upscale.get("factor"));
        image.unique_id = url_file_name(url).map(|name| file_stem(&name).replace('-', ""));
        image.created_at = time_value(upscale.get("createdAt")).or_else(|| time_value(upscale.get("updatedAt")));
        creation.images.push(image);
    }
}
