//! Dezgo account jobs
//!
//! The job record only points at stored input and output files. Generation
//! settings come from a second request for the input file, whose answer is
//! folded back into the payload as `input` so the sidecar keeps it and
//! re-normalizing does not fetch again.

use super::{cached_lookup, number, size_text, str_field, time_value, truthy, AdapterContext, Provider};
use crate::error::AdapterError;
use crate::model::{Creation, ImageVariant};
use crate::params::{names, Params};
use serde_json::{json, Map, Value};
use tracing::debug;

const PROVIDER: &str = "Dezgo";

pub const FILE_URL: &str = "https://api.dezgo.com/account/file?id=";

pub const CIVITAI_BY_HASH_URL: &str = "https://civitai.com/api/v1/model-versions/by-hash/";

pub fn is_match(raw: &Value) -> bool {
    truthy(raw.get("_id"))
        && truthy(raw.get("meta"))
        && str_field(raw, "type") == Some("job")
        && raw.get("meta").map(|m| truthy(m.get("file.output"))).unwrap_or(false)
}

/// Flatten the `{name: {Value: ...}}` file listing into `{name: value}`
fn flatten_input(listing: &Value) -> Map<String, Value> {
    listing
        .as_object()
        .map(|entries| {
            entries
                .iter()
                .map(|(k, v)| (k.clone(), v.get("Value").cloned().unwrap_or(Value::Null)))
                .collect()
        })
        .unwrap_or_default()
}

/// Keep the fields of a Civitai model-version answer worth caching
pub fn summarize_model_version(info: &Value) -> Option<Value> {
    let model = info.get("model")?;
    let full_name = format!(
        "{} {}",
        str_field(model, "name").unwrap_or_default(),
        str_field(info, "name").unwrap_or_default()
    );
    Some(json!({
        "name": full_name.trim(),
        "type": model.get("type"),
        "baseModel": info.get("baseModel"),
        "modelId": info.get("modelId"),
        "modelVersionId": info.get("id"),
    }))
}

pub async fn normalize(raw: &mut Value, ctx: &AdapterContext) -> Result<Creation, AdapterError> {
    let meta = raw.get("meta").cloned().unwrap_or(Value::Null);
    let input_loc = str_field(&meta, "file.input").ok_or_else(|| AdapterError::missing(PROVIDER, "meta.file.input"))?;
    let output_loc = str_field(&meta, "file.output").ok_or_else(|| AdapterError::missing(PROVIDER, "meta.file.output"))?;
    let id = input_loc.split('/').next().unwrap_or_default();
    if id.is_empty() {
        return Err(AdapterError::invalid(PROVIDER, "meta.file.input", "empty job id"));
    }

    let mut creation = Creation::new(id, PROVIDER);
    creation.order_by_id = false;
    creation.created_at = time_value(raw.get("time"));
    creation.job_type = str_field(&meta, "job.function").map(str::to_string);
    let is_upscale = creation.job_type.as_deref() == Some("upscale");
    let headers = ctx.headers_for(Provider::Dezgo);

    let mut input = match raw.get("input").and_then(Value::as_object) {
        Some(existing) => existing.clone(),
        None => {
            let url = format!("{}{}", FILE_URL, input_loc);
            debug!(creation = %creation.id, "Fetching Dezgo job input");
            flatten_input(&ctx.fetch.get_json(&url, &headers).await?)
        }
    };

    if is_upscale {
        if let Some(Value::String(data)) = input.remove("image") {
            creation.set_source_image_base64(data);
        }
    } else {
        let prompt = str_field_map(&input, "prompt");
        creation.prompt = if creation.job_type.as_deref() == Some("text-inpainting") {
            Some(format!(
                "{} | Inpainting mask: {}",
                prompt.unwrap_or_default(),
                str_field_map(&input, "mask_prompt").unwrap_or_default()
            ))
        } else {
            prompt.map(str::to_string)
        };
        creation.negative_prompt = str_field_map(&input, "negative_prompt").map(str::to_string);
        if let Some(Value::String(data)) = input.remove("init_image") {
            creation.set_source_image_base64(data);
            if truthy(input.get("strength")) {
                creation.params.set_json(names::DENOISING_STRENGTH, &input["strength"]);
            }
            if truthy(input.get("image_guidance")) {
                creation.params.set_json("Image guidance", &input["image_guidance"]);
            }
        }
        if let Some(steps) = input.get("steps") {
            creation.params.set_json(names::STEPS, steps);
        }
        if let Some(sampler) = str_field_map(&input, "sampler") {
            creation.set_param(names::SAMPLER, sampler);
        }
        if truthy(input.get("guidance")) {
            creation.params.set_json(names::CFG_SCALE, &input["guidance"]);
        }
        if truthy(input.get("seed")) {
            creation.params.set_json(names::SEED, &input["seed"]);
        }
        if let Some(size) = size_text(input.get("width"), input.get("height")) {
            creation.set_param(names::SIZE, size);
        }
        match str_field_map(&input, "model") {
            Some(model) => creation.set_param(names::MODEL, model),
            None if creation.job_type.as_deref() == Some("edit-image") => {
                creation.set_param(names::MODEL, "InstructPix2Pix")
            }
            None => {}
        }
        if let Some(refiner) = input.get("refiner") {
            creation.params.set_json("Refiner", refiner);
        }
        if number(input.get("upscale")).map(|u| u > 1.0).unwrap_or(false) {
            creation.params.set_json(names::HIRES_UPSCALE, &input["upscale"]);
        }

        let loras: Vec<String> = ["lora1", "lora2"]
            .iter()
            .map_while(|key| str_field_map(&input, key).map(str::to_string))
            .collect();
        if !loras.is_empty() {
            let mut lora_hashes = Params::new();
            for sha in loras {
                let url = format!("{}{}", CIVITAI_BY_HASH_URL, sha);
                let info = cached_lookup(
                    &ctx.civitai_models,
                    ctx.fetch.as_ref(),
                    &sha,
                    &url,
                    &Default::default(),
                    summarize_model_version,
                )
                .await?;
                let name = info
                    .as_ref()
                    .and_then(|i| str_field(i, "name"))
                    .unwrap_or("unknown")
                    .to_string();
                lora_hashes.set(name, sha);
            }
            creation.set_param(names::LORA_HASHES, lora_hashes);
        }
    }
    creation.set_param(names::SERVICE, PROVIDER);

    let count = number(meta.get("file.output.count")).map(|c| c as u32).unwrap_or(0);
    let format = str_field_map(&input, "format").unwrap_or("png");
    let seed = input.get("seed").and_then(Value::as_u64).filter(|s| *s > 0);
    for i in 0..count {
        let url = format!("{}{}&offset={}", FILE_URL, output_loc, i);
        let mut image = ImageVariant::new(url, format).with_headers(headers.clone());
        image.created_at = creation.created_at;
        image.reel_name = Some(creation.id.clone());
        image.unique_id = Some(format!("{}/{}", creation.id, i));
        if count > 1 {
            image.image_number = Some(i + 1);
        }
        if is_upscale {
            image.fn_scale = Some("2".to_string());
        }
        image.seed_override = seed.map(|s| (s + i as u64).to_string());
        creation.images.push(image);
    }

    if let Some(obj) = raw.as_object_mut() {
        obj.insert("input".to_string(), Value::Object(input));
    }
    Ok(creation)
}

fn str_field_map<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}
