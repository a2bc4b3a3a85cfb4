//! Novita task results (`txt2img` task progress plus the request that produced it)

use super::{array_field, float_millis, number, scalar_string, size_text, str_field, truthy};
use crate::error::AdapterError;
use crate::model::filename::{file_stem, url_file_name};
use crate::model::{Creation, ImageVariant};
use crate::params::names;
use serde_json::Value;
use tracing::warn;

const PROVIDER: &str = "Novita";

pub fn is_match(raw: &Value) -> bool {
    truthy(raw.get("images")) && str_field(raw, "source") == Some(PROVIDER)
}

/// The request as the service echoed it in `extra.debug_info.request_info`
fn debug_request(raw: &Value) -> Option<Value> {
    let text = raw.pointer("/extra/debug_info/request_info")?.as_str()?;
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Unreadable Novita request_info");
            None
        }
    }
}

pub fn normalize(raw: &mut Value) -> Result<Creation, AdapterError> {
    let raw: &Value = raw;
    let id = scalar_string(raw.pointer("/task/task_id")).ok_or_else(|| AdapterError::missing(PROVIDER, "task.task_id"))?;
    let mut creation = Creation::new(id, PROVIDER);
    creation.order_by_id = false;
    creation.created_at = number(raw.pointer("/extra/debug_info/complete_time_ms")).and_then(float_millis);

    let debug = debug_request(raw);
    if let Some(prompts) = debug.as_ref().and_then(|d| d.get("prompts")).and_then(Value::as_array) {
        if prompts.len() > 1 {
            warn!(creation = %creation.id, count = prompts.len(), "Several prompts reported for one request");
        }
    }
    let seeds: Vec<Value> = debug
        .as_ref()
        .map(|d| array_field(d, "seeds").to_vec())
        .unwrap_or_default();

    let request = raw.get("request").cloned().unwrap_or(Value::Null);
    creation.prompt = str_field(&request, "prompt").map(str::to_string);
    creation.negative_prompt = str_field(&request, "negative_prompt").map(str::to_string);
    if let Some(steps) = request.get("steps") {
        creation.params.set_json(names::STEPS, steps);
    }
    if let Some(sampler) = str_field(&request, "sampler_name") {
        creation.set_param(names::SAMPLER, sampler);
    }
    if truthy(request.get("guidance_scale")) {
        creation.params.set_json(names::CFG_SCALE, &request["guidance_scale"]);
    }
    let seed = [raw.pointer("/extra/seed"), request.get("seed"), seeds.first()]
        .into_iter()
        .flatten()
        .find(|s| truthy(Some(s)));
    if let Some(seed) = seed {
        creation.params.set_json(names::SEED, seed);
    }
    if let Some(size) = size_text(request.get("width"), request.get("height")) {
        creation.set_param(names::SIZE, size);
    }
    if let Some(model) = str_field(&request, "model_name") {
        creation.set_param(names::MODEL, model);
    }
    if truthy(request.get("refiner")) {
        creation.params.set_json("Refiner", &request["refiner"]);
    }
    if truthy(request.get("hires_fix")) {
        warn!(creation = %creation.id, "Hires fix settings are not recorded");
    }
    creation.set_param(names::SERVICE, PROVIDER);

    for (idx, img) in array_field(raw, "images").iter().enumerate() {
        let Some(url) = str_field(img, "image_url") else {
            continue;
        };
        let ext = str_field(img, "image_type").unwrap_or("png");
        let mut image = ImageVariant::new(url, ext);
        image.source_pointer = Some(format!("/images/{}", idx));
        image.reel_name = Some(creation.id.clone());
        image.image_number = Some(idx as u32 + 1);
        image.unique_id = url_file_name(url).map(|name| file_stem(&name));
        image.created_at = creation.created_at;
        image.seed_override = scalar_string(seeds.get(idx));
        creation.images.push(image);
    }
    if creation.images.is_empty() {
        return Err(AdapterError::missing(PROVIDER, "images"));
    }
    Ok(creation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "source": "Novita",
            "request": {
                "model_name": "beautypromix_v1.safetensors",
                "prompt": "Surreal tarot art",
                "negative_prompt": "",
                "sampler_name": "DPM++ 2M Karras",
                "steps": 20,
                "seed": -1,
                "width": 512,
                "height": 512,
                "guidance_scale": 7,
                "image_num": 2
            },
            "extra": {
                "seed": "1492899925",
                "debug_info": {
                    "request_info": "{\"seeds\":[1492899925,1492899926]}",
                    "complete_time_ms": "1729550416180"
                }
            },
            "task": {"task_id": "b7855daf-bffd-49a8-92a9-c6fdbbf55e7b"},
            "images": [
                {"image_url": "https://s3/prod/b78/9589f747.png?X-Amz-Expires=3600", "image_type": "png"},
                {"image_url": "https://s3/prod/b78/1234abcd.png?X-Amz-Expires=3600", "image_type": "png"}
            ]
        })
    }

    #[test]
    fn test_normalize_task() {
        let mut raw = payload();
        let creation = normalize(&mut raw).unwrap();

        assert_eq!(creation.id, "b7855daf-bffd-49a8-92a9-c6fdbbf55e7b");
        assert!(!creation.order_by_id);
        assert_eq!(creation.created_at.unwrap().timestamp(), 1_729_550_416);
        assert_eq!(creation.negative_prompt, None);
        assert_eq!(creation.params.get_str(names::SEED), Some("1492899925"));
        assert_eq!(creation.params.get_str(names::CFG_SCALE), Some("7"));
        assert_eq!(creation.params.get_str(names::SIZE), Some("512x512"));
        assert_eq!(creation.params.get_str(names::SERVICE), Some("Novita"));

        assert_eq!(creation.images.len(), 2);
        assert_eq!(creation.images[0].unique_id.as_deref(), Some("9589f747"));
        assert_eq!(creation.images[1].image_number, Some(2));
        assert_eq!(creation.images[1].seed_override.as_deref(), Some("1492899926"));
        assert_eq!(creation.images[0].ext, ".png");
    }

    #[test]
    fn test_missing_task_id() {
        let mut raw = payload();
        raw.as_object_mut().unwrap().remove("task");
        assert!(matches!(normalize(&mut raw), Err(AdapterError::MissingField { .. })));
    }
}
