//! happyaccidents.ai inferences

use super::{array_field, cached_lookup, number, scalar_string, seed_value, size_text, str_field, time_value, truthy, AdapterContext};
use crate::error::AdapterError;
use crate::model::filename::{file_extension, numeric_suffix};
use crate::model::{Creation, Headers, ImageVariant};
use crate::params::{names, Params, UNKNOWN_STEPS};
use serde_json::{json, Value};
use tracing::warn;

const PROVIDER: &str = "happyaccidents.ai";

pub const MODEL_INFO_URL: &str = "https://easel-fgiw.onrender.com/v1/models/metadata-items/";

pub const IMAGE_BASE_URL: &str = "https://ik.imagekit.io/hb42m9hh0/";

/// Headers the model metadata service expects from browser clients
fn lookup_headers() -> Headers {
    [
        ("referer", "https://www.happyaccidents.ai/"),
        ("origin", "https://www.happyaccidents.ai"),
        ("dnt", "1"),
        ("authority", "easel-fgiw.onrender.com"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn is_match(raw: &Value) -> bool {
    truthy(raw.get("inferenceId")) && truthy(raw.get("inferencePayload"))
}

/// Cached subset of a model metadata item
pub fn summarize_model(info: &Value) -> Option<Value> {
    if !info.is_object() {
        return None;
    }
    let active = info.get("activeVersion").filter(|v| v.is_object()).map(|v| {
        json!({
            "id": v.get("id"),
            "name": v.get("name"),
            "baseModel": v.get("baseModel"),
            "createdAt": v.get("createdAt"),
            "externalId": v.get("externalId"),
            "downloadUrl": v.get("downloadUrl"),
        })
    });
    Some(json!({
        "name": info.get("name"),
        "type": info.get("type"),
        "author": info.get("author"),
        "modelProvider": info.get("modelProvider"),
        "externalId": info.get("externalId"),
        "activeVersion": active,
        "modelCheckpointFilename": info.get("modelCheckpointFilename"),
        "createdAt": info.get("createdAt"),
        "tags": info.get("tags"),
        "trainedWords": info.get("trainedWords"),
    }))
}

async fn model_name(ctx: &AdapterContext, model_id: &str) -> Result<Option<String>, AdapterError> {
    let url = format!("{}{}", MODEL_INFO_URL, model_id);
    let info = cached_lookup(
        &ctx.happy_models,
        ctx.fetch.as_ref(),
        model_id,
        &url,
        &lookup_headers(),
        summarize_model,
    )
    .await?;
    Ok(info.as_ref().and_then(|i| str_field(i, "name")).map(str::to_string))
}

pub async fn normalize(raw: &mut Value, ctx: &AdapterContext) -> Result<Creation, AdapterError> {
    let raw: &Value = raw;
    let id = scalar_string(raw.get("inferenceId")).ok_or_else(|| AdapterError::missing(PROVIDER, "inferenceId"))?;
    let mut creation = Creation::new(id, PROVIDER);
    creation.order_by_id = false;
    let images = array_field(raw, "images");
    creation.created_at = images.first().and_then(|img| time_value(img.get("createdAt")));

    let inference = &raw["inferencePayload"];
    creation.prompt = str_field(inference, "prompt").map(str::to_string);
    creation.negative_prompt = str_field(inference, "negativePrompt").map(str::to_string);
    match inference.get("numInferenceSteps").filter(|s| truthy(Some(s))) {
        Some(steps) => creation.params.set_json(names::STEPS, steps),
        None => creation.set_param(names::STEPS, UNKNOWN_STEPS),
    }
    if let Some(size) = size_text(inference.get("outputWpx"), inference.get("outputHpx")) {
        creation.set_param(names::SIZE, size);
    }
    if let Some(seed) = seed_value(inference.get("seed")).filter(|s| truthy(Some(s))) {
        creation.params.set_json(names::SEED, &seed);
    }
    if let Some(model_id) = scalar_string(inference.get("modelId")) {
        match model_name(ctx, &model_id).await? {
            Some(name) => creation.set_param(names::MODEL, name),
            None => {
                warn!(creation = %creation.id, model_id = %model_id, "Unknown HappyAccidents model");
                creation.set_param("Model ID", model_id);
            }
        }
    }
    if let Some(sampler) = str_field(inference, "samplingMethod") {
        creation.set_param(names::SAMPLER, sampler);
    }
    if truthy(inference.get("guidanceScale")) {
        creation.params.set_json(names::CFG_SCALE, &inference["guidanceScale"]);
    }
    let loras = array_field(inference, "lora");
    if !loras.is_empty() {
        let mut lora_hashes = Params::new();
        for lora in loras {
            let Some(lora_id) = scalar_string(lora.get("id")) else {
                continue;
            };
            let name = model_name(ctx, &lora_id).await?.unwrap_or_else(|| "unknown".to_string());
            lora_hashes.set(name, lora_id);
        }
        creation.set_param(names::LORA_HASHES, lora_hashes);
    }
    if let Some(vae) = str_field(inference, "vae") {
        creation.set_param(names::VAE, vae);
    }
    if truthy(inference.get("clipSkip")) {
        creation.params.set_json(names::CLIP_SKIP, &inference["clipSkip"]);
    }
    if let Some(url) = str_field(inference, "imageUrl") {
        creation.set_source_image_url(url);
    }
    if number(inference.get("upscale")).map(|u| u > 1.0).unwrap_or(false) {
        creation.params.set_json(names::HIRES_UPSCALE, &inference["upscale"]);
    }
    creation.set_param(names::VERSION, PROVIDER);

    for (idx, img) in images.iter().enumerate() {
        let (Some(folder), Some(filename)) = (str_field(img, "folderPath"), str_field(img, "filename")) else {
            warn!(creation = %creation.id, index = idx, "HappyAccidents image without a storage path");
            continue;
        };
        let ext = file_extension(filename).unwrap_or_else(|| ".png".to_string());
        let mut image = ImageVariant::new(format!("{}{}/{}", IMAGE_BASE_URL, folder, filename), ext);
        image.source_pointer = Some(format!("/images/{}", idx));
        image.unique_id = scalar_string(img.get("id"));
        image.created_at = time_value(img.get("createdAt"));
        image.reel_name = scalar_string(img.get("inferenceJobId"));
        image.image_number = Some(numeric_suffix(filename).unwrap_or(1));
        creation.images.push(image);
    }
    Ok(creation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamValue;
    use crate::providers::test_support::{context, StaticFetch};

    fn payload() -> Value {
        json!({
            "inferenceId": "a1b2c3",
            "inferencePayload": {
                "prompt": "a garden",
                "negativePrompt": "weeds",
                "numInferenceSteps": 25,
                "outputWpx": 512,
                "outputHpx": 768,
                "seed": 42,
                "modelId": "m-1",
                "samplingMethod": "Euler a",
                "guidanceScale": 7.5,
                "lora": [{"id": "l-9", "weight": 0.8}],
                "upscale": 2
            },
            "images": [
                {"id": "img-1", "folderPath": "user/out", "filename": "a1b2c3_2.png",
                 "createdAt": "2023-11-08T05:22:53.569Z", "inferenceJobId": "job-7"}
            ]
        })
    }

    #[tokio::test]
    async fn test_normalize_inference() {
        let fetch = StaticFetch::new().with_json(
            &format!("{}m-1", MODEL_INFO_URL),
            json!({"name": "Dreamshaper", "type": "checkpoint", "unused": true}),
        );
        let calls = fetch.calls.clone();
        let ctx = context(fetch);
        let mut raw = payload();

        let creation = normalize(&mut raw, &ctx).await.unwrap();
        assert_eq!(creation.created_by, "happyaccidents.ai");
        assert_eq!(creation.params.get_str(names::MODEL), Some("Dreamshaper"));
        assert_eq!(creation.params.get_str(names::SIZE), Some("512x768"));
        assert_eq!(creation.params.get_str(names::HIRES_UPSCALE), Some("2"));
        assert_eq!(creation.params.get_str(names::VERSION), Some("happyaccidents.ai"));
        match creation.params.get(names::LORA_HASHES) {
            Some(ParamValue::Nested(loras)) => assert_eq!(loras.get_str("unknown"), Some("l-9")),
            other => panic!("unexpected lora hashes {:?}", other),
        }

        let image = &creation.images[0];
        assert_eq!(image.url, "https://ik.imagekit.io/hb42m9hh0/user/out/a1b2c3_2.png");
        assert_eq!(image.image_number, Some(2));
        assert_eq!(image.reel_name.as_deref(), Some("job-7"));
        assert_eq!(image.unique_id.as_deref(), Some("img-1"));

        // Model info is cached; only the unknown lora is retried
        normalize(&mut raw, &ctx).await.unwrap();
        let model_calls = calls.lock().unwrap().iter().filter(|u| u.ends_with("/m-1")).count();
        assert_eq!(model_calls, 1);
        let cached = ctx.happy_models.lock().await.get("m-1").unwrap();
        assert!(cached.get("unused").is_none());
    }

    #[tokio::test]
    async fn test_unknown_model_id() {
        let ctx = context(StaticFetch::new());
        let mut raw = payload();
        raw["inferencePayload"].as_object_mut().unwrap().remove("numInferenceSteps");
        let creation = normalize(&mut raw, &ctx).await.unwrap();
        assert_eq!(creation.params.get_str("Model ID"), Some("m-1"));
        assert_eq!(creation.params.get_str(names::STEPS), Some("unknown"));
    }
}
