//! NightCafe jobs (creation page props, job documents and uploads)

use super::{array_field, number, scalar_string, seed_value, size_text, str_field, time_value, truthy};
use crate::error::AdapterError;
use crate::model::filename::{file_extension, file_stem};
use crate::model::{Creation, ImageVariant, WeightedPrompt};
use crate::params::{names, UNKNOWN_STEPS};
use serde_json::Value;
use tracing::warn;

const PROVIDER: &str = "NightCafe";

/// Storage bucket that image paths are relative to
pub const BASE_IMAGE_URL: &str = "https://storage.googleapis.com/nightcafe-creator.appspot.com";

/// Public creation page prefix
pub const CREATION_URL: &str = "https://creator.nightcafe.studio/creation/";

/// Separator NightCafe uses between weighted prompt fragments
const PROMPT_BREAK: &str = "\nBREAK\n";

const MAX_UPSCALE_CHAIN: u8 = 8;

pub fn is_match(raw: &Value) -> bool {
    let page = raw.get("pageProps");
    let from_page = page.map(|p| truthy(p.get("initialJob")) && truthy(p.get("cid"))).unwrap_or(false);
    from_page
        || (truthy(raw.get("id")) && truthy(raw.get("runtime")) && truthy(raw.get("algorithm")) && truthy(raw.get("status")))
        || (truthy(raw.get("id")) && truthy(raw.get("status")) && str_field(raw, "jobType") == Some("upload"))
}

/// Locate the job object and its JSON pointer, plus the page-level creation id
fn locate_job(raw: &Value) -> (&Value, String, Option<String>) {
    let mut job = raw;
    let mut pointer = String::new();
    if truthy(raw.get("pageProps")) {
        job = &raw["pageProps"];
        pointer.push_str("/pageProps");
    }
    let cid = scalar_string(job.get("cid"));
    if truthy(job.get("initialJob")) {
        job = &job["initialJob"];
        pointer.push_str("/initialJob");
    }
    (job, pointer, cid)
}

/// Join prompt fragments of one sign, strongest first, as `(prompt:weight)` when weighted
pub fn aggregate_prompts(prompts: &[WeightedPrompt], negative: bool) -> String {
    let mut subset: Vec<(String, f64)> = prompts
        .iter()
        .filter(|p| match p.weight {
            Some(w) if negative => w < 0.0,
            Some(w) => w == 0.0 || w > 0.0,
            None => !negative,
        })
        .map(|p| {
            let weight = p.weight.filter(|w| *w != 0.0).map(f64::abs).unwrap_or(1.0);
            (p.prompt.clone(), weight)
        })
        .collect();
    subset.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    subset
        .iter()
        .map(|(prompt, weight)| {
            if *weight != 1.0 {
                format!("({}:{})", prompt, weight)
            } else {
                prompt.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(PROMPT_BREAK)
}

fn image_size(job: &Value) -> Option<String> {
    let progress = array_field(job, "progressImages")
        .iter()
        .find(|img| !truthy(img.get("isGrid")));
    match progress {
        Some(img) => size_text(img.get("width"), img.get("height")),
        None => size_text(job.get("outputWidth"), job.get("outputHeight")),
    }
}

fn model_for_algorithm(job: &Value) -> Option<&str> {
    match str_field(job, "algorithm") {
        Some("diffusion2") => str_field(job, "sdEngine"),
        Some("flux") => str_field(job, "fluxModel"),
        Some("dalle3") => str_field(job, "dalle3Style"),
        Some("imagen") => str_field(job, "imagenModel"),
        _ => None,
    }
}

pub fn normalize(raw: &mut Value) -> Result<Creation, AdapterError> {
    let raw: &Value = raw;
    let (job, pointer, page_cid) = locate_job(raw);
    let id = match (scalar_string(job.get("id")), page_cid) {
        (Some(id), Some(cid)) => {
            if id != cid {
                warn!(id = %id, cid = %cid, "NightCafe job id differs from page id");
            }
            id
        }
        (Some(id), None) | (None, Some(id)) => id,
        (None, None) => return Err(AdapterError::missing(PROVIDER, "id")),
    };

    let mut creation = Creation::new(id, PROVIDER);
    creation.order_by_id = false;
    creation.created_at = time_value(job.get("created"));
    creation.published_at = time_value(job.get("postedDate"));
    let updated_at = time_value(job.get("hotnessLastUpdatedAt"));
    creation.title = str_field(job, "title")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    creation.url = Some(format!("{}{}", CREATION_URL, creation.id));

    if job.get("showPrompts") != Some(&Value::Bool(false)) {
        let weights = array_field(job, "promptWeights");
        creation.prompts = array_field(job, "prompts")
            .iter()
            .enumerate()
            .filter_map(|(idx, p)| {
                Some(WeightedPrompt {
                    prompt: p.as_str()?.to_string(),
                    weight: number(weights.get(idx)),
                })
            })
            .collect();
        let positive = aggregate_prompts(&creation.prompts, false);
        let negative = aggregate_prompts(&creation.prompts, true);
        creation.prompt = Some(positive).filter(|p| !p.is_empty());
        creation.negative_prompt = Some(negative)
            .filter(|n| !n.is_empty())
            .or_else(|| str_field(job, "negativePrompt").map(str::to_string));
    }
    if creation.prompt.is_none() {
        creation.prompt = creation.title.clone();
    }
    if !truthy(job.get("evolvedFrom")) && job.get("showStartImage") != Some(&Value::Bool(false)) {
        if let Some(path) = job.get("startImage").and_then(|s| str_field(s, "path")) {
            if path != "hidden" {
                creation.set_source_image_url(format!("{}{}", BASE_IMAGE_URL, path));
            }
        }
    }

    match job.get("runtime").filter(|r| truthy(Some(r))) {
        Some(runtime) => creation.params.set_json(names::STEPS, runtime),
        None => creation.set_param(names::STEPS, UNKNOWN_STEPS),
    }
    if let Some(size) = image_size(job) {
        creation.set_param(names::SIZE, size);
    }
    let seed = match job.get("seed") {
        Some(Value::Array(seeds)) => seed_value(seeds.first()),
        other => seed_value(other),
    };
    if let Some(seed) = seed {
        creation.params.set_json(names::SEED, &seed);
    }
    creation.set_param(names::SERVICE, PROVIDER);
    if let Some(algorithm) = str_field(job, "algorithm") {
        creation.set_param("Algorithm", algorithm);
    }
    match model_for_algorithm(job) {
        Some(model) => creation.set_param(names::MODEL, model),
        None if str_field(job, "jobType") == Some("upload") => {
            if let Some(model) = str_field(job, "model") {
                creation.set_param(names::MODEL, model);
            }
        }
        None => {
            if !matches!(str_field(job, "algorithm"), Some("diffusion2" | "flux" | "dalle3" | "imagen")) {
                warn!(
                    creation = %creation.id,
                    algorithm = str_field(job, "algorithm").unwrap_or_default(),
                    "Unrecognized NightCafe algorithm"
                );
            }
        }
    }

    let image_time = creation.created_at.or(updated_at);
    let progress = array_field(job, "progressImages");
    if !progress.is_empty() {
        for (idx, img) in progress.iter().enumerate() {
            let Some(output) = str_field(img, "output") else {
                continue;
            };
            let ext = file_extension(output).unwrap_or_else(|| ".jpg".to_string());
            let mut image = ImageVariant::new(format!("{}{}", BASE_IMAGE_URL, output), ext);
            image.source_pointer = Some(format!("{}/progressImages/{}", pointer, idx));
            image.reel_name = Some(creation.id.clone());
            let info = image_info(img, Some(idx), progress, 0);
            image.image_number = Some(info.image_num.parse().unwrap_or(0));
            image.fn_scale = info.fn_scale;
            image.unique_id = Some(file_stem(output).replace('-', ""));
            image.created_at = image_time;
            if truthy(img.get("seed")) {
                image.seed_override = scalar_string(img.get("seed"));
            }
            creation.images.push(image);
        }
    } else if let Some(output) = str_field(job, "output") {
        let ext = file_extension(output).unwrap_or_else(|| ".jpg".to_string());
        let mut image = ImageVariant::new(format!("{}{}", BASE_IMAGE_URL, output), ext);
        image.source_pointer = Some(pointer.clone());
        image.reel_name = Some(creation.id.clone());
        image.image_number = Some(1);
        image.unique_id = Some(file_stem(output).replace('-', ""));
        image.created_at = image_time;
        image.seed_override = scalar_string(job.get("seed"));
        creation.images.push(image);
    }
    Ok(creation)
}

struct ImageInfo {
    image_num: String,
    fn_scale: Option<String>,
}

/// Image number and scale suffix, following upscales back to their original
fn image_info(img: &Value, index: Option<usize>, all: &[Value], depth: u8) -> ImageInfo {
    let mut extras: Vec<String> = Vec::new();
    let mut image_num: Option<String> = None;

    let upscale_original = img
        .get("upscaleOriginal")
        .filter(|v| truthy(Some(v)))
        .or_else(|| {
            (str_field(img, "iteration") == Some("upscale"))
                .then(|| img.get("inputProgressImage"))
                .flatten()
                .filter(|v| truthy(Some(v)))
        });
    if let (Some(original), true) = (upscale_original, depth < MAX_UPSCALE_CHAIN) {
        let output = original.get("output");
        let orig_index = all.iter().position(|i| output.is_some() && i.get("output") == output);
        let orig = orig_index.map(|i| &all[i]).unwrap_or(original);
        let orig_info = image_info(orig, orig_index, all, depth + 1);
        image_num = Some(orig_info.image_num).filter(|n| !n.is_empty()).or_else(|| Some("n".to_string()));
        if let Some(scale) = orig_info.fn_scale {
            extras.push(scale);
        }
    }

    let output = str_field(img, "output").unwrap_or_default();
    let ids = parse_output_name(&file_stem(output));
    let image_num = image_num.unwrap_or_else(|| {
        ids.num
            .clone()
            .unwrap_or_else(|| index.map(|i| i + 1).unwrap_or(0).to_string())
    });
    if let Some(adjustment) = ids.adjustment {
        extras.push(adjustment);
    }
    if let Some(adj_id) = ids.adj_id {
        extras.push(adj_id);
    }
    ImageInfo {
        image_num,
        fn_scale: Some(extras.join("-")).filter(|s| !s.is_empty()),
    }
}

/// Pieces of a NightCafe output file name
#[derive(Debug, Default, PartialEq)]
struct OutputName {
    id: Option<String>,
    num: Option<String>,
    base_id: Option<String>,
    adjustment: Option<String>,
    adj_id: Option<String>,
}

/// Split an output file stem
///
/// - `<id>--<num>--<base>[_<adjustment>]`: numbered gallery item or its upscale
/// - `<name>_<adjustment>`: adjustment of an upload or shared image
/// - `<id>-<base>` or `<id>-<adjId>-<adjustment>`
fn parse_output_name(stem: &str) -> OutputName {
    let mut out = OutputName::default();
    let parts: Vec<&str> = stem.split("--").take(3).collect();
    if parts.len() > 1 {
        out.id = Some(parts[0].to_string());
        out.num = Some(parts[1].to_string());
        if let Some(rest) = parts.get(2).filter(|r| !r.is_empty()) {
            match rest.find('_') {
                Some(p) => {
                    out.base_id = Some(rest[..p].to_string());
                    out.adjustment = Some(rest[p + 1..].to_string());
                }
                None => out.base_id = Some(rest.to_string()),
            }
        }
        return out;
    }
    let parts: Vec<&str> = stem.split('_').take(2).collect();
    if parts.len() > 1 {
        let inner = parse_output_name(parts[0]);
        out.id = inner.id;
        out.base_id = inner.base_id;
        out.adj_id = inner.adj_id;
        out.adjustment = Some(match inner.adjustment {
            Some(adj) => format!("{}-{}", adj, parts[1]),
            None => parts[1].to_string(),
        });
        return out;
    }
    let parts: Vec<&str> = stem.split('-').take(3).collect();
    if parts.len() > 1 {
        out.id = Some(parts[0].to_string());
        if parts.len() == 2 {
            out.base_id = Some(parts[1].to_string());
        } else {
            out.adj_id = Some(parts[1].to_string());
            out.adjustment = Some(parts[2].to_string());
        }
    }
    out
}

/// Username of the account a job document belongs to
pub fn owner_username(doc: &Value) -> Option<&str> {
    doc.pointer("/userInfo/username").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> Value {
        json!({
            "id": "gIjPNOOkjzLU4D8ITIJb",
            "status": "done",
            "runtime": "short",
            "algorithm": "diffusion2",
            "sdEngine": "SDXL 1.0",
            "created": 1_699_420_973_569i64,
            "title": "  Fox in snow ",
            "prompts": ["a red fox", "snow", "blurry"],
            "promptWeights": [1, 0.5, -1],
            "seed": [1234],
            "progressImages": [
                {"output": "/jobs/gIjPNOOkjzLU4D8ITIJb--1--abcde.jpg", "width": 768, "height": 512},
                {"output": "/jobs/gIjPNOOkjzLU4D8ITIJb--2--fghij.jpg", "width": 768, "height": 512, "seed": 99},
                {"output": "/jobs/gIjPNOOkjzLU4D8ITIJb--2--fghij_2x-clty-upscale-stb4e.jpg",
                 "iteration": "upscale",
                 "inputProgressImage": {"output": "/jobs/gIjPNOOkjzLU4D8ITIJb--2--fghij.jpg"}}
            ]
        })
    }

    #[test]
    fn test_is_match_variants() {
        assert!(is_match(&job()));
        assert!(is_match(&json!({"pageProps": {"initialJob": {"id": "x"}, "cid": "x"}})));
        assert!(is_match(&json!({"id": "u", "status": "done", "jobType": "upload"})));
        assert!(!is_match(&json!({"id": "u", "status": "done"})));
    }

    #[test]
    fn test_normalize_job() {
        let mut raw = job();
        let creation = normalize(&mut raw).unwrap();

        assert_eq!(creation.id, "gIjPNOOkjzLU4D8ITIJb");
        assert_eq!(creation.title.as_deref(), Some("Fox in snow"));
        assert_eq!(creation.prompt.as_deref(), Some("a red fox\nBREAK\n(snow:0.5)"));
        assert_eq!(creation.negative_prompt.as_deref(), Some("blurry"));
        assert_eq!(creation.params.get_str(names::STEPS), Some("short"));
        assert_eq!(creation.params.get_str(names::SIZE), Some("768x512"));
        assert_eq!(creation.params.get_str(names::SEED), Some("1234"));
        assert_eq!(creation.params.get_str(names::MODEL), Some("SDXL 1.0"));
        assert_eq!(creation.url.as_deref(), Some("https://creator.nightcafe.studio/creation/gIjPNOOkjzLU4D8ITIJb"));

        let images = &creation.images;
        assert_eq!(images.len(), 3);
        assert_eq!(images[0].image_number, Some(1));
        assert_eq!(images[1].seed_override.as_deref(), Some("99"));
        assert_eq!(images[2].image_number, Some(2));
        assert_eq!(images[2].fn_scale.as_deref(), Some("2x-clty-upscale-stb4e"));
        assert_eq!(images[2].source_pointer.as_deref(), Some("/progressImages/2"));
        assert!(images[0].url.starts_with(BASE_IMAGE_URL));
    }

    #[test]
    fn test_page_props_and_single_output() {
        let mut raw = json!({
            "pageProps": {
                "cid": "abc",
                "initialJob": {
                    "id": "abc",
                    "status": "done",
                    "showPrompts": false,
                    "title": "Hidden prompt",
                    "output": "/jobs/abc-XyZ12.png",
                    "seed": 5,
                    "startImage": {"path": "hidden"}
                }
            }
        });
        let creation = normalize(&mut raw).unwrap();
        assert_eq!(creation.prompt.as_deref(), Some("Hidden prompt"));
        assert_eq!(creation.params.get_str(names::STEPS), Some("unknown"));
        assert!(creation.source_image.is_none());
        assert_eq!(creation.images.len(), 1);
        assert_eq!(creation.images[0].ext, ".png");
        assert_eq!(creation.images[0].unique_id.as_deref(), Some("abcXyZ12"));
        assert_eq!(creation.images[0].source_pointer.as_deref(), Some("/pageProps/initialJob"));
    }

    #[test]
    fn test_parse_output_names() {
        let n = parse_output_name("7c4Yn5HiXBxcHktUES85--1--6l2s2_2x-real-esrgan-x4-plus_1x-clty-upscale-ijib2");
        assert_eq!(n.num.as_deref(), Some("1"));
        assert_eq!(n.base_id.as_deref(), Some("6l2s2"));
        assert_eq!(n.adjustment.as_deref(), Some("2x-real-esrgan-x4-plus_1x-clty-upscale-ijib2"));

        let n = parse_output_name("ZRBYrAmrU5NCHwQrdlm1-PdBpS_4x-real-esrgan-x4-plus");
        assert_eq!(n.id.as_deref(), Some("ZRBYrAmrU5NCHwQrdlm1"));
        assert_eq!(n.base_id.as_deref(), Some("PdBpS"));
        assert_eq!(n.adjustment.as_deref(), Some("4x-real-esrgan-x4-plus"));

        let n = parse_output_name("YEU9oqRaRA1XS5Eez9ag-io3i6-adjusted");
        assert_eq!(n.adj_id.as_deref(), Some("io3i6"));
        assert_eq!(n.adjustment.as_deref(), Some("adjusted"));

        assert_eq!(parse_output_name("plain"), OutputName::default());
    }

    #[test]
    fn test_aggregate_unweighted_prompts() {
        let prompts = vec![WeightedPrompt { prompt: "castle".to_string(), weight: None }];
        assert_eq!(aggregate_prompts(&prompts, false), "castle");
        assert_eq!(aggregate_prompts(&prompts, true), "");
    }
}
