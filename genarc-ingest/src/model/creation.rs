//! The canonical creation record

use super::filename::{
    escape_file_name, file_extension, label_fragment, parse_file_name, scale_segment, NameKey,
    NameParts,
};
use super::image::{ImageVariant, LocalImage};
use super::{insert_date_tags, tags, TagMap};
use crate::params::{embedded, names, Embedded, ParamValue, Params};
use chrono::{DateTime, Utc};
use genarc_common::time::time_code;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Suffix of the JSON sidecar written next to each creation's images
pub const SIDECAR_SUFFIX: &str = ".metadata.json";

/// Infix of a captured reference image (`<prefix>.sourceImage.png`)
pub const SOURCE_IMAGE_INFIX: &str = ".sourceImage";

const STARRYAI: &str = "StarryAI";

/// The single reference (initial) image a creation was generated from
#[derive(Debug, Clone, PartialEq)]
pub enum SourceImage {
    Url(String),
    Base64(String),
}

/// One prompt fragment with an optional weight (negative weights are negative prompts)
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedPrompt {
    pub prompt: String,
    pub weight: Option<f64>,
}

/// One generation event from one provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Creation {
    /// Provider-native id
    pub id: String,
    /// Provider name
    pub created_by: String,
    /// Name files by id rather than by creation time
    pub order_by_id: bool,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub prompts: Vec<WeightedPrompt>,
    pub title: Option<String>,
    /// Public page of the creation
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub params: Params,
    pub images: Vec<ImageVariant>,
    pub source_image: Option<SourceImage>,
    /// Provider job kind (`upscale`, `text2image`, ...)
    pub job_type: Option<String>,
}

impl Creation {
    pub fn new(id: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_by: created_by.into(),
            ..Default::default()
        }
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.params.set(name, value);
    }

    pub fn get_param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Creation time, falling back to publication time
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.published_at)
    }

    pub fn set_source_image_url(&mut self, url: impl Into<String>) {
        self.source_image = Some(SourceImage::Url(url.into()));
    }

    pub fn set_source_image_base64(&mut self, data: impl Into<String>) {
        self.source_image = Some(SourceImage::Base64(data.into()));
    }

    /// True once there is prompt text or parameters worth embedding
    pub fn has_data(&self) -> bool {
        self.prompt.is_some() || !self.params.is_empty()
    }

    /// Store weighted prompt fragments and derive prompt and negative prompt from them
    ///
    /// With weights present the fragments are sorted by descending weight; the
    /// first is the prompt and the last the negative prompt. Without weights the
    /// first two are taken as positive then negative.
    pub fn set_weighted_prompts(&mut self, mut prompts: Vec<WeightedPrompt>) {
        if prompts.is_empty() {
            return;
        }
        let weighted = prompts.iter().any(|p| p.weight.map(|w| w != 0.0).unwrap_or(false));
        if prompts.len() > 1 && weighted {
            prompts.sort_by(|a, b| {
                b.weight
                    .unwrap_or(0.0)
                    .partial_cmp(&a.weight.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        self.prompt = Some(prompts[0].prompt.clone());
        if prompts.len() > 1 {
            let negative = if prompts.len() == 2 || !weighted {
                &prompts[1]
            } else {
                &prompts[prompts.len() - 1]
            };
            self.negative_prompt = Some(negative.prompt.clone());
        }
        self.prompts = prompts;
    }

    /// Fill the prompt unless already set; a differing second derivation is logged and dropped
    pub fn offer_prompt(&mut self, candidate: Option<&str>) {
        offer_text(&mut self.prompt, candidate, "prompt", &self.id);
    }

    /// Fill the negative prompt unless already set (see [`Creation::offer_prompt`])
    pub fn offer_negative_prompt(&mut self, candidate: Option<&str>) {
        offer_text(&mut self.negative_prompt, candidate, "negative prompt", &self.id);
    }

    /// Move `Steps` to the front of the parameter list (adding a placeholder when missing)
    pub fn normalize_params(&mut self) {
        self.params.ensure_steps_first();
    }

    /// Full embedded text with an optional per-image seed
    pub fn parameter_text(&self, seed_override: Option<&str>) -> String {
        embedded::compose(
            self.prompt.as_deref().unwrap_or_default(),
            self.negative_prompt.as_deref().unwrap_or_default(),
            &self.params,
            seed_override,
        )
    }

    /// Filename prefix shared by every file of this creation
    ///
    /// Id-ordered providers use the id. Everything else gets a zero-padded
    /// time code ahead of the id so names sort chronologically.
    pub fn prefix(&self) -> String {
        let id = escape_file_name(&self.id);
        if self.order_by_id {
            return id;
        }
        match self.date() {
            Some(date) => format!("{:09} {}", time_code(&date).max(0), id),
            None => id,
        }
    }

    pub fn sidecar_file_name(&self) -> String {
        format!("{}{}", self.prefix(), SIDECAR_SUFFIX)
    }

    /// Name of the captured reference image, `ext` including its dot
    pub fn source_image_file_name(&self, ext: &str) -> String {
        format!("{}{}{}", self.prefix(), SOURCE_IMAGE_INFIX, ext)
    }

    fn label(&self) -> Option<String> {
        if self.order_by_id {
            return None;
        }
        self.title
            .as_deref()
            .and_then(label_fragment)
            .or_else(|| self.prompt.as_deref().and_then(label_fragment))
    }

    /// Key and stem (name without extension) of every image, in image order
    ///
    /// Images that would share a stem get `-2`, `-3`, ... in image order, so
    /// the result is collision free and depends only on the creation.
    pub fn name_plan(&self) -> Vec<(NameKey, String)> {
        let prefix = self.prefix();
        let label = self.label();
        let numbered = self.images.len() > 1;
        let mut seen: HashMap<String, u32> = HashMap::new();

        self.images
            .iter()
            .enumerate()
            .map(|(idx, image)| {
                let number = if numbered {
                    Some(image.image_number.unwrap_or(idx as u32 + 1))
                } else {
                    None
                };
                let scale = image.fn_scale.as_deref().and_then(scale_segment);

                let mut base = prefix.clone();
                if let Some(n) = number {
                    base.push_str(&format!("-{}", n));
                }
                if let Some(s) = &scale {
                    base.push('-');
                    base.push_str(s);
                }
                let count = seen.entry(base.clone()).or_insert(0);
                *count += 1;
                let dup = (*count > 1).then_some(*count);

                let mut stem = base;
                if let Some(d) = dup {
                    stem.push_str(&format!("-{}", d));
                }
                if let Some(l) = &label {
                    stem.push(' ');
                    stem.push_str(l);
                }
                (NameKey { number, scale, dup }, stem)
            })
            .collect()
    }

    /// Target file name of image `index`; `fallback` selects the alternate extension
    pub fn file_name(&self, index: usize, fallback: bool) -> Option<String> {
        let image = self.images.get(index)?;
        let (_, stem) = self.name_plan().into_iter().nth(index)?;
        Some(format!("{}{}", stem, image.extension(fallback)))
    }

    /// Tags for image `index`: image-level tags overlaid with creation-level ones
    pub fn tags_for(&self, index: usize, ext: &str) -> TagMap {
        let Some(image) = self.images.get(index) else {
            return TagMap::new();
        };
        let mut out = image.tags(ext);
        if !self.has_data() {
            return out;
        }
        let is_png = ext.eq_ignore_ascii_case(".png");
        let text = self.parameter_text(image.seed_override.as_deref());
        out.insert(tags::USER_COMMENT.to_string(), Value::String(text.clone()));
        if is_png {
            out.insert(tags::PNG_PARAMETERS.to_string(), Value::String(text));
            if let Some(url) = &self.url {
                out.insert(tags::PNG_URL.to_string(), Value::String(url.clone()));
            }
        }
        if image.created_at.is_none() {
            if let Some(date) = self.date() {
                insert_date_tags(&mut out, &date, is_png);
            }
        }
        if !self.created_by.is_empty() {
            out.insert(tags::SOFTWARE.to_string(), Value::String(self.created_by.clone()));
        }
        let reel = image.reel_name.clone().unwrap_or_else(|| self.id.clone());
        if !reel.is_empty() {
            out.insert(tags::REEL_NAME.to_string(), Value::String(reel));
        }
        if let Some(num) = image.image_number {
            out.insert(tags::IMAGE_NUMBER.to_string(), Value::from(num));
        }
        if let Some(id) = &image.unique_id {
            out.insert(tags::IMAGE_UNIQUE_ID.to_string(), Value::String(id.replace('-', "")));
        }
        out
    }

    /// Approximate a creation from files that have no sidecar
    ///
    /// `key` is the shared leading identifier of the batch. Files are ordered by
    /// their parsed number, scale and duplicate index so repeated runs over
    /// already renamed files rebuild the same creation.
    pub fn from_extracted(key: &str, files: Vec<LocalImage>) -> Option<Self> {
        let mut files: Vec<(NameParts, LocalImage)> = files
            .into_iter()
            .map(|local| {
                let name = local
                    .path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string();
                let parts = parse_file_name(&name, Some(key)).unwrap_or_else(|| NameParts {
                    prefix: key.to_string(),
                    ext: file_extension(&name).unwrap_or_default(),
                    ..Default::default()
                });
                (parts, local)
            })
            .collect();
        if files.is_empty() {
            return None;
        }
        files.sort_by(|(a, la), (b, lb)| {
            (a.number.is_none(), a.number, &a.scale, a.dup.unwrap_or(1), &la.path).cmp(&(
                b.number.is_none(),
                b.number,
                &b.scale,
                b.dup.unwrap_or(1),
                &lb.path,
            ))
        });

        let reel = files.iter().find_map(|(_, l)| l.embedded.reel_name.clone());
        let software = files.iter().find_map(|(_, l)| l.embedded.software.clone());
        let text = files
            .iter()
            .find_map(|(_, l)| l.embedded.parameter_text().map(str::to_string));

        let id = reel
            .clone()
            .unwrap_or_else(|| files[0].0.prefix.clone())
            .trim()
            .to_string();
        let mut creation = Creation::new(id, software.clone().unwrap_or_default());
        creation.order_by_id = reel.is_none() || software.as_deref() == Some(STARRYAI);

        let shared = text.as_deref().map(Embedded::parse);
        if let Some(emb) = &shared {
            if !emb.prompt.is_empty() {
                creation.prompt = Some(emb.prompt.clone());
            }
            if !emb.negative_prompt.is_empty() {
                creation.negative_prompt = Some(emb.negative_prompt.clone());
            }
            creation.params = emb.params.clone();
        }
        if let Some(label) = files.iter().find_map(|(p, _)| p.label.clone()) {
            let prompt_label = creation.prompt.as_deref().and_then(label_fragment);
            if !prompt_label.map(|p| p.starts_with(&label)).unwrap_or(false) {
                creation.title = Some(label);
            }
        }

        let shared_seed = creation.params.get_str(names::SEED).map(str::to_string);
        for (idx, (parts, local)) in files.into_iter().enumerate() {
            let seed = local
                .embedded
                .parameter_text()
                .map(Embedded::parse)
                .and_then(|e| e.params.get_str(names::SEED).map(str::to_string));
            let image = ImageVariant {
                ext: if parts.ext.is_empty() {
                    local
                        .path
                        .extension()
                        .and_then(|e| e.to_str())
                        .map(|e| format!(".{}", e))
                        .unwrap_or_default()
                } else {
                    parts.ext.clone()
                },
                reel_name: local.embedded.reel_name.clone(),
                image_number: local
                    .embedded
                    .image_number
                    .or(parts.number)
                    .or(Some(idx as u32 + 1)),
                fn_scale: parts.scale.clone(),
                unique_id: local.embedded.unique_id.clone(),
                seed_override: seed.filter(|s| Some(s) != shared_seed.as_ref()),
                local: Some(local),
                ..Default::default()
            };
            creation.images.push(image);
        }
        creation.created_at = creation
            .images
            .iter()
            .filter_map(ImageVariant::effective_created_at)
            .min();
        Some(creation)
    }
}

fn offer_text(slot: &mut Option<String>, candidate: Option<&str>, field: &str, id: &str) {
    let Some(candidate) = candidate.filter(|c| !c.is_empty()) else {
        return;
    };
    match slot {
        Some(existing) if existing != candidate => {
            warn!(creation = %id, field, "Conflicting values derived; keeping the first");
        }
        Some(_) => {}
        None => *slot = Some(candidate.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::image::EmbeddedMetadata;
    use chrono::TimeZone;
    use genarc_common::time::TIME_CODE_EPOCH;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn with_images(count: usize) -> Creation {
        let mut creation = Creation::new("abc123", "Test");
        for i in 0..count {
            creation
                .images
                .push(ImageVariant::new(format!("https://x/{}.png", i), ".png"));
        }
        creation
    }

    #[test]
    fn test_set_param_updates_in_place() {
        let mut creation = Creation::new("abc123", "Test");
        creation.set_param("Steps", "20");
        creation.set_param("Seed", "42");
        creation.set_param("Steps", "30");
        assert_eq!(creation.params.len(), 2);
        assert_eq!(creation.get_param("Steps"), Some(&ParamValue::Scalar("30".to_string())));
        assert!(creation.get_param("Sampler").is_none());
    }

    #[test]
    fn test_single_image_time_prefix_without_number() {
        let mut creation = with_images(1);
        creation.created_at = Some(Utc.timestamp_opt(TIME_CODE_EPOCH + 1234, 0).unwrap());
        creation.prompt = Some("a red fox".to_string());

        let name = creation.file_name(0, false).unwrap();

        assert_eq!(name, "000001234 abc123 a red fox.png");
        assert_eq!(creation.file_name(0, false).unwrap(), name);
    }

    #[test]
    fn test_order_by_id_has_no_label() {
        let mut creation = with_images(2);
        creation.order_by_id = true;
        creation.prompt = Some("ignored".to_string());
        assert_eq!(creation.file_name(0, false).unwrap(), "abc123-1.png");
        assert_eq!(creation.file_name(1, false).unwrap(), "abc123-2.png");
    }

    #[test]
    fn test_collisions_are_disambiguated_in_order() {
        let mut creation = with_images(3);
        creation.order_by_id = true;
        for image in &mut creation.images {
            image.image_number = Some(1);
        }
        creation.images[2].fn_scale = Some("2".to_string());

        let names: Vec<String> = (0..3).map(|i| creation.file_name(i, false).unwrap()).collect();

        assert_eq!(names, vec!["abc123-1.png", "abc123-1-2.png", "abc123-1-2x.png"]);
        let unique: HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_plan_keys_parse_back() {
        let mut creation = with_images(3);
        creation.created_at = Some(Utc.timestamp_opt(TIME_CODE_EPOCH + 99, 0).unwrap());
        creation.title = Some("Sunset: over/the sea".to_string());
        creation.images[1].fn_scale = Some("enh2-vivid".to_string());
        creation.images[2].image_number = Some(1);
        let prefix = creation.prefix();

        for (idx, (key, stem)) in creation.name_plan().into_iter().enumerate() {
            let name = format!("{}{}", stem, creation.images[idx].ext);
            let parts = parse_file_name(&name, Some(&prefix)).unwrap();
            assert_eq!(parts.key(), key, "{}", name);
            assert_eq!(parts.label.as_deref(), Some("Sunset꞉ over⧸the sea"));
        }
    }

    #[test]
    fn test_fallback_extension() {
        let mut creation = with_images(1);
        creation.order_by_id = true;
        creation.images[0] = ImageVariant::new("https://x/a.png", ".png").with_alt("https://x/a.webp", ".webp");
        assert_eq!(creation.file_name(0, true).unwrap(), "abc123.webp");
    }

    #[test]
    fn test_weighted_prompts_sorted() {
        let mut creation = Creation::new("1", "StarryAI");
        creation.set_weighted_prompts(vec![
            WeightedPrompt { prompt: "ugly".to_string(), weight: Some(-1.0) },
            WeightedPrompt { prompt: "castle".to_string(), weight: Some(1.0) },
            WeightedPrompt { prompt: "moat".to_string(), weight: Some(0.5) },
        ]);
        assert_eq!(creation.prompt.as_deref(), Some("castle"));
        assert_eq!(creation.negative_prompt.as_deref(), Some("ugly"));
    }

    #[test]
    fn test_unweighted_prompts_positive_then_negative() {
        let mut creation = Creation::new("1", "StarryAI");
        creation.set_weighted_prompts(vec![
            WeightedPrompt { prompt: "castle".to_string(), weight: None },
            WeightedPrompt { prompt: "ugly".to_string(), weight: None },
        ]);
        assert_eq!(creation.prompt.as_deref(), Some("castle"));
        assert_eq!(creation.negative_prompt.as_deref(), Some("ugly"));
    }

    #[test]
    fn test_offer_prompt_keeps_first_value() {
        let mut creation = Creation::new("1", "X");
        creation.offer_prompt(Some("first"));
        creation.offer_prompt(Some("second"));
        assert_eq!(creation.prompt.as_deref(), Some("first"));
    }

    #[test]
    fn test_tags_overlay_creation_fields() {
        let mut creation = with_images(2);
        creation.prompt = Some("cat".to_string());
        creation.set_param(names::STEPS, 20i64);
        creation.set_param(names::SEED, 42i64);
        creation.url = Some("https://site/c/abc123".to_string());
        creation.images[1].seed_override = Some("43".to_string());
        creation.images[1].image_number = Some(2);
        creation.images[1].unique_id = Some("u-1".to_string());

        let tags = creation.tags_for(1, ".png");

        assert_eq!(tags.get("EXIF:UserComment"), Some(&Value::from("cat\nSteps: 20, Seed: 43")));
        assert_eq!(tags.get("PNG:parameters"), Some(&Value::from("cat\nSteps: 20, Seed: 43")));
        assert_eq!(tags.get("PNG:URL"), Some(&Value::from("https://site/c/abc123")));
        assert_eq!(tags.get("EXIF:Software"), Some(&Value::from("Test")));
        assert_eq!(tags.get("EXIF:ReelName"), Some(&Value::from("abc123")));
        assert_eq!(tags.get("EXIF:ImageUniqueID"), Some(&Value::from("u1")));

        let jpg = creation.tags_for(0, ".jpg");
        assert!(jpg.get("PNG:parameters").is_none());
    }

    #[test]
    fn test_from_extracted_is_stable_after_rename() {
        let embedded = EmbeddedMetadata {
            user_comment: Some("a lighthouse\nSteps: 20, Seed: 5".to_string()),
            reel_name: Some("ab12cd".to_string()),
            software: Some("NightCafe".to_string()),
            created_at: Some(Utc.timestamp_opt(TIME_CODE_EPOCH + 500, 0).unwrap()),
            ..Default::default()
        };
        let files = vec![
            LocalImage {
                path: PathBuf::from("/d/ab12cd-2 old label.png"),
                file_created_at: None,
                embedded: embedded.clone(),
            },
            LocalImage {
                path: PathBuf::from("/d/ab12cd-1 old label.png"),
                file_created_at: None,
                embedded: embedded.clone(),
            },
        ];

        let first = Creation::from_extracted("ab12cd", files).unwrap();
        assert!(!first.order_by_id);
        assert_eq!(first.title.as_deref(), Some("old label"));
        let renamed: Vec<LocalImage> = (0..2)
            .map(|i| LocalImage {
                path: PathBuf::from("/d").join(first.file_name(i, false).unwrap()),
                file_created_at: None,
                embedded: embedded.clone(),
            })
            .collect();
        assert_eq!(first.file_name(0, false).unwrap(), "000000500 ab12cd-1 old label.png");

        let second = Creation::from_extracted("000000500 ab12cd", renamed).unwrap();
        let again: Vec<String> = (0..2).map(|i| second.file_name(i, false).unwrap()).collect();
        let before: Vec<String> = (0..2).map(|i| first.file_name(i, false).unwrap()).collect();
        assert_eq!(again, before);
    }
}
