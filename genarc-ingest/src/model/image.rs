//! Image variants and embedded tag handling

use super::{insert_date_tags, tags, Headers, TagMap};
use chrono::{DateTime, Utc};
use genarc_common::time::parse_datetime;
use serde_json::Value;
use std::path::PathBuf;

/// Metadata already present in a downloaded or on-disk image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddedMetadata {
    /// Taken/generated time
    pub created_at: Option<DateTime<Utc>>,
    pub user_comment: Option<String>,
    pub software: Option<String>,
    pub reel_name: Option<String>,
    pub image_number: Option<u32>,
    pub unique_id: Option<String>,
    pub png_parameters: Option<String>,
    pub png_url: Option<String>,
    pub image_history: Option<String>,
    /// Dezgo's `PNG:GenInfo` JSON
    pub dezgo_gen_info: Option<Value>,
    /// Dezgo's `PNG:GenCode`
    pub dezgo_gen_code: Option<String>,
    pub image_size: Option<String>,
}

impl EmbeddedMetadata {
    /// Interpret a grouped tag map (`-G` output: `EXIF:UserComment`, `PNG:parameters`, ...)
    pub fn from_tags(tag_map: &TagMap) -> Self {
        let created_at = [tags::PNG_CREATION_TIME, tags::DATE_TIME_ORIGINAL, tags::CREATE_DATE]
            .iter()
            .filter_map(|key| tag_string(tag_map, key))
            .find_map(|s| parse_datetime(&s));
        Self {
            created_at,
            user_comment: tag_string(tag_map, tags::USER_COMMENT),
            software: tag_string(tag_map, tags::SOFTWARE),
            reel_name: tag_string(tag_map, tags::REEL_NAME),
            image_number: tag_string(tag_map, tags::IMAGE_NUMBER).and_then(|s| s.trim().parse().ok()),
            unique_id: tag_string(tag_map, tags::IMAGE_UNIQUE_ID),
            png_parameters: tag_string(tag_map, tags::PNG_PARAMETERS),
            png_url: tag_string(tag_map, tags::PNG_URL),
            image_history: tag_string(tag_map, tags::IMAGE_HISTORY),
            dezgo_gen_info: tag_string(tag_map, tags::PNG_GEN_INFO)
                .map(|s| serde_json::from_str(&s).unwrap_or(Value::String(s))),
            dezgo_gen_code: tag_string(tag_map, tags::PNG_GEN_CODE),
            image_size: tag_string(tag_map, tags::IMAGE_SIZE),
        }
    }

    /// The generation text, preferring `UserComment` over `PNG:parameters`
    pub fn parameter_text(&self) -> Option<&str> {
        self.user_comment
            .as_deref()
            .or(self.png_parameters.as_deref())
            .filter(|s| !s.is_empty())
    }

    fn has_dezgo_fields(&self) -> bool {
        self.dezgo_gen_info.is_some() || self.dezgo_gen_code.is_some()
    }
}

fn tag_string(tag_map: &TagMap, key: &str) -> Option<String> {
    match tag_map.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Local state of a variant once its file exists
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalImage {
    pub path: PathBuf,
    /// Earlier of the file's modification and creation times
    pub file_created_at: Option<DateTime<Utc>>,
    pub embedded: EmbeddedMetadata,
}

/// One downloadable output image of a creation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageVariant {
    /// Primary URL (best quality)
    pub url: String,
    /// Extension with leading dot
    pub ext: String,
    /// Fallback URL (lower fidelity acceptable)
    pub url_alt: Option<String>,
    pub ext_alt: Option<String>,
    /// Headers needed to download
    pub headers: Headers,
    /// Batch identifier
    pub reel_name: Option<String>,
    /// 1-based number within the batch
    pub image_number: Option<u32>,
    /// Upscale or enhancement suffix
    pub fn_scale: Option<String>,
    pub unique_id: Option<String>,
    /// Per-image seed when images of one batch differ
    pub seed_override: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// JSON pointer to this image's entry in the raw payload (receives the hash fields)
    pub source_pointer: Option<String>,
    pub local: Option<LocalImage>,
}

impl ImageVariant {
    pub fn new(url: impl Into<String>, ext: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ext: normalize_ext(&ext.into()),
            ..Default::default()
        }
    }

    /// Attach a fallback URL
    pub fn with_alt(mut self, url_alt: impl Into<String>, ext_alt: impl Into<String>) -> Self {
        self.url_alt = Some(url_alt.into());
        self.ext_alt = Some(normalize_ext(&ext_alt.into()));
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Extension of the primary or the fallback artifact
    pub fn extension(&self, fallback: bool) -> &str {
        if fallback {
            self.ext_alt.as_deref().unwrap_or(&self.ext)
        } else {
            &self.ext
        }
    }

    /// Best known time for this image: own, embedded, then file time
    pub fn effective_created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at.or_else(|| {
            self.local
                .as_ref()
                .and_then(|l| l.embedded.created_at.or(l.file_created_at))
        })
    }

    /// Image-level tags; null values remove vendor fields
    pub fn tags(&self, ext: &str) -> TagMap {
        let mut out = TagMap::new();
        let embedded = self.local.as_ref().map(|l| &l.embedded);
        let is_png = ext.eq_ignore_ascii_case(".png");

        if let Some(comment) = embedded.and_then(|e| e.user_comment.clone()) {
            out.insert(tags::USER_COMMENT.to_string(), Value::String(comment));
        }
        if is_png {
            if let Some(params) = embedded.and_then(|e| e.png_parameters.clone().or(e.user_comment.clone())) {
                out.insert(tags::PNG_PARAMETERS.to_string(), Value::String(params));
            }
            if let Some(url) = embedded.and_then(|e| e.png_url.clone()) {
                out.insert(tags::PNG_URL.to_string(), Value::String(url));
            }
        }
        if let Some(time) = self.effective_created_at() {
            insert_date_tags(&mut out, &time, is_png);
        }
        if let Some(software) = embedded.and_then(|e| e.software.clone()) {
            out.insert(tags::SOFTWARE.to_string(), Value::String(software));
        }
        if let Some(reel) = self.reel_name.clone().or_else(|| embedded.and_then(|e| e.reel_name.clone())) {
            out.insert(tags::REEL_NAME.to_string(), Value::String(reel));
        }
        if let Some(num) = self.image_number.or_else(|| embedded.and_then(|e| e.image_number)) {
            out.insert(tags::IMAGE_NUMBER.to_string(), Value::from(num));
        }
        if let Some(id) = self.unique_id.clone().or_else(|| embedded.and_then(|e| e.unique_id.clone())) {
            out.insert(tags::IMAGE_UNIQUE_ID.to_string(), Value::String(id.replace('-', "")));
        }
        if embedded.map(EmbeddedMetadata::has_dezgo_fields).unwrap_or(false) {
            for key in [tags::PNG_GEN_INFO, tags::PNG_GEN_CODE, tags::IMAGE_HISTORY] {
                out.entry(key.to_string()).or_insert(Value::Null);
            }
        }
        out
    }
}

/// Ensure a leading dot; empty stays empty
pub fn normalize_ext(ext: &str) -> String {
    if ext.is_empty() || ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{}", ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tag_map(value: Value) -> TagMap {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_from_tags_reads_grouped_keys() {
        let tags = tag_map(json!({
            "EXIF:UserComment": "cat\nSteps: 20",
            "EXIF:Software": "NightCafe",
            "EXIF:ImageNumber": 3,
            "EXIF:DateTimeOriginal": "2023:05:01 12:34:56+09:00",
            "PNG:GenCode": "abc",
        }));
        let embedded = EmbeddedMetadata::from_tags(&tags);
        assert_eq!(embedded.user_comment.as_deref(), Some("cat\nSteps: 20"));
        assert_eq!(embedded.software.as_deref(), Some("NightCafe"));
        assert_eq!(embedded.image_number, Some(3));
        assert_eq!(embedded.created_at.unwrap().to_rfc3339(), "2023-05-01T03:34:56+00:00");
        assert_eq!(embedded.dezgo_gen_code.as_deref(), Some("abc"));
    }

    #[test]
    fn test_png_creation_time_preferred() {
        let tags = tag_map(json!({
            "PNG:CreationTime": "2022-01-01T00:00:00Z",
            "EXIF:DateTimeOriginal": "2023:05:01 12:34:56+09:00",
        }));
        let embedded = EmbeddedMetadata::from_tags(&tags);
        assert_eq!(embedded.created_at.unwrap().to_rfc3339(), "2022-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_tags_strip_dezgo_fields() {
        let mut image = ImageVariant::new("https://x/y.png", ".png");
        image.unique_id = Some("ab-cd-ef".to_string());
        image.image_number = Some(2);
        image.local = Some(LocalImage {
            path: PathBuf::from("/tmp/y.png"),
            file_created_at: None,
            embedded: EmbeddedMetadata {
                dezgo_gen_code: Some("code".to_string()),
                ..Default::default()
            },
        });

        let tags = image.tags(".png");

        assert_eq!(tags.get("PNG:GenInfo"), Some(&Value::Null));
        assert_eq!(tags.get("PNG:GenCode"), Some(&Value::Null));
        assert_eq!(tags.get("EXIF:ImageHistory"), Some(&Value::Null));
        assert_eq!(tags.get("EXIF:ImageUniqueID"), Some(&json!("abcdef")));
        assert_eq!(tags.get("EXIF:ImageNumber"), Some(&json!(2)));
    }

    #[test]
    fn test_extension_fallback() {
        let image = ImageVariant::new("https://x/y.png", "png").with_alt("https://x/y.webp", ".webp");
        assert_eq!(image.extension(false), ".png");
        assert_eq!(image.extension(true), ".webp");
    }
}
