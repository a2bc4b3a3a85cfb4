//! Canonical creation model
//!
//! Every provider payload is normalized into one [`Creation`] holding an
//! ordered list of [`ImageVariant`]s. The model owns filename derivation and
//! the tag sets written into downloaded files.

pub mod creation;
pub mod filename;
pub mod image;

pub use creation::{Creation, SourceImage, WeightedPrompt};
pub use filename::{NameKey, NameParts};
pub use image::{EmbeddedMetadata, ImageVariant, LocalImage};

use chrono::{DateTime, Utc};
use genarc_common::time::{format_antz, format_iso, format_zone, to_local};
use serde_json::Value;
use std::collections::BTreeMap;

/// Grouped tag name to value. A `Null` value deletes the tag when written.
pub type TagMap = serde_json::Map<String, Value>;

/// Request headers needed to download an image
pub type Headers = BTreeMap<String, String>;

/// Tag keys as read (`-G`) and written by the metadata tool
pub mod tags {
    pub const USER_COMMENT: &str = "EXIF:UserComment";
    pub const SOFTWARE: &str = "EXIF:Software";
    pub const REEL_NAME: &str = "EXIF:ReelName";
    pub const IMAGE_NUMBER: &str = "EXIF:ImageNumber";
    pub const IMAGE_UNIQUE_ID: &str = "EXIF:ImageUniqueID";
    pub const IMAGE_HISTORY: &str = "EXIF:ImageHistory";
    pub const DATE_TIME_ORIGINAL: &str = "EXIF:DateTimeOriginal";
    pub const OFFSET_TIME_ORIGINAL: &str = "EXIF:OffsetTimeOriginal";
    pub const CREATE_DATE: &str = "EXIF:CreateDate";
    pub const OFFSET_TIME_DIGITIZED: &str = "EXIF:OffsetTimeDigitized";
    pub const PNG_PARAMETERS: &str = "PNG:parameters";
    pub const PNG_URL: &str = "PNG:URL";
    pub const PNG_CREATION_TIME: &str = "PNG:CreationTime";
    pub const PNG_GEN_INFO: &str = "PNG:GenInfo";
    pub const PNG_GEN_CODE: &str = "PNG:GenCode";
    pub const IMAGE_SIZE: &str = "Composite:ImageSize";
}

/// Write the taken/digitized date tags in local time
///
/// `PNG:CreationTime` is what file browsers show as "Date taken" for PNGs.
pub(crate) fn insert_date_tags(out: &mut TagMap, time: &DateTime<Utc>, is_png: bool) {
    let local = to_local(time);
    let antz = format_antz(&local);
    let zone = format_zone(&local);
    if is_png {
        out.insert(tags::PNG_CREATION_TIME.to_string(), Value::String(format_iso(&local)));
    }
    out.insert(tags::DATE_TIME_ORIGINAL.to_string(), Value::String(antz.clone()));
    out.insert(tags::OFFSET_TIME_ORIGINAL.to_string(), Value::String(zone.clone()));
    out.insert(tags::CREATE_DATE.to_string(), Value::String(antz));
    out.insert(tags::OFFSET_TIME_DIGITIZED.to_string(), Value::String(zone));
}
