//! Ingestion pipeline
//!
//! Turns one raw provider payload into tagged image files plus a JSON sidecar.
//!
//! # Architecture
//! - **Detect**: pick the first matching provider adapter
//! - **Normalize**: build the canonical [`Creation`]
//! - **Capture**: store the reference image, when the creation has one
//! - **Per image** (sequential): download to staging, hash, read embedded
//!   tags, transcode, write tags, rename into the destination directory
//! - **Sidecar**: the raw payload with content hashes, written last
//!
//! # Error Handling
//! - Unrecognized payloads are logged and skipped (`Ok(None)`)
//! - Adapter errors and sidecar write failures abort the creation
//! - Download, tagging and transcode failures only affect the image at hand;
//!   the sidecar is still written for whatever succeeded
//!
//! The metadata tool is opened once per creation and closed before
//! [`Pipeline::process`] returns, whatever the outcome.
//!
//! # Example
//! ```rust,ignore
//! let pipeline = Pipeline::new(config, ctx, tools, Arc::new(WebpTranscoder));
//! let outcome = pipeline.process(payload).await?;
//! ```

use crate::error::{IngestError, Result};
use crate::model::filename::{file_extension, file_stem, url_extension};
use crate::model::{Creation, EmbeddedMetadata, LocalImage, SourceImage};
use crate::providers::{self, payload_id, AdapterContext, Provider};
use crate::services::exiftool::{BACKUP_SUFFIX, OVERWRITE_ORIGINAL};
use crate::services::file_ops::{file_created_at, remove_if_exists, set_file_times};
use crate::services::hasher::{sha256_bytes, sha256_file};
use crate::services::transcode::needs_transcode;
use crate::services::{MetadataTool, MetadataToolFactory, Transcoder};
use base64::Engine;
use genarc_common::config::IngestConfig;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Root key holding the reference image hash
pub const SOURCE_IMAGE_HASH_KEY: &str = "_source_image_sha256";

/// Per-image key for a file fetched from the primary URL
pub const IMAGE_HASH_KEY: &str = "_image_sha256";

/// Per-image key for a file fetched from the fallback URL
pub const IMAGE_ALT_HASH_KEY: &str = "_imagealt_sha256";

/// Quality requested from the transcoder; 100 means lossless
const TRANSCODE_QUALITY: u8 = 100;

/// Source URLs that providers use for a withheld reference image
const HIDDEN_SOURCE: &str = "hidden";

/// Directories the pipeline writes to
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Downloads land here until tagged
    pub staging_dir: PathBuf,
    /// Final home of tagged images
    pub dest_dir: PathBuf,
    /// Sidecars and captured reference images
    pub meta_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("temp"),
            dest_dir: PathBuf::from("tagged"),
            meta_dir: PathBuf::from("tagged"),
        }
    }
}

impl PipelineConfig {
    /// Directories from configuration, resolved against the root folder
    pub fn from_ingest_config(config: &IngestConfig, root: &Path) -> Self {
        Self {
            staging_dir: config.resolve_dir(root, &config.staging_dir),
            dest_dir: config.resolve_dir(root, &config.dest_dir),
            meta_dir: config.resolve_dir(root, &config.meta_dir),
        }
    }
}

/// Result of a processed creation
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub provider: Provider,
    pub creation_id: String,
    pub sidecar: PathBuf,
    /// Images stored by this run
    pub images: Vec<PathBuf>,
    /// Images already present at their target name
    pub skipped: usize,
    /// Images that could not be stored
    pub failed: usize,
    pub source_image: Option<PathBuf>,
}

/// How one image ended up
enum ImageResult {
    Stored { path: PathBuf, hash: String, from_alt: bool },
    Existing(PathBuf),
}

/// Ingestion pipeline over injected collaborators
pub struct Pipeline {
    config: PipelineConfig,
    ctx: AdapterContext,
    tools: Arc<dyn MetadataToolFactory>,
    transcoder: Arc<dyn Transcoder>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        ctx: AdapterContext,
        tools: Arc<dyn MetadataToolFactory>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            config,
            ctx,
            tools,
            transcoder,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    /// Ingest one raw payload
    ///
    /// Returns `Ok(None)` when no provider recognizes the payload.
    pub async fn process(&self, mut raw: Value) -> Result<Option<ProcessOutcome>> {
        let Some((provider, mut creation)) = providers::normalize(&mut raw, &self.ctx).await? else {
            info!(item = ?payload_id(&raw), "Unrecognized payload, skipping");
            return Ok(None);
        };
        info!(
            provider = %provider,
            creation = %creation.id,
            images = creation.images.len(),
            "Processing creation"
        );

        for dir in [&self.config.staging_dir, &self.config.dest_dir, &self.config.meta_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut tool = match self.tools.open().await {
            Ok(tool) => Some(tool),
            Err(e) => {
                warn!(creation = %creation.id, error = %e, "Metadata tool unavailable; images will not be tagged");
                None
            }
        };
        let result = self.process_creation(provider, &mut creation, &mut raw, &mut tool).await;
        if let Some(mut tool) = tool {
            if let Err(e) = tool.close().await {
                warn!(creation = %creation.id, error = %e, "Failed to close metadata tool");
            }
        }

        let outcome = result?;
        info!(
            provider = %provider,
            creation = %outcome.creation_id,
            stored = outcome.images.len(),
            skipped = outcome.skipped,
            failed = outcome.failed,
            "Creation complete"
        );
        Ok(Some(outcome))
    }

    async fn process_creation(
        &self,
        provider: Provider,
        creation: &mut Creation,
        raw: &mut Value,
        tool: &mut Option<Box<dyn MetadataTool>>,
    ) -> Result<ProcessOutcome> {
        let mut outcome = ProcessOutcome {
            provider,
            creation_id: creation.id.clone(),
            sidecar: self.config.meta_dir.join(creation.sidecar_file_name()),
            images: Vec::new(),
            skipped: 0,
            failed: 0,
            source_image: None,
        };

        if let Some(source) = creation.source_image.clone() {
            outcome.source_image = self.capture_source_image(creation, &source, raw).await;
        }

        for idx in 0..creation.images.len() {
            match self.ingest_image(creation, idx, tool).await {
                Ok(ImageResult::Stored { path, hash, from_alt }) => {
                    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
                    record_image_hash(raw, creation.images[idx].source_pointer.as_deref(), &name, hash, from_alt);
                    outcome.images.push(path);
                }
                Ok(ImageResult::Existing(path)) => {
                    debug!(path = %path.display(), "Image already present");
                    outcome.skipped += 1;
                }
                Err(e) => {
                    warn!(creation = %creation.id, image = idx + 1, error = %e, "Image not stored");
                    outcome.failed += 1;
                }
            }
        }

        self.write_sidecar(&outcome.sidecar, raw, creation).await?;
        Ok(outcome)
    }

    /// Store the reference image next to the sidecar and record its hash
    async fn capture_source_image(&self, creation: &Creation, source: &SourceImage, raw: &mut Value) -> Option<PathBuf> {
        let path = match source {
            SourceImage::Base64(data) => {
                let encoded = data.split_once(";base64,").map(|(_, d)| d).unwrap_or(data);
                let bytes = match base64::engine::general_purpose::STANDARD.decode(encoded.trim()) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(creation = %creation.id, error = %e, "Reference image is not valid base64");
                        return None;
                    }
                };
                let path = self.config.meta_dir.join(creation.source_image_file_name(".png"));
                if let Err(e) = tokio::fs::write(&path, &bytes).await {
                    warn!(path = %path.display(), error = %e, "Failed to write reference image");
                    return None;
                }
                if let Some(obj) = raw.as_object_mut() {
                    obj.insert(SOURCE_IMAGE_HASH_KEY.to_string(), Value::String(sha256_bytes(&bytes)));
                }
                path
            }
            SourceImage::Url(url) => {
                if url == HIDDEN_SOURCE || self.ctx.options.upscales_only {
                    return None;
                }
                let ext = url_extension(url).unwrap_or_else(|| ".png".to_string());
                let path = self.config.meta_dir.join(creation.source_image_file_name(&ext));
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    let headers = creation.images.first().map(|i| i.headers.clone()).unwrap_or_default();
                    if let Err(e) = self.ctx.fetch.download(url, &headers, &path).await {
                        warn!(creation = %creation.id, url = %url, error = %e, "Reference image download failed");
                        if let Err(e) = remove_if_exists(&path).await {
                            warn!(path = %path.display(), error = %e, "Failed to remove partial download");
                        }
                        return None;
                    }
                }
                match sha256_file(&path).await {
                    Ok(hash) => {
                        if let Some(obj) = raw.as_object_mut() {
                            obj.insert(SOURCE_IMAGE_HASH_KEY.to_string(), Value::String(hash));
                        }
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to hash reference image"),
                }
                path
            }
        };
        if let Some(date) = creation.date() {
            if let Err(e) = set_file_times(&path, date).await {
                warn!(path = %path.display(), error = %e, "Failed to set reference image times");
            }
        }
        info!(path = %path.display(), "Captured reference image");
        Some(path)
    }

    /// Names this image may already exist under in the destination directory
    async fn existing_target(&self, creation: &Creation, idx: usize) -> Option<PathBuf> {
        let mut names: Vec<String> = [creation.file_name(idx, false), creation.file_name(idx, true)]
            .into_iter()
            .flatten()
            .collect();
        let transcoded: Vec<String> = names
            .iter()
            .map(|n| format!("{}{}", file_stem(n), self.transcoder.output_ext()))
            .collect();
        names.extend(transcoded);
        for name in names {
            let path = self.config.dest_dir.join(name);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Some(path);
            }
        }
        None
    }

    async fn ingest_image(
        &self,
        creation: &mut Creation,
        idx: usize,
        tool: &mut Option<Box<dyn MetadataTool>>,
    ) -> Result<ImageResult> {
        if let Some(path) = self.existing_target(creation, idx).await {
            return Ok(ImageResult::Existing(path));
        }
        let primary_name = creation
            .file_name(idx, false)
            .ok_or_else(|| IngestError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "image index")))?;
        let image = &creation.images[idx];

        let staged = self.config.staging_dir.join(&primary_name);
        let (name, staged, from_alt) = match self.ctx.fetch.download(&image.url, &image.headers, &staged).await {
            Ok(bytes) => {
                debug!(url = %image.url, bytes, "Downloaded");
                (primary_name, staged, false)
            }
            Err(e) => {
                remove_if_exists(&staged).await?;
                let (Some(url_alt), Some(alt_name)) = (image.url_alt.as_deref(), creation.file_name(idx, true)) else {
                    return Err(e.into());
                };
                warn!(url = %image.url, error = %e, "Download failed, trying fallback URL");
                let alt_staged = self.config.staging_dir.join(&alt_name);
                if let Err(e) = self.ctx.fetch.download(url_alt, &image.headers, &alt_staged).await {
                    remove_if_exists(&alt_staged).await?;
                    return Err(e.into());
                }
                (alt_name, alt_staged, true)
            }
        };

        let result = self.finish_staged(creation, idx, name.clone(), staged, from_alt, tool).await;
        if result.is_err() {
            self.discard_staged(&name).await;
        }
        result
    }

    /// Hash, tag and move one downloaded file out of staging
    async fn finish_staged(
        &self,
        creation: &mut Creation,
        idx: usize,
        mut name: String,
        mut staged: PathBuf,
        from_alt: bool,
        tool: &mut Option<Box<dyn MetadataTool>>,
    ) -> Result<ImageResult> {
        let hash = sha256_file(&staged).await?;
        let embedded = match tool.as_mut() {
            Some(tool) => match tool.read(&staged).await {
                Ok(tags) => EmbeddedMetadata::from_tags(&tags),
                Err(e) => {
                    warn!(path = %staged.display(), error = %e, "Failed to read embedded metadata");
                    EmbeddedMetadata::default()
                }
            },
            None => EmbeddedMetadata::default(),
        };
        creation.images[idx].local = Some(LocalImage {
            path: staged.clone(),
            file_created_at: None,
            embedded,
        });

        let mut ext = file_extension(&name).unwrap_or_default();
        if self.ctx.options.compressed && needs_transcode(&ext) {
            let out_name = format!("{}{}", file_stem(&name), self.transcoder.output_ext());
            let out = self.config.staging_dir.join(&out_name);
            match self.transcoder.transcode(&staged, &out, TRANSCODE_QUALITY).await {
                Ok(()) => {
                    remove_if_exists(&staged).await?;
                    staged = out;
                    name = out_name;
                    ext = self.transcoder.output_ext().to_string();
                }
                Err(e) => {
                    warn!(path = %staged.display(), error = %e, "Transcode failed, keeping original format");
                    remove_if_exists(&out).await?;
                }
            }
        }

        if let Some(tool) = tool.as_mut() {
            let tags = creation.tags_for(idx, &ext);
            if let Err(e) = tool.write(&staged, &tags, &[OVERWRITE_ORIGINAL]).await {
                warn!(path = %staged.display(), error = %e, "Failed to write tags");
            }
            remove_if_exists(&backup_path(&staged)).await?;
        }

        let final_path = self.config.dest_dir.join(&name);
        move_into_place(&staged, &final_path).await?;
        if let Some(local) = creation.images[idx].local.as_mut() {
            local.path = final_path.clone();
            local.file_created_at = file_created_at(&final_path).await;
        }
        if let Some(date) = creation.images[idx].created_at.or_else(|| creation.date()) {
            if let Err(e) = set_file_times(&final_path, date).await {
                warn!(path = %final_path.display(), error = %e, "Failed to set file times");
            }
        }
        info!(path = %final_path.display(), from_alt, "Stored image");
        Ok(ImageResult::Stored {
            path: final_path,
            hash,
            from_alt,
        })
    }

    /// Remove whatever a failed image left in staging
    async fn discard_staged(&self, name: &str) {
        let original = self.config.staging_dir.join(name);
        let transcoded = self
            .config
            .staging_dir
            .join(format!("{}{}", file_stem(name), self.transcoder.output_ext()));
        for path in [backup_path(&original), backup_path(&transcoded), original, transcoded] {
            if let Err(e) = remove_if_exists(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove staged file");
            }
        }
    }

    async fn write_sidecar(&self, path: &Path, raw: &Value, creation: &Creation) -> Result<()> {
        let json = serde_json::to_vec_pretty(raw)?;
        tokio::fs::write(path, json).await?;
        if let Some(date) = creation.date() {
            if let Err(e) = set_file_times(path, date).await {
                warn!(path = %path.display(), error = %e, "Failed to set sidecar times");
            }
        }
        debug!(path = %path.display(), "Sidecar written");
        Ok(())
    }
}

/// Hash into the payload entry the image came from, or a root map keyed by file name
fn record_image_hash(raw: &mut Value, pointer: Option<&str>, file_name: &str, hash: String, from_alt: bool) {
    let key = if from_alt { IMAGE_ALT_HASH_KEY } else { IMAGE_HASH_KEY };
    if let Some(entry) = pointer.and_then(|p| raw.pointer_mut(p)).and_then(Value::as_object_mut) {
        entry.insert(key.to_string(), Value::String(hash));
        return;
    }
    let Some(root) = raw.as_object_mut() else {
        return;
    };
    let slot = root
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(map) = slot.as_object_mut() {
        map.insert(file_name.to_string(), Value::String(hash));
    }
}

/// `<file>_original`, left by the metadata tool when it keeps a backup
fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Rename into place, copying when staging and destination are on different filesystems
async fn move_into_place(src: &Path, dst: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(src, dst).await.is_ok() {
        return Ok(());
    }
    let partial = {
        let mut name = dst.as_os_str().to_owned();
        name.push(".partial");
        PathBuf::from(name)
    };
    tokio::fs::copy(src, &partial).await?;
    tokio::fs::rename(&partial, dst).await?;
    tokio::fs::remove_file(src).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_hash_at_pointer() {
        let mut raw = json!({"images": [{"url": "a"}, {"url": "b"}]});
        record_image_hash(&mut raw, Some("/images/1"), "x.png", "abc".into(), false);
        record_image_hash(&mut raw, Some("/images/0"), "y.png", "def".into(), true);
        assert_eq!(raw["images"][1][IMAGE_HASH_KEY], "abc");
        assert_eq!(raw["images"][0][IMAGE_ALT_HASH_KEY], "def");
    }

    #[test]
    fn test_record_hash_without_pointer() {
        let mut raw = json!({"id": 1});
        record_image_hash(&mut raw, None, "x.png", "abc".into(), false);
        record_image_hash(&mut raw, Some("/missing"), "y.png", "def".into(), false);
        assert_eq!(raw[IMAGE_HASH_KEY], json!({"x.png": "abc", "y.png": "def"}));
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(backup_path(Path::new("/t/a.png")), PathBuf::from("/t/a.png_original"));
    }

    #[tokio::test]
    async fn test_move_into_place() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("a.png");
        let dst = dir.path().join("b.png");
        tokio::fs::write(&src, b"data").await.unwrap();
        move_into_place(&src, &dst).await.unwrap();
        assert!(!src.exists());
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"data");
    }
}
