//! Reconciliation of an existing directory to canonical file names
//!
//! Files are batched by the identifier they start with. A batch that has a
//! sidecar is renamed from the creation its stored payload normalizes to;
//! a batch without one is approximated from the metadata embedded in its
//! images. Files that cannot be matched are reported and left alone.
//!
//! Every rename and deletion goes through [`FileOps`], so a pass without
//! `commit` only logs what it would do. Running the pass again over its own
//! output renames nothing.

use crate::error::Result;
use crate::model::creation::{SIDECAR_SUFFIX, SOURCE_IMAGE_INFIX};
use crate::model::filename::{file_extension, leading_id, parse_file_name};
use crate::model::{Creation, EmbeddedMetadata, LocalImage, NameKey, NameParts};
use crate::providers::{self, AdapterContext};
use crate::services::file_ops::file_created_at;
use crate::services::{FileOps, MetadataTool, MetadataToolFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Marker of sidecars written by earlier versions
pub const LEGACY_SIDECAR_MARKER: &str = "(metadata)";

/// Marker of reference images written by earlier versions
pub const LEGACY_SOURCE_IMAGE_MARKER: &str = "(Initial Image)";

/// Shortest hex run accepted as a batch identifier
const MIN_ID_LEN: usize = 6;

/// `<9-digit time code> <id>` up to the first separator
static TIME_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{9} [^\s.\-]+)").expect("valid regex"));

/// What a pass did (or, in dry-run mode, would do)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// `(old name, new name)` pairs
    pub renames: Vec<(String, String)>,
    pub deletions: Vec<String>,
    /// Files left untouched because no canonical name could be derived
    pub unmatched: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.renames.is_empty() && self.deletions.is_empty()
    }
}

/// Identifier shared by the files of one creation
pub fn batch_key(name: &str) -> Option<String> {
    if let Some(caps) = TIME_PREFIX_RE.captures(name) {
        return Some(caps[1].to_string());
    }
    leading_id(name)
        .filter(|id| id.len() >= MIN_ID_LEN)
        .map(str::to_string)
}

fn is_legacy_sidecar(name: &str) -> bool {
    name.contains(LEGACY_SIDECAR_MARKER) && name.ends_with(".json")
}

fn is_source_image(name: &str) -> bool {
    name.contains(SOURCE_IMAGE_INFIX) || name.contains(LEGACY_SOURCE_IMAGE_MARKER)
}

/// True when `name` continues `prefix` at a separator
fn belongs_to(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.chars().next())
        .map(|c| matches!(c, '-' | ' ' | '.'))
        .unwrap_or(false)
}

/// Renames a directory's files to their canonical names
pub struct Reconciler {
    ctx: AdapterContext,
    tools: Arc<dyn MetadataToolFactory>,
    ops: FileOps,
}

impl Reconciler {
    pub fn new(ctx: AdapterContext, tools: Arc<dyn MetadataToolFactory>, ops: FileOps) -> Self {
        Self { ctx, tools, ops }
    }

    pub async fn reconcile_dir(&self, dir: &Path) -> Result<ReconcileReport> {
        let names = list_files(dir).await?;
        info!(dir = %dir.display(), files = names.len(), dry_run = self.ops.is_dry_run(), "Reconciling");
        let mut report = ReconcileReport::default();
        let mut claimed: HashSet<String> = HashSet::new();

        // Current sidecars; longer prefixes first so `abc1` is not taken by `abc`
        let mut sidecars: Vec<(String, String)> = names
            .iter()
            .filter_map(|n| n.strip_suffix(SIDECAR_SUFFIX).map(|p| (n.clone(), p.to_string())))
            .collect();
        sidecars.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.1.cmp(&b.1)));
        for (sidecar, prefix) in sidecars {
            claimed.insert(sidecar.clone());
            let mut members = Vec::new();
            for name in &names {
                if claimed.contains(name) || !belongs_to(name, &prefix) {
                    continue;
                }
                claimed.insert(name.clone());
                if is_legacy_sidecar(name) {
                    self.delete(dir, name, &mut report).await?;
                } else {
                    members.push(name.clone());
                }
            }
            self.reconcile_with_sidecar(dir, &sidecar, &prefix, members, &mut report)
                .await?;
        }

        // Legacy sidecars without a current one
        let legacy: Vec<String> = names
            .iter()
            .filter(|n| !claimed.contains(*n) && is_legacy_sidecar(n))
            .cloned()
            .collect();
        for sidecar in legacy {
            claimed.insert(sidecar.clone());
            let Some(key) = batch_key(&sidecar) else {
                warn!(file = %sidecar, "Legacy sidecar without an identifier");
                report.unmatched.push(sidecar);
                continue;
            };
            let members: Vec<String> = names
                .iter()
                .filter(|n| !claimed.contains(*n) && batch_key(n).as_deref() == Some(key.as_str()))
                .cloned()
                .collect();
            claimed.extend(members.iter().cloned());
            self.reconcile_with_sidecar(dir, &sidecar, &key, members, &mut report)
                .await?;
        }

        // Everything else, from embedded metadata
        let mut batches: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in names.iter().filter(|n| !claimed.contains(*n)) {
            match batch_key(name) {
                Some(key) => batches.entry(key).or_default().push(name.clone()),
                None => {
                    debug!(file = %name, "No identifier");
                    report.unmatched.push(name.clone());
                }
            }
        }
        if !batches.is_empty() {
            let mut tool = match self.tools.open().await {
                Ok(tool) => Some(tool),
                Err(e) => {
                    warn!(error = %e, "Metadata tool unavailable; using file names only");
                    None
                }
            };
            let mut result = Ok(());
            for (key, members) in batches {
                result = self
                    .reconcile_extracted(dir, &key, members, &mut tool, &mut report)
                    .await;
                if result.is_err() {
                    break;
                }
            }
            if let Some(mut tool) = tool {
                if let Err(e) = tool.close().await {
                    warn!(error = %e, "Failed to close metadata tool");
                }
            }
            result?;
        }

        for name in &report.unmatched {
            warn!(file = %name, "Unmatched file left unchanged");
        }
        info!(
            renames = report.renames.len(),
            deletions = report.deletions.len(),
            unmatched = report.unmatched.len(),
            "Reconciliation complete"
        );
        Ok(report)
    }

    async fn reconcile_with_sidecar(
        &self,
        dir: &Path,
        sidecar: &str,
        key: &str,
        members: Vec<String>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let creation = match self.load_sidecar(&dir.join(sidecar)).await {
            Some(creation) => creation,
            None => {
                report.unmatched.push(sidecar.to_string());
                report.unmatched.extend(members);
                return Ok(());
            }
        };
        let plan = creation.name_plan();
        let mut taken: HashSet<usize> = HashSet::new();
        let mut renames = vec![(sidecar.to_string(), creation.sidecar_file_name())];

        for name in members {
            let ext = file_extension(&name).unwrap_or_default();
            let target = if is_source_image(&name) {
                Some(creation.source_image_file_name(&ext))
            } else {
                parse_file_name(&name, Some(key))
                    .and_then(|parts| match_variant(&plan, &parts, &taken))
                    .map(|idx| {
                        taken.insert(idx);
                        format!("{}{}", plan[idx].1, ext)
                    })
            };
            match target {
                Some(target) => renames.push((name, target)),
                None => report.unmatched.push(name),
            }
        }
        self.apply_renames(dir, renames, report).await
    }

    /// Creation from a stored payload; `None` (logged) when it cannot be rebuilt
    async fn load_sidecar(&self, path: &Path) -> Option<Creation> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read sidecar");
                return None;
            }
        };
        let mut raw: Value = match serde_json::from_slice(&bytes) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Sidecar is not valid JSON");
                return None;
            }
        };
        match providers::normalize(&mut raw, &self.ctx).await {
            Ok(Some((_, creation))) => Some(creation),
            Ok(None) => {
                warn!(path = %path.display(), "Sidecar payload not recognized");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Sidecar payload could not be normalized");
                None
            }
        }
    }

    async fn reconcile_extracted(
        &self,
        dir: &Path,
        key: &str,
        members: Vec<String>,
        tool: &mut Option<Box<dyn MetadataTool>>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let mut locals = Vec::new();
        for name in members {
            if is_source_image(&name) {
                report.unmatched.push(name);
                continue;
            }
            let path = dir.join(&name);
            let embedded = match tool.as_mut() {
                Some(tool) => match tool.read(&path).await {
                    Ok(tags) => EmbeddedMetadata::from_tags(&tags),
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "No embedded metadata");
                        EmbeddedMetadata::default()
                    }
                },
                None => EmbeddedMetadata::default(),
            };
            locals.push(LocalImage {
                file_created_at: file_created_at(&path).await,
                path,
                embedded,
            });
        }
        let Some(mut creation) = Creation::from_extracted(key, locals) else {
            return Ok(());
        };

        // Names already in canonical form carry the exact number and scale
        let prefix = creation.prefix();
        for image in creation.images.iter_mut() {
            let Some(name) = image.local.as_ref().and_then(|l| local_name(&l.path)) else {
                continue;
            };
            if !belongs_to(&name, &prefix) {
                continue;
            }
            if let Some(parts) = parse_file_name(&name, Some(&prefix)) {
                image.fn_scale = parts.scale;
                image.image_number = parts.number.or(image.image_number);
            }
        }

        let renames: Vec<(String, String)> = creation
            .name_plan()
            .into_iter()
            .zip(creation.images.iter())
            .filter_map(|((_, stem), image)| {
                let old = image.local.as_ref().and_then(|l| local_name(&l.path))?;
                let ext = file_extension(&old).unwrap_or_default();
                Some((old, format!("{}{}", stem, ext)))
            })
            .collect();
        self.apply_renames(dir, renames, report).await
    }

    async fn apply_renames(
        &self,
        dir: &Path,
        renames: Vec<(String, String)>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let mut targets: HashSet<String> = HashSet::new();
        for (old, new) in renames {
            if old == new {
                targets.insert(new);
                continue;
            }
            if targets.contains(&new) || tokio::fs::try_exists(dir.join(&new)).await? {
                warn!(file = %old, target = %new, "Target name already in use");
                report.unmatched.push(old);
                continue;
            }
            if self.ops.rename(dir, &old, &new).await? {
                report.renames.push((old, new.clone()));
            }
            targets.insert(new);
        }
        Ok(())
    }

    async fn delete(&self, dir: &Path, name: &str, report: &mut ReconcileReport) -> Result<()> {
        self.ops.delete(dir, name).await?;
        report.deletions.push(name.to_string());
        Ok(())
    }
}

/// First free variant whose name key fits `parts`
fn match_variant(plan: &[(NameKey, String)], parts: &NameParts, taken: &HashSet<usize>) -> Option<usize> {
    let key = parts.key();
    let free = |idx: &usize| !taken.contains(idx);
    (0..plan.len())
        .filter(free)
        .find(|&i| plan[i].0 == key)
        .or_else(|| (plan.len() == 1).then_some(0).filter(free))
        .or_else(|| {
            (0..plan.len())
                .filter(free)
                .find(|&i| plan[i].0.number == key.number && plan[i].0.scale == key.scale)
        })
}

fn local_name(path: &Path) -> Option<String> {
    path.file_name().and_then(|n| n.to_str()).map(str::to_string)
}

/// Regular files directly inside `dir`, sorted, hidden files left out
async fn list_files(dir: &Path) -> Result<Vec<String>> {
    let dir: PathBuf = dir.to_path_buf();
    let names = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            match entry.file_name().to_str() {
                Some(name) if !name.starts_with('.') => names.push(name.to_string()),
                Some(_) => {}
                None => warn!(path = %entry.path().display(), "Skipping non UTF-8 file name"),
            }
        }
        Ok(names)
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("Directory scan panicked: {}", e)))??;
    Ok(names)
}
