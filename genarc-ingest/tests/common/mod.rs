//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use genarc_ingest::error::{FetchError, ToolError};
use genarc_ingest::model::{Headers, TagMap};
use genarc_ingest::services::{HttpFetch, MetadataTool, MetadataToolFactory};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Serves fixed bodies by URL; anything else is a 404
#[derive(Default)]
pub struct FakeFetch {
    bodies: HashMap<String, Vec<u8>>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl FakeFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: &str, body: &[u8]) -> Self {
        self.bodies.insert(url.to_string(), body.to_vec());
        self
    }
}

#[async_trait]
impl HttpFetch for FakeFetch {
    async fn download(&self, url: &str, _headers: &Headers, dest: &Path) -> Result<u64, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        match self.bodies.get(url) {
            Some(body) => {
                tokio::fs::write(dest, body).await?;
                Ok(body.len() as u64)
            }
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }

    async fn get_json(&self, url: &str, _headers: &Headers) -> Result<Value, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        Err(FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

/// What the fake metadata tool was asked to do
#[derive(Default)]
pub struct ToolLog {
    pub opened: usize,
    pub closed: usize,
    pub writes: Vec<(PathBuf, TagMap)>,
}

/// Metadata tool that answers reads from a table keyed by file name
#[derive(Clone, Default)]
pub struct FakeTools {
    pub log: Arc<Mutex<ToolLog>>,
    tags: Arc<HashMap<String, TagMap>>,
    fail_open: bool,
}

impl FakeTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags(mut self, tags: HashMap<String, TagMap>) -> Self {
        self.tags = Arc::new(tags);
        self
    }

    pub fn unavailable() -> Self {
        Self {
            fail_open: true,
            ..Default::default()
        }
    }
}

struct FakeTool {
    log: Arc<Mutex<ToolLog>>,
    tags: Arc<HashMap<String, TagMap>>,
}

#[async_trait]
impl MetadataToolFactory for FakeTools {
    async fn open(&self) -> Result<Box<dyn MetadataTool>, ToolError> {
        if self.fail_open {
            return Err(ToolError::Failed {
                tool: "fake".to_string(),
                message: "not installed".to_string(),
            });
        }
        self.log.lock().unwrap().opened += 1;
        Ok(Box::new(FakeTool {
            log: Arc::clone(&self.log),
            tags: Arc::clone(&self.tags),
        }))
    }
}

#[async_trait]
impl MetadataTool for FakeTool {
    async fn read(&mut self, path: &Path) -> Result<TagMap, ToolError> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        Ok(self.tags.get(name).cloned().unwrap_or_default())
    }

    async fn write(&mut self, path: &Path, tags: &TagMap, _flags: &[&str]) -> Result<(), ToolError> {
        self.log.lock().unwrap().writes.push((path.to_path_buf(), tags.clone()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ToolError> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// File names directly inside `dir`, sorted
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
