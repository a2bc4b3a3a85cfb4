//! Per-user NightCafe ledgers
//!
//! `<user>.creations.json` maps every creation id already ingested for a
//! user to 1; `<user>.likes.json` is the list of liked creation ids. Both are
//! rewritten whole, after copying the previous version to `.bak`.

use crate::providers::nightcafe::owner_username;
use crate::providers::str_field;
use crate::store::write_with_backup;
use genarc_common::Result;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct NightCafeLedger {
    dir: PathBuf,
}

impl NightCafeLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn creations_path(&self, user: &str) -> PathBuf {
        self.dir.join(format!("{}.creations.json", user))
    }

    pub fn likes_path(&self, user: &str) -> PathBuf {
        self.dir.join(format!("{}.likes.json", user))
    }

    /// Ids recorded as ingested for `user`; `None` when no ledger exists yet
    pub async fn downloaded(&self, user: &str) -> Result<Option<Map<String, Value>>> {
        match read_json(&self.creations_path(user)).await? {
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(_) => {
                warn!(user, "Creation ledger is not a JSON object, treating as empty");
                Ok(Some(Map::new()))
            }
            None => Ok(None),
        }
    }

    pub async fn liked(&self, user: &str) -> Result<HashSet<String>> {
        let ids = match read_json(&self.likes_path(user)).await? {
            Some(Value::Array(ids)) => ids,
            _ => Vec::new(),
        };
        Ok(ids.iter().filter_map(id_text).collect())
    }

    /// Newest-first job list cut at the first job already ingested
    ///
    /// Without a ledger every job is new. With a ledger but no overlap the
    /// list is dropped, since the gap before it cannot be verified.
    pub async fn omit_previously_downloaded(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let Some(user) = docs.first().and_then(owner_username).map(str::to_string) else {
            return Ok(docs);
        };
        let Some(seen) = self.downloaded(&user).await? else {
            return Ok(docs);
        };
        let total = docs.len();
        let fresh: Vec<Value> = docs
            .into_iter()
            .take_while(|doc| !doc_id(doc).map(|id| seen.contains_key(&id)).unwrap_or(false))
            .collect();
        if fresh.len() == total {
            warn!(user = %user, jobs = total, "No overlap with previously ingested creations; fetch further back");
            return Ok(Vec::new());
        }
        Ok(fresh)
    }

    /// New jobs in ingestion order (oldest first), uploads left out unless upscaled
    pub async fn filter_new_creations(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut fresh = omit_uploads(self.omit_previously_downloaded(docs).await?, true);
        fresh.reverse();
        Ok(fresh)
    }

    /// Record jobs as ingested for the user that owns the first of them
    pub async fn register_downloaded(&self, docs: &[Value]) -> Result<usize> {
        let Some(user) = docs.first().and_then(owner_username) else {
            return Ok(0);
        };
        let mut ledger = self.downloaded(user).await?.unwrap_or_default();
        let mut added = 0;
        for doc in docs {
            match doc_id(doc) {
                Some(id) => {
                    if ledger.insert(id, Value::from(1)).is_none() {
                        added += 1;
                    }
                }
                None => warn!(user, "Job without id not recorded"),
            }
        }
        write_with_backup(&self.creations_path(user), &Value::Object(ledger)).await?;
        info!(user, added, "Updated creation ledger");
        Ok(added)
    }

    /// Append liked creation ids for `user`
    pub async fn register_liked(&self, user: &str, docs: &[Value]) -> Result<usize> {
        let path = self.likes_path(user);
        let mut ids = match read_json(&path).await? {
            Some(Value::Array(ids)) => ids,
            _ => Vec::new(),
        };
        let mut known: HashSet<String> = ids.iter().filter_map(id_text).collect();
        let before = ids.len();
        for id in docs.iter().filter_map(|doc| doc.get("id")) {
            if id_text(id).map(|text| known.insert(text)).unwrap_or(false) {
                ids.push(id.clone());
            }
        }
        let added = ids.len() - before;
        if added > 0 {
            write_with_backup(&path, &Value::Array(ids)).await?;
        }
        Ok(added)
    }
}

/// Drop upload jobs, keeping those that carry an upscale when `unless_upscaled`
pub fn omit_uploads(docs: Vec<Value>, unless_upscaled: bool) -> Vec<Value> {
    docs.into_iter()
        .filter(|doc| {
            if str_field(doc, "jobType") != Some("upload") {
                return true;
            }
            unless_upscaled
                && doc
                    .get("progressImages")
                    .and_then(Value::as_array)
                    .map(|imgs| imgs.iter().any(|img| str_field(img, "iteration") == Some("upscale")))
                    .unwrap_or(false)
        })
        .collect()
}

/// Drop jobs created by any of `users`
pub fn omit_own_creations(docs: Vec<Value>, users: &[String]) -> Vec<Value> {
    if users.is_empty() {
        return docs;
    }
    docs.into_iter()
        .filter(|doc| !owner_username(doc).map(|u| users.iter().any(|own| own == u)).unwrap_or(false))
        .collect()
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn doc_id(doc: &Value) -> Option<String> {
    doc.get("id").and_then(id_text)
}

async fn read_json(path: &Path) -> Result<Option<Value>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn job(id: &str) -> Value {
        json!({"id": id, "status": "done", "userInfo": {"username": "me"}})
    }

    #[tokio::test]
    async fn test_without_ledger_everything_is_new() {
        let dir = TempDir::new().unwrap();
        let ledger = NightCafeLedger::new(dir.path());
        let docs = vec![job("c"), job("b"), job("a")];
        let fresh = ledger.filter_new_creations(docs).await.unwrap();
        let ids: Vec<&str> = fresh.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_truncates_at_first_known_job() {
        let dir = TempDir::new().unwrap();
        let ledger = NightCafeLedger::new(dir.path());
        assert_eq!(ledger.register_downloaded(&[job("a"), job("b")]).await.unwrap(), 2);

        let fresh = ledger
            .omit_previously_downloaded(vec![job("d"), job("c"), job("b"), job("a")])
            .await
            .unwrap();
        assert_eq!(fresh.len(), 2);
        assert_eq!(fresh[0]["id"], "d");

        // No overlap at all
        let none = ledger.omit_previously_downloaded(vec![job("x"), job("y")]).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_register_keeps_backup() {
        let dir = TempDir::new().unwrap();
        let ledger = NightCafeLedger::new(dir.path());
        ledger.register_downloaded(&[job("a")]).await.unwrap();
        ledger.register_downloaded(&[job("b"), job("a")]).await.unwrap();

        let current = ledger.downloaded("me").await.unwrap().unwrap();
        assert_eq!(current.len(), 2);
        let backup: Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("me.creations.json.bak")).unwrap()).unwrap();
        assert_eq!(backup, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_likes_ledger() {
        let dir = TempDir::new().unwrap();
        let ledger = NightCafeLedger::new(dir.path());
        assert_eq!(ledger.register_liked("me", &[job("x"), job("y")]).await.unwrap(), 2);
        let liked = ledger.liked("me").await.unwrap();
        assert!(liked.contains("x") && liked.contains("y"));
    }

    #[tokio::test]
    async fn test_likes_ledger_ignores_repeats() {
        let dir = TempDir::new().unwrap();
        let ledger = NightCafeLedger::new(dir.path());
        ledger.register_liked("me", &[job("x"), job("y")]).await.unwrap();
        assert_eq!(ledger.register_liked("me", &[job("y"), job("z"), job("z")]).await.unwrap(), 1);

        let stored: Value = serde_json::from_slice(&std::fs::read(ledger.likes_path("me")).unwrap()).unwrap();
        assert_eq!(stored, json!(["x", "y", "z"]));
    }

    #[test]
    fn test_omit_uploads_keeps_upscaled() {
        let docs = vec![
            json!({"id": "1", "jobType": "upload"}),
            json!({"id": "2", "jobType": "upload", "progressImages": [{"iteration": "upscale"}]}),
            json!({"id": "3", "jobType": "generate"}),
        ];
        let kept = omit_uploads(docs.clone(), true);
        assert_eq!(kept.len(), 2);
        assert_eq!(omit_uploads(docs, false).len(), 1);
    }

    #[test]
    fn test_omit_own_creations() {
        let docs = vec![job("a"), json!({"id": "b", "userInfo": {"username": "other"}})];
        let kept = omit_own_creations(docs, &["me".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0]["id"], "b");
    }
}
