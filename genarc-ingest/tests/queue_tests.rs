//! Work queue driving the real pipeline

mod common;

use common::{FakeFetch, FakeTools};
use genarc_common::events::{EventBus, QueueEvent};
use genarc_ingest::providers::AdapterContext;
use genarc_ingest::services::WebpTranscoder;
use genarc_ingest::workflow::{Pipeline, PipelineConfig, WorkQueue};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn creation(id: &str) -> Value {
    json!({
        "__typename": "Creation",
        "id": id,
        "prompt": "a lighthouse",
        "variations": [{"id": format!("{}-1", id), "url": format!("https://cdn.test/{}.png", id)}]
    })
}

#[tokio::test]
async fn test_batch_processed_oldest_first() {
    let root = TempDir::new().unwrap();
    let fetch = FakeFetch::new()
        .with_body("https://cdn.test/100.png", b"a")
        .with_body("https://cdn.test/101.png", b"b")
        .with_body("https://cdn.test/102.png", b"c");
    let calls = Arc::clone(&fetch.calls);
    let tools = FakeTools::new();
    let log = Arc::clone(&tools.log);
    let pipeline = Pipeline::new(
        PipelineConfig {
            staging_dir: root.path().join("temp"),
            dest_dir: root.path().join("tagged"),
            meta_dir: root.path().join("tagged"),
        },
        AdapterContext::new(Arc::new(fetch)),
        Arc::new(tools),
        Arc::new(WebpTranscoder),
    );

    let events = Arc::new(EventBus::new(64));
    let mut rx = events.subscribe();
    let queue = WorkQueue::new(Arc::new(pipeline), 1, Arc::clone(&events));
    // Listing order: newest first
    queue.push_batch(vec![creation("102"), creation("101"), creation("100")]);
    queue.push(json!({"unrelated": true}));
    queue.close().await;

    assert_eq!(
        *calls.lock().unwrap(),
        vec!["https://cdn.test/100.png", "https://cdn.test/101.png", "https://cdn.test/102.png"]
    );
    for id in ["100", "101", "102"] {
        assert!(root.path().join(format!("tagged/{}.metadata.json", id)).exists());
        assert!(root.path().join(format!("tagged/{}.png", id)).exists());
    }
    // One tool session per recognized creation, each closed
    let log = log.lock().unwrap();
    assert_eq!((log.opened, log.closed), (3, 3));

    let mut finished = 0;
    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, QueueEvent::Finished { .. }) {
            finished += 1;
        }
        last = Some(event);
    }
    assert_eq!(finished, 4);
    assert_eq!(last, Some(QueueEvent::Idle));
}
