//! FIFO work queue in front of the pipeline
//!
//! Jobs are dequeued in submission order by a single dispatcher task. A
//! semaphore sized by the concurrency factor bounds how many jobs run at
//! once; with the default of 1 a job starts only after the previous one has
//! returned, including the release of its metadata tool.
//!
//! Progress is published on the shared [`EventBus`].

use super::pipeline::Pipeline;
use crate::providers::payload_id;
use async_trait::async_trait;
use genarc_common::events::{EventBus, QueueEvent};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Processes one queued payload; failures are handled inside
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, item: Value);
}

#[async_trait]
impl JobHandler for Pipeline {
    async fn handle(&self, item: Value) {
        if let Err(e) = self.process(item).await {
            error!(error = %e, "Creation failed");
        }
    }
}

struct Job {
    id: Uuid,
    item_id: Option<String>,
    item: Value,
}

struct QueueState {
    pending: AtomicUsize,
    running: AtomicUsize,
    events: Arc<EventBus>,
}

/// Handle for submitting jobs
pub struct WorkQueue {
    tx: Option<mpsc::UnboundedSender<Job>>,
    state: Arc<QueueState>,
    dispatcher: Option<JoinHandle<()>>,
}

impl WorkQueue {
    /// Start the dispatcher; `concurrency` below 1 is treated as 1
    pub fn new(handler: Arc<dyn JobHandler>, concurrency: usize, events: Arc<EventBus>) -> Self {
        let concurrency = concurrency.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState {
            pending: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            events,
        });
        let dispatcher = tokio::spawn(dispatch(rx, handler, Arc::clone(&state), concurrency));
        Self {
            tx: Some(tx),
            state,
            dispatcher: Some(dispatcher),
        }
    }

    /// Jobs waiting to start
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// Jobs currently being processed
    pub fn running(&self) -> usize {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Enqueue one payload at the back of the queue
    pub fn push(&self, item: Value) {
        self.enqueue(vec![item]);
    }

    /// Enqueue a batch that arrives newest first (as listing APIs return it)
    ///
    /// The batch is reversed so its oldest job runs first.
    pub fn push_batch(&self, mut items: Vec<Value>) {
        items.reverse();
        self.enqueue(items);
    }

    fn enqueue(&self, items: Vec<Value>) {
        let Some(tx) = &self.tx else {
            return;
        };
        if items.is_empty() {
            return;
        }
        let adding = items.len();
        let remain = self.state.pending.fetch_add(adding, Ordering::SeqCst);
        self.state.events.emit_lossy(QueueEvent::Added {
            adding,
            remain,
            new_remain: remain + adding,
        });
        for item in items {
            let job = Job {
                id: Uuid::new_v4(),
                item_id: payload_id(&item),
                item,
            };
            if tx.send(job).is_err() {
                self.state.pending.fetch_sub(1, Ordering::SeqCst);
                error!("Work queue dispatcher stopped; job dropped");
            }
        }
    }

    /// Stop accepting jobs and wait for every queued job to finish
    pub async fn close(mut self) {
        self.tx.take();
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(e) = dispatcher.await {
                error!(error = %e, "Work queue dispatcher panicked");
            }
        }
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<Job>,
    handler: Arc<dyn JobHandler>,
    state: Arc<QueueState>,
    concurrency: usize,
) {
    let concurrency = concurrency.min(Semaphore::MAX_PERMITS).min(u32::MAX as usize);
    let permits = Arc::new(Semaphore::new(concurrency));
    while let Some(job) = rx.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        state.pending.fetch_sub(1, Ordering::SeqCst);
        state.running.fetch_add(1, Ordering::SeqCst);
        debug!(job = %job.id, item = ?job.item_id, "Job started");
        state.events.emit_lossy(QueueEvent::Started {
            job_id: job.id,
            item_id: job.item_id.clone(),
        });

        let handler = Arc::clone(&handler);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            // Inner task so a panicking handler still reaches the bookkeeping below
            let item = job.item;
            if let Err(e) = tokio::spawn(async move { handler.handle(item).await }).await {
                error!(job = %job.id, item = ?job.item_id, error = %e, "Job panicked");
            }
            let running = state.running.fetch_sub(1, Ordering::SeqCst) - 1;
            let remain = state.pending.load(Ordering::SeqCst);
            state.events.emit_lossy(QueueEvent::Finished {
                job_id: job.id,
                item_id: job.item_id,
                remain,
            });
            if remain == 0 && running == 0 {
                info!("Work queue idle");
                state.events.emit_lossy(QueueEvent::Idle);
            }
            drop(permit);
        });
    }

    // Wait for in-flight jobs
    let all = u32::try_from(concurrency).unwrap_or(u32::MAX);
    match permits.acquire_many(all).await {
        Ok(_drained) => {}
        Err(e) => error!(error = %e, "Work queue semaphore closed"),
    };
}
