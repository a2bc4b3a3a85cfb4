//! Ingestion workflow
//!
//! [`Pipeline`] ingests one payload; [`WorkQueue`] feeds it payloads in
//! order, one at a time unless configured otherwise.

pub mod pipeline;
pub mod queue;

pub use pipeline::{Pipeline, PipelineConfig, ProcessOutcome};
pub use queue::{JobHandler, WorkQueue};
