//! genarc-ingest: normalize AI image generation metadata and archive the images
//!
//! Provider payloads are detected and normalized into a canonical
//! [`model::Creation`], whose images are downloaded, tagged with a
//! generation-parameter block and stored under deterministic names next to a
//! JSON sidecar. [`reconcile`] brings existing directories to the same
//! naming scheme.

pub mod error;
pub mod ledger;
pub mod model;
pub mod params;
pub mod providers;
pub mod reconcile;
pub mod services;
pub mod store;
pub mod workflow;

pub use error::{IngestError, Result};
