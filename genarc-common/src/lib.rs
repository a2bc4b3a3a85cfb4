//! # genarc Common Library
//!
//! Shared code for the genarc workspace including:
//! - Error type and result alias
//! - Configuration loading and root folder resolution
//! - Queue progress events (QueueEvent enum) and the broadcast EventBus
//! - Time-code and local date formatting helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
