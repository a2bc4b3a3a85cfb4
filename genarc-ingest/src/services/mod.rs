//! External collaborators: HTTP, metadata tool, transcoder, hashing, files

pub mod exiftool;
pub mod file_ops;
pub mod hasher;
pub mod http;
pub mod transcode;

pub use exiftool::{ExifToolFactory, MetadataTool, MetadataToolFactory};
pub use file_ops::FileOps;
pub use http::{HttpFetch, ReqwestFetcher};
pub use transcode::{Transcoder, WebpTranscoder};
