//! Client for the Smush.it image optimization service
//!
//! Submits batches of remote URLs and local files to the service, collects
//! per-image results, and bundles the optimized images into a ZIP archive that
//! is cached locally per task.

pub mod archive;
pub mod config;
pub mod error;
pub mod mime;
pub mod orchestrator;
pub mod protocol;
pub mod record;
pub mod task;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::Smusher;
pub use record::ImageRecord;
