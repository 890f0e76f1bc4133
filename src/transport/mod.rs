//! HTTP transport used to talk to the optimization service
//!
//! The orchestrator only sees the [`Transport`] trait; [`HttpTransport`] is the
//! reqwest implementation with a file-backed cookie jar and [`MockTransport`]
//! is a scripted stand-in for tests.

pub mod client;
pub mod cookies;
pub mod mock;

pub use client::HttpTransport;
pub use cookies::FileCookieJar;
pub use mock::MockTransport;

use crate::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// A local file attached to a multipart request.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub field: String,
    pub path: PathBuf,
}

impl FileUpload {
    pub fn new(field: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            field: field.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` and return the body; non-2xx statuses are errors.
    async fn get(&self, url: &str) -> Result<Vec<u8>>;

    /// HEAD `url` and return the status code.
    async fn head(&self, url: &str) -> Result<u16>;

    /// POST a multipart form made of text `fields` and uploaded `files`.
    async fn post_multipart(
        &self,
        url: &str,
        fields: &[(String, String)],
        files: &[FileUpload],
    ) -> Result<Vec<u8>>;

    /// Raw bytes of a source: fetched over HTTP when it starts with `http`,
    /// read from disk otherwise.
    async fn fetch(&self, source: &str) -> Result<Vec<u8>> {
        if source.starts_with("http") {
            self.get(source).await
        } else {
            Ok(tokio::fs::read(source).await?)
        }
    }

    /// Drop all session state (cookies).
    fn clear_session(&self) -> Result<()>;
}
