//! ZIP archive of a task's optimized images
//!
//! Archives are requested from the service once and then cached on disk as
//! `<cache_dir>/<task>.zip`. Cached files never expire; callers remove them
//! with [`ArchiveCache::invalidate`].

use crate::config::Config;
use crate::protocol::{parse_archive_response, ARCHIVE_ENDPOINT};
use crate::record::ImageRecord;
use crate::transport::Transport;
use crate::{Error, Result};
use reqwest::Url;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// On-disk store of built archives, one file per task.
pub struct ArchiveCache {
    dir: PathBuf,
}

impl ArchiveCache {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Cache path for a task's archive; rejects names that are not plain
    /// file names.
    pub fn path_for(&self, task: &str) -> Result<PathBuf> {
        if task.is_empty() || task.contains(['/', '\\']) || task == "." || task == ".." {
            return Err(Error::Config(format!("Invalid task identifier: {:?}", task)));
        }
        Ok(self.dir.join(format!("{}.zip", task)))
    }

    /// Cached bytes for `task`, or `None` when nothing was stored yet.
    pub async fn load(&self, task: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(task)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                debug!("Archive cache hit: {}", path.display());
                Ok(Some(tokio::fs::read(&path).await?))
            }
            _ => Ok(None),
        }
    }

    /// Write `bytes` as the archive of `task`, creating the cache directory.
    pub async fn store(&self, task: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(task)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, bytes).await?;
        info!("Cached archive ({} bytes) at {}", bytes.len(), path.display());
        Ok(path)
    }

    /// Remove the cached archive of `task`; returns whether one existed.
    pub async fn invalidate(&self, task: &str) -> Result<bool> {
        let path = self.path_for(task)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Form fields listing the destination of every successful record, in batch
/// order. Indices only count included records.
pub fn archive_fields(records: &[ImageRecord]) -> Vec<(String, String)> {
    records
        .iter()
        .filter(|record| !record.has_error())
        .filter_map(|record| record.destination())
        .enumerate()
        .map(|(i, destination)| (format!("list[{}]", i), destination.to_string()))
        .collect()
}

/// Ask the service to bundle `records` and download the resulting ZIP.
pub async fn request_archive(
    transport: &dyn Transport,
    config: &Config,
    task: &str,
    subtask: &str,
    records: &[ImageRecord],
) -> Result<Vec<u8>> {
    let url = Url::parse_with_params(
        &config.endpoint(ARCHIVE_ENDPOINT),
        &[("task", format!("{}-{}", task, subtask))],
    )
    .map_err(|e| Error::Config(format!("Invalid archive endpoint: {}", e)))?;

    let fields = archive_fields(records);
    info!(
        "Requesting archive for task {} ({} images)",
        task,
        fields.len()
    );

    let body = transport.post_multipart(url.as_str(), &fields, &[]).await?;
    let archive_url = parse_archive_response(&body)?;

    debug!("Downloading archive from {}", archive_url);
    transport.get(&archive_url).await
}
