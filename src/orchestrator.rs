//! Batch orchestration against the Smush.it service.

use crate::archive::{request_archive, ArchiveCache};
use crate::config::{Config, MAX_CONCURRENCY};
use crate::protocol::{
    parse_optimize_response, parse_subtask, DispatchOutcome, OPTIMIZE_ENDPOINT, UPLOAD_FIELD,
};
use crate::record::ImageRecord;
use crate::task::TaskState;
use crate::transport::{FileUpload, HttpTransport, Transport};
use crate::{Error, Result};
use futures::future::join_all;
use reqwest::Url;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Submits one batch of images per lifecycle and keeps its results.
///
/// `optimize` may run once; call [`Smusher::reset`] to start another batch.
/// Dropping the client deletes its cookie state.
pub struct Smusher {
    transport: Arc<dyn Transport>,
    config: Config,
    cache: ArchiveCache,
    state: TaskState,
    records: Vec<ImageRecord>,
}

impl Smusher {
    /// Build a client talking HTTP to `config.api_url`.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(HttpTransport::new(&config)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Build a client over an arbitrary transport.
    ///
    /// This is primarily useful for tests that need to inject a mock.
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        let smusher = Self {
            transport,
            cache: ArchiveCache::new(&config.cache_dir),
            config,
            state: TaskState::new(),
            records: Vec::new(),
        };
        smusher.clear_session();
        smusher
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &ArchiveCache {
        &self.cache
    }

    pub fn task(&self) -> &str {
        self.state.task()
    }

    pub fn subtask(&self) -> &str {
        self.state.subtask()
    }

    pub fn is_requested(&self) -> bool {
        self.state.is_requested()
    }

    pub fn record(&self, id: &str) -> Result<Option<&ImageRecord>> {
        self.state.ensure_requested()?;
        Ok(self.records.iter().find(|record| record.id() == id))
    }

    pub fn records(&self) -> Result<&[ImageRecord]> {
        self.state.ensure_requested()?;
        Ok(&self.records)
    }

    pub fn record_count(&self) -> Result<usize> {
        self.state.ensure_requested()?;
        Ok(self.records.len())
    }

    /// Forget the current batch and start a fresh task.
    pub fn reset(&mut self, request_binary_data: bool) {
        self.records.clear();
        self.state.reset();
        self.config.request_binary_data = request_binary_data;
        self.clear_session();
        debug!("Reset client, new task {}", self.state.task());
    }

    fn clear_session(&self) {
        if let Err(e) = self.transport.clear_session() {
            warn!("Failed to clear session state: {}", e);
        }
    }

    /// Submit `sources` (URLs or local paths) for optimization.
    ///
    /// Per-image failures are stored on the records; only bootstrap and
    /// archive failures are returned.
    pub async fn optimize<S: AsRef<str>>(
        &mut self,
        sources: &[S],
        build_archive: bool,
    ) -> Result<()> {
        self.state.ensure_not_requested()?;

        let subtask = self.bootstrap().await?;
        self.state.begin(subtask)?;
        info!(
            "Started task {} (subtask {}) with {} images",
            self.state.task(),
            self.state.subtask(),
            sources.len()
        );

        let task = self.state.task().to_string();
        self.records = sources
            .iter()
            .map(|source| ImageRecord::new(source.as_ref(), task.as_str()))
            .collect();

        let (remote, local) = self.classify().await;
        info!(
            "Dispatching {} remote and {} local images",
            remote.len(),
            local.len()
        );

        self.dispatch_class(&remote).await;
        self.dispatch_class(&local).await;

        let failed = self.records.iter().filter(|r| r.has_error()).count();
        info!(
            "Task {} finished: {} optimized, {} failed",
            task,
            self.records.len() - failed,
            failed
        );

        if build_archive {
            let subtask = self.state.subtask().to_string();
            self.archive(Some(task.as_str()), Some(subtask.as_str())).await?;
        }

        Ok(())
    }

    /// Return the ZIP of a task's optimized images.
    ///
    /// A cached archive is returned as is. Otherwise `task` and `subtask`
    /// must both be given or both omitted (meaning the current task) and the
    /// archive is requested from the service and cached.
    pub async fn archive(&self, task: Option<&str>, subtask: Option<&str>) -> Result<Vec<u8>> {
        let task = task.filter(|t| !t.is_empty());
        let subtask = subtask.filter(|s| !s.is_empty());

        let key = task.unwrap_or(self.state.task());
        if let Some(bytes) = self.cache.load(key).await? {
            return Ok(bytes);
        }

        let (task, subtask) = match (task, subtask) {
            (Some(task), Some(subtask)) => (task, subtask),
            (None, None) => (self.state.task(), self.state.subtask()),
            _ => return Err(Error::InvalidTaskPair),
        };
        self.state.ensure_requested()?;

        let bytes = request_archive(
            self.transport.as_ref(),
            &self.config,
            task,
            subtask,
            &self.records,
        )
        .await?;
        self.cache.store(task, &bytes).await?;
        Ok(bytes)
    }

    async fn bootstrap(&self) -> Result<String> {
        debug!("Bootstrapping session at {}", self.config.api_url);
        let page = self.transport.get(&self.config.api_url).await?;
        parse_subtask(&String::from_utf8_lossy(&page))
    }

    /// Probe every record and split the reachable ones by class, keeping
    /// input order. Unreachable records get their error set here.
    async fn classify(&mut self) -> (Vec<usize>, Vec<usize>) {
        let mut remote = Vec::new();
        let mut local = Vec::new();

        for i in 0..self.records.len() {
            let source = self.records[i].source().to_string();
            let is_remote = self.records[i].is_remote();

            if !self.is_available(&source, is_remote).await {
                let err = Error::RecordUnavailable(source);
                warn!("{:?}", err);
                self.records[i].set_error(err.to_string());
                continue;
            }

            if self.config.request_binary_data {
                match self.transport.fetch(&source).await {
                    Ok(bytes) => self.records[i].set_src_binary(bytes),
                    Err(e) => {
                        warn!("Could not read source {}: {}", source, e);
                        self.records[i].set_error(e.to_string());
                        continue;
                    }
                }
            }

            if is_remote {
                remote.push(i);
            } else {
                local.push(i);
            }
        }

        (remote, local)
    }

    async fn is_available(&self, source: &str, is_remote: bool) -> bool {
        if is_remote {
            // Anything but a plain 200 (redirects included) counts as missing.
            matches!(self.transport.head(source).await, Ok(200))
        } else {
            tokio::fs::metadata(source)
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false)
        }
    }

    async fn dispatch_class(&mut self, indices: &[usize]) {
        if indices.is_empty() {
            return;
        }

        let semaphore = Semaphore::new(self.config.concurrency.clamp(1, MAX_CONCURRENCY));
        let this: &Self = self;
        let results = join_all(indices.iter().map(|&i| {
            let semaphore = &semaphore;
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => return (DispatchOutcome::RecordError(e.to_string()), None),
                };
                this.dispatch(&this.records[i]).await
            }
        }))
        .await;

        for (&i, (outcome, dst_binary)) in indices.iter().zip(results) {
            let record = &mut self.records[i];
            record.apply(outcome);
            if let Some(bytes) = dst_binary {
                record.set_dst_binary(bytes);
            }
        }
    }

    async fn dispatch(&self, record: &ImageRecord) -> (DispatchOutcome, Option<Vec<u8>>) {
        let outcome = match self.submit(record).await {
            Ok(body) => parse_optimize_response(&body),
            Err(e) => DispatchOutcome::RecordError(e.to_string()),
        };

        let optimized = match &outcome {
            DispatchOutcome::Success(optimized) => optimized,
            DispatchOutcome::RecordError(error) => {
                warn!("Optimizing {} failed: {}", record.source(), error);
                return (outcome, None);
            }
        };

        info!(
            "Optimized {} -> {} ({} -> {} bytes, {:.2}%)",
            record.source(),
            optimized.destination,
            optimized.src_size,
            optimized.dst_size,
            optimized.percent
        );

        let dst_binary = if self.config.request_binary_data {
            match self.transport.get(&optimized.destination).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(
                        "Could not download optimized image {}: {}",
                        optimized.destination, e
                    );
                    None
                }
            }
        } else {
            None
        };

        (outcome, dst_binary)
    }

    /// Send one record to the optimize endpoint: remote images by url, local
    /// images as an upload.
    async fn submit(&self, record: &ImageRecord) -> Result<Vec<u8>> {
        let endpoint = self.config.endpoint(OPTIMIZE_ENDPOINT);
        let task = self.state.task();

        if record.is_remote() {
            let url = Url::parse_with_params(
                &endpoint,
                &[("img", record.source()), ("id", record.id()), ("task", task)],
            )
            .map_err(|e| Error::Config(format!("Invalid optimize endpoint: {}", e)))?;
            self.transport.get(url.as_str()).await
        } else {
            let url = Url::parse_with_params(&endpoint, &[("id", record.id()), ("task", task)])
                .map_err(|e| Error::Config(format!("Invalid optimize endpoint: {}", e)))?;
            let upload = FileUpload::new(UPLOAD_FIELD, record.source());
            self.transport
                .post_multipart(url.as_str(), &[], &[upload])
                .await
        }
    }
}

impl Drop for Smusher {
    fn drop(&mut self) {
        self.clear_session();
    }
}
