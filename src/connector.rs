//! Component F: the connector facade. Owns a bounded worker pool and the
//! transporter/layout pair for one remote repository, and fans download or
//! upload requests out across the pool, blocking until every request in the
//! batch has resolved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::ConnectorConfig;
use crate::error::ConnectorError;
use crate::layout::Layout;
use crate::partial::PartialFileConfig;
use crate::transport::{NullListener, ProgressListener, Transporter};
use crate::worker::download::DownloadWorker;
use crate::worker::upload::UploadWorker;
use crate::worker::{DownloadRequest, TransferOutcome, UploadRequest, WorkerConfig};

/// One remote Maven-style repository, reachable through `transporter` at
/// locations `layout` resolves. Safe to share across threads; `get`/`put`
/// may be called concurrently from multiple callers, each fanning its own
/// batch out across the same pool.
pub struct Connector {
    pool: rayon::ThreadPool,
    transporter: Arc<dyn Transporter>,
    layout: Arc<dyn Layout>,
    config: ConnectorConfig,
    closed: AtomicBool,
}

impl Connector {
    pub fn new(
        transporter: Arc<dyn Transporter>,
        layout: Arc<dyn Layout>,
        config: ConnectorConfig,
    ) -> Result<Self, ConnectorError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads.max(1))
            .thread_name(|i| format!("connector-worker-{i}"))
            .build()
            .map_err(|e| ConnectorError::TransferError {
                uri: String::new(),
                source: e.into(),
            })?;
        tracing::info!(threads = config.threads, "connector pool started");

        Ok(Self {
            pool,
            transporter,
            layout,
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// Downloads every requested resource, each to its own final path.
    /// Returns one result per request, in request order; a failure on one
    /// request never aborts the others in the batch.
    pub fn get(
        &self,
        requests: &[DownloadRequest],
        listener: &dyn ProgressListener,
    ) -> Result<Vec<Result<TransferOutcome, ConnectorError>>, ConnectorError> {
        self.ensure_open()?;
        let worker = DownloadWorker::new(
            Arc::clone(&self.transporter),
            Arc::clone(&self.layout),
            self.worker_config(),
        );

        Ok(self
            .pool
            .install(|| requests.par_iter().map(|req| worker.run(req, listener)).collect()))
    }

    /// Uploads every requested resource. When `parallel_put` is enabled in
    /// the connector's configuration, requests (and, within each request,
    /// its sidecars) run across the pool instead of one at a time.
    pub fn put(
        &self,
        requests: &[UploadRequest],
        listener: &dyn ProgressListener,
    ) -> Result<Vec<Result<TransferOutcome, ConnectorError>>, ConnectorError> {
        self.ensure_open()?;
        let worker = UploadWorker::new(
            Arc::clone(&self.transporter),
            Arc::clone(&self.layout),
            self.worker_config(),
        );

        let run_all = || -> Vec<Result<TransferOutcome, ConnectorError>> {
            if self.config.parallel_put {
                requests.par_iter().map(|req| worker.run(req, listener)).collect()
            } else {
                requests.iter().map(|req| worker.run(req, listener)).collect()
            }
        };

        Ok(self.pool.install(run_all))
    }

    /// Closes the connector: further `get`/`put` calls fail with
    /// [`ConnectorError::Closed`], and the underlying transporter's own
    /// `close` runs once.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("connector closing");
            self.transporter.close();
        }
    }

    /// The configuration this connector was built with.
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<(), ConnectorError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ConnectorError::Closed)
        } else {
            Ok(())
        }
    }

    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            repository_root: self.config.repository_root.clone(),
            partial_file: PartialFileConfig {
                resume_enabled: self.config.resume,
                resume_threshold_bytes: self.config.resume_threshold_bytes,
                request_timeout_ms: self.config.request_timeout_ms,
            },
            algorithms: self.config.algorithms.clone(),
            policy: Arc::clone(&self.config.checksum_policy),
            checksum_fetcher: self.config.checksum_fetcher.clone(),
            provided_checksums: self.config.provided_checksums.clone(),
            file_processor: Arc::clone(&self.config.file_processor),
            smart_checksums: self.config.smart_checksums,
            persisted_checksums: self.config.persisted_checksums,
        }
    }
}

/// Convenience for callers with no progress UI: runs `get`/`put` with a
/// listener that never reports cancellation.
pub fn null_listener() -> &'static NullListener {
    &NullListener
}
