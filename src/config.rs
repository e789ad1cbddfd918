//! Connector-wide configuration. A plain struct, not a file format — this
//! crate never reads configuration off disk itself; callers embedding it in
//! a CLI or service own that layer and populate this struct however they see
//! fit.

use std::sync::Arc;

use crate::checksum::{md5_algorithm, sha1_algorithm, ChecksumAlgorithm};
use crate::validator::policy::{ChecksumPolicy, StrictChecksumPolicy};
use crate::validator::{ChecksumFetcher, DefaultFileProcessor, FileProcessor, ProvidedChecksumsSource};

/// Tunables and pluggable collaborators for one [`crate::connector::Connector`].
#[derive(Clone)]
pub struct ConnectorConfig {
    /// Base URL of the remote repository. When set, every location this
    /// connector resolves is checked against
    /// [`crate::layout::is_safe_relative_location`] before use.
    pub repository_root: Option<url::Url>,
    /// Size of the blocking worker pool backing concurrent `get`/`put` calls.
    pub threads: usize,
    /// Whether a multi-sidecar upload puts its checksums concurrently with
    /// each other rather than one at a time after the main resource.
    pub parallel_put: bool,
    /// Whether `REMOTE_EXTERNAL` sidecar files are consulted on download and
    /// written on a successful commit.
    pub persisted_checksums: bool,
    /// Whether a transporter's inline ("smart") checksums can satisfy
    /// validation without a sidecar round trip.
    pub smart_checksums: bool,
    /// Whether a pre-existing `.part` file resumes a previous attempt
    /// instead of always starting over.
    pub resume: bool,
    /// Minimum `.part` size, in bytes, below which resuming is not worth the
    /// extra request machinery and a fresh download is used instead.
    pub resume_threshold_bytes: u64,
    /// Per-request timeout in milliseconds; `0` disables the bound entirely.
    pub request_timeout_ms: u64,
    /// Checksum algorithms computed for every transfer, in the order their
    /// sidecars are checked.
    pub algorithms: Vec<ChecksumAlgorithm>,
    pub checksum_policy: Arc<dyn ChecksumPolicy>,
    pub provided_checksums: Option<Arc<dyn ProvidedChecksumsSource>>,
    pub checksum_fetcher: Option<Arc<dyn ChecksumFetcher>>,
    pub file_processor: Arc<dyn FileProcessor>,
}

impl std::fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("repository_root", &self.repository_root)
            .field("threads", &self.threads)
            .field("parallel_put", &self.parallel_put)
            .field("persisted_checksums", &self.persisted_checksums)
            .field("smart_checksums", &self.smart_checksums)
            .field("resume", &self.resume)
            .field("resume_threshold_bytes", &self.resume_threshold_bytes)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            repository_root: None,
            threads: 5,
            parallel_put: true,
            persisted_checksums: true,
            smart_checksums: true,
            resume: true,
            resume_threshold_bytes: 64 * 1024,
            request_timeout_ms: 0,
            algorithms: vec![sha1_algorithm(), md5_algorithm()],
            checksum_policy: Arc::new(StrictChecksumPolicy),
            provided_checksums: None,
            checksum_fetcher: None,
            file_processor: Arc::new(DefaultFileProcessor),
        }
    }
}
