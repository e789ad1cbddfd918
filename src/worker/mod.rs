//! Components D and E: the download and upload workers. Each owns one
//! transfer attempt end to end — partial file, streaming checksum, and
//! validation — and is invoked by the connector facade from its worker
//! pool.

pub mod download;
pub mod upload;

use std::path::PathBuf;
use std::sync::Arc;

use crate::checksum::ChecksumAlgorithm;
use crate::error::ChecksumFailure;
use crate::layout::Resource;
use crate::partial::PartialFileConfig;
use crate::validator::policy::ChecksumPolicy;
use crate::validator::{ChecksumFetcher, FileProcessor, ProvidedChecksumsSource};

/// Maximum number of download attempts for a single request: the first
/// attempt plus one retry when the transporter reports the resource changed
/// out from under a resumed range request, or a policy tolerates a retry
/// after a checksum mismatch.
pub const MAX_ATTEMPTS: u32 = 2;

pub struct DownloadRequest {
    pub resource: Resource,
    pub final_path: PathBuf,
    /// When set, the worker only confirms the resource exists via
    /// `transport.peek` — no partial file, no checksum calculator, no
    /// validator, and `final_path` is never written.
    pub existence_only: bool,
}

pub struct UploadRequest {
    pub resource: Resource,
    pub local_path: PathBuf,
}

/// Collaborators and tunables shared by both workers; assembled by the
/// connector facade from its [`crate::config::ConnectorConfig`].
pub struct WorkerConfig {
    /// When set, every resolved location is checked against
    /// [`crate::layout::is_safe_relative_location`] before use.
    pub repository_root: Option<url::Url>,
    pub partial_file: PartialFileConfig,
    pub algorithms: Vec<ChecksumAlgorithm>,
    pub policy: Arc<dyn ChecksumPolicy>,
    pub checksum_fetcher: Option<Arc<dyn ChecksumFetcher>>,
    pub provided_checksums: Option<Arc<dyn ProvidedChecksumsSource>>,
    pub file_processor: Arc<dyn FileProcessor>,
    /// Whether a transporter-supplied inline ("smart") checksum may satisfy
    /// validation at all; false drops every `REMOTE_INCLUDED` value before
    /// it reaches the validator.
    pub smart_checksums: bool,
    /// Whether external sidecar files (`.sha1`, `.md5`, ...) are consulted
    /// on download or written on commit; false disables `REMOTE_EXTERNAL`
    /// entirely and skips `commit`.
    pub persisted_checksums: bool,
}

/// What a transfer attempt actually did, returned on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Bytes landed at the final path and every matched checksum was
    /// committed to its sidecar.
    Success { bytes_transferred: u64 },
    /// The bytes landed at the final path, but at least one configured
    /// algorithm's expected checksum disagreed and the policy tolerated it;
    /// that algorithm's sidecar was not written.
    Tolerated {
        bytes_transferred: u64,
        tolerated: Vec<ChecksumFailure>,
    },
    /// A concurrent writer already produced the final file while this
    /// caller was waiting on the lock; no bytes were transferred here.
    AlreadyPresent,
}
