//! Crate-wide error taxonomy.
//!
//! Every failure a caller can observe off a [`crate::worker::TransferOutcome`]
//! ends up as one of these variants. Lower layers (partial file, validator)
//! use their own narrower error types internally and convert at the worker
//! boundary, per the propagation policy: local recovery only happens at the
//! worker's retry boundary.

use std::path::PathBuf;

use thiserror::Error;

use crate::checksum::ChecksumKind;

/// Describes one expected-vs-actual checksum disagreement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumFailure {
    pub expected: String,
    pub actual: String,
    /// Whether the transporter/worker considers this worth a retry attempt.
    pub retry_worthy: bool,
}

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("resource not found: {uri}")]
    NotFound { uri: String },

    #[error("transfer failed for {uri}")]
    TransferError {
        uri: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("checksum mismatch for {algorithm} ({kind:?}): expected {expected}, actual {actual}")]
    ChecksumMismatch {
        algorithm: String,
        kind: ChecksumKind,
        expected: String,
        actual: String,
        retry_worthy: bool,
    },

    #[error("no checksum could be validated for {uri}")]
    ChecksumUnavailable { uri: String },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("timed out waiting for partial-file lock at {path:?}")]
    LockTimeout { path: PathBuf },

    #[error("connector is closed")]
    Closed,

    #[error("no connector: transporter or layout capability could not be resolved")]
    NoConnector,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<crate::partial::PartialFileError> for ConnectorError {
    fn from(e: crate::partial::PartialFileError) -> Self {
        match e {
            crate::partial::PartialFileError::Io(io) => ConnectorError::Io(io),
            crate::partial::PartialFileError::Timeout(path) => ConnectorError::LockTimeout { path },
            crate::partial::PartialFileError::CheckFailed(source) => ConnectorError::TransferError {
                uri: String::new(),
                source,
            },
        }
    }
}
