//! The transporter capability: moves bytes on the wire. Pluggable,
//! interface only — concrete transporters (HTTP, local file, ...) are a
//! collaborator this crate consumes, never implements.

use std::collections::BTreeMap;
use std::io::{Read, Write};

/// Error classes the worker can distinguish, per the external-interfaces
/// section: not-found, cancelled, other.
#[derive(Debug)]
pub enum TransportError {
    NotFound,
    Cancelled,
    Other(anyhow::Error),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::NotFound => write!(f, "not found"),
            TransportError::Cancelled => write!(f, "cancelled"),
            TransportError::Other(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Result of a successful `get`: how many bytes were written past the
/// resume offset, any inline ("smart") checksums the response carried, and
/// whether the server told us the resource changed out from under a resume
/// attempt (e.g. a precondition-failed status on a conditional Range GET).
#[derive(Debug, Clone, Default)]
pub struct GetOutcome {
    pub bytes_written: u64,
    pub checksums: BTreeMap<String, String>,
    pub resource_changed: bool,
}

/// Progress callback; returning `Err` requests cancellation of the transfer
/// in progress.
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, bytes_so_far: u64) -> Result<(), Cancelled>;
}

/// Marker error returned by a [`ProgressListener`] to request cancellation.
#[derive(Debug, Clone, Copy)]
pub struct Cancelled;

/// A listener that never cancels. Used where the caller has no progress UI.
pub struct NullListener;

impl ProgressListener for NullListener {
    fn on_progress(&self, _bytes_so_far: u64) -> Result<(), Cancelled> {
        Ok(())
    }
}

/// The wire-level capability this connector consumes against one remote
/// repository. Thread-safety is the transporter's own responsibility —
/// the connector calls it concurrently from its worker pool.
pub trait Transporter: Send + Sync {
    /// Checks existence only, with no byte transfer.
    fn peek(&self, location: &str) -> Result<(), TransportError>;

    /// Streams `location`'s bytes into `output`, starting at `resume_offset`
    /// (0 for a fresh download). `output` is positioned by the caller; the
    /// transporter only ever appends from wherever the stream starts.
    fn get(
        &self,
        location: &str,
        output: &mut dyn Write,
        resume_offset: u64,
        listener: &dyn ProgressListener,
    ) -> Result<GetOutcome, TransportError>;

    /// Uploads the bytes read from `input` to `location`.
    fn put(
        &self,
        location: &str,
        input: &mut dyn Read,
        listener: &dyn ProgressListener,
    ) -> Result<(), TransportError>;

    fn close(&self);
}
