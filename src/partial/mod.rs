//! Component B: the partial file and its cross-process lock. Manages a
//! `.part` scratch file and a co-located `.lock` file, coordinating
//! concurrent downloaders of the same final path across processes.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use fs2::FileExt;
use thiserror::Error;

/// Polling interval while waiting for the lock. Preserved at 100ms per the
/// spec's open questions — this is also the window used for staleness
/// detection on the `.part` file's length.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum floor for the lock-wait staleness timeout, regardless of the
/// caller's configured `request_timeout_ms`.
const MIN_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

/// Grace window for accepting a concurrent writer's result: its mtime must
/// be no older than `wait_start - grace`.
const MTIME_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum PartialFileError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out waiting for partial-file lock at {0:?}")]
    Timeout(PathBuf),
    #[error("remote access check failed while waiting for lock: {0}")]
    CheckFailed(#[source] anyhow::Error),
}

/// Checks that the remote resource is still reachable. Invoked at most once
/// per lock wait, the first time a concurrent holder is observed — lets the
/// waiter fail fast instead of polling forever against a dead repository.
pub trait RemoteAccessChecker {
    fn check(&self) -> Result<(), anyhow::Error>;
}

/// A checker that never fails, for callers with nothing meaningful to probe.
pub struct AlwaysReachable;

impl RemoteAccessChecker for AlwaysReachable {
    fn check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PartialFileConfig {
    pub resume_enabled: bool,
    pub resume_threshold_bytes: u64,
    pub request_timeout_ms: u64,
}

impl Default for PartialFileConfig {
    fn default() -> Self {
        Self {
            resume_enabled: true,
            resume_threshold_bytes: 64 * 1024,
            request_timeout_ms: 0,
        }
    }
}

/// Owns the `.part` file (and, when resume is enabled, the `.lock` file
/// that guards it) for the lifetime of one download attempt. Dropping it
/// releases the lock and applies the keep/discard decision documented on
/// `new`.
pub struct PartialFile {
    part_path: PathBuf,
    lock_path: Option<PathBuf>,
    _lock_file: Option<File>,
    is_resume: bool,
    resume_enabled: bool,
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

impl PartialFile {
    /// Opens (or waits for) the partial-file session for `final_path`.
    ///
    /// When `resume_enabled` is false: creates a unique scratch temp file in
    /// `final_path`'s parent directory; no lock is taken; `is_resume()` is
    /// always false; dropping the handle deletes the temp file.
    ///
    /// When `resume_enabled` is true: acquires an exclusive advisory lock on
    /// byte 0 of `<final_path>.part.lock`, retrying at ~100ms intervals. If
    /// a concurrent downloader is observed holding the lock, `checker` is
    /// consulted exactly once; a staleness timer watches the `.part` file's
    /// length and fails with a timeout if it stalls for
    /// `max(request_timeout_ms, 3s)`. Once the lock is held, if a concurrent
    /// writer was observed and the final file's mtime is within a 100ms
    /// grace of this call's start, the other party finished successfully:
    /// returns `Ok(None)` so the caller re-reads the final file instead of
    /// downloading again.
    pub fn new(
        final_path: &Path,
        cfg: &PartialFileConfig,
        checker: &dyn RemoteAccessChecker,
    ) -> Result<Option<PartialFile>, PartialFileError> {
        if !cfg.resume_enabled {
            return Self::new_plain_temp(final_path).map(Some);
        }

        let part_path = append_suffix(final_path, ".part");
        let lock_path = append_suffix(&part_path, ".lock");

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&lock_path)?;

        let wait_start_wall = SystemTime::now();
        let wait_start_monotonic = Instant::now();
        let timeout = Duration::from_millis(cfg.request_timeout_ms).max(MIN_LOCK_TIMEOUT);
        let mut concurrent = false;
        let mut last_len: Option<u64> = None;
        let mut last_change = wait_start_monotonic;

        loop {
            match lock_file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if !concurrent {
                        concurrent = true;
                        tracing::debug!(path = ?part_path, "waiting on partial-file lock held by another writer");
                        checker.check().map_err(PartialFileError::CheckFailed)?;
                    }
                    let cur_len = std::fs::metadata(&part_path).ok().map(|m| m.len());
                    if cur_len != last_len {
                        last_len = cur_len;
                        last_change = Instant::now();
                    } else if cfg.request_timeout_ms > 0
                        && last_change.elapsed() >= timeout
                    {
                        tracing::warn!(path = ?lock_path, "partial-file lock wait timed out");
                        return Err(PartialFileError::Timeout(lock_path));
                    }
                    thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(PartialFileError::Io(e)),
            }
        }

        if concurrent {
            if let Ok(meta) = std::fs::metadata(final_path) {
                if let Ok(modified) = meta.modified() {
                    let grace_floor = wait_start_wall
                        .checked_sub(MTIME_GRACE)
                        .unwrap_or(wait_start_wall);
                    if modified >= grace_floor {
                        tracing::debug!(path = ?final_path, "concurrent writer finished first, reusing its result");
                        drop(lock_file);
                        let _ = std::fs::remove_file(&lock_path);
                        return Ok(None);
                    }
                }
            }
        }

        let part_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&part_path)?;
        let len = part_file.metadata()?.len();
        let is_resume = len >= cfg.resume_threshold_bytes;

        Ok(Some(PartialFile {
            part_path,
            lock_path: Some(lock_path),
            _lock_file: Some(lock_file),
            is_resume,
            resume_enabled: true,
        }))
    }

    fn new_plain_temp(final_path: &Path) -> Result<PartialFile, PartialFileError> {
        let dir = final_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let named = tempfile::Builder::new()
            .prefix(
                final_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "download".to_string())
                    .as_str(),
            )
            .suffix(".tmp")
            .tempfile_in(&dir)?;
        let (_file, path) = named.keep().map_err(|e| PartialFileError::Io(e.error))?;
        Ok(PartialFile {
            part_path: path,
            lock_path: None,
            _lock_file: None,
            is_resume: false,
            resume_enabled: false,
        })
    }

    pub fn is_resume(&self) -> bool {
        self.is_resume
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    pub fn len(&self) -> u64 {
        std::fs::metadata(&self.part_path)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes the `.part` file immediately, e.g. between a failed attempt
    /// and its retry when a resume offset can no longer be trusted.
    pub fn delete_part(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.part_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if let Some(lock_path) = &self.lock_path {
            // Best-effort: a lock file must never outlive its session beyond
            // program exit, but failure to remove it here is not fatal.
            let _ = std::fs::remove_file(lock_path);
        }
        if !self.resume_enabled {
            let _ = std::fs::remove_file(&self.part_path);
        }
        // When resume is enabled we deliberately leave `.part` in place: a
        // successful attempt has already renamed it away, and a failed one
        // wants it there for the next resume.
    }
}
