//! Component A: the checksum calculator. Streams bytes through N digest
//! algorithms in one pass, supporting a starting data offset for resumed
//! downloads.

mod algorithm;

pub use algorithm::{md5_algorithm, sha1_algorithm, sha256_algorithm, sha512_algorithm, ChecksumAlgorithm};

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;

const PRIME_BUF_SIZE: usize = 64 * 1024;

/// Provenance of an expected checksum value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumKind {
    /// Supplied by a trusted local source (e.g. a lockfile).
    Provided,
    /// Piggy-backed on the artifact response itself (e.g. a response header).
    RemoteIncluded,
    /// Fetched as a separate sidecar file.
    RemoteExternal,
}

/// Per-algorithm failure recorded by the calculator. Never global: a
/// corrupt or unsupported algorithm must not mask the others.
#[derive(Debug, Clone, Error)]
pub enum CalcError {
    #[error("failed priming digest from partial file: {0}")]
    Io(String),
}

/// One configured algorithm's live digest state plus its error slot.
struct Slot {
    algorithm: ChecksumAlgorithm,
    digest: Box<dyn digest::DynDigest + Send>,
    error: Option<CalcError>,
}

/// Streams bytes through every configured algorithm at once. A single
/// calculator is owned by one download worker for the duration of one
/// transfer attempt; `init` resets it for reuse across retries.
pub struct ChecksumCalculator {
    slots: Vec<Slot>,
    part_path: PathBuf,
}

impl ChecksumCalculator {
    /// `algorithms` is deduplicated by name, first occurrence wins.
    /// `part_path` is the on-disk `.part` file `init` primes from when
    /// resuming.
    pub fn new(algorithms: Vec<ChecksumAlgorithm>, part_path: PathBuf) -> Self {
        let mut slots = Vec::with_capacity(algorithms.len());
        for algorithm in algorithms {
            if slots.iter().any(|s: &Slot| s.algorithm == algorithm) {
                continue;
            }
            let digest = algorithm.new_digest();
            slots.push(Slot {
                algorithm,
                digest,
                error: None,
            });
        }
        Self { slots, part_path }
    }

    /// Resets every digest. If `data_offset > 0`, reads exactly that many
    /// bytes from the `.part` file on disk and feeds them into every digest
    /// before returning. If the file is shorter than `data_offset`, every
    /// algorithm's error slot is set instead of propagating an error —
    /// the download fails soft at `get()`.
    pub fn init(&mut self, data_offset: u64) {
        for slot in &mut self.slots {
            slot.digest.reset();
            slot.error = None;
        }
        if data_offset == 0 {
            return;
        }
        if let Err(e) = self.prime(data_offset) {
            let msg = e.to_string();
            for slot in &mut self.slots {
                slot.error = Some(CalcError::Io(msg.clone()));
            }
        }
    }

    fn prime(&mut self, data_offset: u64) -> std::io::Result<()> {
        let mut file = File::open(&self.part_path)?;
        let mut remaining = data_offset;
        let mut buf = [0u8; PRIME_BUF_SIZE];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = file.read(&mut buf[..want])?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "partial file {} is shorter than resume offset {data_offset}",
                        self.part_path.display()
                    ),
                ));
            }
            for slot in &mut self.slots {
                if slot.error.is_none() {
                    slot.digest.update(&buf[..n]);
                }
            }
            remaining -= n as u64;
        }
        Ok(())
    }

    /// Feeds `buffer` into every digest whose error slot is empty. Takes a
    /// plain byte slice, so there is no cursor to preserve across calls —
    /// callers may reuse their own buffer freely between calls.
    pub fn update(&mut self, buffer: &[u8]) {
        for slot in &mut self.slots {
            if slot.error.is_none() {
                slot.digest.update(buffer);
            }
        }
    }

    /// Finalizes every digest, returning a lowercase hex string or the
    /// accumulated error for each configured algorithm name.
    pub fn get(&mut self) -> BTreeMap<String, Result<String, CalcError>> {
        self.slots
            .iter_mut()
            .map(|slot| {
                let value = match &slot.error {
                    Some(e) => Err(e.clone()),
                    None => Ok(hex::encode(slot.digest.finalize_reset())),
                };
                (slot.algorithm.name().to_string(), value)
            })
            .collect()
    }

    pub fn algorithms(&self) -> Vec<ChecksumAlgorithm> {
        self.slots.iter().map(|s| s.algorithm.clone()).collect()
    }
}

/// Streams `path` through `algorithms` from offset 0, used by the upload
/// worker which never resumes.
pub fn calculate_file(
    algorithms: Vec<ChecksumAlgorithm>,
    path: &Path,
) -> std::io::Result<BTreeMap<String, Result<String, CalcError>>> {
    let mut calculator = ChecksumCalculator::new(algorithms, path.to_path_buf());
    calculator.init(0);
    let mut file = File::open(path)?;
    let mut buf = [0u8; PRIME_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        calculator.update(&buf[..n]);
    }
    Ok(calculator.get())
}
