//! In-memory collaborators for exercising the connector without a network.
//! Gated behind `test-util` so integration tests in other crates can depend
//! on this crate with that feature enabled without shipping these doubles
//! in a production build.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use crate::checksum::ChecksumAlgorithm;
use crate::layout::{default_checksum_locations, Layout, Resource};
use crate::transport::{Cancelled, GetOutcome, ProgressListener, TransportError, Transporter};
use crate::validator::{ChecksumFetcher, FetchOutcome, ProvidedChecksumsSource};

/// Maven-style repository layout: `group/with/slashes/artifact/version/...`.
#[derive(Default)]
pub struct InMemoryLayout;

impl Layout for InMemoryLayout {
    fn location_for(&self, resource: &Resource) -> String {
        match resource {
            Resource::Artifact {
                group_id,
                artifact_id,
                version,
                classifier,
                extension,
            } => {
                let group_path = group_id.replace('.', "/");
                let classifier_part = if classifier.is_empty() {
                    String::new()
                } else {
                    format!("-{classifier}")
                };
                format!(
                    "{group_path}/{artifact_id}/{version}/{artifact_id}-{version}{classifier_part}.{extension}"
                )
            }
            Resource::Metadata {
                group_id,
                artifact_id,
                version,
                file,
            } => {
                let mut path = group_id.replace('.', "/");
                if let Some(a) = artifact_id {
                    path.push('/');
                    path.push_str(a);
                }
                if let Some(v) = version {
                    path.push('/');
                    path.push_str(v);
                }
                path.push('/');
                path.push_str(file);
                path
            }
        }
    }

    fn checksum_locations_for(
        &self,
        resource_uri: &str,
        algorithms: &[ChecksumAlgorithm],
    ) -> Vec<(ChecksumAlgorithm, String)> {
        default_checksum_locations(resource_uri, algorithms)
    }
}

/// A repository held entirely in memory: a map from location to bytes,
/// guarded by a mutex so it can be shared across the worker pool's threads
/// exactly like a real transporter's connection pool would be.
#[derive(Default, Clone)]
pub struct InMemoryTransporter {
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryTransporter {
    pub fn new(files: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            files: Arc::new(Mutex::new(files)),
        }
    }

    pub fn stored(&self, location: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(location).cloned()
    }

    pub fn insert(&self, location: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files.lock().unwrap().insert(location.into(), bytes.into());
    }
}

impl Transporter for InMemoryTransporter {
    fn peek(&self, location: &str) -> Result<(), TransportError> {
        if self.files.lock().unwrap().contains_key(location) {
            Ok(())
        } else {
            Err(TransportError::NotFound)
        }
    }

    fn get(
        &self,
        location: &str,
        output: &mut dyn Write,
        resume_offset: u64,
        listener: &dyn ProgressListener,
    ) -> Result<GetOutcome, TransportError> {
        let files = self.files.lock().unwrap();
        let Some(bytes) = files.get(location) else {
            return Err(TransportError::NotFound);
        };
        let offset = resume_offset as usize;
        if offset > bytes.len() {
            return Err(TransportError::Other(anyhow::anyhow!(
                "resume offset {offset} beyond length {}",
                bytes.len()
            )));
        }
        let slice = &bytes[offset..];
        output
            .write_all(slice)
            .map_err(|e| TransportError::Other(e.into()))?;
        listener
            .on_progress(bytes.len() as u64)
            .map_err(|Cancelled| TransportError::Cancelled)?;
        Ok(GetOutcome {
            bytes_written: slice.len() as u64,
            checksums: BTreeMap::new(),
            resource_changed: false,
        })
    }

    fn put(
        &self,
        location: &str,
        input: &mut dyn Read,
        _listener: &dyn ProgressListener,
    ) -> Result<(), TransportError> {
        let mut buf = Vec::new();
        input
            .read_to_end(&mut buf)
            .map_err(|e| TransportError::Other(e.into()))?;
        self.files.lock().unwrap().insert(location.to_string(), buf);
        Ok(())
    }

    fn close(&self) {}
}

/// A fixed map of provided checksums, keyed by `(resource_uri, algorithm)`.
#[derive(Default)]
pub struct InMemoryProvidedChecksums(pub BTreeMap<(String, String), String>);

impl ProvidedChecksumsSource for InMemoryProvidedChecksums {
    fn provided_checksum(&self, resource_uri: &str, algorithm: &str) -> Option<String> {
        self.0
            .get(&(resource_uri.to_string(), algorithm.to_string()))
            .cloned()
    }
}

/// Fetches external sidecars straight out of an [`InMemoryTransporter`].
pub struct InMemoryChecksumFetcher(pub InMemoryTransporter);

impl ChecksumFetcher for InMemoryChecksumFetcher {
    fn fetch(&self, location: &str) -> Result<FetchOutcome, anyhow::Error> {
        match self.0.stored(location) {
            Some(bytes) => Ok(FetchOutcome::Found(String::from_utf8_lossy(&bytes).into_owned())),
            None => Ok(FetchOutcome::NotFound),
        }
    }
}
