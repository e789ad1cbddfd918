//! Component D: the download worker state machine. One `run` call is one
//! logical download request; internally it may make up to
//! [`super::MAX_ATTEMPTS`] transport attempts when the remote resource
//! changes out from under a resumed range request.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::checksum::ChecksumCalculator;
use crate::error::{ChecksumFailure, ConnectorError};
use crate::layout::Layout;
use crate::partial::{PartialFile, RemoteAccessChecker};
use crate::transport::{NullListener, ProgressListener, TransportError, Transporter};
use crate::validator::{ChecksumValidator, ChecksumValidatorConfig};

use super::{DownloadRequest, TransferOutcome, WorkerConfig};

pub struct DownloadWorker {
    transporter: Arc<dyn Transporter>,
    layout: Arc<dyn Layout>,
    config: WorkerConfig,
}

/// Feeds every byte written to `file` into `calculator` as it streams off
/// the wire, so the calculator never needs a second pass over the file.
struct TeeWriter<'a> {
    file: &'a mut File,
    calculator: &'a mut ChecksumCalculator,
}

impl Write for TeeWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.file.write(buf)?;
        self.calculator.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl DownloadWorker {
    pub fn new(transporter: Arc<dyn Transporter>, layout: Arc<dyn Layout>, config: WorkerConfig) -> Self {
        Self {
            transporter,
            layout,
            config,
        }
    }

    fn check_location_safety(&self, location: &str) -> Result<(), ConnectorError> {
        match &self.config.repository_root {
            Some(root) if !crate::layout::is_safe_relative_location(root, location) => {
                Err(ConnectorError::TransferError {
                    uri: location.to_string(),
                    source: anyhow::anyhow!("location escapes repository root"),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn run(
        &self,
        request: &DownloadRequest,
        listener: &dyn ProgressListener,
    ) -> Result<TransferOutcome, ConnectorError> {
        let resource_uri = self.layout.location_for(&request.resource);
        self.check_location_safety(&resource_uri)?;

        if request.existence_only {
            return self.run_existence_only(&resource_uri);
        }

        let sidecars = if self.config.persisted_checksums {
            self.layout
                .checksum_locations_for(&resource_uri, &self.config.algorithms)
        } else {
            Vec::new()
        };

        let checker: &dyn RemoteAccessChecker = &PeekChecker {
            transporter: self.transporter.as_ref(),
            location: &resource_uri,
        };

        let validator_cfg = ChecksumValidatorConfig {
            policy: Arc::clone(&self.config.policy),
            fetcher: if self.config.persisted_checksums {
                self.config.checksum_fetcher.clone()
            } else {
                None
            },
            provided: self.config.provided_checksums.clone(),
        };
        let mut validator = ChecksumValidator::new(
            resource_uri.clone(),
            self.config.algorithms.clone(),
            sidecars,
            validator_cfg,
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(partial) =
                PartialFile::new(&request.final_path, &self.config.partial_file, checker)?
            else {
                return Ok(TransferOutcome::AlreadyPresent);
            };

            let resume_offset = if partial.is_resume() { partial.len() } else { 0 };
            if !partial.is_resume() && partial.len() > 0 {
                partial.delete_part()?;
            }

            let mut calculator =
                ChecksumCalculator::new(self.config.algorithms.clone(), partial.part_path().to_path_buf());
            calculator.init(resume_offset);

            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .open(partial.part_path())?;
            file.seek(SeekFrom::Start(resume_offset))?;

            let get_result = {
                let mut tee = TeeWriter {
                    file: &mut file,
                    calculator: &mut calculator,
                };
                self.transporter
                    .get(&resource_uri, &mut tee, resume_offset, listener)
            };

            let outcome = match get_result {
                Ok(outcome) => outcome,
                Err(TransportError::NotFound) => {
                    return Err(ConnectorError::NotFound { uri: resource_uri })
                }
                Err(TransportError::Cancelled) => return Err(ConnectorError::Cancelled),
                Err(TransportError::Other(source)) => {
                    return Err(ConnectorError::TransferError {
                        uri: resource_uri,
                        source,
                    })
                }
            };

            if outcome.resource_changed && attempt < super::MAX_ATTEMPTS {
                tracing::info!(uri = %resource_uri, "remote resource changed mid-resume, restarting from offset 0");
                partial.delete_part()?;
                continue;
            }

            file.sync_all()?;

            let computed = calculator.get();
            let remote_included = if self.config.smart_checksums {
                outcome.checksums.clone()
            } else {
                Default::default()
            };

            match validator.validate(&computed, &remote_included) {
                Ok(()) => {
                    std::fs::rename(partial.part_path(), &request.final_path)?;
                    tracing::info!(path = %request.final_path.display(), "download completed");
                    if self.config.persisted_checksums {
                        validator.commit(&request.final_path)?;
                    }
                    self.config.file_processor.process(&request.final_path).map_err(|e| {
                        ConnectorError::TransferError {
                            uri: resource_uri.clone(),
                            source: e,
                        }
                    })?;

                    let total_bytes = std::fs::metadata(&request.final_path)
                        .map(|m| m.len())
                        .unwrap_or(resume_offset + outcome.bytes_written);

                    return Ok(if validator.tolerated().is_empty() {
                        TransferOutcome::Success {
                            bytes_transferred: total_bytes,
                        }
                    } else {
                        TransferOutcome::Tolerated {
                            bytes_transferred: total_bytes,
                            tolerated: validator.tolerated().to_vec(),
                        }
                    });
                }
                Err(ConnectorError::ChecksumMismatch {
                    algorithm,
                    kind,
                    expected,
                    actual,
                    retry_worthy,
                }) => {
                    let failure = ChecksumFailure {
                        expected: expected.clone(),
                        actual: actual.clone(),
                        retry_worthy,
                    };
                    if validator.handle(&failure) {
                        tracing::warn!(uri = %resource_uri, "checksum mismatch tolerated at transfer level, skipping commit");
                        std::fs::rename(partial.part_path(), &request.final_path)?;
                        self.config.file_processor.process(&request.final_path).map_err(|e| {
                            ConnectorError::TransferError {
                                uri: resource_uri.clone(),
                                source: e,
                            }
                        })?;

                        let total_bytes = std::fs::metadata(&request.final_path)
                            .map(|m| m.len())
                            .unwrap_or(resume_offset + outcome.bytes_written);

                        let mut tolerated = validator.tolerated().to_vec();
                        tolerated.push(failure);
                        return Ok(TransferOutcome::Tolerated {
                            bytes_transferred: total_bytes,
                            tolerated,
                        });
                    } else if retry_worthy && attempt < super::MAX_ATTEMPTS {
                        tracing::warn!(uri = %resource_uri, "checksum mismatch, retrying download");
                        partial.delete_part()?;
                        validator.retry();
                        continue;
                    } else {
                        return Err(ConnectorError::ChecksumMismatch {
                            algorithm,
                            kind,
                            expected,
                            actual,
                            retry_worthy,
                        });
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `transport.peek`-only confirmation: no partial file, calculator, or
    /// validator is involved, and no bytes ever land on disk.
    fn run_existence_only(&self, resource_uri: &str) -> Result<TransferOutcome, ConnectorError> {
        match self.transporter.peek(resource_uri) {
            Ok(()) => Ok(TransferOutcome::Success { bytes_transferred: 0 }),
            Err(TransportError::NotFound) => Err(ConnectorError::NotFound {
                uri: resource_uri.to_string(),
            }),
            Err(TransportError::Cancelled) => Err(ConnectorError::Cancelled),
            Err(TransportError::Other(source)) => Err(ConnectorError::TransferError {
                uri: resource_uri.to_string(),
                source,
            }),
        }
    }
}

struct PeekChecker<'a> {
    transporter: &'a dyn Transporter,
    location: &'a str,
}

impl RemoteAccessChecker for PeekChecker<'_> {
    fn check(&self) -> Result<(), anyhow::Error> {
        self.transporter
            .peek(self.location)
            .map_err(|e| anyhow::anyhow!("{e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{md5_algorithm, sha1_algorithm, ChecksumKind};
    use crate::layout::Resource;
    use crate::partial::PartialFileConfig;
    use crate::testing::{InMemoryLayout, InMemoryTransporter};
    use crate::validator::policy::{ChecksumPolicy, StrictChecksumPolicy};
    use crate::validator::DefaultFileProcessor;
    use std::collections::BTreeMap;

    fn resource() -> Resource {
        Resource::Artifact {
            group_id: "com.example".into(),
            artifact_id: "thing".into(),
            version: "1.0".into(),
            classifier: String::new(),
            extension: "jar".into(),
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            repository_root: None,
            partial_file: PartialFileConfig::default(),
            algorithms: vec![sha1_algorithm(), md5_algorithm()],
            policy: Arc::new(StrictChecksumPolicy),
            checksum_fetcher: None,
            provided_checksums: None,
            file_processor: Arc::new(DefaultFileProcessor),
            smart_checksums: true,
            persisted_checksums: true,
        }
    }

    #[test]
    fn fresh_download_succeeds_with_no_checksums_configured() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(InMemoryLayout::default());
        let uri = layout.location_for(&resource());
        let mut files = BTreeMap::new();
        files.insert(uri, b"Hello World!".to_vec());
        let transporter = Arc::new(InMemoryTransporter::new(files));

        let worker = DownloadWorker::new(transporter, layout, config());
        let request = DownloadRequest {
            resource: resource(),
            final_path: dir.path().join("thing-1.0.jar"),
            existence_only: false,
        };

        let outcome = worker.run(&request, &NullListener).unwrap();
        assert!(matches!(outcome, TransferOutcome::Success { bytes_transferred: 12 }));
        assert!(request.final_path.exists());
    }

    #[test]
    fn missing_resource_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(InMemoryLayout::default());
        let transporter = Arc::new(InMemoryTransporter::new(BTreeMap::new()));

        let worker = DownloadWorker::new(transporter, layout, config());
        let request = DownloadRequest {
            resource: resource(),
            final_path: dir.path().join("thing-1.0.jar"),
            existence_only: false,
        };

        let err = worker.run(&request, &NullListener).unwrap_err();
        assert!(matches!(err, ConnectorError::NotFound { .. }));
    }

    #[test]
    fn existence_only_confirms_presence_without_writing_final_path() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(InMemoryLayout::default());
        let uri = layout.location_for(&resource());
        let mut files = BTreeMap::new();
        files.insert(uri, b"Hello World!".to_vec());
        let transporter = Arc::new(InMemoryTransporter::new(files));

        let worker = DownloadWorker::new(transporter, layout, config());
        let request = DownloadRequest {
            resource: resource(),
            final_path: dir.path().join("thing-1.0.jar"),
            existence_only: true,
        };

        let outcome = worker.run(&request, &NullListener).unwrap();
        assert!(matches!(
            outcome,
            TransferOutcome::Success { bytes_transferred: 0 }
        ));
        assert!(!request.final_path.exists());
    }

    #[test]
    fn existence_only_reports_not_found_for_absent_resource() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(InMemoryLayout::default());
        let transporter = Arc::new(InMemoryTransporter::new(BTreeMap::new()));

        let worker = DownloadWorker::new(transporter, layout, config());
        let request = DownloadRequest {
            resource: resource(),
            final_path: dir.path().join("thing-1.0.jar"),
            existence_only: true,
        };

        let err = worker.run(&request, &NullListener).unwrap_err();
        assert!(matches!(err, ConnectorError::NotFound { .. }));
    }

    #[test]
    fn transfer_level_tolerance_delivers_bytes_without_committing_sidecars() {
        struct TolerateOnceAfterRaisePolicy;
        impl ChecksumPolicy for TolerateOnceAfterRaisePolicy {
            fn on_match(&self, _kind: ChecksumKind, _algorithm: &str) -> bool {
                true
            }
            fn on_mismatch(
                &self,
                _kind: ChecksumKind,
                _algorithm: &str,
                expected: &str,
                actual: &str,
            ) -> Result<(), crate::error::ChecksumFailure> {
                Err(crate::error::ChecksumFailure {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                    retry_worthy: false,
                })
            }
            fn on_error(
                &self,
                _kind: ChecksumKind,
                _algorithm: &str,
                _failure: &crate::error::ChecksumFailure,
            ) {
            }
            fn on_no_more_checksums(&self) -> Result<(), crate::error::ChecksumFailure> {
                Ok(())
            }
            fn on_transfer_retry(&self) {}
            fn on_transfer_checksum_failure(&self, _failure: &crate::error::ChecksumFailure) -> bool {
                true
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(InMemoryLayout::default());
        let uri = layout.location_for(&resource());
        let mut files = BTreeMap::new();
        files.insert(uri, b"Hello World!".to_vec());
        let transporter = Arc::new(InMemoryTransporter::new(files));

        let mut provided = BTreeMap::new();
        provided.insert(
            (
                "com/example/thing/1.0/thing-1.0.jar".to_string(),
                "SHA-1".to_string(),
            ),
            "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef".to_string(),
        );

        let mut cfg = config();
        cfg.policy = Arc::new(TolerateOnceAfterRaisePolicy);
        cfg.provided_checksums = Some(Arc::new(crate::testing::InMemoryProvidedChecksums(provided)));

        let worker = DownloadWorker::new(transporter, layout, cfg);
        let request = DownloadRequest {
            resource: resource(),
            final_path: dir.path().join("thing-1.0.jar"),
            existence_only: false,
        };

        let outcome = worker.run(&request, &NullListener).unwrap();
        assert!(matches!(outcome, TransferOutcome::Tolerated { .. }));
        assert!(request.final_path.exists());
        let mut sha1_path = request.final_path.clone().into_os_string();
        sha1_path.push(".sha1");
        assert!(!std::path::Path::new(&sha1_path).exists());
    }
}
