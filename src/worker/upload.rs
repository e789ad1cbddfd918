//! Component E: the upload worker. Computes every configured checksum over
//! the local file in one pass, puts the resource, then puts each sidecar the
//! layout wants published. Uploads never resume: each attempt starts a
//! single full-file transfer.

use std::fs::File;
use std::io::Cursor;
use std::sync::Arc;

use crate::checksum::calculate_file;
use crate::error::ConnectorError;
use crate::layout::Layout;
use crate::transport::{ProgressListener, TransportError, Transporter};

use super::{TransferOutcome, UploadRequest, WorkerConfig};

pub struct UploadWorker {
    transporter: Arc<dyn Transporter>,
    layout: Arc<dyn Layout>,
    config: WorkerConfig,
}

impl UploadWorker {
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
        request: &UploadRequest,
        listener: &dyn ProgressListener,
    ) -> Result<TransferOutcome, ConnectorError> {
        let resource_uri = self.layout.location_for(&request.resource);
        self.check_location_safety(&resource_uri)?;
        let sidecars = if self.config.persisted_checksums {
            self.layout
                .checksum_locations_for(&resource_uri, &self.config.algorithms)
        } else {
            Vec::new()
        };

        let computed = calculate_file(self.config.algorithms.clone(), &request.local_path)?;
        let bytes_transferred = std::fs::metadata(&request.local_path)?.len();

        let mut file = File::open(&request.local_path)?;
        self.transporter
            .put(&resource_uri, &mut file, listener)
            .map_err(|e| to_connector_error(&resource_uri, e))?;

        for (algorithm, location) in &sidecars {
            let Some(Ok(hex)) = computed.get(algorithm.name()) else {
                continue;
            };
            let mut cursor = Cursor::new(hex.as_bytes());
            if let Err(e) = self.transporter.put(location, &mut cursor, listener) {
                tracing::warn!(
                    location,
                    error = %to_connector_error(location, e),
                    "sidecar upload failed, continuing"
                );
            }
        }

        Ok(TransferOutcome::Success { bytes_transferred })
    }
}

fn to_connector_error(uri: &str, e: TransportError) -> ConnectorError {
    match e {
        TransportError::NotFound => ConnectorError::NotFound {
            uri: uri.to_string(),
        },
        TransportError::Cancelled => ConnectorError::Cancelled,
        TransportError::Other(source) => ConnectorError::TransferError {
            uri: uri.to_string(),
            source,
        },
    }
}
