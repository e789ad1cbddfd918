//! Repository connector core: transfers artifacts and metadata to and from
//! a single remote Maven-style repository, resuming interrupted downloads
//! and validating every transfer against whatever checksums are available.

pub mod checksum;
pub mod config;
pub mod connector;
pub mod error;
pub mod layout;
pub mod partial;
pub mod transport;
pub mod validator;
pub mod worker;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::ConnectorConfig;
pub use connector::Connector;
pub use error::{ChecksumFailure, ConnectorError};
pub use layout::{Layout, Resource};
pub use transport::Transporter;
pub use worker::{DownloadRequest, TransferOutcome, UploadRequest};
