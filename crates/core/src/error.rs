//! Error types for device record operations.

use std::path::PathBuf;

use thiserror::Error;
use topo_protocol::DeviceIdentity;

/// Errors returned to callers of [`TopologyManager`](crate::TopologyManager).
///
/// Connection problems are not errors: they show up in the device's status
/// snapshot instead.
#[derive(Debug, Error)]
pub enum Error {
	#[error("device {0} already exists")]
	DeviceExists(DeviceIdentity),

	#[error("device {0} is not managed by this member")]
	UnknownDevice(DeviceIdentity),

	#[error("failed to read configuration from {path}: {source}")]
	ConfigIo {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid configuration: {0}")]
	Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
