//! Manager configuration loaded from JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{Error, Result};

const DEFAULT_MIN_RECONNECT_INTERVAL_MS: u64 = 2000;

/// Settings shared by every device record of a manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagerConfig {
	pub reconnect: ReconnectPolicy,
}

impl ManagerConfig {
	pub fn from_json_str(json: &str) -> Result<Self> {
		Ok(serde_json::from_str(json)?)
	}

	pub fn from_path(path: &Path) -> Result<Self> {
		let json = std::fs::read_to_string(path).map_err(|source| Error::ConfigIo {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_json_str(&json)
	}
}

/// What happens after a connected device drops its session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
	/// Reconnect without waiting for an explicit retry.
	pub automatic: bool,
	/// Minimum time between two connect attempts of the same device.
	pub min_interval_ms: u64,
}

impl Default for ReconnectPolicy {
	fn default() -> Self {
		Self {
			automatic: true,
			min_interval_ms: DEFAULT_MIN_RECONNECT_INTERVAL_MS,
		}
	}
}

impl ReconnectPolicy {
	pub fn min_interval(&self) -> Duration {
		Duration::from_millis(self.min_interval_ms)
	}

	/// How long to hold back a reconnect given the previous attempt time.
	pub fn delay(&self, last_attempt: Option<Instant>, now: Instant) -> Duration {
		match last_attempt {
			Some(last) => self.min_interval().saturating_sub(now.saturating_duration_since(last)),
			None => Duration::ZERO,
		}
	}
}
