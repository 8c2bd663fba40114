//! Configured device endpoint.

use serde::{Deserialize, Serialize};

/// Configuration a device record is created or updated with.
///
/// Only `host` and `port` flow into the status snapshot; the remaining fields
/// are handed to the session layer untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
	pub host: String,
	pub port: u16,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub username: Option<String>,
	#[serde(default)]
	pub tcp_only: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub keepalive_delay_secs: Option<u64>,
}

impl DeviceConfig {
	pub fn new(host: impl Into<String>, port: u16) -> Self {
		Self {
			host: host.into(),
			port,
			username: None,
			tcp_only: false,
			keepalive_delay_secs: None,
		}
	}

	/// Returns `host:port`, bracketing IPv6 literals.
	pub fn endpoint(&self) -> String {
		if self.host.contains(':') {
			format!("[{}]:{}", self.host, self.port)
		} else {
			format!("{}:{}", self.host, self.port)
		}
	}
}
