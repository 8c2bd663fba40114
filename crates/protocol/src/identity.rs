//! Device and cluster member identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Immutable key addressing a device for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
	pub node_id: String,
	pub topology_id: String,
}

impl DeviceIdentity {
	pub fn new(node_id: impl Into<String>, topology_id: impl Into<String>) -> Self {
		Self {
			node_id: node_id.into(),
			topology_id: topology_id.into(),
		}
	}
}

impl fmt::Display for DeviceIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.topology_id, self.node_id)
	}
}

/// Address of a cluster member, as reported by the election substrate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberAddress(String);

impl MemberAddress {
	pub fn new(address: impl Into<String>) -> Self {
		Self(address.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for MemberAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for MemberAddress {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}
