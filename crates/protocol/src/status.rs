//! Connection phases and the published status snapshot.

use serde::{Deserialize, Serialize};

use crate::capability::CapabilitySet;
use crate::identity::{DeviceIdentity, MemberAddress};

/// Message used when a failure carries no description of its own.
pub const UNKNOWN_REASON: &str = "Unknown reason";

/// Connection phase of a device as seen by one cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionPhase {
	Connecting,
	Connected,
	UnableToConnect,
}

/// Whether this member currently holds the device's ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OwnershipState {
	Owner,
	#[default]
	NotOwner,
}

impl OwnershipState {
	pub fn is_owner(self) -> bool {
		matches!(self, Self::Owner)
	}
}

/// Per-member view of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemberStatus {
	Unavailable,
	Connected,
	Failed,
}

impl From<ConnectionPhase> for MemberStatus {
	fn from(phase: ConnectionPhase) -> Self {
		match phase {
			ConnectionPhase::Connecting => Self::Unavailable,
			ConnectionPhase::Connected => Self::Connected,
			ConnectionPhase::UnableToConnect => Self::Failed,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatusEntry {
	pub member: MemberAddress,
	pub status: MemberStatus,
}

/// Immutable status record published for a device on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
	pub identity: DeviceIdentity,
	pub phase: ConnectionPhase,
	pub cluster_status: Vec<MemberStatusEntry>,
	pub host: String,
	pub port: u16,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub capabilities: Option<CapabilitySet>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub connected_message: Option<String>,
}

impl StatusSnapshot {
	/// Looks up the status entry reported by `member`.
	pub fn member_status(&self, member: &MemberAddress) -> Option<MemberStatus> {
		self.cluster_status
			.iter()
			.find(|entry| &entry.member == member)
			.map(|entry| entry.status)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn phase_maps_onto_member_status() {
		assert_eq!(MemberStatus::from(ConnectionPhase::Connecting), MemberStatus::Unavailable);
		assert_eq!(MemberStatus::from(ConnectionPhase::Connected), MemberStatus::Connected);
		assert_eq!(MemberStatus::from(ConnectionPhase::UnableToConnect), MemberStatus::Failed);
	}

	#[test]
	fn snapshot_serializes_with_operational_field_names() {
		let snapshot = StatusSnapshot {
			identity: DeviceIdentity::new("r1", "topology-netconf"),
			phase: ConnectionPhase::UnableToConnect,
			cluster_status: vec![MemberStatusEntry {
				member: MemberAddress::new("m1"),
				status: MemberStatus::Failed,
			}],
			host: "10.0.0.1".to_string(),
			port: 830,
			capabilities: None,
			connected_message: Some(UNKNOWN_REASON.to_string()),
		};

		let json = serde_json::to_value(&snapshot).unwrap();
		assert_eq!(json["phase"], "unable-to-connect");
		assert_eq!(json["clusterStatus"][0]["status"], "failed");
		assert_eq!(json["connectedMessage"], "Unknown reason");
		assert!(json.get("capabilities").is_none());
	}
}
