//! Status snapshot construction.
//!
//! [`SnapshotBuilder`] is pure: it maps the previous snapshot, the configured
//! endpoint and a [`PhaseUpdate`] to the next snapshot. It only ever touches
//! the local member's entry in the cluster status list; entries authored by
//! other members are carried over as they are.

use topo_protocol::{CapabilitySet, ConnectionPhase, DeviceConfig, DeviceIdentity, MemberAddress, MemberStatusEntry, StatusSnapshot, UNKNOWN_REASON};

/// The phase a snapshot moves to, with the data only that phase may carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseUpdate {
	Connecting,
	Connected(CapabilitySet),
	UnableToConnect(Option<String>),
}

impl PhaseUpdate {
	pub fn phase(&self) -> ConnectionPhase {
		match self {
			Self::Connecting => ConnectionPhase::Connecting,
			Self::Connected(_) => ConnectionPhase::Connected,
			Self::UnableToConnect(_) => ConnectionPhase::UnableToConnect,
		}
	}
}

/// Builds snapshots authored by the local cluster member.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
	self_address: MemberAddress,
}

impl SnapshotBuilder {
	pub fn new(self_address: MemberAddress) -> Self {
		Self { self_address }
	}

	pub fn self_address(&self) -> &MemberAddress {
		&self.self_address
	}

	/// Produces the snapshot that replaces `previous`.
	///
	/// A blank failure message is replaced by [`UNKNOWN_REASON`].
	pub fn build(&self, previous: Option<&StatusSnapshot>, identity: &DeviceIdentity, config: &DeviceConfig, update: PhaseUpdate) -> StatusSnapshot {
		debug_assert!(previous.is_none_or(|p| &p.identity == identity), "snapshot built on another device's history");

		let phase = update.phase();
		let local = MemberStatusEntry {
			member: self.self_address.clone(),
			status: phase.into(),
		};

		let mut cluster_status = previous.map(|p| p.cluster_status.clone()).unwrap_or_default();
		match cluster_status.iter_mut().find(|entry| entry.member == local.member) {
			Some(entry) => *entry = local,
			None => cluster_status.push(local),
		}

		let (capabilities, connected_message) = match update {
			PhaseUpdate::Connecting => (None, None),
			PhaseUpdate::Connected(set) => (Some(set), None),
			PhaseUpdate::UnableToConnect(reason) => {
				let message = reason.filter(|r| !r.trim().is_empty()).unwrap_or_else(|| UNKNOWN_REASON.to_string());
				(None, Some(message))
			}
		};

		StatusSnapshot {
			identity: identity.clone(),
			phase,
			cluster_status,
			host: config.host.clone(),
			port: config.port,
			capabilities,
			connected_message,
		}
	}

	/// Snapshot of a freshly created device, before any connect attempt completes.
	pub fn initial(&self, identity: &DeviceIdentity, config: &DeviceConfig) -> StatusSnapshot {
		self.build(None, identity, config, PhaseUpdate::Connecting)
	}

	/// Snapshot of a device that could not be set up at all.
	pub fn failed(&self, identity: &DeviceIdentity, config: &DeviceConfig, reason: Option<String>) -> StatusSnapshot {
		self.build(None, identity, config, PhaseUpdate::UnableToConnect(reason))
	}
}
