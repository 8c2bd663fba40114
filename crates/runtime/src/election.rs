//! Election substrate contract.

use std::sync::Arc;

use topo_protocol::{DeviceIdentity, MemberAddress};

/// Receives election outcomes for one registered candidacy.
pub trait OwnershipListener: Send + Sync {
	fn became_owner(&self);

	/// Also delivered when the substrate itself loses contact with the cluster.
	fn lost_ownership(&self);
}

/// Cluster-wide, single-owner election per device.
///
/// Registration calls are fire-and-forget; outcomes arrive later through the
/// listener.
pub trait ElectionSubstrate: Send + Sync {
	/// Address of the local member, used as snapshot authorship.
	fn self_address(&self) -> MemberAddress;

	fn register_candidate(&self, identity: &DeviceIdentity, listener: Arc<dyn OwnershipListener>);

	/// Safe to call for a device with no active candidacy.
	fn unregister_candidate(&self, identity: &DeviceIdentity);
}
