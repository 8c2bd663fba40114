//! Status publication contract.

use std::sync::Arc;

use topo_protocol::{DeviceIdentity, StatusSnapshot};

/// Receives snapshots as they are published. Both calls are fire-and-forget
/// and must not block the caller.
pub trait StatusNotifier: Send + Sync {
	fn publish(&self, identity: &DeviceIdentity, snapshot: Arc<StatusSnapshot>);

	/// Signals that the device's status changed; also sent when a record is removed.
	fn notify_status_changed(&self, identity: &DeviceIdentity);
}
