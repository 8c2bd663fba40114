//! Latest published snapshot per device.
//!
//! Each device record claims a slot when it is created and receives a
//! [`RecordToken`]. Publications and removals carrying another record's token
//! are refused, so a deleted record still draining its mailbox cannot
//! overwrite the snapshot of a record re-created under the same identity.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::trace;
use topo_protocol::{DeviceIdentity, StatusSnapshot};
use topo_runtime::StatusNotifier;

/// Identifies the record that currently owns a store slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordToken(u64);

struct Slot {
	token: RecordToken,
	snapshot: Option<Arc<StatusSnapshot>>,
}

/// Query side of the device records, shared between the manager and controllers.
#[derive(Clone, Default)]
pub struct SnapshotStore {
	slots: Arc<RwLock<HashMap<DeviceIdentity, Slot>>>,
	next_token: Arc<AtomicU64>,
}

impl SnapshotStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Hands the slot for `identity` to a new record.
	pub fn claim(&self, identity: &DeviceIdentity) -> RecordToken {
		let token = RecordToken(self.next_token.fetch_add(1, Ordering::Relaxed));
		self.slots.write().insert(identity.clone(), Slot { token, snapshot: None });
		token
	}

	/// Stores `snapshot` if `token` still owns the slot.
	pub fn publish(&self, identity: &DeviceIdentity, token: RecordToken, snapshot: Arc<StatusSnapshot>) -> bool {
		match self.slots.write().get_mut(identity) {
			Some(slot) if slot.token == token => {
				slot.snapshot = Some(snapshot);
				true
			}
			_ => false,
		}
	}

	/// Removes the slot if `token` still owns it.
	pub fn release(&self, identity: &DeviceIdentity, token: RecordToken) -> bool {
		let mut slots = self.slots.write();
		if slots.get(identity).is_some_and(|slot| slot.token == token) {
			slots.remove(identity);
			true
		} else {
			false
		}
	}

	/// Most recently published snapshot. Never waits on in-flight operations.
	pub fn get(&self, identity: &DeviceIdentity) -> Option<Arc<StatusSnapshot>> {
		self.slots.read().get(identity).and_then(|slot| slot.snapshot.clone())
	}

	pub fn identities(&self) -> Vec<DeviceIdentity> {
		let mut ids: Vec<_> = self.slots.read().keys().cloned().collect();
		ids.sort();
		ids
	}

	pub fn len(&self) -> usize {
		self.slots.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.slots.read().is_empty()
	}
}

/// Writes a record's snapshots to the store, then to the notifier.
#[derive(Clone)]
pub struct SnapshotPublisher {
	store: SnapshotStore,
	token: RecordToken,
	notifier: Arc<dyn StatusNotifier>,
}

impl SnapshotPublisher {
	pub fn new(store: SnapshotStore, token: RecordToken, notifier: Arc<dyn StatusNotifier>) -> Self {
		Self { store, token, notifier }
	}

	pub fn publish(&self, identity: &DeviceIdentity, snapshot: Arc<StatusSnapshot>) {
		if !self.store.publish(identity, self.token, Arc::clone(&snapshot)) {
			trace!(target = "topo.lifecycle", device = %identity, "record superseded; snapshot not published");
			return;
		}
		self.notifier.publish(identity, snapshot);
		self.notifier.notify_status_changed(identity);
	}

	pub fn remove(&self, identity: &DeviceIdentity) {
		if self.store.release(identity, self.token) {
			self.notifier.notify_status_changed(identity);
		}
	}
}
