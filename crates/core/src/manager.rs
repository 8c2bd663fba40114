//! Entry point for managing device records on one cluster member.
//!
//! [`TopologyManager`] keeps one mailbox task per device. Operations are
//! forwarded to the device's task and return as soon as the event is queued;
//! status queries read the [`SnapshotStore`] and never wait on a device.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use topo_protocol::{DeviceConfig, DeviceIdentity, StatusSnapshot};
use topo_runtime::{ElectionSubstrate, RegistrationSink, SessionLayer, StatusNotifier};

use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::event::DeviceEvent;
use crate::lifecycle::ConnectionLifecycleController;
use crate::store::{SnapshotPublisher, SnapshotStore};

/// External services a device record talks to.
#[derive(Clone)]
pub struct Collaborators {
	pub session: Arc<dyn SessionLayer>,
	pub election: Arc<dyn ElectionSubstrate>,
	pub registrations: Arc<dyn RegistrationSink>,
	pub notifier: Arc<dyn StatusNotifier>,
}

struct DeviceHandle {
	mailbox: mpsc::UnboundedSender<DeviceEvent>,
	/// `None` while [`TopologyManager::create`] is still starting the record.
	task: Option<JoinHandle<()>>,
}

impl DeviceHandle {
	fn is_running(&self) -> bool {
		!self.mailbox.is_closed() && self.task.as_ref().is_none_or(|task| !task.is_finished())
	}
}

/// Device records hosted by this member.
///
/// # Panics
///
/// [`create`](Self::create) spawns tasks and must be called from within a
/// Tokio runtime.
pub struct TopologyManager {
	config: ManagerConfig,
	collaborators: Collaborators,
	store: SnapshotStore,
	devices: Mutex<HashMap<DeviceIdentity, DeviceHandle>>,
}

impl TopologyManager {
	pub fn new(config: ManagerConfig, collaborators: Collaborators) -> Self {
		Self {
			config,
			collaborators,
			store: SnapshotStore::new(),
			devices: Mutex::new(HashMap::new()),
		}
	}

	pub fn config(&self) -> &ManagerConfig {
		&self.config
	}

	pub fn store(&self) -> &SnapshotStore {
		&self.store
	}

	/// Creates a device record and starts connecting to it.
	///
	/// The Connecting snapshot is readable through
	/// [`current_status`](Self::current_status) when this returns. The device
	/// map is not locked while that snapshot is published, so a notifier may
	/// call back into the manager.
	pub fn create(&self, identity: DeviceIdentity, config: DeviceConfig) -> Result<()> {
		let (tx, rx) = mpsc::unbounded_channel();
		{
			let mut devices = self.devices.lock();
			if devices.get(&identity).is_some_and(DeviceHandle::is_running) {
				return Err(Error::DeviceExists(identity));
			}
			devices.insert(identity.clone(), DeviceHandle { mailbox: tx.clone(), task: None });
		}

		info!(target = "topo.manager", device = %identity, endpoint = %config.endpoint(), "creating device record");
		let publisher = SnapshotPublisher::new(self.store.clone(), self.store.claim(&identity), Arc::clone(&self.collaborators.notifier));
		let mut controller = ConnectionLifecycleController::new(identity.clone(), &self.collaborators, publisher, self.config.reconnect.clone(), &tx);
		controller.create(config);
		let task = tokio::spawn(run_device(controller, rx));

		// Events queued while starting, including a delete, are already in the mailbox.
		match self.devices.lock().get_mut(&identity) {
			Some(handle) if handle.mailbox.same_channel(&tx) => handle.task = Some(task),
			_ => debug!(target = "topo.manager", device = %identity, "record removed while starting"),
		}
		Ok(())
	}

	/// Replaces the configuration and reconnects.
	pub fn update(&self, identity: &DeviceIdentity, config: DeviceConfig) -> Result<()> {
		self.send(identity, DeviceEvent::Update(config))
	}

	/// Requests a fresh connect attempt after a failure.
	pub fn retry(&self, identity: &DeviceIdentity) -> Result<()> {
		self.send(identity, DeviceEvent::Retry)
	}

	/// Deletes a device record and waits for its task to finish.
	///
	/// The registration handle is released and the snapshot removed before
	/// this returns.
	pub async fn delete(&self, identity: &DeviceIdentity) -> Result<()> {
		let handle = self.devices.lock().remove(identity).ok_or_else(|| Error::UnknownDevice(identity.clone()))?;
		Self::stop(identity, handle).await;
		Ok(())
	}

	/// Latest snapshot of a device.
	pub fn current_status(&self, identity: &DeviceIdentity) -> Result<Arc<StatusSnapshot>> {
		self.store.get(identity).ok_or_else(|| Error::UnknownDevice(identity.clone()))
	}

	/// Identities of the hosted records, sorted.
	pub fn devices(&self) -> Vec<DeviceIdentity> {
		let mut identities: Vec<_> = self.devices.lock().keys().cloned().collect();
		identities.sort();
		identities
	}

	/// Deletes every record.
	pub async fn shutdown(&self) {
		let handles: Vec<_> = self.devices.lock().drain().collect();
		info!(target = "topo.manager", devices = handles.len(), "shutting down");
		for (identity, handle) in handles {
			Self::stop(&identity, handle).await;
		}
	}

	fn send(&self, identity: &DeviceIdentity, event: DeviceEvent) -> Result<()> {
		let devices = self.devices.lock();
		let handle = devices.get(identity).ok_or_else(|| Error::UnknownDevice(identity.clone()))?;
		handle.mailbox.send(event).map_err(|_| Error::UnknownDevice(identity.clone()))
	}

	async fn stop(identity: &DeviceIdentity, handle: DeviceHandle) {
		let DeviceHandle { mailbox, task } = handle;
		let _ = mailbox.send(DeviceEvent::Delete);
		drop(mailbox);

		let Some(task) = task else {
			debug!(target = "topo.manager", device = %identity, "record still starting; delete queued");
			return;
		};
		if let Err(err) = task.await {
			warn!(target = "topo.manager", device = %identity, error = %err, "device task ended abnormally");
		}
	}
}

async fn run_device(mut controller: ConnectionLifecycleController, mut mailbox: mpsc::UnboundedReceiver<DeviceEvent>) {
	while let Some(event) = mailbox.recv().await {
		if controller.handle(event).is_break() {
			break;
		}
	}

	if !controller.is_terminated() {
		debug!(target = "topo.manager", device = %controller.identity(), "mailbox closed; tearing record down");
		controller.delete();
	}
	controller.closed().await;
	debug!(target = "topo.manager", device = %controller.identity(), "device task stopped");
}
