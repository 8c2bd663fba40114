//! Device mailbox events and the listeners that feed them.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;
use topo_protocol::{DeviceConfig, DeviceIdentity, NegotiatedCapabilities, OwnershipState};
use topo_runtime::{OwnershipListener, SessionError, SessionListener};

use crate::generation::Generation;

/// Everything a device record reacts to, in mailbox arrival order.
#[derive(Debug)]
pub enum DeviceEvent {
	Update(DeviceConfig),
	Retry,
	Delete,
	ConnectCompleted {
		generation: Generation,
		result: Result<NegotiatedCapabilities, SessionError>,
	},
	DeviceDisconnected {
		generation: Generation,
	},
	DeviceFailed {
		generation: Generation,
		reason: Option<String>,
	},
	Notification {
		generation: Generation,
		name: String,
	},
	OwnershipChanged {
		generation: Generation,
		ownership: OwnershipState,
	},
	ReconnectDue {
		generation: Generation,
	},
}

/// Sending half of a device mailbox that does not keep the mailbox open.
#[derive(Clone)]
pub(crate) struct MailboxRef {
	identity: DeviceIdentity,
	sender: mpsc::WeakUnboundedSender<DeviceEvent>,
}

impl MailboxRef {
	pub(crate) fn new(identity: DeviceIdentity, sender: &mpsc::UnboundedSender<DeviceEvent>) -> Self {
		Self {
			identity,
			sender: sender.downgrade(),
		}
	}

	/// Returns a strong sender while the device record is alive.
	pub(crate) fn upgrade(&self) -> Option<mpsc::UnboundedSender<DeviceEvent>> {
		self.sender.upgrade()
	}

	pub(crate) fn send(&self, event: DeviceEvent) {
		let delivered = self.upgrade().is_some_and(|sender| sender.send(event).is_ok());
		if !delivered {
			trace!(target = "topo.lifecycle", device = %self.identity, "mailbox closed; event dropped");
		}
	}
}

/// Session listener bound to one device generation.
pub(crate) struct SessionSignals {
	mailbox: MailboxRef,
	generation: Generation,
}

impl SessionSignals {
	pub(crate) fn new(mailbox: MailboxRef, generation: Generation) -> Arc<Self> {
		Arc::new(Self { mailbox, generation })
	}
}

impl SessionListener for SessionSignals {
	fn device_disconnected(&self) {
		self.mailbox.send(DeviceEvent::DeviceDisconnected { generation: self.generation });
	}

	fn device_failed(&self, reason: Option<String>) {
		self.mailbox.send(DeviceEvent::DeviceFailed {
			generation: self.generation,
			reason,
		});
	}

	fn notification(&self, name: &str) {
		self.mailbox.send(DeviceEvent::Notification {
			generation: self.generation,
			name: name.to_string(),
		});
	}
}

/// Election listener bound to one candidacy.
pub(crate) struct OwnershipSignals {
	mailbox: MailboxRef,
	generation: Generation,
}

impl OwnershipSignals {
	pub(crate) fn new(mailbox: MailboxRef, generation: Generation) -> Arc<Self> {
		Arc::new(Self { mailbox, generation })
	}

	fn send(&self, ownership: OwnershipState) {
		self.mailbox.send(DeviceEvent::OwnershipChanged {
			generation: self.generation,
			ownership,
		});
	}
}

impl OwnershipListener for OwnershipSignals {
	fn became_owner(&self) {
		self.send(OwnershipState::Owner);
	}

	fn lost_ownership(&self) {
		self.send(OwnershipState::NotOwner);
	}
}
