//! Active session registration (mount point) contract.

use topo_protocol::DeviceIdentity;

/// Proof that this member is exposing a device's live session.
pub trait RegistrationHandle: Send {
	/// Withdraws the registration. Calling it again has no effect.
	fn release(&mut self);
}

/// Exposes live device sessions to the rest of the system.
pub trait RegistrationSink: Send + Sync {
	fn register_active_session(&self, identity: &DeviceIdentity) -> Box<dyn RegistrationHandle>;
}
