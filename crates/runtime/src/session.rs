//! Session layer contract.

use std::sync::Arc;

use async_trait::async_trait;
use topo_protocol::{DeviceConfig, DeviceIdentity, NegotiatedCapabilities};

use crate::error::SessionError;

/// Out-of-band signals delivered by the session layer after a connect call.
///
/// Implementations must return immediately; they are invoked from the session
/// layer's own tasks.
pub trait SessionListener: Send + Sync {
	/// The device dropped its session after having been connected.
	fn device_disconnected(&self);

	/// The device failed; `reason` is `None` when no description is available.
	fn device_failed(&self, reason: Option<String>);

	/// A device notification arrived on the live session.
	fn notification(&self, name: &str) {
		let _ = name;
	}
}

/// Opens and closes transport sessions to devices.
#[async_trait]
pub trait SessionLayer: Send + Sync {
	/// Connects to the device and negotiates capabilities.
	///
	/// `listener` stays valid for the lifetime of the resulting session and
	/// receives its disconnect/failure signals.
	async fn connect(&self, identity: &DeviceIdentity, config: &DeviceConfig, listener: Arc<dyn SessionListener>) -> Result<NegotiatedCapabilities, SessionError>;

	/// Closes the device's session, if any.
	async fn disconnect(&self, identity: &DeviceIdentity) -> Result<(), SessionError>;
}
