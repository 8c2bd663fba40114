//! Ownership gate for a device's registration handle.
//!
//! The coordinator never decides who owns a device. It registers the device
//! as an election candidate, records the outcomes the substrate reports, and
//! keeps the [`RegistrationHandle`] alive exactly while this member owns the
//! device.

use std::sync::Arc;

use tracing::{debug, info};
use topo_protocol::{DeviceIdentity, OwnershipState};
use topo_runtime::{ElectionSubstrate, OwnershipListener, RegistrationHandle, RegistrationSink};

use crate::generation::Generation;

pub struct OwnershipCoordinator {
	identity: DeviceIdentity,
	election: Arc<dyn ElectionSubstrate>,
	registrations: Arc<dyn RegistrationSink>,
	candidacy: Option<Generation>,
	ownership: OwnershipState,
	registration: Option<Box<dyn RegistrationHandle>>,
}

impl OwnershipCoordinator {
	pub fn new(identity: DeviceIdentity, election: Arc<dyn ElectionSubstrate>, registrations: Arc<dyn RegistrationSink>) -> Self {
		Self {
			identity,
			election,
			registrations,
			candidacy: None,
			ownership: OwnershipState::NotOwner,
			registration: None,
		}
	}

	pub fn ownership(&self) -> OwnershipState {
		self.ownership
	}

	pub fn has_registration(&self) -> bool {
		self.registration.is_some()
	}

	/// Whether an election signal issued under `generation` is still current.
	pub fn accepts(&self, generation: Generation) -> bool {
		self.candidacy == Some(generation)
	}

	/// Begins (or resumes) candidacy for `generation`.
	pub fn enter_election(&mut self, generation: Generation, listener: Arc<dyn OwnershipListener>) {
		if self.candidacy == Some(generation) {
			return;
		}
		if self.candidacy.is_some() {
			self.withdraw();
		}

		debug!(target = "topo.ownership", device = %self.identity, %generation, "registering election candidate");
		self.election.register_candidate(&self.identity, listener);
		self.candidacy = Some(generation);
	}

	/// Returns `false` when this member already owned the device.
	pub fn on_became_owner(&mut self) -> bool {
		if self.ownership.is_owner() {
			return false;
		}

		self.release_registration();
		self.registration = Some(self.registrations.register_active_session(&self.identity));
		self.ownership = OwnershipState::Owner;
		info!(target = "topo.ownership", device = %self.identity, "became owner; session registered");
		true
	}

	/// Returns `false` when this member did not own the device.
	pub fn on_lost_ownership(&mut self) -> bool {
		if !self.ownership.is_owner() {
			return false;
		}

		self.release_registration();
		self.ownership = OwnershipState::NotOwner;
		info!(target = "topo.ownership", device = %self.identity, "lost ownership; session unregistered");
		true
	}

	/// Leaves the election. Safe to call without an active candidacy.
	pub fn withdraw(&mut self) {
		if let Some(generation) = self.candidacy.take() {
			debug!(target = "topo.ownership", device = %self.identity, %generation, "withdrawing election candidate");
			self.election.unregister_candidate(&self.identity);
		}
		self.on_lost_ownership();
	}

	pub fn release_registration(&mut self) {
		if let Some(mut registration) = self.registration.take() {
			registration.release();
		}
	}
}

/// A record dropped without a delete still leaves the election and releases
/// its registration.
impl Drop for OwnershipCoordinator {
	fn drop(&mut self) {
		if self.candidacy.is_some() || self.registration.is_some() {
			debug!(target = "topo.ownership", device = %self.identity, "coordinator dropped; cleaning up");
		}
		self.withdraw();
		self.release_registration();
	}
}
