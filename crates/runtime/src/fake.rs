//! In-memory collaborators for testing device records without a cluster.
//!
//! # Example
//!
//! ```ignore
//! let (session, controller) = FakeSessionBuilder::new().build();
//! let election = Arc::new(FakeElection::new(MemberAddress::new("member-1")));
//!
//! // ... create a device against `session` and `election` ...
//!
//! let pending = controller.next_connect().await.unwrap();
//! let listener = pending.succeed(NegotiatedCapabilities::default());
//! election.grant(&identity);
//! listener.device_disconnected();
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use topo_protocol::{DeviceConfig, DeviceIdentity, MemberAddress, NegotiatedCapabilities, StatusSnapshot};

use crate::election::{ElectionSubstrate, OwnershipListener};
use crate::error::SessionError;
use crate::notifier::StatusNotifier;
use crate::registration::{RegistrationHandle, RegistrationSink};
use crate::session::{SessionLayer, SessionListener};

/// A call made on a [`FakeSessionLayer`], in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
	/// Recorded when the connect call starts.
	Connect { identity: DeviceIdentity, port: u16 },
	/// Recorded when the disconnect call completes.
	Disconnect(DeviceIdentity),
}

/// Builder for a fake session layer and its controller.
pub struct FakeSessionBuilder {
	disconnect_error: Option<SessionError>,
	disconnect_delay: Option<Duration>,
}

impl FakeSessionBuilder {
	pub fn new() -> Self {
		Self {
			disconnect_error: None,
			disconnect_delay: None,
		}
	}

	/// Makes every `disconnect` call fail with `error` (after recording it).
	pub fn disconnect_error(mut self, error: SessionError) -> Self {
		self.disconnect_error = Some(error);
		self
	}

	/// Makes every `disconnect` call take `delay` before it completes.
	pub fn disconnect_delay(mut self, delay: Duration) -> Self {
		self.disconnect_delay = Some(delay);
		self
	}

	/// Returns the session layer to inject and a controller for completing
	/// its connect calls.
	pub fn build(self) -> (Arc<FakeSessionLayer>, FakeSessionController) {
		let (pending_tx, pending_rx) = mpsc::unbounded_channel();
		let calls = Arc::new(Mutex::new(Vec::new()));

		let session = Arc::new(FakeSessionLayer {
			pending_tx,
			calls: Arc::clone(&calls),
			disconnect_error: self.disconnect_error,
			disconnect_delay: self.disconnect_delay,
		});
		let controller = FakeSessionController {
			pending_rx: tokio::sync::Mutex::new(pending_rx),
			calls,
		};

		(session, controller)
	}
}

impl Default for FakeSessionBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Session layer whose connect calls stay pending until the test resolves them.
pub struct FakeSessionLayer {
	pending_tx: mpsc::UnboundedSender<PendingConnect>,
	calls: Arc<Mutex<Vec<SessionCall>>>,
	disconnect_error: Option<SessionError>,
	disconnect_delay: Option<Duration>,
}

#[async_trait]
impl SessionLayer for FakeSessionLayer {
	async fn connect(&self, identity: &DeviceIdentity, config: &DeviceConfig, listener: Arc<dyn SessionListener>) -> Result<NegotiatedCapabilities, SessionError> {
		self.calls.lock().push(SessionCall::Connect {
			identity: identity.clone(),
			port: config.port,
		});
		let (responder, response) = oneshot::channel();
		let pending = PendingConnect {
			identity: identity.clone(),
			config: config.clone(),
			listener,
			responder,
		};
		if self.pending_tx.send(pending).is_err() {
			return Err(SessionError::Closed);
		}
		response.await.unwrap_or(Err(SessionError::Closed))
	}

	async fn disconnect(&self, identity: &DeviceIdentity) -> Result<(), SessionError> {
		if let Some(delay) = self.disconnect_delay {
			tokio::time::sleep(delay).await;
		}
		self.calls.lock().push(SessionCall::Disconnect(identity.clone()));
		match &self.disconnect_error {
			Some(error) => Err(error.clone()),
			None => Ok(()),
		}
	}
}

/// A connect call waiting for the test to decide its outcome.
pub struct PendingConnect {
	pub identity: DeviceIdentity,
	pub config: DeviceConfig,
	listener: Arc<dyn SessionListener>,
	responder: oneshot::Sender<Result<NegotiatedCapabilities, SessionError>>,
}

impl PendingConnect {
	pub fn listener(&self) -> Arc<dyn SessionListener> {
		Arc::clone(&self.listener)
	}

	/// Whether the caller stopped waiting for this connect.
	pub fn is_abandoned(&self) -> bool {
		self.responder.is_closed()
	}

	/// Completes the call successfully and returns the session's listener.
	pub fn succeed(self, capabilities: NegotiatedCapabilities) -> Arc<dyn SessionListener> {
		let _ = self.responder.send(Ok(capabilities));
		self.listener
	}

	pub fn fail(self, error: SessionError) -> Arc<dyn SessionListener> {
		let _ = self.responder.send(Err(error));
		self.listener
	}
}

/// Test-side handle of a [`FakeSessionLayer`].
pub struct FakeSessionController {
	pending_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PendingConnect>>,
	calls: Arc<Mutex<Vec<SessionCall>>>,
}

impl FakeSessionController {
	/// Waits for the next connect call.
	pub async fn next_connect(&self) -> Option<PendingConnect> {
		self.pending_rx.lock().await.recv().await
	}

	/// Returns a connect call that has already been issued, if any.
	pub fn try_next_connect(&self) -> Option<PendingConnect> {
		self.pending_rx.try_lock().ok()?.try_recv().ok()
	}

	/// Every connect and completed disconnect, oldest first.
	pub fn calls(&self) -> Vec<SessionCall> {
		self.calls.lock().clone()
	}

	/// Identities whose `disconnect` completed, in completion order.
	pub fn disconnects(&self) -> Vec<DeviceIdentity> {
		self.calls
			.lock()
			.iter()
			.filter_map(|call| match call {
				SessionCall::Disconnect(identity) => Some(identity.clone()),
				SessionCall::Connect { .. } => None,
			})
			.collect()
	}
}

#[derive(Default)]
struct ElectionState {
	candidates: HashMap<DeviceIdentity, Arc<dyn OwnershipListener>>,
	registrations: usize,
	unregistrations: usize,
}

/// Election substrate where the test decides who wins.
pub struct FakeElection {
	self_address: MemberAddress,
	state: Mutex<ElectionState>,
}

impl FakeElection {
	pub fn new(self_address: MemberAddress) -> Self {
		Self {
			self_address,
			state: Mutex::new(ElectionState::default()),
		}
	}

	pub fn is_candidate(&self, identity: &DeviceIdentity) -> bool {
		self.state.lock().candidates.contains_key(identity)
	}

	/// Listener of the current candidacy for `identity`.
	pub fn listener(&self, identity: &DeviceIdentity) -> Option<Arc<dyn OwnershipListener>> {
		self.state.lock().candidates.get(identity).cloned()
	}

	/// Declares the local member owner. Returns `false` when not a candidate.
	pub fn grant(&self, identity: &DeviceIdentity) -> bool {
		let Some(listener) = self.listener(identity) else {
			return false;
		};
		listener.became_owner();
		true
	}

	/// Takes ownership away from the local member.
	pub fn revoke(&self, identity: &DeviceIdentity) -> bool {
		let Some(listener) = self.listener(identity) else {
			return false;
		};
		listener.lost_ownership();
		true
	}

	pub fn registrations(&self) -> usize {
		self.state.lock().registrations
	}

	pub fn unregistrations(&self) -> usize {
		self.state.lock().unregistrations
	}
}

impl ElectionSubstrate for FakeElection {
	fn self_address(&self) -> MemberAddress {
		self.self_address.clone()
	}

	fn register_candidate(&self, identity: &DeviceIdentity, listener: Arc<dyn OwnershipListener>) {
		let mut state = self.state.lock();
		state.registrations += 1;
		state.candidates.insert(identity.clone(), listener);
	}

	fn unregister_candidate(&self, identity: &DeviceIdentity) {
		let mut state = self.state.lock();
		state.unregistrations += 1;
		state.candidates.remove(identity);
	}
}

#[derive(Default)]
struct SinkState {
	live: HashMap<DeviceIdentity, usize>,
	registered: usize,
	released: usize,
}

/// Registration sink that counts live handles per device.
#[derive(Default)]
pub struct FakeRegistrationSink {
	state: Arc<Mutex<SinkState>>,
}

impl FakeRegistrationSink {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of unreleased handles for `identity`.
	pub fn live(&self, identity: &DeviceIdentity) -> usize {
		self.state.lock().live.get(identity).copied().unwrap_or(0)
	}

	pub fn registered(&self) -> usize {
		self.state.lock().registered
	}

	pub fn released(&self) -> usize {
		self.state.lock().released
	}
}

impl RegistrationSink for FakeRegistrationSink {
	fn register_active_session(&self, identity: &DeviceIdentity) -> Box<dyn RegistrationHandle> {
		let mut state = self.state.lock();
		state.registered += 1;
		*state.live.entry(identity.clone()).or_default() += 1;
		Box::new(FakeRegistration {
			identity: identity.clone(),
			state: Arc::clone(&self.state),
			released: false,
		})
	}
}

struct FakeRegistration {
	identity: DeviceIdentity,
	state: Arc<Mutex<SinkState>>,
	released: bool,
}

impl RegistrationHandle for FakeRegistration {
	fn release(&mut self) {
		if self.released {
			return;
		}
		self.released = true;

		let mut state = self.state.lock();
		state.released += 1;
		if let Some(live) = state.live.get_mut(&self.identity) {
			*live = live.saturating_sub(1);
		}
	}
}

/// Notifier that records every publication and lets tests await a state.
pub struct RecordingNotifier {
	published: Mutex<Vec<(DeviceIdentity, Arc<StatusSnapshot>)>>,
	changes: Mutex<Vec<DeviceIdentity>>,
	version: watch::Sender<u64>,
}

impl RecordingNotifier {
	pub fn new() -> Self {
		Self {
			published: Mutex::new(Vec::new()),
			changes: Mutex::new(Vec::new()),
			version: watch::Sender::new(0),
		}
	}

	/// Snapshots published for `identity`, oldest first.
	pub fn published(&self, identity: &DeviceIdentity) -> Vec<Arc<StatusSnapshot>> {
		self.published
			.lock()
			.iter()
			.filter(|(id, _)| id == identity)
			.map(|(_, snapshot)| Arc::clone(snapshot))
			.collect()
	}

	pub fn latest(&self, identity: &DeviceIdentity) -> Option<Arc<StatusSnapshot>> {
		self.published
			.lock()
			.iter()
			.rev()
			.find(|(id, _)| id == identity)
			.map(|(_, snapshot)| Arc::clone(snapshot))
	}

	pub fn change_count(&self, identity: &DeviceIdentity) -> usize {
		self.changes.lock().iter().filter(|id| *id == identity).count()
	}

	/// Waits until the latest snapshot for `identity` satisfies `predicate`.
	pub async fn wait_for<F>(&self, identity: &DeviceIdentity, predicate: F) -> Arc<StatusSnapshot>
	where
		F: Fn(&StatusSnapshot) -> bool,
	{
		let mut version = self.version.subscribe();
		loop {
			if let Some(snapshot) = self.latest(identity).filter(|snapshot| predicate(snapshot)) {
				return snapshot;
			}
			let _ = version.changed().await;
		}
	}
}

impl Default for RecordingNotifier {
	fn default() -> Self {
		Self::new()
	}
}

impl StatusNotifier for RecordingNotifier {
	fn publish(&self, identity: &DeviceIdentity, snapshot: Arc<StatusSnapshot>) {
		self.published.lock().push((identity.clone(), snapshot));
		self.version.send_modify(|version| *version += 1);
	}

	fn notify_status_changed(&self, identity: &DeviceIdentity) {
		self.changes.lock().push(identity.clone());
		self.version.send_modify(|version| *version += 1);
	}
}
