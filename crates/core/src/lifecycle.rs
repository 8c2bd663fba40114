//! Per-device connection lifecycle.
//!
//! [`ConnectionLifecycleController`] owns everything mutable about one device
//! record: its phase, generation, configuration, last snapshot and ownership
//! coordinator. It is driven from a single mailbox task, so none of this state
//! is shared.
//!
//! Each input is first filtered by generation, then looked up in the
//! [`transition`] table; the controller executes the resulting effects in
//! order. Session-layer calls are spawned and report back through the mailbox,
//! so no input ever waits on the network.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use topo_protocol::{CapabilitySet, DeviceConfig, DeviceIdentity, NegotiatedCapabilities, OwnershipState, StatusSnapshot};
use topo_runtime::{SessionError, SessionLayer};

use crate::capabilities::CapabilityAggregator;
use crate::config::ReconnectPolicy;
use crate::event::{DeviceEvent, MailboxRef, OwnershipSignals, SessionSignals};
use crate::generation::Generation;
use crate::manager::Collaborators;
use crate::ownership::OwnershipCoordinator;
use crate::snapshot::{PhaseUpdate, SnapshotBuilder};
use crate::store::SnapshotPublisher;
use crate::transition::{CompositeState, Effect, InputKind, LifecyclePhase, transition};

/// An input with its payload, after generation filtering.
#[derive(Debug)]
enum Input {
	Create(DeviceConfig),
	ConnectSucceeded(NegotiatedCapabilities),
	ConnectFailed(SessionError),
	Update(DeviceConfig),
	Retry,
	ReconnectDue,
	Delete,
	DeviceDisconnected,
	DeviceFailed(Option<String>),
	BecameOwner,
	LostOwnership,
}

impl Input {
	fn kind(&self) -> InputKind {
		match self {
			Self::Create(_) => InputKind::Create,
			Self::ConnectSucceeded(_) => InputKind::ConnectSucceeded,
			Self::ConnectFailed(_) => InputKind::ConnectFailed,
			Self::Update(_) => InputKind::Update,
			Self::Retry => InputKind::Retry,
			Self::ReconnectDue => InputKind::ReconnectDue,
			Self::Delete => InputKind::Delete,
			Self::DeviceDisconnected => InputKind::DeviceDisconnected,
			Self::DeviceFailed(_) => InputKind::DeviceFailed,
			Self::BecameOwner => InputKind::BecameOwner,
			Self::LostOwnership => InputKind::LostOwnership,
		}
	}
}

/// State machine of one device record on this member.
pub struct ConnectionLifecycleController {
	identity: DeviceIdentity,
	phase: LifecyclePhase,
	generation: Generation,
	config: Option<DeviceConfig>,
	current: Option<Arc<StatusSnapshot>>,
	builder: SnapshotBuilder,
	aggregator: CapabilityAggregator,
	ownership: OwnershipCoordinator,
	session: Arc<dyn SessionLayer>,
	publisher: SnapshotPublisher,
	policy: ReconnectPolicy,
	last_attempt: Option<Instant>,
	connecting: Option<JoinHandle<()>>,
	closes_requested: u64,
	closes_done: Arc<watch::Sender<u64>>,
	mailbox: MailboxRef,
}

impl ConnectionLifecycleController {
	/// Creates an uninitialized record whose completions are posted to `mailbox`.
	///
	/// The controller only keeps a weak reference to `mailbox`.
	pub fn new(identity: DeviceIdentity, collaborators: &Collaborators, publisher: SnapshotPublisher, policy: ReconnectPolicy, mailbox: &tokio::sync::mpsc::UnboundedSender<DeviceEvent>) -> Self {
		Self {
			ownership: OwnershipCoordinator::new(identity.clone(), Arc::clone(&collaborators.election), Arc::clone(&collaborators.registrations)),
			builder: SnapshotBuilder::new(collaborators.election.self_address()),
			aggregator: CapabilityAggregator::new(),
			session: Arc::clone(&collaborators.session),
			mailbox: MailboxRef::new(identity.clone(), mailbox),
			identity,
			phase: LifecyclePhase::Uninitialized,
			generation: Generation::initial(),
			config: None,
			current: None,
			publisher,
			policy,
			last_attempt: None,
			connecting: None,
			closes_requested: 0,
			closes_done: Arc::new(watch::Sender::new(0)),
		}
	}

	pub fn identity(&self) -> &DeviceIdentity {
		&self.identity
	}

	pub fn phase(&self) -> LifecyclePhase {
		self.phase
	}

	pub fn generation(&self) -> Generation {
		self.generation
	}

	pub fn state(&self) -> CompositeState {
		CompositeState::new(self.phase, self.ownership.ownership())
	}

	pub fn ownership(&self) -> &OwnershipCoordinator {
		&self.ownership
	}

	pub fn config(&self) -> Option<&DeviceConfig> {
		self.config.as_ref()
	}

	/// Last snapshot this record published.
	pub fn current_snapshot(&self) -> Option<&Arc<StatusSnapshot>> {
		self.current.as_ref()
	}

	pub fn is_terminated(&self) -> bool {
		self.phase == LifecyclePhase::Terminated
	}

	/// Waits until every session close requested so far has completed.
	///
	/// A record is only gone once this returns after [`delete`](Self::delete);
	/// until then a close for its identity may still reach the session layer.
	pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
		let requested = self.closes_requested;
		let mut closes_done = self.closes_done.subscribe();
		async move {
			let _ = closes_done.wait_for(|done| *done >= requested).await;
		}
	}

	/// Dispatches one mailbox event. Breaks once the record is terminated.
	pub fn handle(&mut self, event: DeviceEvent) -> ControlFlow<()> {
		match event {
			DeviceEvent::Update(config) => self.update(config),
			DeviceEvent::Retry => self.retry(),
			DeviceEvent::Delete => self.delete(),
			DeviceEvent::ConnectCompleted { generation, result } => match result {
				Ok(capabilities) => self.on_connect_succeeded(generation, capabilities),
				Err(error) => self.on_connect_failed(generation, error),
			},
			DeviceEvent::DeviceDisconnected { generation } => self.on_device_disconnected(generation),
			DeviceEvent::DeviceFailed { generation, reason } => self.on_device_failed(generation, reason),
			DeviceEvent::Notification { generation, name } => self.on_notification(generation, &name),
			DeviceEvent::OwnershipChanged { generation, ownership } => self.on_ownership_changed(generation, ownership),
			DeviceEvent::ReconnectDue { generation } => self.on_reconnect_due(generation),
		}

		if self.is_terminated() { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
	}

	/// Publishes the Connecting snapshot, then starts connecting.
	pub fn create(&mut self, config: DeviceConfig) {
		self.apply(Input::Create(config));
	}

	/// Tears the current session down and reconnects with `config`.
	pub fn update(&mut self, config: DeviceConfig) {
		self.apply(Input::Update(config));
	}

	/// Starts a fresh connect attempt with the current configuration.
	pub fn retry(&mut self) {
		self.apply(Input::Retry);
	}

	pub fn delete(&mut self) {
		self.apply(Input::Delete);
	}

	pub fn on_connect_succeeded(&mut self, generation: Generation, capabilities: NegotiatedCapabilities) {
		if self.is_current(generation, "connect success") {
			self.apply(Input::ConnectSucceeded(capabilities));
		}
	}

	/// Connect failures take the same path as device failures.
	pub fn on_connect_failed(&mut self, generation: Generation, error: SessionError) {
		if self.is_current(generation, "connect failure") {
			warn!(target = "topo.lifecycle", device = %self.identity, error = %error, "connection to device failed");
			self.apply(Input::ConnectFailed(error));
		}
	}

	pub fn on_device_disconnected(&mut self, generation: Generation) {
		if self.is_current(generation, "disconnect signal") {
			self.apply(Input::DeviceDisconnected);
		}
	}

	pub fn on_device_failed(&mut self, generation: Generation, reason: Option<String>) {
		if self.is_current(generation, "failure signal") {
			self.apply(Input::DeviceFailed(reason));
		}
	}

	pub fn on_notification(&mut self, generation: Generation, name: &str) {
		if self.is_current(generation, "notification") {
			trace!(target = "topo.lifecycle", device = %self.identity, notification = name, "device notification ignored");
		}
	}

	/// Election outcomes are only accepted for the active candidacy.
	pub fn on_ownership_changed(&mut self, generation: Generation, ownership: OwnershipState) {
		if !self.ownership.accepts(generation) {
			trace!(target = "topo.lifecycle", device = %self.identity, %generation, ?ownership, "dropping election signal for inactive candidacy");
			return;
		}
		self.apply(match ownership {
			OwnershipState::Owner => Input::BecameOwner,
			OwnershipState::NotOwner => Input::LostOwnership,
		});
	}

	pub fn on_reconnect_due(&mut self, generation: Generation) {
		if self.is_current(generation, "reconnect timer") {
			self.apply(Input::ReconnectDue);
		}
	}

	fn is_current(&self, generation: Generation, what: &str) -> bool {
		if generation == self.generation {
			return true;
		}
		trace!(target = "topo.lifecycle", device = %self.identity, stale = %generation, current = %self.generation, "dropping stale {what}");
		false
	}

	fn apply(&mut self, input: Input) {
		let from = self.state();
		let kind = input.kind();
		let step = transition(from, kind);
		if step.is_noop(from) {
			trace!(target = "topo.lifecycle", device = %self.identity, state = ?from, input = ?kind, "input has no effect");
			return;
		}

		debug!(
			target = "topo.lifecycle",
			device = %self.identity,
			generation = %self.generation,
			from = ?from,
			to = ?step.next,
			input = ?kind,
			"transition"
		);
		for effect in step.effects {
			self.run(*effect, &input);
		}
		self.phase = step.next.phase;
		debug_assert_eq!(self.ownership.ownership(), step.next.ownership, "ownership diverged from the transition table");
	}

	fn run(&mut self, effect: Effect, input: &Input) {
		match effect {
			Effect::StoreConfig => {
				if let Input::Create(config) | Input::Update(config) = input {
					self.config = Some(config.clone());
				}
			}
			Effect::ReleaseRegistration => self.ownership.release_registration(),
			Effect::WithdrawCandidacy => self.ownership.withdraw(),
			Effect::CloseSession => self.close_session(),
			Effect::AdvanceGeneration => self.generation = self.generation.next(),
			Effect::PublishConnecting => self.publish(PhaseUpdate::Connecting),
			Effect::PublishConnected => {
				let capabilities = match input {
					Input::ConnectSucceeded(raw) => self.aggregator.aggregate(raw),
					_ => CapabilitySet::default(),
				};
				self.publish(PhaseUpdate::Connected(capabilities));
			}
			Effect::PublishUnableToConnect => {
				let reason = match input {
					Input::ConnectFailed(error) => Some(error.to_string()),
					Input::DeviceFailed(reason) => reason.clone(),
					_ => None,
				};
				self.publish(PhaseUpdate::UnableToConnect(reason));
			}
			Effect::Connect => self.connect(),
			Effect::ScheduleReconnect => self.schedule_reconnect(),
			Effect::EnterElection => {
				let listener = OwnershipSignals::new(self.mailbox.clone(), self.generation);
				self.ownership.enter_election(self.generation, listener);
			}
			Effect::AcquireOwnership => {
				self.ownership.on_became_owner();
			}
			Effect::RelinquishOwnership => {
				self.ownership.on_lost_ownership();
			}
			Effect::Remove => {
				info!(target = "topo.lifecycle", device = %self.identity, "device record removed");
				self.publisher.remove(&self.identity);
				self.current = None;
				let purged = self.aggregator.interner().purge();
				trace!(target = "topo.lifecycle", device = %self.identity, purged, "capability pool purged");
			}
		}
	}

	fn expect_config(&self) -> &DeviceConfig {
		self.config.as_ref().expect("device record has no configuration")
	}

	fn publish(&mut self, update: PhaseUpdate) {
		let next = self.builder.build(self.current.as_deref(), &self.identity, self.expect_config(), update);
		if self.current.as_deref() == Some(&next) {
			trace!(target = "topo.lifecycle", device = %self.identity, "snapshot unchanged");
			return;
		}

		let next = Arc::new(next);
		self.current = Some(Arc::clone(&next));
		self.publisher.publish(&self.identity, next);
	}

	/// Spawns the connect call; it starts once every earlier session close
	/// has completed.
	fn connect(&mut self) {
		let config = self.expect_config().clone();
		let identity = self.identity.clone();
		let generation = self.generation;
		let session = Arc::clone(&self.session);
		let listener = SessionSignals::new(self.mailbox.clone(), generation);
		let mailbox = self.mailbox.clone();
		let requested = self.closes_requested;
		let mut closes_done = self.closes_done.subscribe();
		self.last_attempt = Some(Instant::now());

		info!(target = "topo.lifecycle", device = %identity, %generation, endpoint = %config.endpoint(), "connecting");
		self.connecting = Some(tokio::spawn(async move {
			let ready = closes_done.wait_for(|done| *done >= requested).await.is_ok();
			if !ready {
				return;
			}
			let result = session.connect(&identity, &config, listener).await;
			mailbox.send(DeviceEvent::ConnectCompleted { generation, result });
		}));
	}

	/// Abandons any in-flight connect, then spawns the disconnect.
	fn close_session(&mut self) {
		if let Some(connecting) = self.connecting.take() {
			connecting.abort();
		}

		let identity = self.identity.clone();
		let session = Arc::clone(&self.session);
		let closes_done = Arc::clone(&self.closes_done);
		self.closes_requested += 1;

		tokio::spawn(async move {
			match session.disconnect(&identity).await {
				Ok(()) => debug!(target = "topo.lifecycle", device = %identity, "session closed"),
				Err(error) => warn!(target = "topo.lifecycle", device = %identity, error = %error, "failed to close session"),
			}
			closes_done.send_modify(|done| *done += 1);
		});
	}

	fn schedule_reconnect(&mut self) {
		if !self.policy.automatic {
			info!(target = "topo.lifecycle", device = %self.identity, "automatic reconnect disabled; waiting for retry");
			return;
		}

		let delay = self.policy.delay(self.last_attempt, Instant::now());
		if delay.is_zero() {
			self.connect();
			return;
		}

		let generation = self.generation;
		let mailbox = self.mailbox.clone();
		debug!(target = "topo.lifecycle", device = %self.identity, %generation, delay_ms = delay.as_millis() as u64, "reconnect rate-limited");
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			mailbox.send(DeviceEvent::ReconnectDue { generation });
		});
	}
}
