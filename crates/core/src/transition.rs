//! Transition table over connection phase × ownership.
//!
//! [`transition`] is a pure, total function: every [`CompositeState`] paired
//! with every [`InputKind`] yields a [`Transition`], possibly one that leaves
//! the state untouched with no effects. The lifecycle controller executes the
//! returned [`Effect`]s in order.
//!
//! Generation filtering happens before the table is consulted; inputs that
//! reach it are current.

use topo_protocol::{ConnectionPhase, OwnershipState};

/// Lifecycle of a device record on this member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
	Uninitialized,
	Connecting,
	Connected,
	UnableToConnect,
	Terminated,
}

impl LifecyclePhase {
	pub const ALL: [LifecyclePhase; 5] = [Self::Uninitialized, Self::Connecting, Self::Connected, Self::UnableToConnect, Self::Terminated];

	/// The published phase, for phases that have a snapshot.
	pub fn connection_phase(self) -> Option<ConnectionPhase> {
		match self {
			Self::Connecting => Some(ConnectionPhase::Connecting),
			Self::Connected => Some(ConnectionPhase::Connected),
			Self::UnableToConnect => Some(ConnectionPhase::UnableToConnect),
			Self::Uninitialized | Self::Terminated => None,
		}
	}
}

/// Both axes of a device record's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompositeState {
	pub phase: LifecyclePhase,
	pub ownership: OwnershipState,
}

impl CompositeState {
	pub const fn new(phase: LifecyclePhase, ownership: OwnershipState) -> Self {
		Self { phase, ownership }
	}

	/// Every combination of phase and ownership.
	pub fn all() -> impl Iterator<Item = CompositeState> {
		LifecyclePhase::ALL
			.into_iter()
			.flat_map(|phase| [OwnershipState::NotOwner, OwnershipState::Owner].map(|ownership| CompositeState { phase, ownership }))
	}
}

/// Inputs accepted by a device record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
	Create,
	ConnectSucceeded,
	ConnectFailed,
	Update,
	Retry,
	ReconnectDue,
	Delete,
	DeviceDisconnected,
	DeviceFailed,
	BecameOwner,
	LostOwnership,
}

impl InputKind {
	pub const ALL: [InputKind; 11] = [
		Self::Create,
		Self::ConnectSucceeded,
		Self::ConnectFailed,
		Self::Update,
		Self::Retry,
		Self::ReconnectDue,
		Self::Delete,
		Self::DeviceDisconnected,
		Self::DeviceFailed,
		Self::BecameOwner,
		Self::LostOwnership,
	];
}

/// Side effects requested by a transition, executed in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
	/// Remember the configuration carried by the input.
	StoreConfig,
	/// Release the registration handle, if any.
	ReleaseRegistration,
	/// Leave the election; ownership becomes `NotOwner`.
	WithdrawCandidacy,
	/// Ask the session layer to close the session.
	CloseSession,
	/// Invalidate every in-flight completion and signal.
	AdvanceGeneration,
	PublishConnecting,
	PublishConnected,
	PublishUnableToConnect,
	/// Issue a connect call with the stored configuration.
	Connect,
	/// Reconnect per the reconnect policy.
	ScheduleReconnect,
	/// Register as candidate in the ownership election.
	EnterElection,
	/// Register the live session; ownership becomes `Owner`.
	AcquireOwnership,
	/// Release the registration; ownership becomes `NotOwner`.
	RelinquishOwnership,
	/// Drop the published snapshot and stop the mailbox.
	Remove,
}

/// Result of applying one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
	pub next: CompositeState,
	pub effects: &'static [Effect],
}

impl Transition {
	const fn stay(state: CompositeState) -> Self {
		Self { next: state, effects: &[] }
	}

	const fn to(phase: LifecyclePhase, ownership: OwnershipState, effects: &'static [Effect]) -> Self {
		Self {
			next: CompositeState { phase, ownership },
			effects,
		}
	}

	/// `true` when the input changes nothing.
	pub fn is_noop(&self, from: CompositeState) -> bool {
		self.effects.is_empty() && self.next == from
	}
}

use Effect::*;
use LifecyclePhase::*;
use OwnershipState::{NotOwner, Owner};

const CREATE: &[Effect] = &[StoreConfig, PublishConnecting, Connect];
const CONNECTED: &[Effect] = &[PublishConnected, EnterElection];
const FAILED: &[Effect] = &[WithdrawCandidacy, ReleaseRegistration, PublishUnableToConnect];
const DISCONNECTED: &[Effect] = &[WithdrawCandidacy, ReleaseRegistration, PublishConnecting, AdvanceGeneration, ScheduleReconnect];
const UPDATE: &[Effect] = &[
	ReleaseRegistration,
	WithdrawCandidacy,
	CloseSession,
	AdvanceGeneration,
	StoreConfig,
	PublishConnecting,
	Connect,
];
const RETRY: &[Effect] = &[CloseSession, AdvanceGeneration, PublishConnecting, Connect];
const RECONNECT: &[Effect] = &[Connect];
const DELETE: &[Effect] = &[ReleaseRegistration, WithdrawCandidacy, CloseSession, AdvanceGeneration, Remove];
const BECAME_OWNER: &[Effect] = &[AcquireOwnership];
const LOST_OWNERSHIP: &[Effect] = &[RelinquishOwnership];

/// Looks up the transition for `input` in `state`.
pub fn transition(state: CompositeState, input: InputKind) -> Transition {
	let CompositeState { phase, ownership } = state;
	match (phase, input) {
		(Terminated, _) => Transition::stay(state),
		(_, InputKind::Delete) => Transition::to(Terminated, NotOwner, DELETE),

		(Uninitialized, InputKind::Create) => Transition::to(Connecting, NotOwner, CREATE),
		(Uninitialized, _) | (_, InputKind::Create) => Transition::stay(state),

		(Connecting, InputKind::ConnectSucceeded) => Transition::to(Connected, ownership, CONNECTED),
		(Connecting, InputKind::ConnectFailed) => Transition::to(UnableToConnect, NotOwner, FAILED),
		(Connecting | Connected | UnableToConnect, InputKind::DeviceFailed) => Transition::to(UnableToConnect, NotOwner, FAILED),
		(Connected, InputKind::DeviceDisconnected) => Transition::to(Connecting, NotOwner, DISCONNECTED),

		(_, InputKind::Update) => Transition::to(Connecting, NotOwner, UPDATE),
		(Connecting | UnableToConnect, InputKind::Retry) => Transition::to(Connecting, NotOwner, RETRY),
		(Connecting, InputKind::ReconnectDue) => Transition::to(Connecting, ownership, RECONNECT),

		(Connected, InputKind::BecameOwner) if ownership == NotOwner => Transition::to(Connected, Owner, BECAME_OWNER),
		(_, InputKind::LostOwnership) if ownership == Owner => Transition::to(phase, NotOwner, LOST_OWNERSHIP),

		_ => Transition::stay(state),
	}
}
