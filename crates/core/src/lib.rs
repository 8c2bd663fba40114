//! Connection lifecycle and cluster ownership of managed network devices.
//!
//! A [`TopologyManager`] keeps one connection record per device. Each record
//! is driven by its own [`ConnectionLifecycleController`] on a serialized
//! mailbox: create/update/delete requests, session-layer completions and
//! election outcomes for one device are processed strictly in arrival order,
//! while different devices run independently.
//!
//! The record's visible state is an immutable [`StatusSnapshot`] that is
//! replaced on every change and readable at any time through
//! [`TopologyManager::current_status`].
//!
//! # Layers
//!
//! * [`capabilities`] turns raw negotiation results into a [`CapabilitySet`].
//! * [`snapshot`] builds status snapshots (pure).
//! * [`transition`] is the explicit phase × ownership transition table (pure).
//! * [`ownership`] gates the registration handle on election outcomes.
//! * [`lifecycle`] interprets transitions against the collaborators.
//! * [`manager`] owns the per-device mailboxes and the query store.
//!
//! [`StatusSnapshot`]: topo_protocol::StatusSnapshot
//! [`CapabilitySet`]: topo_protocol::CapabilitySet

pub mod capabilities;
pub mod config;
pub mod error;
pub mod event;
pub mod generation;
pub mod lifecycle;
pub mod manager;
pub mod ownership;
pub mod snapshot;
pub mod store;
pub mod transition;

pub use capabilities::{CapabilityAggregator, CapabilityInterner, canonicalize};
pub use config::{ManagerConfig, ReconnectPolicy};
pub use error::{Error, Result};
pub use event::DeviceEvent;
pub use generation::Generation;
pub use lifecycle::ConnectionLifecycleController;
pub use manager::{Collaborators, TopologyManager};
pub use ownership::OwnershipCoordinator;
pub use snapshot::{PhaseUpdate, SnapshotBuilder};
pub use store::SnapshotStore;
pub use transition::{CompositeState, Effect, InputKind, LifecyclePhase, Transition, transition};
pub use topo_protocol as protocol;
pub use topo_runtime as runtime;
