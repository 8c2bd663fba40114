//! Boundary between device connection records and the systems around them.
//!
//! Each collaborator is a trait object injected at construction time:
//!
//! * [`SessionLayer`] opens and closes the device's transport session and
//!   reports out-of-band signals through a [`SessionListener`].
//! * [`ElectionSubstrate`] runs the cluster-wide ownership election and calls
//!   back through an [`OwnershipListener`].
//! * [`RegistrationSink`] exposes a live session to the rest of the system and
//!   hands back a [`RegistrationHandle`].
//! * [`StatusNotifier`] receives every published snapshot.
//!
//! The [`fake`] module provides in-memory implementations for tests.

pub mod election;
pub mod error;
pub mod fake;
pub mod notifier;
pub mod registration;
pub mod session;

pub use election::{ElectionSubstrate, OwnershipListener};
pub use error::SessionError;
pub use notifier::StatusNotifier;
pub use registration::{RegistrationHandle, RegistrationSink};
pub use session::{SessionLayer, SessionListener};
