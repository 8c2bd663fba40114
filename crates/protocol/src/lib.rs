//! Data model for clustered device connection records.
//!
//! This crate contains the serde-serializable types that describe a managed
//! device: its identity, its configured endpoint, the capabilities negotiated
//! with it, and the status snapshot published to the rest of the system.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond construction and serialization
//! * Immutable once published: snapshots are replaced, never edited
//! * Stable: Field names follow the operational node schema (camelCase)
//!
//! The state machine that produces these values lives in `topo-core`.

pub mod capability;
pub mod config;
pub mod identity;
pub mod status;

pub use capability::*;
pub use config::*;
pub use identity::*;
pub use status::*;
