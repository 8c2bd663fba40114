//! Capability identifiers and negotiation results.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A canonical capability identifier.
///
/// Values are compared by content; the `Arc` lets identical identifiers be
/// shared across devices once interned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(Arc<str>);

impl Capability {
	pub fn new(id: impl Into<Arc<str>>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Returns `true` when both values point at the same allocation.
	pub fn shares_storage(&self, other: &Capability) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}
}

impl fmt::Display for Capability {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl PartialEq<str> for Capability {
	fn eq(&self, other: &str) -> bool {
		&*self.0 == other
	}
}

impl PartialEq<&str> for Capability {
	fn eq(&self, other: &&str) -> bool {
		&*self.0 == *other
	}
}

/// Why a capability advertised by the device could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
	MissingSource,
	UnableToResolve,
}

/// A capability the device advertised but which is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnavailableCapability {
	pub capability: Capability,
	pub failure_reason: FailureReason,
}

/// Available and unavailable capabilities of a connected device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySet {
	pub available: Vec<Capability>,
	pub unavailable: Vec<UnavailableCapability>,
}

impl CapabilitySet {
	pub fn is_empty(&self) -> bool {
		self.available.is_empty() && self.unavailable.is_empty()
	}

	pub fn contains(&self, id: &str) -> bool {
		self.available.iter().any(|cap| cap == id)
	}
}

/// Raw capability negotiation result reported by the session layer.
///
/// Identifiers are uncanonicalized. `unresolved` keeps the order in which
/// the session layer reported each failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiatedCapabilities {
	#[serde(default)]
	pub non_module: Vec<String>,
	#[serde(default)]
	pub resolved: Vec<String>,
	#[serde(default)]
	pub unresolved: Vec<(String, FailureReason)>,
}

impl NegotiatedCapabilities {
	pub fn with_non_module<I, S>(mut self, ids: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.non_module.extend(ids.into_iter().map(Into::into));
		self
	}

	pub fn with_resolved<I, S>(mut self, ids: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.resolved.extend(ids.into_iter().map(Into::into));
		self
	}

	pub fn with_unresolved(mut self, id: impl Into<String>, reason: FailureReason) -> Self {
		self.unresolved.push((id.into(), reason));
		self
	}
}

/// Renders a module-based capability as `(namespace?revision=rev)name`.
pub fn module_capability(namespace: &str, revision: Option<&str>, name: &str) -> String {
	match revision {
		Some(revision) => format!("({namespace}?revision={revision}){name}"),
		None => format!("({namespace}){name}"),
	}
}
