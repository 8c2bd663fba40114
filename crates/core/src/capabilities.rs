//! Capability canonicalization, interning and aggregation.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use topo_protocol::{Capability, CapabilitySet, NegotiatedCapabilities, UnavailableCapability};

static GLOBAL_INTERNER: LazyLock<Arc<CapabilityInterner>> = LazyLock::new(|| Arc::new(CapabilityInterner::new()));

/// Normalizes a raw capability identifier.
///
/// Surrounding whitespace is trimmed. URI-form identifiers get their scheme
/// lower-cased; module identifiers in `(namespace?revision=..)name` form are
/// left as-is.
pub fn canonicalize(raw: &str) -> Cow<'_, str> {
	let trimmed = raw.trim();
	if trimmed.starts_with('(') {
		return Cow::Borrowed(trimmed);
	}

	match trimmed.split_once(':') {
		Some((scheme, rest)) if scheme.bytes().any(|b| b.is_ascii_uppercase()) => Cow::Owned(format!("{}:{rest}", scheme.to_ascii_lowercase())),
		_ => Cow::Borrowed(trimmed),
	}
}

/// Shares one allocation per distinct capability identifier.
///
/// The pool holds one entry per identifier seen since the last
/// [`purge`](Self::purge); entries no snapshot refers to are dropped there.
#[derive(Debug, Default)]
pub struct CapabilityInterner {
	pool: Mutex<HashSet<Arc<str>>>,
}

impl CapabilityInterner {
	pub fn new() -> Self {
		Self::default()
	}

	/// Process-wide interner used by [`CapabilityAggregator::new`].
	pub fn global() -> Arc<CapabilityInterner> {
		Arc::clone(&GLOBAL_INTERNER)
	}

	/// Returns the pooled capability for an already canonical identifier.
	pub fn intern(&self, canonical: &str) -> Capability {
		let mut pool = self.pool.lock();
		if let Some(existing) = pool.get(canonical) {
			return Capability::new(Arc::clone(existing));
		}
		let id: Arc<str> = Arc::from(canonical);
		pool.insert(Arc::clone(&id));
		Capability::new(id)
	}

	/// Drops identifiers referenced only by the pool. Returns how many were removed.
	pub fn purge(&self) -> usize {
		let mut pool = self.pool.lock();
		let before = pool.len();
		pool.retain(|id| Arc::strong_count(id) > 1);
		before - pool.len()
	}

	pub fn len(&self) -> usize {
		self.pool.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.pool.lock().is_empty()
	}
}

/// Builds the capability set published for a connected device.
#[derive(Debug, Clone)]
pub struct CapabilityAggregator {
	interner: Arc<CapabilityInterner>,
}

impl Default for CapabilityAggregator {
	fn default() -> Self {
		Self::new()
	}
}

impl CapabilityAggregator {
	pub fn new() -> Self {
		Self::with_interner(CapabilityInterner::global())
	}

	pub fn with_interner(interner: Arc<CapabilityInterner>) -> Self {
		Self { interner }
	}

	pub fn interner(&self) -> &Arc<CapabilityInterner> {
		&self.interner
	}

	/// Non-module capabilities first, then resolved ones, deduplicated in
	/// first-seen order. Blank available identifiers are skipped.
	///
	/// Every unresolved mapping yields one entry, in reported order.
	pub fn aggregate(&self, raw: &NegotiatedCapabilities) -> CapabilitySet {
		let mut seen = HashSet::new();
		let available = raw
			.non_module
			.iter()
			.chain(&raw.resolved)
			.filter_map(|id| self.capability(id))
			.filter(|cap| seen.insert(cap.clone()))
			.collect();

		let unavailable = raw
			.unresolved
			.iter()
			.map(|(id, reason)| UnavailableCapability {
				capability: self.interner.intern(&canonicalize(id)),
				failure_reason: *reason,
			})
			.collect();

		CapabilitySet { available, unavailable }
	}

	fn capability(&self, raw: &str) -> Option<Capability> {
		let canonical = canonicalize(raw);
		if canonical.is_empty() {
			return None;
		}
		Some(self.interner.intern(&canonical))
	}
}
