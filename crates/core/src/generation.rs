//! Per-device incarnation counter.

use std::fmt;

/// Monotonic tag of a device's current incarnation.
///
/// Every asynchronous completion and every session or election signal carries
/// the generation it was issued under; the controller drops those whose tag no
/// longer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
	pub const fn initial() -> Self {
		Self(0)
	}

	#[must_use]
	pub const fn next(self) -> Self {
		Self(self.0 + 1)
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for Generation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}
