//! Errors reported by the session layer.

use thiserror::Error;

/// Transient failure of a session-layer operation.
///
/// These never escape to callers of the device record; their `Display` text
/// becomes the failure message of the published snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
	#[error("{0}")]
	Connect(String),

	#[error("session closed")]
	Closed,
}

impl SessionError {
	pub fn connect(message: impl Into<String>) -> Self {
		Self::Connect(message.into())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_is_the_failure_message() {
		assert_eq!(SessionError::connect("connection refused").to_string(), "connection refused");
		assert_eq!(SessionError::Closed.to_string(), "session closed");
	}
}
