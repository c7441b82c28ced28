//! Error types for the session pool engine.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while creating, priming, or managing sessions.
///
/// None of these are fatal to a pool: every variant narrows to "this session
/// didn't happen" or "try later".
#[derive(Debug, Error)]
pub enum Error {
	/// The credential provider had no valid token to hand out.
	#[error("No valid credential available")]
	CredentialUnavailable,

	/// The connection never became ready before the deadline.
	#[error("Connection to '{backend}' not ready after {}ms", .after.as_millis())]
	ConnectionTimeout { backend: String, after: Duration },

	/// The connection dropped while the priming script was streaming.
	#[error("Connection lost after {sent}/{total} priming frames")]
	ConnectionLost { sent: usize, total: usize },

	/// The connection provider failed to open a transport.
	#[error("Failed to open connection: {0}")]
	ConnectionFailed(String),

	/// Transport-level send/close failure.
	#[error("Transport error: {0}")]
	Transport(String),

	/// The priming source could not produce a script for the key.
	#[error("Priming source error: {0}")]
	PrimingSource(String),

	/// Rejected configuration value.
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),

	/// Unparseable pool key.
	#[error("Invalid pool key '{0}': expected '<persona>-<language>'")]
	InvalidKey(String),

	/// The pool was shut down while the operation was in progress.
	#[error("Pool shut down")]
	Shutdown,

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl Error {
	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::ConnectionTimeout { .. })
	}

	/// Returns true if the connection went away mid-stream.
	pub fn is_connection_lost(&self) -> bool {
		matches!(self, Error::ConnectionLost { .. })
	}

	/// Returns true if the failure came from cancellation rather than a fault.
	pub fn is_shutdown(&self) -> bool {
		matches!(self, Error::Shutdown)
	}
}
