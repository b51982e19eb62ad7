//! Error types for the sync engine
//!
//! Mirrors the taxonomy in spec.md §7: transport/auth errors tear the session
//! down, everything else is absorbed and logged by the caller.

use std::fmt;
use std::io;

use crate::conflict::ConflictResolutionError;
use crate::filter::FilterError;

/// Unified error type for sync operations
#[derive(Debug)]
pub enum SyncError {
	/// Channel dead or frame decode failure: terminates the session
	Transport(TransportError),

	/// Host id mismatch or auth rejected: session closes after the response is sent
	Auth(AuthError),

	/// Read/write/path failure: logged, does not terminate the session
	Filesystem(FilesystemError),

	/// Diverted to the conflict manager rather than surfaced to the caller
	Conflict(ConflictResolutionError),

	/// Auth or snapshot deadline exceeded
	Timeout(TimeoutKind),

	/// Invalid configuration
	InvalidConfig { message: String },

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Transport(e) => write!(f, "transport error: {}", e),
			SyncError::Auth(e) => write!(f, "auth error: {}", e),
			SyncError::Filesystem(e) => write!(f, "filesystem error: {}", e),
			SyncError::Conflict(e) => write!(f, "conflict error: {}", e),
			SyncError::Timeout(k) => write!(f, "timeout: {}", k),
			SyncError::InvalidConfig { message } => write!(f, "invalid configuration: {}", message),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl std::error::Error for SyncError {}

impl From<TransportError> for SyncError {
	fn from(e: TransportError) -> Self {
		SyncError::Transport(e)
	}
}

impl From<AuthError> for SyncError {
	fn from(e: AuthError) -> Self {
		SyncError::Auth(e)
	}
}

impl From<FilesystemError> for SyncError {
	fn from(e: FilesystemError) -> Self {
		SyncError::Filesystem(e)
	}
}

impl From<ConflictResolutionError> for SyncError {
	fn from(e: ConflictResolutionError) -> Self {
		SyncError::Conflict(e)
	}
}

impl From<FilterError> for SyncError {
	fn from(e: FilterError) -> Self {
		SyncError::InvalidConfig { message: e.to_string() }
	}
}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Filesystem(FilesystemError::Io(e))
	}
}

/// What kind of deadline was exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
	Auth,
	Snapshot,
	Write,
}

impl fmt::Display for TimeoutKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TimeoutKind::Auth => write!(f, "authentication deadline exceeded"),
			TimeoutKind::Snapshot => write!(f, "snapshot completion deadline exceeded"),
			TimeoutKind::Write => write!(f, "write deadline exceeded"),
		}
	}
}

/// Transport-layer errors: channel dead, frame decode failure
#[derive(Debug)]
pub enum TransportError {
	/// The underlying channel was closed
	Closed,

	/// A frame could not be parsed as JSON
	Decode { message: String },

	/// Underlying I/O error
	Io(io::Error),
}

impl fmt::Display for TransportError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransportError::Closed => write!(f, "channel closed"),
			TransportError::Decode { message } => write!(f, "frame decode failed: {}", message),
			TransportError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
	fn from(e: io::Error) -> Self {
		TransportError::Io(e)
	}
}

impl From<serde_json::Error> for TransportError {
	fn from(e: serde_json::Error) -> Self {
		TransportError::Decode { message: e.to_string() }
	}
}

/// Authentication errors
#[derive(Debug)]
pub enum AuthError {
	/// `host_id` sent by the peer did not match ours
	HostIdMismatch,

	/// The first frame was not an `auth_request`
	NotAnAuthRequest,
}

impl fmt::Display for AuthError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AuthError::HostIdMismatch => write!(f, "host id mismatch"),
			AuthError::NotAnAuthRequest => write!(f, "first frame was not an auth_request"),
		}
	}
}

impl std::error::Error for AuthError {}

/// Filesystem errors: read failure (retried), write failure (logged, skipped),
/// invalid path (dropped)
#[derive(Debug)]
pub enum FilesystemError {
	/// Read failed after exhausting retries
	ReadFailed { path: String, source: io::Error },

	/// Write failed
	WriteFailed { path: String, source: io::Error },

	/// Path escapes the sync root or otherwise fails validation
	InvalidPath { path: String },

	/// Generic I/O error
	Io(io::Error),
}

impl fmt::Display for FilesystemError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FilesystemError::ReadFailed { path, source } => {
				write!(f, "failed to read {}: {}", path, source)
			}
			FilesystemError::WriteFailed { path, source } => {
				write!(f, "failed to write {}: {}", path, source)
			}
			FilesystemError::InvalidPath { path } => write!(f, "invalid path: {}", path),
			FilesystemError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl std::error::Error for FilesystemError {}

impl From<io::Error> for FilesystemError {
	fn from(e: io::Error) -> Self {
		FilesystemError::Io(e)
	}
}

// vim: ts=4
