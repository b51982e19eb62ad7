//! A bidirectional file-synchronization engine: a single authoritative host
//! watches a local directory tree; peers connect over a persistent duplex
//! channel, authenticate, receive an initial snapshot, and thereafter
//! exchange incremental Change Records so each peer's directory mirrors the
//! host's.

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod apply;
pub mod codec;
pub mod config;
pub mod conflict;
pub mod error;
pub mod filter;
pub mod logging;
pub mod orchestrator;
pub mod reconciler;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod transport;
pub mod types;
pub mod util;
pub mod validation;
pub mod watcher;

pub use apply::{ApplyEngine, ApplyOutcome};
pub use config::Config;
pub use conflict::{Conflict, ConflictManager, ConflictResolution, ConflictResolver};
pub use error::SyncError;
pub use filter::{FilterConfig, FilterEngine};
pub use orchestrator::{OrchestratorError, SyncOrchestrator};
pub use session::Session;
pub use transport::{ControlMessage, Frame, TransportSession};
pub use types::{ChangeRecord, Op, Origin, SnapshotItem};

// vim: ts=4
