//! Conflict detection and resolution (component I).
//!
//! A conflict is created when applying a remote write would clobber a
//! locally modified file. At most one unresolved conflict may exist per
//! path; resolving one removes it from the active set and appends it to a
//! bounded history ring.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Instant, SystemTime};

pub mod resolver;

pub use resolver::{ConflictResolution, ConflictResolver};

pub type ConflictId = u64;

/// One side's version of a conflicting file.
#[derive(Debug, Clone)]
pub struct FileVersion {
	pub hash: String,
	pub size: u64,
	pub mtime: SystemTime,
	pub content: Option<Vec<u8>>,
}

/// A detected divergence between the local and remote versions of a path.
#[derive(Debug, Clone)]
pub struct Conflict {
	pub id: ConflictId,
	pub path: String,
	pub local: FileVersion,
	pub remote: FileVersion,
	pub detected_at: Instant,
	pub resolution: Option<ConflictResolution>,
	pub resolved_at: Option<Instant>,
}

impl Conflict {
	pub fn is_resolved(&self) -> bool {
		self.resolution.is_some()
	}
}

#[derive(Debug)]
pub enum ConflictResolutionError {
	/// No active conflict exists for the given path
	NotFound(String),
	/// Resolution strategy cannot run against the supplied versions
	StrategyNotApplicable(String),
}

impl std::fmt::Display for ConflictResolutionError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ConflictResolutionError::NotFound(path) => {
				write!(f, "no active conflict for path: {}", path)
			}
			ConflictResolutionError::StrategyNotApplicable(msg) => {
				write!(f, "strategy not applicable: {}", msg)
			}
		}
	}
}

impl std::error::Error for ConflictResolutionError {}

/// Tracks active (at most one per path) and resolved (bounded history)
/// conflicts for a session.
pub struct ConflictManager {
	active: BTreeMap<String, Conflict>,
	history: VecDeque<Conflict>,
	history_capacity: usize,
	next_id: ConflictId,
}

impl ConflictManager {
	pub fn new(history_capacity: usize) -> Self {
		ConflictManager {
			active: BTreeMap::new(),
			history: VecDeque::new(),
			history_capacity,
			next_id: 1,
		}
	}

	/// Record a newly detected conflict, or return the existing one if the
	/// path already has an unresolved conflict (re-detection is a no-op).
	pub fn detect(&mut self, path: &str, local: FileVersion, remote: FileVersion) -> &Conflict {
		if self.active.contains_key(path) {
			return self.active.get(path).unwrap();
		}
		let id = self.next_id;
		self.next_id += 1;
		let conflict = Conflict {
			id,
			path: path.to_string(),
			local,
			remote,
			detected_at: Instant::now(),
			resolution: None,
			resolved_at: None,
		};
		self.active.insert(path.to_string(), conflict);
		self.active.get(path).unwrap()
	}

	pub fn active_conflict(&self, path: &str) -> Option<&Conflict> {
		self.active.get(path)
	}

	pub fn active_count(&self) -> usize {
		self.active.len()
	}

	/// Mark the conflict at `path` resolved, move it into history.
	pub fn resolve(
		&mut self,
		path: &str,
		resolution: ConflictResolution,
	) -> Result<(), ConflictResolutionError> {
		let mut conflict = self
			.active
			.remove(path)
			.ok_or_else(|| ConflictResolutionError::NotFound(path.to_string()))?;
		conflict.resolution = Some(resolution);
		conflict.resolved_at = Some(Instant::now());
		if self.history.len() >= self.history_capacity {
			self.history.pop_front();
		}
		self.history.push_back(conflict);
		Ok(())
	}

	pub fn history(&self) -> impl Iterator<Item = &Conflict> {
		self.history.iter()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn version(hash: &str, size: u64) -> FileVersion {
		FileVersion { hash: hash.to_string(), size, mtime: SystemTime::now(), content: None }
	}

	#[test]
	fn test_detect_creates_active_conflict() {
		let mut mgr = ConflictManager::new(100);
		mgr.detect("a.txt", version("l", 1), version("r", 2));
		assert_eq!(mgr.active_count(), 1);
		assert!(mgr.active_conflict("a.txt").is_some());
	}

	#[test]
	fn test_redetection_returns_existing() {
		let mut mgr = ConflictManager::new(100);
		let first_id = mgr.detect("a.txt", version("l", 1), version("r", 2)).id;
		let second_id = mgr.detect("a.txt", version("l2", 5), version("r2", 6)).id;
		assert_eq!(first_id, second_id);
		assert_eq!(mgr.active_count(), 1);
	}

	#[test]
	fn test_resolve_moves_to_history_and_decrements_active() {
		// Invariant 4: resolving removes from active, appends to history,
		// active size decreases by exactly one.
		let mut mgr = ConflictManager::new(100);
		mgr.detect("a.txt", version("l", 1), version("r", 2));
		assert_eq!(mgr.active_count(), 1);
		mgr.resolve("a.txt", ConflictResolution::KeepRemote).unwrap();
		assert_eq!(mgr.active_count(), 0);
		assert_eq!(mgr.history().count(), 1);
	}

	#[test]
	fn test_resolve_unknown_path_errors() {
		let mut mgr = ConflictManager::new(100);
		assert!(mgr.resolve("nope.txt", ConflictResolution::KeepLocal).is_err());
	}

	#[test]
	fn test_history_is_bounded() {
		let mut mgr = ConflictManager::new(2);
		for i in 0..5 {
			let path = format!("f{}.txt", i);
			mgr.detect(&path, version("l", 1), version("r", 2));
			mgr.resolve(&path, ConflictResolution::KeepNewest).unwrap();
		}
		assert_eq!(mgr.history().count(), 2);
	}
}

// vim: ts=4
