//! Sync orchestrator (spec.md §4.J, component J).
//!
//! Three modes, mutually exclusive via `is_processing`: Pull (manual
//! receive), Push (manual send), Auto (watcher + reconciler drive
//! continuous emission). Only one of Pull/Push/Clear runs at a time per
//! endpoint; Auto cannot be toggled mid-operation.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::sleep;
use walkdir::WalkDir;

use crate::apply::ApplyEngine;
use crate::filter::FilterEngine;
use crate::logging::*;
use crate::state::StateStore;
use crate::types::{ChangeRecord, Op, Origin};
use crate::validation::path::to_wire_path;

/// Pacing between emitted records during a manual Push, to bound bandwidth
/// (spec.md §4.J).
const PUSH_PACE: Duration = Duration::from_millis(2);

#[derive(Debug)]
pub enum OrchestratorError {
	/// Another Pull/Push/Clear is already running on this endpoint.
	Busy,
}

impl std::fmt::Display for OrchestratorError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			OrchestratorError::Busy => write!(f, "another manual operation is already in progress"),
		}
	}
}

impl std::error::Error for OrchestratorError {}

/// Drives the three sync modes over a set of already-wired collaborators.
/// Holds no transport of its own: `request_snapshot` and `emit` are
/// supplied by the caller (the session), which knows how to reach the peer.
pub struct SyncOrchestrator {
	root: std::path::PathBuf,
	origin: Origin,
	state: Arc<StateStore>,
	filter: Arc<RwLock<FilterEngine>>,
	apply: Arc<ApplyEngine>,
	auto: AtomicBool,
	is_processing: AtomicBool,
}

impl SyncOrchestrator {
	pub fn new(
		root: std::path::PathBuf,
		origin: Origin,
		state: Arc<StateStore>,
		filter: Arc<RwLock<FilterEngine>>,
		apply: Arc<ApplyEngine>,
	) -> Self {
		SyncOrchestrator {
			root,
			origin,
			state,
			filter,
			apply,
			auto: AtomicBool::new(true),
			is_processing: AtomicBool::new(false),
		}
	}

	pub fn is_auto(&self) -> bool {
		self.auto.load(Ordering::SeqCst)
	}

	/// Switch Auto <-> Manual. Auto->Manual preserves the pending queue;
	/// Manual->Auto flushes it (spec.md §4.J).
	pub async fn set_auto(&self, enabled: bool) -> Result<(), OrchestratorError> {
		if self.is_processing.swap(true, Ordering::SeqCst) {
			return Err(OrchestratorError::Busy);
		}
		let was_auto = self.auto.swap(enabled, Ordering::SeqCst);
		self.apply.set_auto_mode(enabled).await;
		if enabled && !was_auto {
			self.apply.drain_pending().await;
		}
		self.is_processing.store(false, Ordering::SeqCst);
		Ok(())
	}

	fn enter(&self) -> Result<(), OrchestratorError> {
		if self.is_processing.swap(true, Ordering::SeqCst) {
			return Err(OrchestratorError::Busy);
		}
		Ok(())
	}

	fn leave(&self) {
		self.is_processing.store(false, Ordering::SeqCst);
	}

	/// Manual Pull: flush whatever is pending, then ask the peer for a
	/// fresh snapshot via `request_snapshot`.
	pub async fn pull<F, Fut>(&self, request_snapshot: F) -> Result<usize, OrchestratorError>
	where
		F: FnOnce() -> Fut,
		Fut: std::future::Future<Output = ()>,
	{
		self.enter()?;
		let drained = self.apply.drain_pending().await;
		request_snapshot().await;
		self.leave();
		Ok(drained)
	}

	/// Manual Push: diff the tree against `knownFiles`/`knownDirs`, emitting
	/// removes (dirs before files), then `mkdir` (shallow before deep), then
	/// `write` for new/modified files, via `emit`.
	pub async fn push<F, Fut>(&self, mut emit: F) -> Result<usize, OrchestratorError>
	where
		F: FnMut(ChangeRecord) -> Fut,
		Fut: std::future::Future<Output = ()>,
	{
		self.enter()?;
		let mut emitted = 0usize;

		let (current_files, current_dirs) = self.scan().await;
		let known_files = self.state.known_files_snapshot().await;
		let known_dirs = self.state.known_dirs_snapshot().await;

		let current_dir_set: BTreeSet<&String> = current_dirs.iter().collect();
		let known_dir_set: BTreeSet<&String> = known_dirs.keys().collect();
		let current_file_set: BTreeSet<&String> = current_files.iter().collect();
		let known_file_set: BTreeSet<&String> = known_files.keys().collect();

		let mut removed_dirs: Vec<&String> = known_dir_set.difference(&current_dir_set).copied().collect();
		removed_dirs.sort_by_key(|p| std::cmp::Reverse(p.matches('/').count()));
		for path in removed_dirs {
			self.state.forget(path).await;
			emit(ChangeRecord::remove(path.clone(), true, self.origin)).await;
			emitted += 1;
			sleep(PUSH_PACE).await;
		}

		let mut removed_files: Vec<&String> = known_file_set.difference(&current_file_set).copied().collect();
		removed_files.sort();
		for path in removed_files {
			self.state.forget(path).await;
			emit(ChangeRecord::remove(path.clone(), false, self.origin)).await;
			emitted += 1;
			sleep(PUSH_PACE).await;
		}

		let mut new_dirs: Vec<&String> = current_dir_set.difference(&known_dir_set).copied().collect();
		new_dirs.sort_by_key(|p| p.matches('/').count());
		for path in new_dirs {
			self.state.mark_dir_known(path).await;
			emit(ChangeRecord::mkdir(path.clone(), self.origin)).await;
			emitted += 1;
			sleep(PUSH_PACE).await;
		}

		for path in &current_files {
			let full_path = self.root.join(path.replace('/', std::path::MAIN_SEPARATOR_STR));
			let content = match tokio::fs::read(&full_path).await {
				Ok(bytes) => bytes,
				Err(e) => {
					warn!(path = %path, error = %e, "push: skipping unreadable file");
					continue;
				}
			};
			let op = if known_file_set.contains(path) { Op::Write } else { Op::Create };
			self.state.mark_file_known(path, std::time::Instant::now()).await;
			emit(ChangeRecord::with_content((*path).clone(), op, &content, self.origin)).await;
			emitted += 1;
			sleep(PUSH_PACE).await;
		}

		self.leave();
		Ok(emitted)
	}

	async fn scan(&self) -> (Vec<String>, Vec<String>) {
		let filter = self.filter.read().await;
		let mut files = Vec::new();
		let mut dirs = Vec::new();
		for entry in WalkDir::new(&self.root).min_depth(1).into_iter().filter_map(|e| e.ok()) {
			let relative = match entry.path().strip_prefix(&self.root) {
				Ok(r) => r,
				Err(_) => continue,
			};
			let is_dir = entry.file_type().is_dir();
			let is_symlink = entry.file_type().is_symlink();
			let size = if is_dir { None } else { entry.metadata().ok().map(|m| m.len()) };
			if !filter.should_sync(relative, size, is_dir, is_symlink) {
				continue;
			}
			let wire = to_wire_path(relative);
			if is_dir {
				dirs.push(wire);
			} else {
				files.push(wire);
			}
		}
		(files, dirs)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::conflict::ConflictManager;
	use crate::filter::FilterConfig;
	use crate::state::DEFAULT_SKIP_WINDOW;
	use tempfile::tempdir;
	use tokio::sync::Mutex;

	fn orchestrator(root: std::path::PathBuf) -> SyncOrchestrator {
		let state = Arc::new(StateStore::new(DEFAULT_SKIP_WINDOW));
		let filter = Arc::new(RwLock::new(FilterEngine::new(&FilterConfig::default()).unwrap()));
		let apply = Arc::new(ApplyEngine::new(
			root.clone(),
			Origin::Host,
			state.clone(),
			Arc::new(Mutex::new(ConflictManager::new(100))),
		));
		SyncOrchestrator::new(root, Origin::Host, state, filter, apply)
	}

	#[tokio::test]
	async fn test_push_emits_create_for_new_file() {
		let dir = tempdir().unwrap();
		tokio::fs::write(dir.path().join("a.txt"), b"hi").await.unwrap();
		let orch = orchestrator(dir.path().to_path_buf());

		let emitted = std::sync::Mutex::new(Vec::new());
		let count = orch
			.push(|r| {
				emitted.lock().unwrap().push(r);
				std::future::ready(())
			})
			.await
			.unwrap();

		assert_eq!(count, 1);
		let records = emitted.into_inner().unwrap();
		assert_eq!(records[0].op, Op::Create);
		assert_eq!(records[0].path, "a.txt");
	}

	#[tokio::test]
	async fn test_push_is_exclusive_with_itself() {
		let dir = tempdir().unwrap();
		let orch = Arc::new(orchestrator(dir.path().to_path_buf()));
		orch.is_processing.store(true, Ordering::SeqCst);

		let result = orch.push(|_| std::future::ready(())).await;
		assert!(matches!(result, Err(OrchestratorError::Busy)));
	}

	#[tokio::test]
	async fn test_pull_drains_pending_and_requests_snapshot() {
		let dir = tempdir().unwrap();
		let orch = orchestrator(dir.path().to_path_buf());
		for i in 0..3 {
			orch.apply.set_auto_mode(false).await;
			orch.apply
				.handle(ChangeRecord::with_content(format!("f{}.txt", i), Op::Create, b"x", Origin::Peer))
				.await;
		}
		assert_eq!(orch.apply.pending_len().await, 3);

		let requested = std::sync::Mutex::new(false);
		let drained = orch
			.pull(|| {
				*requested.lock().unwrap() = true;
				std::future::ready(())
			})
			.await
			.unwrap();

		assert_eq!(drained, 3);
		assert!(*requested.lock().unwrap());
	}

	#[tokio::test]
	async fn test_set_auto_flushes_pending_on_manual_to_auto() {
		let dir = tempdir().unwrap();
		let orch = orchestrator(dir.path().to_path_buf());
		orch.set_auto(false).await.unwrap();
		orch.apply
			.handle(ChangeRecord::with_content("a.txt", Op::Create, b"x", Origin::Peer))
			.await;
		assert_eq!(orch.apply.pending_len().await, 1);

		orch.set_auto(true).await.unwrap();
		assert_eq!(orch.apply.pending_len().await, 0);
		assert!(dir.path().join("a.txt").exists());
	}

	#[tokio::test]
	async fn test_push_removes_vanished_paths() {
		let dir = tempdir().unwrap();
		let orch = orchestrator(dir.path().to_path_buf());
		orch.state.mark_file_known("gone.txt", std::time::Instant::now()).await;

		let emitted = std::sync::Mutex::new(Vec::new());
		orch.push(|r| {
			emitted.lock().unwrap().push(r);
			std::future::ready(())
		})
		.await
		.unwrap();

		let records = emitted.into_inner().unwrap();
		assert_eq!(records.len(), 1);
		assert_eq!(records[0].op, Op::Remove);
		assert_eq!(records[0].path, "gone.txt");
	}
}

// vim: ts=4
