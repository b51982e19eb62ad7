//! Apply engine (spec.md §4.G, component G).
//!
//! Turns an inbound Change Record into a filesystem mutation: prime the
//! echo-suppression window, resolve and validate the target path, dispatch
//! on `op`. I/O errors are logged and absorbed rather than propagated to
//! the session loop (spec.md §7).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::Mutex;

use crate::codec;
use crate::conflict::resolver::ResolutionAction;
use crate::conflict::{ConflictManager, ConflictResolution, ConflictResolutionError, ConflictResolver, FileVersion};
use crate::error::FilesystemError;
use crate::logging::*;
use crate::state::StateStore;
use crate::types::{ChangeRecord, Op, Origin};
use crate::util::hash;
use crate::validation::path::resolve_under_root;

/// Permission bits new files/directories are created with (spec.md §6:
/// "files written 0644, directories 0755"). Only applied on `#[cfg(unix)]`;
/// a no-op everywhere else, since Windows has no equivalent permission bit.
const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
	use std::os::unix::fs::PermissionsExt;
	tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
	Ok(())
}

/// What happened to a Change Record once it reached the apply engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
	Applied,
	/// Paused-pull mode: buffered into the pending queue instead.
	Buffered,
	ConflictDetected,
	/// Own echo, or a record that failed validation; dropped.
	Rejected,
}

/// Hash/mtime recorded at the moment of our own last successful write to a
/// path. Kept separately from the State Store's `knownFiles` (which is
/// keyed by monotonic `Instant` for echo-suppression bookkeeping, not wall
/// clock) because conflict detection needs to compare against the
/// filesystem's actual mtime (spec.md §4.I).
struct LastApplied {
	hash: String,
	mtime: SystemTime,
}

/// Applies inbound Change Records to the local filesystem.
pub struct ApplyEngine {
	root: PathBuf,
	origin: Origin,
	state: Arc<StateStore>,
	conflicts: Arc<Mutex<ConflictManager>>,
	last_applied: Mutex<BTreeMap<String, LastApplied>>,
	pending: Mutex<Vec<ChangeRecord>>,
	auto_mode: Mutex<bool>,
}

impl ApplyEngine {
	pub fn new(
		root: PathBuf,
		origin: Origin,
		state: Arc<StateStore>,
		conflicts: Arc<Mutex<ConflictManager>>,
	) -> Self {
		ApplyEngine {
			root,
			origin,
			state,
			conflicts,
			last_applied: Mutex::new(BTreeMap::new()),
			pending: Mutex::new(Vec::new()),
			auto_mode: Mutex::new(true),
		}
	}

	pub async fn set_auto_mode(&self, enabled: bool) {
		*self.auto_mode.lock().await = enabled;
	}

	pub async fn pending_len(&self) -> usize {
		self.pending.lock().await.len()
	}

	/// Route an incoming record: apply now, or buffer it if the endpoint is
	/// in paused-pull mode (spec.md §4.G, last paragraph).
	pub async fn handle(&self, record: ChangeRecord) -> ApplyOutcome {
		if record.origin == self.origin {
			return ApplyOutcome::Rejected;
		}
		if !*self.auto_mode.lock().await {
			self.pending.lock().await.push(record);
			return ApplyOutcome::Buffered;
		}
		self.apply_one(record).await
	}

	/// Drain the pending queue through the apply path (the Pull orchestrator
	/// mode, spec.md §4.J).
	pub async fn drain_pending(&self) -> usize {
		let queued = std::mem::take(&mut *self.pending.lock().await);
		let n = queued.len();
		for record in queued {
			self.apply_one(record).await;
		}
		n
	}

	async fn apply_one(&self, record: ChangeRecord) -> ApplyOutcome {
		// Prime the skip window before the mutation begins, not after, so a
		// fast watcher can't slip a local echo out first (spec.md §9).
		self.state.prime_skip(&record.path).await;

		let target = match resolve_under_root(&self.root, &record.path) {
			Ok(p) => p,
			Err(_) => {
				warn!(path = %record.path, "rejecting change record with unsafe path");
				return ApplyOutcome::Rejected;
			}
		};

		let outcome = match record.op {
			Op::Mkdir => self.apply_mkdir(&record.path, &target).await,
			Op::Create | Op::Write => self.apply_write(&record, &target).await,
			Op::Remove => self.apply_remove(&record.path, &target, record.is_dir).await,
		};

		match outcome {
			Ok(outcome) => outcome,
			Err(e) => {
				error!(path = %record.path, error = %e, "apply failed");
				ApplyOutcome::Rejected
			}
		}
	}

	async fn apply_mkdir(&self, wire_path: &str, target: &Path) -> Result<ApplyOutcome, FilesystemError> {
		tokio::fs::create_dir_all(target).await.map_err(|e| FilesystemError::WriteFailed {
			path: wire_path.to_string(),
			source: e,
		})?;
		if let Err(e) = set_mode(target, DIR_MODE).await {
			warn!(path = %wire_path, error = %e, "failed to set directory mode");
		}
		self.state.mark_dir_known(wire_path).await;
		Ok(ApplyOutcome::Applied)
	}

	async fn apply_write(
		&self,
		record: &ChangeRecord,
		target: &Path,
	) -> Result<ApplyOutcome, FilesystemError> {
		let wire_path = &record.path;
		let raw = match &record.content {
			Some(c) => codec::decode_content(c)
				.map_err(|_| FilesystemError::InvalidPath { path: wire_path.clone() })?,
			None => Vec::new(),
		};

		if let Some(parent) = target.parent() {
			tokio::fs::create_dir_all(parent).await.map_err(|e| FilesystemError::WriteFailed {
				path: wire_path.clone(),
				source: e,
			})?;
		}

		if self.detect_conflict(wire_path, target, &raw).await? {
			return Ok(ApplyOutcome::ConflictDetected);
		}

		let tmp_path = sibling_tmp_path(target);
		tokio::fs::write(&tmp_path, &raw).await.map_err(|e| FilesystemError::WriteFailed {
			path: wire_path.clone(),
			source: e,
		})?;
		if let Err(e) = set_mode(&tmp_path, FILE_MODE).await {
			warn!(path = %wire_path, error = %e, "failed to set file mode");
		}
		tokio::fs::rename(&tmp_path, target).await.map_err(|e| FilesystemError::WriteFailed {
			path: wire_path.clone(),
			source: e,
		})?;

		let mtime = tokio::fs::metadata(target)
			.await
			.and_then(|m| m.modified())
			.unwrap_or_else(|_| SystemTime::now());
		self.state.mark_file_known(wire_path, std::time::Instant::now()).await;
		self.last_applied
			.lock()
			.await
			.insert(wire_path.clone(), LastApplied { hash: hash(&raw), mtime });
		Ok(ApplyOutcome::Applied)
	}

	/// spec.md §4.I: a conflict exists iff the remote content differs from
	/// what's on disk AND the on-disk file changed since the last write we
	/// ourselves applied (i.e. local-only changes exist). A path we've never
	/// written before has no baseline to compare against, so a first-time
	/// write is never a conflict even if a file already happens to exist
	/// there (it predates this sync session entirely).
	async fn detect_conflict(
		&self,
		wire_path: &str,
		target: &Path,
		remote_raw: &[u8],
	) -> Result<bool, FilesystemError> {
		let existing = match tokio::fs::read(target).await {
			Ok(bytes) => bytes,
			Err(_) => return Ok(false),
		};

		let local_hash = hash(&existing);
		let remote_hash = hash(remote_raw);
		if local_hash == remote_hash {
			return Ok(false);
		}

		let recorded_mtime = match self.last_applied.lock().await.get(wire_path).map(|l| l.mtime) {
			Some(mtime) => mtime,
			None => return Ok(false),
		};
		let actual_mtime = tokio::fs::metadata(target)
			.await
			.and_then(|m| m.modified())
			.unwrap_or(recorded_mtime);
		if actual_mtime <= recorded_mtime {
			return Ok(false);
		}

		let local_version =
			FileVersion { hash: local_hash, size: existing.len() as u64, mtime: actual_mtime, content: Some(existing) };
		let remote_version = FileVersion {
			hash: remote_hash,
			size: remote_raw.len() as u64,
			mtime: SystemTime::now(),
			content: Some(remote_raw.to_vec()),
		};
		self.conflicts.lock().await.detect(wire_path, local_version, remote_version);
		Ok(true)
	}

	async fn apply_remove(
		&self,
		wire_path: &str,
		target: &Path,
		is_dir: bool,
	) -> Result<ApplyOutcome, FilesystemError> {
		let result =
			if is_dir { tokio::fs::remove_dir_all(target).await } else { tokio::fs::remove_file(target).await };

		if let Err(e) = result {
			if e.kind() != std::io::ErrorKind::NotFound {
				return Err(FilesystemError::WriteFailed { path: wire_path.to_string(), source: e });
			}
		}

		self.state.forget(wire_path).await;
		self.last_applied.lock().await.remove(wire_path);
		Ok(ApplyOutcome::Applied)
	}

	/// Resolve the active conflict at `wire_path` under `strategy`: compute
	/// the resolution action, perform whatever filesystem mutation it calls
	/// for, then move the conflict from active to history (spec.md §4.I).
	/// This is the only production entry point that turns a detected
	/// conflict back into a clean state; callers are the CLI's `resolve`
	/// command and, eventually, whatever policy the external GUI shell
	/// implements.
	pub async fn resolve_conflict(
		&self,
		wire_path: &str,
		strategy: ConflictResolution,
	) -> Result<(), ConflictResolutionError> {
		let conflict = {
			let conflicts = self.conflicts.lock().await;
			conflicts
				.active_conflict(wire_path)
				.cloned()
				.ok_or_else(|| ConflictResolutionError::NotFound(wire_path.to_string()))?
		};

		let action = ConflictResolver::resolve(&conflict, strategy, SystemTime::now())?;
		let target = resolve_under_root(&self.root, wire_path).map_err(|_| {
			ConflictResolutionError::StrategyNotApplicable(format!("invalid path: {}", wire_path))
		})?;

		match action {
			ResolutionAction::KeepLocalContent => {}
			ResolutionAction::WriteContent(content) => {
				self.write_resolved(&target, wire_path, &content).await?;
			}
			ResolutionAction::RenameThenWrite { renamed_to, content } => {
				if let Ok(renamed_target) = resolve_under_root(&self.root, &renamed_to) {
					if let Err(e) = tokio::fs::rename(&target, &renamed_target).await {
						warn!(path = %wire_path, error = %e, "keepBoth rename failed, writing over local anyway");
					}
				}
				self.write_resolved(&target, wire_path, &content).await?;
			}
		}

		self.conflicts.lock().await.resolve(wire_path, strategy)
	}

	async fn write_resolved(
		&self,
		target: &Path,
		wire_path: &str,
		content: &[u8],
	) -> Result<(), ConflictResolutionError> {
		if let Some(parent) = target.parent() {
			let _ = tokio::fs::create_dir_all(parent).await;
		}
		tokio::fs::write(target, content).await.map_err(|e| {
			ConflictResolutionError::StrategyNotApplicable(format!("write failed for {}: {}", wire_path, e))
		})?;
		if let Err(e) = set_mode(target, FILE_MODE).await {
			warn!(path = %wire_path, error = %e, "failed to set file mode");
		}
		let mtime = tokio::fs::metadata(target)
			.await
			.and_then(|m| m.modified())
			.unwrap_or_else(|_| SystemTime::now());
		self.state.mark_file_known(wire_path, std::time::Instant::now()).await;
		self.last_applied
			.lock()
			.await
			.insert(wire_path.to_string(), LastApplied { hash: hash(content), mtime });
		Ok(())
	}
}

fn sibling_tmp_path(target: &Path) -> PathBuf {
	let file_name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
	target.with_file_name(format!(".{}.syncr-tmp", file_name))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::conflict::ConflictManager;
	use crate::state::DEFAULT_SKIP_WINDOW;
	use crate::types::Origin;
	use tempfile::tempdir;

	fn engine(root: PathBuf) -> ApplyEngine {
		ApplyEngine::new(
			root,
			Origin::Peer,
			Arc::new(StateStore::new(DEFAULT_SKIP_WINDOW)),
			Arc::new(Mutex::new(ConflictManager::new(100))),
		)
	}

	#[tokio::test]
	async fn test_apply_mkdir_creates_directory() {
		let dir = tempdir().unwrap();
		let engine = engine(dir.path().to_path_buf());
		let record = ChangeRecord::mkdir("a/b", Origin::Host);
		let outcome = engine.handle(record).await;
		assert_eq!(outcome, ApplyOutcome::Applied);
		assert!(dir.path().join("a/b").is_dir());
	}

	#[tokio::test]
	async fn test_apply_write_creates_file_with_content() {
		let dir = tempdir().unwrap();
		let engine = engine(dir.path().to_path_buf());
		let record = ChangeRecord::with_content("a/b.txt", Op::Create, b"hello\n", Origin::Host);
		let outcome = engine.handle(record).await;
		assert_eq!(outcome, ApplyOutcome::Applied);
		let content = tokio::fs::read(dir.path().join("a/b.txt")).await.unwrap();
		assert_eq!(content, b"hello\n");
	}

	#[tokio::test]
	async fn test_apply_write_twice_is_idempotent() {
		// Invariant 7: applying the same write twice yields the same state.
		let dir = tempdir().unwrap();
		let engine = engine(dir.path().to_path_buf());
		let record = ChangeRecord::with_content("f.txt", Op::Create, b"v1", Origin::Host);
		engine.handle(record.clone()).await;
		let outcome = engine.handle(record).await;
		assert_eq!(outcome, ApplyOutcome::Applied);
		let content = tokio::fs::read(dir.path().join("f.txt")).await.unwrap();
		assert_eq!(content, b"v1");
	}

	#[tokio::test]
	async fn test_rejects_path_escaping_root() {
		let dir = tempdir().unwrap();
		let engine = engine(dir.path().to_path_buf());
		let mut record = ChangeRecord::with_content("a.txt", Op::Create, b"x", Origin::Host);
		record.path = "../escape.txt".to_string();
		let outcome = engine.handle(record).await;
		assert_eq!(outcome, ApplyOutcome::Rejected);
	}

	#[tokio::test]
	async fn test_own_origin_record_rejected() {
		let dir = tempdir().unwrap();
		let engine = engine(dir.path().to_path_buf());
		let record = ChangeRecord::with_content("a.txt", Op::Create, b"x", Origin::Peer);
		let outcome = engine.handle(record).await;
		assert_eq!(outcome, ApplyOutcome::Rejected);
		assert!(!dir.path().join("a.txt").exists());
	}

	#[tokio::test]
	async fn test_paused_pull_buffers_then_drains() {
		let dir = tempdir().unwrap();
		let engine = engine(dir.path().to_path_buf());
		engine.set_auto_mode(false).await;

		for i in 0..3 {
			let record =
				ChangeRecord::with_content(format!("f{}.txt", i), Op::Create, b"x", Origin::Host);
			assert_eq!(engine.handle(record).await, ApplyOutcome::Buffered);
		}
		assert_eq!(engine.pending_len().await, 3);

		engine.set_auto_mode(true).await;
		let drained = engine.drain_pending().await;
		assert_eq!(drained, 3);
		assert_eq!(engine.pending_len().await, 0);
		for i in 0..3 {
			assert!(dir.path().join(format!("f{}.txt", i)).exists());
		}
	}

	#[tokio::test]
	async fn test_remove_file_forgets_state() {
		let dir = tempdir().unwrap();
		let engine = engine(dir.path().to_path_buf());
		engine.handle(ChangeRecord::with_content("f.txt", Op::Create, b"x", Origin::Host)).await;
		let outcome = engine.handle(ChangeRecord::remove("f.txt", false, Origin::Host)).await;
		assert_eq!(outcome, ApplyOutcome::Applied);
		assert!(!dir.path().join("f.txt").exists());
	}

	#[tokio::test]
	async fn test_remove_missing_path_is_not_an_error() {
		let dir = tempdir().unwrap();
		let engine = engine(dir.path().to_path_buf());
		let outcome = engine.handle(ChangeRecord::remove("ghost.txt", false, Origin::Host)).await;
		assert_eq!(outcome, ApplyOutcome::Applied);
	}

	#[tokio::test]
	async fn test_conflict_detected_on_local_edit_after_last_apply() {
		let dir = tempdir().unwrap();
		let engine = engine(dir.path().to_path_buf());

		// First apply establishes a baseline.
		engine.handle(ChangeRecord::with_content("notes.md", Op::Create, b"v0", Origin::Host)).await;

		// Simulate a local-only edit landing after our recorded mtime.
		tokio::time::sleep(std::time::Duration::from_millis(20)).await;
		tokio::fs::write(dir.path().join("notes.md"), b"local-edit").await.unwrap();

		let outcome =
			engine.handle(ChangeRecord::with_content("notes.md", Op::Write, b"remote-edit", Origin::Host)).await;
		assert_eq!(outcome, ApplyOutcome::ConflictDetected);
		// Conflicted writes must not clobber the local file.
		let content = tokio::fs::read(dir.path().join("notes.md")).await.unwrap();
		assert_eq!(content, b"local-edit");
	}

	#[tokio::test]
	async fn test_no_conflict_for_never_before_seen_path() {
		let dir = tempdir().unwrap();
		tokio::fs::write(dir.path().join("preexisting.txt"), b"from-before-sync").await.unwrap();
		let engine = engine(dir.path().to_path_buf());

		let outcome =
			engine.handle(ChangeRecord::with_content("preexisting.txt", Op::Write, b"remote", Origin::Host)).await;
		assert_eq!(outcome, ApplyOutcome::Applied);
	}

	#[tokio::test]
	async fn test_resolve_conflict_keep_remote_writes_and_clears_active() {
		let dir = tempdir().unwrap();
		let conflicts = Arc::new(Mutex::new(ConflictManager::new(100)));
		let engine = ApplyEngine::new(
			dir.path().to_path_buf(),
			Origin::Peer,
			Arc::new(StateStore::new(DEFAULT_SKIP_WINDOW)),
			conflicts.clone(),
		);

		engine.handle(ChangeRecord::with_content("notes.md", Op::Create, b"v0", Origin::Host)).await;
		tokio::time::sleep(std::time::Duration::from_millis(20)).await;
		tokio::fs::write(dir.path().join("notes.md"), b"local-edit").await.unwrap();
		let outcome =
			engine.handle(ChangeRecord::with_content("notes.md", Op::Write, b"remote-edit", Origin::Host)).await;
		assert_eq!(outcome, ApplyOutcome::ConflictDetected);

		engine.resolve_conflict("notes.md", ConflictResolution::KeepRemote).await.unwrap();

		let content = tokio::fs::read(dir.path().join("notes.md")).await.unwrap();
		assert_eq!(content, b"remote-edit");
		assert_eq!(conflicts.lock().await.active_count(), 0);
		assert_eq!(conflicts.lock().await.history().count(), 1);
	}

	#[tokio::test]
	async fn test_resolve_conflict_unknown_path_errors() {
		let dir = tempdir().unwrap();
		let engine = engine(dir.path().to_path_buf());
		let result = engine.resolve_conflict("nope.txt", ConflictResolution::KeepLocal).await;
		assert!(result.is_err());
	}

	#[tokio::test]
	#[cfg(unix)]
	async fn test_apply_write_sets_file_mode() {
		use std::os::unix::fs::PermissionsExt;
		let dir = tempdir().unwrap();
		let engine = engine(dir.path().to_path_buf());
		engine.handle(ChangeRecord::with_content("f.txt", Op::Create, b"x", Origin::Host)).await;
		let mode = tokio::fs::metadata(dir.path().join("f.txt")).await.unwrap().permissions().mode();
		assert_eq!(mode & 0o777, 0o644);
	}

	#[tokio::test]
	#[cfg(unix)]
	async fn test_apply_mkdir_sets_dir_mode() {
		use std::os::unix::fs::PermissionsExt;
		let dir = tempdir().unwrap();
		let engine = engine(dir.path().to_path_buf());
		engine.handle(ChangeRecord::mkdir("sub", Origin::Host)).await;
		let mode = tokio::fs::metadata(dir.path().join("sub")).await.unwrap().permissions().mode();
		assert_eq!(mode & 0o777, 0o755);
	}
}

// vim: ts=4
