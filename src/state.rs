//! Per-endpoint State Store (component B).
//!
//! Four path-keyed maps behind a single reader-writer lock, plus the echo
//! suppression window (the "skip window") that keeps an applied remote
//! change from bouncing back out as a local emission. Concurrent readers,
//! serialized writers: `tokio::sync::RwLock` maps directly onto that.
//!
//! The skip window is consulted under the same lock it's mutated under —
//! it lives in the same `Inner` as the known-path maps rather than behind
//! a separate lock, so there's no way to read a stale skip deadline against
//! a freshly primed one.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Default echo-suppression window: `W >= 3x expectedWatcherLatency`.
pub const DEFAULT_SKIP_WINDOW: Duration = Duration::from_millis(4000);

#[derive(Debug, Default)]
struct Inner {
	known_files: BTreeMap<String, Instant>,
	known_dirs: BTreeMap<String, Instant>,
	last_state: BTreeMap<String, Instant>,
	last_dirs: BTreeMap<String, Instant>,
	skip_next: BTreeMap<String, Instant>,
}

/// Per-endpoint state store. One instance per session, created at
/// connection time and dropped at disconnect.
pub struct StateStore {
	inner: RwLock<Inner>,
	skip_window: Duration,
}

impl StateStore {
	pub fn new(skip_window: Duration) -> Self {
		StateStore { inner: RwLock::new(Inner::default()), skip_window }
	}

	/// Prime the skip window for `path` ahead of a remote-originated
	/// filesystem mutation. Must happen before the mutation begins, not
	/// after, or a fast watcher can slip a local echo out first.
	pub async fn prime_skip(&self, path: &str) {
		let mut inner = self.inner.write().await;
		inner.skip_next.insert(path.to_string(), Instant::now() + self.skip_window);
	}

	/// Check (and, for an expired entry, clear) whether `path` is currently
	/// inside its skip window. Watcher and reconciler both call this before
	/// emitting a local event for `path`.
	pub async fn is_skipped(&self, path: &str) -> bool {
		let mut inner = self.inner.write().await;
		match inner.skip_next.get(path).copied() {
			Some(deadline) if deadline > Instant::now() => true,
			Some(_) => {
				inner.skip_next.remove(path);
				false
			}
			None => false,
		}
	}

	/// Record a successful local `create`/`write` application.
	pub async fn mark_file_known(&self, path: &str, mtime: Instant) {
		let mut inner = self.inner.write().await;
		inner.known_dirs.remove(path);
		inner.known_files.insert(path.to_string(), mtime);
	}

	/// Record a successful `mkdir`.
	pub async fn mark_dir_known(&self, path: &str) {
		let mut inner = self.inner.write().await;
		inner.known_files.remove(path);
		inner.known_dirs.insert(path.to_string(), Instant::now());
	}

	/// Record a successful `remove`: absent from both maps afterward.
	pub async fn forget(&self, path: &str) {
		let mut inner = self.inner.write().await;
		inner.known_files.remove(path);
		inner.known_dirs.remove(path);
	}

	pub async fn known_file_mtime(&self, path: &str) -> Option<Instant> {
		self.inner.read().await.known_files.get(path).copied()
	}

	pub async fn is_known_dir(&self, path: &str) -> bool {
		self.inner.read().await.known_dirs.contains_key(path)
	}

	pub async fn is_known_file(&self, path: &str) -> bool {
		self.inner.read().await.known_files.contains_key(path)
	}

	pub async fn known_files_snapshot(&self) -> BTreeMap<String, Instant> {
		self.inner.read().await.known_files.clone()
	}

	pub async fn known_dirs_snapshot(&self) -> BTreeMap<String, Instant> {
		self.inner.read().await.known_dirs.clone()
	}

	/// Swap in a fresh `lastState`/`lastDirs` pair, returning the previous
	/// ones, for the reconciler's end-of-tick assignment.
	pub async fn swap_reconciler_snapshots(
		&self,
		current_files: BTreeMap<String, Instant>,
		current_dirs: BTreeMap<String, Instant>,
	) -> (BTreeMap<String, Instant>, BTreeMap<String, Instant>) {
		let mut inner = self.inner.write().await;
		let prev_files = std::mem::replace(&mut inner.last_state, current_files);
		let prev_dirs = std::mem::replace(&mut inner.last_dirs, current_dirs);
		(prev_files, prev_dirs)
	}

	pub async fn last_state_snapshot(&self) -> BTreeMap<String, Instant> {
		self.inner.read().await.last_state.clone()
	}

	pub async fn last_dirs_snapshot(&self) -> BTreeMap<String, Instant> {
		self.inner.read().await.last_dirs.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_disjoint_known_maps() {
		let store = StateStore::new(DEFAULT_SKIP_WINDOW);
		store.mark_dir_known("a").await;
		assert!(store.is_known_dir("a").await);
		store.mark_file_known("a", Instant::now()).await;
		assert!(!store.is_known_dir("a").await);
		assert!(store.is_known_file("a").await);
	}

	#[tokio::test]
	async fn test_forget_clears_both_maps() {
		let store = StateStore::new(DEFAULT_SKIP_WINDOW);
		store.mark_file_known("f", Instant::now()).await;
		store.forget("f").await;
		assert!(!store.is_known_file("f").await);
		assert!(!store.is_known_dir("f").await);
	}

	#[tokio::test]
	async fn test_skip_window_suppresses_then_expires() {
		let store = StateStore::new(Duration::from_millis(20));
		store.prime_skip("p").await;
		assert!(store.is_skipped("p").await);
		tokio::time::sleep(Duration::from_millis(40)).await;
		assert!(!store.is_skipped("p").await);
	}

	#[tokio::test]
	async fn test_unskipped_path_is_not_skipped() {
		let store = StateStore::new(DEFAULT_SKIP_WINDOW);
		assert!(!store.is_skipped("never-primed").await);
	}

	#[tokio::test]
	async fn test_reconciler_snapshot_swap() {
		let store = StateStore::new(DEFAULT_SKIP_WINDOW);
		let mut first = BTreeMap::new();
		first.insert("a.txt".to_string(), Instant::now());
		let (prev_files, prev_dirs) =
			store.swap_reconciler_snapshots(first.clone(), BTreeMap::new()).await;
		assert!(prev_files.is_empty());
		assert!(prev_dirs.is_empty());
		assert_eq!(store.last_state_snapshot().await.len(), 1);
	}

	#[tokio::test]
	async fn test_concurrent_readers_allowed() {
		let store = StateStore::new(DEFAULT_SKIP_WINDOW);
		store.mark_file_known("f", Instant::now()).await;
		let (a, b) = tokio::join!(store.is_known_file("f"), store.is_known_file("f"));
		assert!(a && b);
	}
}

// vim: ts=4
