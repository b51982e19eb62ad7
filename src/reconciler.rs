//! Periodic reconciler (spec.md §4.D, component D).
//!
//! Runs on a fixed tick, diffing a fresh tree walk against the state
//! store's `lastState`/`lastDirs` snapshots to repair anything the watcher
//! missed. Ordering within a tick matters: directory removes, then file
//! removes, then directory creates (shallow before deep), then file
//! writes — so a receiving peer never sees a write land before its parent
//! directory exists.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use walkdir::WalkDir;

use crate::filter::FilterEngine;
use crate::state::StateStore;
use crate::types::{ChangeRecord, Op, Origin};
use crate::validation::path::to_wire_path;

/// Default tick interval (spec.md §4.D: 2-3s).
pub const DEFAULT_TICK: Duration = Duration::from_millis(2500);

struct TreeScan {
	files: BTreeMap<String, Instant>,
	dirs: BTreeMap<String, Instant>,
}

fn scan_tree(root: &Path, filter: &FilterEngine) -> TreeScan {
	let mut files = BTreeMap::new();
	let mut dirs = BTreeMap::new();
	let now = Instant::now();

	for entry in WalkDir::new(root).min_depth(1).into_iter().filter_map(|e| e.ok()) {
		let relative = match entry.path().strip_prefix(root) {
			Ok(r) => r,
			Err(_) => continue,
		};
		let wire = to_wire_path(relative);
		let is_dir = entry.file_type().is_dir();
		let is_symlink = entry.file_type().is_symlink();
		let size = if is_dir { None } else { entry.metadata().ok().map(|m| m.len()) };

		if !filter.should_sync(relative, size, is_dir, is_symlink) {
			continue;
		}

		if is_dir {
			dirs.insert(wire, now);
		} else {
			files.insert(wire, now);
		}
	}

	TreeScan { files, dirs }
}

/// One reconciliation pass over `root`, emitting Change Records for
/// whatever has drifted from the state store's last-seen snapshot.
///
/// `last_state`/`last_dirs` are the previous tick's mtime snapshots
/// (spec.md §3); real mtimes (not the `Instant` placeholders used
/// elsewhere in the state store) drive the write-detection comparison, so
/// this function takes and returns its own `SystemTime`-keyed maps rather
/// than going through [`StateStore`] directly for that part.
pub async fn reconcile_tick(
	root: &Path,
	origin: Origin,
	state: &StateStore,
	filter: &RwLock<FilterEngine>,
	last_mtimes: &mut BTreeMap<String, std::time::SystemTime>,
	mut emit: impl FnMut(ChangeRecord),
) {
	let filter_guard = filter.read().await;
	let scan = scan_tree(root, &filter_guard);
	drop(filter_guard);

	let current_dirs: std::collections::BTreeSet<&String> = scan.dirs.keys().collect();
	let last_dirs = state.last_dirs_snapshot().await;
	let last_dirs_keys: std::collections::BTreeSet<&String> = last_dirs.keys().collect();

	// 1. directory removes: in lastDirs but not currentDirs, deepest first
	let mut removed_dirs: Vec<&String> =
		last_dirs_keys.difference(&current_dirs).copied().collect();
	removed_dirs.sort_by_key(|p| std::cmp::Reverse(p.matches('/').count()));
	for path in removed_dirs {
		if state.is_skipped(path).await {
			continue;
		}
		state.forget(path).await;
		emit(ChangeRecord::remove(path.clone(), true, origin));
	}

	// 2. file removes
	let current_files: std::collections::BTreeSet<&String> = scan.files.keys().collect();
	let last_files_keys: std::collections::BTreeSet<&String> =
		last_mtimes.keys().collect();
	let mut removed_files: Vec<String> = last_files_keys
		.difference(&current_files)
		.map(|s| (*s).clone())
		.collect();
	removed_files.sort();
	for path in &removed_files {
		if state.is_skipped(path).await {
			continue;
		}
		state.forget(path).await;
		emit(ChangeRecord::remove(path.clone(), false, origin));
	}

	// 3. directory creates: shallow before deep
	let mut new_dirs: Vec<&String> = current_dirs.difference(&last_dirs_keys).copied().collect();
	new_dirs.sort_by_key(|p| p.matches('/').count());
	for path in new_dirs {
		if state.is_skipped(path).await {
			continue;
		}
		state.mark_dir_known(path).await;
		emit(ChangeRecord::mkdir(path.clone(), origin));
	}

	// 4. file writes: mtime advanced since last tick
	for (path, _) in scan.files.iter() {
		if state.is_skipped(path).await {
			continue;
		}
		let full_path = root.join(path.replace('/', std::path::MAIN_SEPARATOR_STR));
		let actual_mtime = match tokio::fs::metadata(&full_path).await.and_then(|m| m.modified()) {
			Ok(m) => m,
			Err(_) => continue,
		};
		let changed = match last_mtimes.get(path) {
			Some(prev) => actual_mtime > *prev,
			None => true,
		};
		if !changed {
			continue;
		}
		let content = match tokio::fs::read(&full_path).await {
			Ok(bytes) => bytes,
			Err(_) => continue,
		};
		let op = if state.is_known_file(path).await { Op::Write } else { Op::Create };
		state.mark_file_known(path, Instant::now()).await;
		last_mtimes.insert(path.clone(), actual_mtime);
		emit(ChangeRecord::with_content(path.clone(), op, &content, origin));
	}

	// purge stale mtime entries for files no longer present
	last_mtimes.retain(|p, _| scan.files.contains_key(p));

	// 5/6. assign lastState <- currentFiles, lastDirs <- currentDirs
	state.swap_reconciler_snapshots(scan.files, scan.dirs).await;
}

/// Drives [`reconcile_tick`] forever on `tick` intervals until cancelled.
pub async fn run(
	root: std::path::PathBuf,
	origin: Origin,
	state: Arc<StateStore>,
	filter: Arc<RwLock<FilterEngine>>,
	tick: Duration,
	mut emit: impl FnMut(ChangeRecord) + Send,
	mut cancel: tokio::sync::watch::Receiver<bool>,
) {
	let mut last_mtimes = BTreeMap::new();
	let mut interval = tokio::time::interval(tick);
	loop {
		tokio::select! {
			_ = interval.tick() => {
				reconcile_tick(&root, origin, &state, &filter, &mut last_mtimes, &mut emit).await;
			}
			_ = cancel.changed() => {
				if *cancel.borrow() {
					break;
				}
			}
		}
	}
}


// vim: ts=4
