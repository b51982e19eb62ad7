//! Filesystem watcher (spec.md §4.C, component C).
//!
//! Wraps `notify`'s recursive watch on the sync root. Raw OS events are
//! converted to Change Records after passing the echo-suppression window
//! and the filter engine. Grounded on the `notify`-based watcher pattern
//! used elsewhere in the retrieval pack; re-targeted here to emit
//! [`ChangeRecord`]s straight onto the session's outbound channel instead of
//! a generic `ChangeEvent`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{CreateKind, RemoveKind};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherTrait};
use tokio::sync::{mpsc, RwLock};
use tokio::time::sleep;

use crate::filter::FilterEngine;
use crate::state::StateStore;
use crate::types::{ChangeRecord, Op, Origin};
use crate::validation::path::to_wire_path;

const READ_RETRY_ATTEMPTS: u32 = 5;
const READ_RETRY_INTERVAL: Duration = Duration::from_millis(50);
/// Settle delay for a newly observed directory (spec.md §4.C: 100-250ms).
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(150);

#[derive(Debug)]
pub enum WatcherError {
	Init(notify::Error),
	Watch(notify::Error),
}

impl fmt::Display for WatcherError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			WatcherError::Init(e) => write!(f, "failed to initialize watcher: {}", e),
			WatcherError::Watch(e) => write!(f, "failed to arm watch: {}", e),
		}
	}
}

impl std::error::Error for WatcherError {}

#[derive(Debug, Clone)]
enum RawEvent {
	Created { path: PathBuf, is_dir: bool },
	Modified { path: PathBuf },
	Removed { path: PathBuf },
}

/// Recursively watches the sync root and emits [`ChangeRecord`]s for changes
/// that survive echo suppression and filtering.
pub struct FsWatcher {
	root: PathBuf,
	origin: Origin,
	state: Arc<StateStore>,
	filter: Arc<RwLock<FilterEngine>>,
	out_tx: mpsc::Sender<ChangeRecord>,
	settle_delay: Duration,
	_watcher: RecommendedWatcher,
	raw_rx: mpsc::Receiver<RawEvent>,
}

impl FsWatcher {
	/// Arm the sync root recursively at startup (spec.md §4.C).
	pub fn new(
		root: PathBuf,
		origin: Origin,
		state: Arc<StateStore>,
		filter: Arc<RwLock<FilterEngine>>,
		out_tx: mpsc::Sender<ChangeRecord>,
		settle_delay: Duration,
	) -> Result<Self, WatcherError> {
		let (raw_tx, raw_rx) = mpsc::channel(1024);

		let watcher = RecommendedWatcher::new(
			move |res: Result<notify::Event, notify::Error>| {
				if let Ok(event) = res {
					if let Some(raw) = map_event(&event) {
						let _ = raw_tx.blocking_send(raw);
					}
				}
			},
			notify::Config::default(),
		)
		.map_err(WatcherError::Init)?;

		let mut fs_watcher = FsWatcher {
			root,
			origin,
			state,
			filter,
			out_tx,
			settle_delay,
			_watcher: watcher,
			raw_rx,
		};
		fs_watcher.arm(&fs_watcher.root.clone())?;
		Ok(fs_watcher)
	}

	fn arm(&mut self, path: &Path) -> Result<(), WatcherError> {
		self._watcher.watch(path, RecursiveMode::Recursive).map_err(WatcherError::Watch)
	}

	/// Drive the watcher forever, converting raw events into outbound
	/// Change Records. Exits when the raw-event channel closes.
	pub async fn run(mut self) {
		while let Some(event) = self.raw_rx.recv().await {
			self.handle(event).await;
		}
	}

	fn relative_path(&self, absolute: &Path) -> Option<String> {
		let relative = absolute.strip_prefix(&self.root).ok()?;
		if relative.as_os_str().is_empty() {
			return None;
		}
		Some(to_wire_path(relative))
	}

	async fn handle(&self, event: RawEvent) {
		match event {
			RawEvent::Created { path, is_dir } => self.handle_created(path, is_dir).await,
			RawEvent::Modified { path } => self.handle_write(path).await,
			RawEvent::Removed { path } => self.handle_removed(path).await,
		}
	}

	async fn handle_created(&self, path: PathBuf, is_dir: bool) {
		let Some(rel) = self.relative_path(&path) else { return };
		if self.state.is_skipped(&rel).await {
			return;
		}

		if is_dir {
			// Settle delay: let subtree materialization complete before
			// treating the directory as stable.
			sleep(self.settle_delay).await;
			if !path.is_dir() {
				return;
			}
			if self.state.is_skipped(&rel).await {
				return;
			}
			if !self.filter.read().await.should_sync(Path::new(&rel), None, true, false) {
				return;
			}
			self.state.mark_dir_known(&rel).await;
			let record = ChangeRecord::mkdir(rel, self.origin);
			let _ = self.out_tx.send(record).await;
		} else {
			self.handle_write(path).await;
		}
	}

	async fn handle_write(&self, path: PathBuf) {
		let Some(rel) = self.relative_path(&path) else { return };
		if self.state.is_skipped(&rel).await {
			return;
		}

		let size = match tokio::fs::metadata(&path).await {
			Ok(m) => m.len(),
			Err(_) => return,
		};
		if !self.filter.read().await.should_sync(Path::new(&rel), Some(size), false, false) {
			return;
		}

		let content = match read_with_retry(&path).await {
			Some(bytes) => bytes,
			None => return,
		};

		let op = if self.state.is_known_file(&rel).await { Op::Write } else { Op::Create };
		let record = ChangeRecord::with_content(rel.clone(), op, &content, self.origin);
		self.state.mark_file_known(&rel, std::time::Instant::now()).await;
		let _ = self.out_tx.send(record).await;
	}

	async fn handle_removed(&self, path: PathBuf) {
		let Some(rel) = self.relative_path(&path) else { return };
		if self.state.is_skipped(&rel).await {
			return;
		}

		let is_dir = if self.state.is_known_dir(&rel).await {
			true
		} else if self.state.is_known_file(&rel).await {
			false
		} else {
			// Unknown path, nothing to reconcile locally.
			return;
		};

		self.state.forget(&rel).await;
		let record = ChangeRecord::remove(rel, is_dir, self.origin);
		let _ = self.out_tx.send(record).await;
	}
}

async fn read_with_retry(path: &Path) -> Option<Vec<u8>> {
	for attempt in 0..READ_RETRY_ATTEMPTS {
		match tokio::fs::read(path).await {
			Ok(bytes) => return Some(bytes),
			Err(_) if attempt + 1 < READ_RETRY_ATTEMPTS => {
				sleep(READ_RETRY_INTERVAL).await;
			}
			Err(_) => return None,
		}
	}
	None
}

fn map_event(event: &notify::Event) -> Option<RawEvent> {
	let path = event.paths.first()?.clone();
	match &event.kind {
		EventKind::Create(CreateKind::Folder) => Some(RawEvent::Created { path, is_dir: true }),
		EventKind::Create(_) => Some(RawEvent::Created { path, is_dir: path.is_dir() }),
		EventKind::Modify(_) => Some(RawEvent::Modified { path }),
		EventKind::Remove(RemoveKind::Folder) => Some(RawEvent::Removed { path }),
		EventKind::Remove(_) => Some(RawEvent::Removed { path }),
		_ => None,
	}
}


// vim: ts=4
