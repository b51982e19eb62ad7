//! Per-connection session (spec.md §9: "prefer a single Session value
//! owning [collaborators] as fields and passed explicitly").
//!
//! Wires the State Store, Filter Engine, Conflict Manager, Apply Engine,
//! Sync Orchestrator, and Transport Session together for one endpoint.
//! Runs the transport reader loop, the filesystem watcher, and the
//! periodic reconciler as concurrent tasks sharing these collaborators.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::timeout;

use crate::apply::ApplyEngine;
use crate::conflict::ConflictManager;
use crate::config::Config;
use crate::error::{SyncError, TimeoutKind};
use crate::filter::{FilterConfig, FilterEngine};
use crate::logging::*;
use crate::orchestrator::SyncOrchestrator;
use crate::reconciler;
use crate::snapshot::{self, SnapshotMode};
use crate::state::StateStore;
use crate::transport::{authenticate_as_host, authenticate_as_peer, ControlMessage, Frame, TransportSession};
use crate::types::{ChangeRecord, Op, Origin, SnapshotItem};
use crate::validation::path::resolve_under_root;
use crate::watcher::FsWatcher;

/// A live synchronization endpoint: one transport session plus the
/// collaborators that watch, reconcile, apply, and orchestrate against it.
pub struct Session<S> {
	pub root: PathBuf,
	pub origin: Origin,
	pub transport: Arc<TransportSession<S>>,
	pub state: Arc<StateStore>,
	pub filter: Arc<RwLock<FilterEngine>>,
	pub conflicts: Arc<Mutex<ConflictManager>>,
	pub apply: Arc<ApplyEngine>,
	pub orchestrator: Arc<SyncOrchestrator>,
	cancel_tx: watch::Sender<bool>,
	cancel_rx: watch::Receiver<bool>,
	snapshot_timeout: Duration,
}

impl<S> Session<S>
where
	S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
	pub fn new(root: PathBuf, origin: Origin, stream: S, config: &Config) -> Self {
		let state = Arc::new(StateStore::new(Duration::from_millis(config.skip_window_ms)));
		let filter = Arc::new(RwLock::new(
			FilterEngine::new(&config.filter).unwrap_or_else(|_| {
				FilterEngine::new(&FilterConfig::default()).expect("default filter config is always valid")
			}),
		));
		let conflicts = Arc::new(Mutex::new(ConflictManager::new(config.conflict_history_capacity)));
		let transport =
			Arc::new(TransportSession::new(stream, Duration::from_secs(config.write_deadline_secs)));
		let apply = Arc::new(ApplyEngine::new(root.clone(), origin, state.clone(), conflicts.clone()));
		let orchestrator =
			Arc::new(SyncOrchestrator::new(root.clone(), origin, state.clone(), filter.clone(), apply.clone()));
		let (cancel_tx, cancel_rx) = watch::channel(false);

		Session {
			root,
			origin,
			transport,
			state,
			filter,
			conflicts,
			apply,
			orchestrator,
			cancel_tx,
			cancel_rx,
			snapshot_timeout: Duration::from_secs(config.snapshot_timeout_secs),
		}
	}

	pub fn cancel(&self) {
		let _ = self.cancel_tx.send(true);
	}

	/// Run the host side of the auth handshake, failing the session on
	/// mismatch or timeout (spec.md §4.F, §5).
	pub async fn authenticate_as_host(&self, expected_host_id: &str, deadline: Duration) -> Result<(), SyncError> {
		authenticate_as_host(&self.transport, expected_host_id, deadline)
			.await
			.map_err(SyncError::from)
	}

	pub async fn authenticate_as_peer(&self, host_id: &str, deadline: Duration) -> Result<(), SyncError> {
		authenticate_as_peer(&self.transport, host_id, deadline).await.map_err(SyncError::from)
	}

	/// Send the initial snapshot unprompted, right after a successful auth
	/// (spec.md §4.F): stream the tree, tagging each item through the
	/// shared `Frame` namespace.
	pub async fn send_initial_snapshot(&self) -> Result<(), SyncError> {
		self.send_snapshot(SnapshotMode::FullContent).await
	}

	async fn send_snapshot(&self, mode: SnapshotMode) -> Result<(), SyncError> {
		let root = self.root.clone();
		let filter = self.filter.clone();
		let transport = self.transport.clone();
		let result = timeout(self.snapshot_timeout, async move {
			snapshot::stream_tree(&root, &filter, mode, |item| {
				let transport = transport.clone();
				async move {
					send_snapshot_item(&transport, item).await.map_err(|e| match e {
						SyncError::Transport(t) => std::io::Error::new(std::io::ErrorKind::BrokenPipe, t),
						other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
					})
				}
			})
			.await
		})
		.await;

		match result {
			Ok(Ok(())) => Ok(()),
			Ok(Err(e)) => Err(SyncError::Other { message: e.to_string() }),
			Err(_) => Err(SyncError::Timeout(TimeoutKind::Snapshot)),
		}
	}

	/// Spawn the watcher and reconciler loops. Returns a channel the caller
	/// drains and forwards to the transport (kept separate so the caller
	/// controls backpressure and write ordering).
	pub fn spawn_local_emitters(&self, settle_delay: Duration, tick: Duration) -> mpsc::Receiver<ChangeRecord>
	where
		S: 'static,
	{
		let (tx, rx) = mpsc::channel(256);

		if let Ok(watcher) =
			FsWatcher::new(self.root.clone(), self.origin, self.state.clone(), self.filter.clone(), tx.clone(), settle_delay)
		{
			tokio::spawn(watcher.run());
		} else {
			error!(root = ?self.root, "failed to arm filesystem watcher");
		}

		let root = self.root.clone();
		let origin = self.origin;
		let state = self.state.clone();
		let filter = self.filter.clone();
		let cancel_rx = self.cancel_rx.clone();
		tokio::spawn(async move {
			reconciler::run(
				root,
				origin,
				state,
				filter,
				tick,
				move |record| {
					let _ = tx.try_send(record);
				},
				cancel_rx,
			)
			.await;
		});

		rx
	}

	/// Route one inbound frame: Change Records go to the Apply engine (or
	/// the pending queue, under paused-pull), control messages get their
	/// own handling (spec.md §2 data flow).
	pub async fn handle_frame(&self, frame: Frame) -> Result<(), SyncError> {
		match frame {
			Frame::Change(record) => {
				self.apply.handle(record).await;
				Ok(())
			}
			Frame::Control(ControlMessage::RequestAllFiles { .. }) => {
				self.send_snapshot(SnapshotMode::FullContent).await
			}
			Frame::Control(ControlMessage::RequestFileTree { .. }) => {
				self.send_snapshot(SnapshotMode::MetadataOnly).await
			}
			Frame::Control(ControlMessage::DownloadRequest { items }) => {
				self.send_requested_items(items).await
			}
			Frame::Control(other) => {
				debug!(?other, "ignoring unhandled control message");
				Ok(())
			}
		}
	}

	/// Send just the requested paths (spec.md §4.F `download_request`),
	/// each as a full-content Change Record (or a bare `mkdir` for a
	/// directory), terminated the same way a snapshot is. Paths that don't
	/// resolve under root or no longer exist are silently skipped — the
	/// requester asked for a point-in-time listing that may already be stale.
	async fn send_requested_items(&self, items: Vec<String>) -> Result<(), SyncError> {
		for item in items {
			let target = match resolve_under_root(&self.root, &item) {
				Ok(p) => p,
				Err(_) => continue,
			};
			let metadata = match tokio::fs::metadata(&target).await {
				Ok(m) => m,
				Err(_) => continue,
			};
			if metadata.is_dir() {
				self.transport.send_change(&ChangeRecord::mkdir(item, self.origin)).await?;
				continue;
			}
			let bytes = match tokio::fs::read(&target).await {
				Ok(b) => b,
				Err(_) => continue,
			};
			let record = ChangeRecord::with_content(item, Op::Create, &bytes, self.origin);
			self.transport.send_change(&record).await?;
		}
		self.transport.send_control(ControlMessage::FileTreeComplete).await?;
		Ok(())
	}
}

async fn send_snapshot_item<S>(
	transport: &TransportSession<S>,
	item: SnapshotItem,
) -> Result<(), SyncError>
where
	S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
	match item {
		SnapshotItem::Complete => {
			transport.send_control(ControlMessage::FileTreeComplete).await?;
		}
		SnapshotItem::Item { path, is_dir: true, .. } => {
			transport.send_change(&ChangeRecord::mkdir(path, Origin::Host)).await?;
		}
		SnapshotItem::Item { path, name: _, is_dir: false, content: Some(content) } => {
			let record = ChangeRecord {
				path,
				op: crate::types::Op::Create,
				is_dir: false,
				content: Some(content),
				origin: Origin::Host,
			};
			transport.send_change(&record).await?;
		}
		SnapshotItem::Item { path, name, is_dir: false, content: None } => {
			transport
				.send_control(ControlMessage::FileTreeItem { path, name, is_dir: false })
				.await?;
		}
	}
	Ok(())
}


// vim: ts=4
