//! Cross-module end-to-end scenarios, lifted straight from spec.md §8's
//! literal S1-S6 walkthroughs.

use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio::sync::Mutex;

use syncr::apply::{ApplyEngine, ApplyOutcome};
use syncr::conflict::{ConflictManager, ConflictResolution};
use syncr::config::Config;
use syncr::orchestrator::SyncOrchestrator;
use syncr::session::Session;
use syncr::state::StateStore;
use syncr::transport::{ControlMessage, Frame};
use syncr::types::{ChangeRecord, Op, Origin};

/// S1: host creates `a/b/c.txt`; peer in Auto mode ends up with the same
/// bytes on disk and the path registered as known.
#[tokio::test]
async fn s1_host_create_propagates_to_peer_in_auto_mode() {
	let host_dir = tempdir().unwrap();
	tokio::fs::create_dir_all(host_dir.path().join("a/b")).await.unwrap();
	tokio::fs::write(host_dir.path().join("a/b/c.txt"), b"hello\n").await.unwrap();
	let peer_dir = tempdir().unwrap();

	let (host_io, peer_io) = tokio::io::duplex(1 << 16);
	let mut config = Config::default();
	config.host_id = "s1host".to_string();

	let host = Session::new(host_dir.path().to_path_buf(), Origin::Host, host_io, &config);
	let peer = Session::new(peer_dir.path().to_path_buf(), Origin::Peer, peer_io, &config);

	let (host_auth, peer_auth) = tokio::join!(
		host.authenticate_as_host("s1host", Duration::from_secs(1)),
		peer.authenticate_as_peer("s1host", Duration::from_secs(1)),
	);
	host_auth.unwrap();
	peer_auth.unwrap();

	let send = host.send_initial_snapshot();
	let receive = async {
		loop {
			let frame = peer.transport.recv().await.unwrap();
			let done = matches!(frame, Frame::Control(ControlMessage::FileTreeComplete));
			peer.handle_frame(frame).await.unwrap();
			if done {
				break;
			}
		}
	};
	let (send_result, _) = tokio::join!(send, receive);
	send_result.unwrap();

	let bytes = tokio::fs::read(peer_dir.path().join("a/b/c.txt")).await.unwrap();
	assert_eq!(bytes, b"hello\n");
	assert!(peer.state.is_known_file("a/b/c.txt").await);
}

/// S2: peer edits `notes.md` locally to "v1"; host independently edits the
/// same path to "v2" and it arrives as a `write`. With `keepNewest` and a
/// later host mtime, the peer's on-disk content ends up "v2" and the
/// conflict moves from active to resolved history.
#[tokio::test]
async fn s2_conflicting_edit_resolves_keep_newest_to_remote() {
	let dir = tempdir().unwrap();
	tokio::fs::write(dir.path().join("notes.md"), b"v0").await.unwrap();

	let state = Arc::new(StateStore::new(Duration::from_millis(50)));
	let conflicts = Arc::new(Mutex::new(ConflictManager::new(100)));
	let engine = ApplyEngine::new(dir.path().to_path_buf(), Origin::Peer, state.clone(), conflicts.clone());

	// Peer's own baseline write, establishing `last_applied` for this path.
	engine.handle(ChangeRecord::with_content("notes.md", Op::Create, b"v0", Origin::Host)).await;

	// Peer edits locally (this is the "local-only" change the conflict
	// check needs to see as having happened after the baseline).
	tokio::time::sleep(Duration::from_millis(20)).await;
	tokio::fs::write(dir.path().join("notes.md"), b"v1").await.unwrap();

	// Host's independent edit arrives as a remote write.
	let outcome =
		engine.handle(ChangeRecord::with_content("notes.md", Op::Write, b"v2", Origin::Host)).await;
	assert_eq!(outcome, ApplyOutcome::ConflictDetected);
	assert_eq!(conflicts.lock().await.active_count(), 1);

	// Resolve keepNewest through the production entry point. The conflict's
	// remote version was stamped at detection time, after the peer's local
	// edit, so remote naturally wins the mtime comparison.
	engine.resolve_conflict("notes.md", ConflictResolution::KeepNewest).await.unwrap();

	let on_disk = tokio::fs::read(dir.path().join("notes.md")).await.unwrap();
	assert_eq!(on_disk, b"v2");
	assert_eq!(conflicts.lock().await.active_count(), 0);
	assert_eq!(conflicts.lock().await.history().count(), 1);
}

/// S3: peer deletes `stale/`. The filesystem emits `remove(stale/old.txt)`
/// then `remove(stale, is_dir=true)`; the host applies in that order and
/// the tree no longer contains `stale` afterward.
#[tokio::test]
async fn s3_nested_directory_removal_applies_file_then_dir() {
	let dir = tempdir().unwrap();
	tokio::fs::create_dir_all(dir.path().join("stale")).await.unwrap();
	tokio::fs::write(dir.path().join("stale/old.txt"), b"x").await.unwrap();

	let state = Arc::new(StateStore::new(Duration::from_millis(50)));
	let conflicts = Arc::new(Mutex::new(ConflictManager::new(100)));
	let engine = ApplyEngine::new(dir.path().to_path_buf(), Origin::Host, state.clone(), conflicts);

	engine.handle(ChangeRecord::mkdir("stale", Origin::Peer)).await;
	engine
		.handle(ChangeRecord::with_content("stale/old.txt", Op::Create, b"x", Origin::Peer))
		.await;

	let file_outcome = engine.handle(ChangeRecord::remove("stale/old.txt", false, Origin::Peer)).await;
	let dir_outcome = engine.handle(ChangeRecord::remove("stale", true, Origin::Peer)).await;

	assert_eq!(file_outcome, ApplyOutcome::Applied);
	assert_eq!(dir_outcome, ApplyOutcome::Applied);
	assert!(!dir.path().join("stale").exists());
	assert!(!state.is_known_dir("stale").await);
}

/// S5: peer in manual mode; host emits three writes while the peer is idle.
/// The pending queue holds all three; invoking Pull drains and applies them,
/// leaves the queue empty, and requests a fresh snapshot.
#[tokio::test]
async fn s5_manual_mode_buffers_then_pull_drains_and_requests_snapshot() {
	let dir = tempdir().unwrap();
	let state = Arc::new(StateStore::new(Duration::from_millis(50)));
	let filter = Arc::new(tokio::sync::RwLock::new(
		syncr::filter::FilterEngine::new(&syncr::filter::FilterConfig::default()).unwrap(),
	));
	let conflicts = Arc::new(Mutex::new(ConflictManager::new(100)));
	let apply = Arc::new(ApplyEngine::new(dir.path().to_path_buf(), Origin::Peer, state.clone(), conflicts));
	let orchestrator =
		Arc::new(SyncOrchestrator::new(dir.path().to_path_buf(), Origin::Peer, state, filter, apply.clone()));

	apply.set_auto_mode(false).await;
	for i in 0..3 {
		let record = ChangeRecord::with_content(format!("f{}.txt", i), Op::Create, b"payload", Origin::Host);
		assert_eq!(apply.handle(record).await, ApplyOutcome::Buffered);
	}
	assert_eq!(apply.pending_len().await, 3);

	let snapshot_requested = Arc::new(std::sync::atomic::AtomicBool::new(false));
	let flag = snapshot_requested.clone();
	let drained = orchestrator
		.pull(|| async move {
			flag.store(true, std::sync::atomic::Ordering::SeqCst);
		})
		.await
		.unwrap();

	assert_eq!(drained, 3);
	assert_eq!(apply.pending_len().await, 0);
	assert!(snapshot_requested.load(std::sync::atomic::Ordering::SeqCst));
	for i in 0..3 {
		assert!(dir.path().join(format!("f{}.txt", i)).exists());
	}
}

/// S4: host's tree has `node_modules/pkg/index.js` alongside `app.js`. With
/// `node_modules` in the path filter's excluded folders, a manual Push only
/// emits `app.js` over the wire and the peer never materializes the excluded
/// subtree.
#[tokio::test]
async fn s4_path_filter_excludes_node_modules_from_push() {
	let host_dir = tempdir().unwrap();
	tokio::fs::create_dir_all(host_dir.path().join("node_modules/pkg")).await.unwrap();
	tokio::fs::write(host_dir.path().join("node_modules/pkg/index.js"), b"module.exports = 1;\n")
		.await
		.unwrap();
	tokio::fs::write(host_dir.path().join("app.js"), b"console.log('hi');\n").await.unwrap();
	let peer_dir = tempdir().unwrap();

	let (host_io, peer_io) = tokio::io::duplex(1 << 16);
	let mut config = Config::default();
	config.host_id = "s4host".to_string();
	config.filter.path.enabled = true;
	config.filter.path.excluded_folders = std::collections::BTreeSet::from(["node_modules".to_string()]);

	let host = Session::new(host_dir.path().to_path_buf(), Origin::Host, host_io, &config);
	let peer_config = Config { host_id: "s4host".to_string(), ..Config::default() };
	let peer = Session::new(peer_dir.path().to_path_buf(), Origin::Peer, peer_io, &peer_config);

	let (host_auth, peer_auth) = tokio::join!(
		host.authenticate_as_host("s4host", Duration::from_secs(1)),
		peer.authenticate_as_peer("s4host", Duration::from_secs(1)),
	);
	host_auth.unwrap();
	peer_auth.unwrap();

	let transport = host.transport.clone();
	let push = host.orchestrator.push(|record| {
		let transport = transport.clone();
		async move {
			let _ = transport.send_change(&record).await;
		}
	});
	let receive = async {
		let frame = peer.transport.recv().await.unwrap();
		peer.handle_frame(frame).await.unwrap();
	};
	let (push_result, _) = tokio::join!(push, receive);
	let emitted = push_result.unwrap();

	assert_eq!(emitted, 1);
	assert!(peer_dir.path().join("app.js").exists());
	assert!(!peer_dir.path().join("node_modules").exists());
}

/// S6: host's tree has `scratch.tmp` alongside `notes.txt`. With `.tmp`
/// blacklisted by the extension filter, a manual Push only emits
/// `notes.txt`; the peer never receives the blacklisted file.
#[tokio::test]
async fn s6_extension_blacklist_excludes_tmp_from_push() {
	let host_dir = tempdir().unwrap();
	tokio::fs::write(host_dir.path().join("scratch.tmp"), b"throwaway").await.unwrap();
	tokio::fs::write(host_dir.path().join("notes.txt"), b"keep me\n").await.unwrap();
	let peer_dir = tempdir().unwrap();

	let (host_io, peer_io) = tokio::io::duplex(1 << 16);
	let mut config = Config::default();
	config.host_id = "s6host".to_string();
	config.filter.extension.enabled = true;
	config.filter.extension.mode = syncr::filter::ExtensionMode::Blacklist;
	config.filter.extension.extensions = std::collections::BTreeSet::from(["tmp".to_string()]);

	let host = Session::new(host_dir.path().to_path_buf(), Origin::Host, host_io, &config);
	let peer_config = Config { host_id: "s6host".to_string(), ..Config::default() };
	let peer = Session::new(peer_dir.path().to_path_buf(), Origin::Peer, peer_io, &peer_config);

	let (host_auth, peer_auth) = tokio::join!(
		host.authenticate_as_host("s6host", Duration::from_secs(1)),
		peer.authenticate_as_peer("s6host", Duration::from_secs(1)),
	);
	host_auth.unwrap();
	peer_auth.unwrap();

	let transport = host.transport.clone();
	let push = host.orchestrator.push(|record| {
		let transport = transport.clone();
		async move {
			let _ = transport.send_change(&record).await;
		}
	});
	let receive = async {
		let frame = peer.transport.recv().await.unwrap();
		peer.handle_frame(frame).await.unwrap();
	};
	let (push_result, _) = tokio::join!(push, receive);
	let emitted = push_result.unwrap();

	assert_eq!(emitted, 1);
	assert!(peer_dir.path().join("notes.txt").exists());
	assert!(!peer_dir.path().join("scratch.tmp").exists());
}
