//! Snapshot engine (spec.md §4.H, component H).
//!
//! Streams the authoritative tree one entry at a time: each directory is
//! traversed directories-first depth-first, then its files, so a receiving
//! peer always sees a parent directory's entry before its children's. A
//! `SnapshotItem::Complete` marker terminates the stream. Emission is paced
//! with a small sleep every few entries so a large tree doesn't starve the
//! transport writer or the receiver's apply loop (spec.md §9).

use std::path::Path;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::filter::FilterEngine;
use crate::types::SnapshotItem;
use crate::validation::path::to_wire_path;

/// Emit a pacing sleep after this many streamed entries.
const PACE_EVERY: usize = 16;
const PACE_SLEEP: Duration = Duration::from_millis(5);

/// Whether a full-content or metadata-only snapshot is being streamed
/// (spec.md §4.H: full content on initial connect and `request_all_files`,
/// metadata-only for `request_file_tree`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotMode {
	FullContent,
	MetadataOnly,
}

/// Stream the tree rooted at `root` through `emit`, honoring `filter` and
/// `mode`, terminating with a `Complete` marker.
///
/// `emit` is async so callers can hand it a transport send future directly;
/// a failure from `emit` aborts the walk early without sending `Complete`
/// (the transport error propagates and tears the session down per spec.md §7).
pub async fn stream_tree<F, Fut>(
	root: &Path,
	filter: &RwLock<FilterEngine>,
	mode: SnapshotMode,
	mut emit: F,
) -> std::io::Result<()>
where
	F: FnMut(SnapshotItem) -> Fut,
	Fut: std::future::Future<Output = std::io::Result<()>>,
{
	let mut count = 0usize;
	stream_dir(root, root, filter, mode, &mut emit, &mut count).await?;
	emit(SnapshotItem::Complete).await?;
	Ok(())
}

fn stream_dir<'a, F, Fut>(
	root: &'a Path,
	dir: &'a Path,
	filter: &'a RwLock<FilterEngine>,
	mode: SnapshotMode,
	emit: &'a mut F,
	count: &'a mut usize,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + 'a>>
where
	F: FnMut(SnapshotItem) -> Fut,
	Fut: std::future::Future<Output = std::io::Result<()>>,
{
	Box::pin(async move {
		let mut read_dir = tokio::fs::read_dir(dir).await?;
		let mut dirs = Vec::new();
		let mut files = Vec::new();
		while let Some(entry) = read_dir.next_entry().await? {
			let file_type = entry.file_type().await?;
			if file_type.is_dir() {
				dirs.push(entry.path());
			} else if file_type.is_file() {
				files.push(entry.path());
			}
		}
		dirs.sort();
		files.sort();

		// Directories first, depth-first, so a child's entry never arrives
		// before its parent's.
		for dir_path in dirs {
			let relative = match dir_path.strip_prefix(root) {
				Ok(r) => r,
				Err(_) => continue,
			};
			let size = None;
			if !filter.read().await.should_sync(relative, size, true, false) {
				continue;
			}
			emit_entry(&dir_path, root, true, None, emit).await?;
			*count += 1;
			maybe_pace(count).await;
			stream_dir(root, &dir_path, filter, mode, emit, count).await?;
		}

		for file_path in files {
			let relative = match file_path.strip_prefix(root) {
				Ok(r) => r,
				Err(_) => continue,
			};
			let metadata = tokio::fs::metadata(&file_path).await?;
			let is_symlink = tokio::fs::symlink_metadata(&file_path).await.map(|m| m.is_symlink()).unwrap_or(false);
			if !filter.read().await.should_sync(relative, Some(metadata.len()), false, is_symlink) {
				continue;
			}
			let content = match mode {
				SnapshotMode::FullContent => {
					let bytes = tokio::fs::read(&file_path).await?;
					Some(crate::codec::encode_content(&to_wire_path(relative), &bytes))
				}
				SnapshotMode::MetadataOnly => None,
			};
			emit_entry(&file_path, root, false, content, emit).await?;
			*count += 1;
			maybe_pace(count).await;
		}

		Ok(())
	})
}

async fn maybe_pace(count: &usize) {
	if count % PACE_EVERY == 0 {
		sleep(PACE_SLEEP).await;
	}
}

async fn emit_entry<F, Fut>(
	absolute: &Path,
	root: &Path,
	is_dir: bool,
	content: Option<String>,
	emit: &mut F,
) -> std::io::Result<()>
where
	F: FnMut(SnapshotItem) -> Fut,
	Fut: std::future::Future<Output = std::io::Result<()>>,
{
	let relative = absolute.strip_prefix(root).unwrap_or(absolute);
	let path = to_wire_path(relative);
	let name = relative.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
	emit(SnapshotItem::Item { path, name, is_dir, content }).await
}

/// Convenience wrapper collecting the stream into a `Vec`, for tests and for
/// callers that don't need incremental delivery.
pub async fn collect_tree(
	root: &Path,
	filter: &RwLock<FilterEngine>,
	mode: SnapshotMode,
) -> std::io::Result<Vec<SnapshotItem>> {
	let items = std::sync::Mutex::new(Vec::new());
	stream_tree(root, filter, mode, |item| {
		items.lock().unwrap().push(item);
		std::future::ready(Ok(()))
	})
	.await?;
	Ok(items.into_inner().unwrap())
}


// vim: ts=4
