//! Conflict resolution strategies (spec.md §4.I).

use std::time::SystemTime;

use super::{Conflict, ConflictResolutionError, FileVersion};
use crate::util::format_timestamp_utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
	/// Discard remote; the local version is emitted back to the host on
	/// the next push.
	KeepLocal,
	/// Write the remote content, discarding local changes.
	KeepRemote,
	/// Later mtime wins; on a tie, remote wins.
	KeepNewest,
	/// Rename local aside, then write remote to the original path.
	KeepBoth,
	/// Text-only line union; degrades to `KeepNewest` for binary files.
	AutoMerge,
}

impl std::str::FromStr for ConflictResolution {
	type Err = String;

	/// Parse a CLI-facing strategy name, e.g. from the `resolve` command.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"keep-local" => Ok(ConflictResolution::KeepLocal),
			"keep-remote" => Ok(ConflictResolution::KeepRemote),
			"keep-newest" => Ok(ConflictResolution::KeepNewest),
			"keep-both" => Ok(ConflictResolution::KeepBoth),
			"auto-merge" => Ok(ConflictResolution::AutoMerge),
			other => Err(format!("unknown conflict resolution strategy: {}", other)),
		}
	}
}

/// What the apply engine should actually do to resolve a conflict, already
/// materialized (merge performed, rename name computed) so the caller has
/// no further strategy logic to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionAction {
	/// Do not touch the filesystem; local wins.
	KeepLocalContent,
	/// Overwrite the path with this content.
	WriteContent(Vec<u8>),
	/// Rename the local file to `renamed_to`, then write `content` to the
	/// original path.
	RenameThenWrite { renamed_to: String, content: Vec<u8> },
}

fn split_basename_ext(path: &str) -> (&str, &str) {
	let file_name = path.rsplit('/').next().unwrap_or(path);
	match file_name.rsplit_once('.') {
		Some((base, ext)) if !base.is_empty() => (base, ext),
		_ => (file_name, ""),
	}
}

/// Build the `keepBoth` rename target: `{basename}_local_{timestamp}{ext}`,
/// preserving the original path's directory.
pub fn keep_both_rename_path(path: &str, now: SystemTime) -> String {
	let dir = match path.rfind('/') {
		Some(idx) => &path[..=idx],
		None => "",
	};
	let file_name = &path[dir.len()..];
	let (base, ext) = split_basename_ext(file_name);
	let stamp = format_timestamp_utc(now);
	if ext.is_empty() {
		format!("{}{}_local_{}", dir, base, stamp)
	} else {
		format!("{}{}_local_{}.{}", dir, base, stamp, ext)
	}
}

fn is_probably_text(content: &[u8]) -> bool {
	std::str::from_utf8(content).is_ok() && !content.contains(&0)
}

/// Line-union merge: local's lines first (in order), then any remote lines
/// not already present, preserving order of first occurrence.
fn union_merge_lines(local: &[u8], remote: &[u8]) -> Option<Vec<u8>> {
	let local_str = std::str::from_utf8(local).ok()?;
	let remote_str = std::str::from_utf8(remote).ok()?;

	let mut seen = std::collections::HashSet::new();
	let mut merged = Vec::new();
	for line in local_str.lines() {
		if seen.insert(line) {
			merged.push(line);
		}
	}
	for line in remote_str.lines() {
		if seen.insert(line) {
			merged.push(line);
		}
	}

	let local_lines = local_str.lines().count();
	let remote_lines = remote_str.lines().count();
	let mut out = String::new();
	if merged.len() > local_lines && merged.len() > remote_lines {
		out.push_str("<<<<<<< merged by syncr >>>>>>>\n");
	}
	for line in &merged {
		out.push_str(line);
		out.push('\n');
	}
	Some(out.into_bytes())
}

pub struct ConflictResolver;

impl ConflictResolver {
	/// Resolve `conflict` under `strategy`, producing the concrete action
	/// the apply engine must perform. Content for `local`/`remote` must be
	/// populated in the conflict's `FileVersion`s for `KeepBoth`/`AutoMerge`
	/// to work; other strategies only need metadata.
	pub fn resolve(
		conflict: &Conflict,
		strategy: ConflictResolution,
		now: SystemTime,
	) -> Result<ResolutionAction, ConflictResolutionError> {
		match strategy {
			ConflictResolution::KeepLocal => Ok(ResolutionAction::KeepLocalContent),

			ConflictResolution::KeepRemote => {
				let content = remote_content(&conflict.remote)?;
				Ok(ResolutionAction::WriteContent(content))
			}

			ConflictResolution::KeepNewest => {
				if conflict.remote.mtime >= conflict.local.mtime {
					let content = remote_content(&conflict.remote)?;
					Ok(ResolutionAction::WriteContent(content))
				} else {
					Ok(ResolutionAction::KeepLocalContent)
				}
			}

			ConflictResolution::KeepBoth => {
				let content = remote_content(&conflict.remote)?;
				let renamed_to = keep_both_rename_path(&conflict.path, now);
				Ok(ResolutionAction::RenameThenWrite { renamed_to, content })
			}

			ConflictResolution::AutoMerge => {
				let local_content = conflict.local.content.as_deref().ok_or_else(|| {
					ConflictResolutionError::StrategyNotApplicable(
						"local content unavailable for merge".to_string(),
					)
				})?;
				let remote_content_bytes = remote_content(&conflict.remote)?;

				if !is_probably_text(local_content) || !is_probably_text(&remote_content_bytes) {
					return Self::resolve(conflict, ConflictResolution::KeepNewest, now);
				}

				match union_merge_lines(local_content, &remote_content_bytes) {
					Some(merged) => Ok(ResolutionAction::WriteContent(merged)),
					None => Self::resolve(conflict, ConflictResolution::KeepNewest, now),
				}
			}
		}
	}
}

fn remote_content(remote: &FileVersion) -> Result<Vec<u8>, ConflictResolutionError> {
	remote.content.clone().ok_or_else(|| {
		ConflictResolutionError::StrategyNotApplicable("remote content unavailable".to_string())
	})
}


// vim: ts=4
