//! Core data types shared by every component: the Change Record and Snapshot
//! Item from spec.md §3, and the small enums they're built from.

use serde::{Deserialize, Serialize};

/// Which side produced a Change Record. The receiver drops any record whose
/// origin matches its own role, to prevent re-applying its own echoes
/// (spec.md §3, Change Record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
	Host,
	Peer,
}

impl Origin {
	pub fn other(self) -> Origin {
		match self {
			Origin::Host => Origin::Peer,
			Origin::Peer => Origin::Host,
		}
	}
}

/// The operation a Change Record describes.
///
/// `Create` and `Write` are dispatched identically by the apply engine
/// (spec.md §3); producers may distinguish "first observed" from "modified"
/// for their own bookkeeping, but a receiver never needs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
	Mkdir,
	Create,
	Write,
	Remove,
}

impl Op {
	pub fn is_content_op(self) -> bool {
		matches!(self, Op::Create | Op::Write)
	}
}

/// The atomic unit of synchronization: one filesystem mutation.
///
/// `path` is forward-slash-separated and relative to the sync root; it is
/// validated with [`crate::validation::normalize_wire_path`] before it is
/// ever used to touch the filesystem. `content` carries whole-file bytes
/// (no block-level diffing, per spec.md's non-goals) and is only present for
/// `create`/`write` of a non-directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
	/// Wire field name is `filename` (spec.md §6); kept as `path` on the
	/// Rust side to match the rest of the data model (spec.md §3).
	#[serde(rename = "filename")]
	pub path: String,
	pub op: Op,
	pub is_dir: bool,
	/// Base64-encoded file content, present only for file create/write.
	/// A leading `"z:"` sentinel marks gzip-compressed payloads (spec.md
	/// §4.E: receivers must accept both compressed and uncompressed content).
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	pub origin: Origin,
}

impl ChangeRecord {
	pub fn mkdir(path: impl Into<String>, origin: Origin) -> Self {
		ChangeRecord { path: path.into(), op: Op::Mkdir, is_dir: true, content: None, origin }
	}

	pub fn remove(path: impl Into<String>, is_dir: bool, origin: Origin) -> Self {
		ChangeRecord { path: path.into(), op: Op::Remove, is_dir, content: None, origin }
	}

	/// Build a `write`/`create` record, encoding (and conditionally
	/// compressing) `raw_content` per spec.md §4.E.
	pub fn with_content(
		path: impl Into<String>,
		op: Op,
		raw_content: &[u8],
		origin: Origin,
	) -> Self {
		debug_assert!(op.is_content_op());
		let path = path.into();
		let content = crate::codec::encode_content(&path, raw_content);
		ChangeRecord { path, op, is_dir: false, content: Some(content), origin }
	}

	/// Invariant 3: no record with an op in {write, create} and is_dir=true.
	pub fn is_well_formed(&self) -> bool {
		if self.op.is_content_op() && self.is_dir {
			return false;
		}
		if self.op == Op::Mkdir && !self.is_dir {
			return false;
		}
		true
	}
}

/// Directory traversal output streamed by the snapshot engine (spec.md §3,
/// §4.H). A `Complete` marker terminates the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SnapshotItem {
	Item { path: String, name: String, is_dir: bool, content: Option<String> },
	Complete,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_origin_other() {
		assert_eq!(Origin::Host.other(), Origin::Peer);
		assert_eq!(Origin::Peer.other(), Origin::Host);
	}

	#[test]
	fn test_change_record_well_formed() {
		let r = ChangeRecord::mkdir("a/b", Origin::Host);
		assert!(r.is_well_formed());

		let mut bad = ChangeRecord::with_content("a/b.txt", Op::Write, b"hi", Origin::Host);
		bad.is_dir = true;
		assert!(!bad.is_well_formed());
	}

	#[test]
	fn test_change_record_mkdir_shape() {
		let r = ChangeRecord::mkdir("dir", Origin::Peer);
		assert_eq!(r.op, Op::Mkdir);
		assert!(r.is_dir);
		assert!(r.content.is_none());
	}

	#[test]
	fn test_change_record_remove_shape() {
		let r = ChangeRecord::remove("dir", true, Origin::Host);
		assert_eq!(r.op, Op::Remove);
		assert!(r.is_dir);
	}

	#[test]
	fn test_serde_roundtrip() {
		let r = ChangeRecord::with_content("a.txt", Op::Create, b"hello\n", Origin::Host);
		let json = serde_json::to_string(&r).unwrap();
		let back: ChangeRecord = serde_json::from_str(&json).unwrap();
		assert_eq!(back.path, r.path);
		assert_eq!(back.op, r.op);
	}
}

// vim: ts=4
