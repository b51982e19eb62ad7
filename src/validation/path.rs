//! Path validation and wire/native path conversion.

use std::path::{Component, Path, PathBuf};

use super::ValidationError;

/// Check if a path is safe (no parent directory references)
///
/// Ensures paths cannot escape the sync root directory using ".." references.
pub fn is_path_safe(path: &Path) -> bool {
	!path.components().any(|c| matches!(c, Component::ParentDir))
}

/// Validate a path is safe
pub fn validate_path_safe(path: &Path) -> Result<(), ValidationError> {
	if !is_path_safe(path) {
		return Err(ValidationError::PathError(
			"path contains parent directory reference (..)".to_string(),
		));
	}
	Ok(())
}

/// Check if path is within a root directory (after both are joined/resolved).
pub fn is_path_within_root(path: &Path, root: &Path) -> bool {
	path.starts_with(root)
}

/// Validate that path is within root directory
pub fn validate_path_within_root(path: &Path, root: &Path) -> Result<(), ValidationError> {
	if !is_path_within_root(path, root) {
		return Err(ValidationError::PathError(format!(
			"path {:?} is outside root directory {:?}",
			path, root
		)));
	}
	Ok(())
}

/// Check if path has no absolute components
pub fn is_path_relative(path: &Path) -> bool {
	!path.is_absolute()
}

/// Validate that path is relative (not absolute)
pub fn validate_path_relative(path: &Path) -> Result<(), ValidationError> {
	if path.is_absolute() {
		return Err(ValidationError::PathError(format!(
			"path must be relative, got absolute path: {:?}",
			path
		)));
	}
	Ok(())
}

/// Parse a wire path (forward-slash-separated, from a Change Record) into a
/// native relative `PathBuf`, enforcing the invariants from spec.md §3: no
/// leading slash, no `.`/`..` components.
///
/// This is the single choke point every incoming Change Record path passes
/// through before it touches the filesystem (spec.md §4.G step 2).
pub fn normalize_wire_path(wire_path: &str) -> Result<PathBuf, ValidationError> {
	if wire_path.is_empty() {
		return Err(ValidationError::PathError("path is empty".to_string()));
	}
	if wire_path.starts_with('/') {
		return Err(ValidationError::PathError(format!(
			"path must not have a leading slash: {}",
			wire_path
		)));
	}

	let mut normalized = PathBuf::new();
	for segment in wire_path.split('/') {
		match segment {
			"" => {
				return Err(ValidationError::PathError(format!(
					"path contains an empty component: {}",
					wire_path
				)))
			}
			"." => {
				return Err(ValidationError::PathError(format!(
					"path contains a '.' component: {}",
					wire_path
				)))
			}
			".." => {
				return Err(ValidationError::PathError(format!(
					"path contains a '..' component: {}",
					wire_path
				)))
			}
			seg => normalized.push(seg),
		}
	}

	Ok(normalized)
}

/// Render a native relative path as a forward-slash wire path for a Change
/// Record or Snapshot Item.
pub fn to_wire_path(path: &Path) -> String {
	path.components()
		.map(|c| c.as_os_str().to_string_lossy().into_owned())
		.collect::<Vec<_>>()
		.join("/")
}

/// Characters reserved in Windows path components; replaced wherever they
/// appear so a Change Record produced on one platform can still be applied
/// on another (spec.md §6: "names invalid on the local platform MUST be
/// sanitized"). No-op on every other platform, since POSIX filesystems only
/// reject `/` and NUL, both of which are already excluded by
/// `normalize_wire_path`'s component splitting.
#[cfg(windows)]
const WINDOWS_RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

#[cfg(windows)]
const WINDOWS_RESERVED_NAMES: &[&str] = &[
	"CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
	"COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[cfg(windows)]
fn sanitize_component(component: &str) -> String {
	let mut sanitized: String = component
		.chars()
		.map(|c| if (c as u32) < 32 || WINDOWS_RESERVED_CHARS.contains(&c) { '_' } else { c })
		.collect();
	while matches!(sanitized.chars().last(), Some('.') | Some(' ')) {
		sanitized.pop();
		sanitized.push('_');
	}
	if WINDOWS_RESERVED_NAMES.contains(&sanitized.to_ascii_uppercase().as_str()) {
		sanitized.push('_');
	}
	if sanitized.is_empty() {
		sanitized.push('_');
	}
	sanitized
}

#[cfg(not(windows))]
fn sanitize_component(component: &str) -> String {
	component.to_string()
}

/// Replace characters invalid on the local platform in every component of
/// `relative`. The Change Record itself is never touched; only the path used
/// for the actual filesystem call is rewritten.
pub fn sanitize_for_local_fs(relative: &Path) -> PathBuf {
	let mut out = PathBuf::new();
	for component in relative.components() {
		out.push(sanitize_component(&component.as_os_str().to_string_lossy()));
	}
	out
}

/// Resolve a wire path under `root`, rejecting anything that would escape it.
/// This is the apply-engine-facing helper combining `normalize_wire_path`,
/// local-platform sanitization, and `validate_path_within_root` (spec.md
/// §4.G step 2). This is the single choke point every incoming Change Record
/// path passes through before it touches the filesystem.
pub fn resolve_under_root(root: &Path, wire_path: &str) -> Result<PathBuf, ValidationError> {
	let relative = normalize_wire_path(wire_path)?;
	let sanitized = sanitize_for_local_fs(&relative);
	let resolved = root.join(&sanitized);
	validate_path_within_root(&resolved, root)?;
	Ok(resolved)
}


// vim: ts=4
