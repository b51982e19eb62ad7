//! Path/Filter engine (spec.md §4.A, component A).
//!
//! Gates what gets synchronized. Evaluation order matters: path rules run
//! first (they apply to both files and directories), then extension rules
//! (files only), then size rules (files only). Any rule that rejects stops
//! evaluation — a result of `false` means "do not sync this path".
//!
//! Filter changes at runtime take effect on the next event; already-
//! synchronized items are not retroactively removed (that's the caller's
//! concern, not this module's).

mod extension;
mod path;
mod size;

pub use extension::{ExtensionFilter, ExtensionFilterConfig, ExtensionMode};
pub use path::{PathFilter, PathFilterConfig};
pub use size::{SizeFilter, SizeFilterConfig};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug)]
pub enum FilterError {
	InvalidSizeBounds { min: u64, max: u64 },
}

impl fmt::Display for FilterError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FilterError::InvalidSizeBounds { min, max } => {
				write!(f, "min size {} is greater than max size {}", min, max)
			}
		}
	}
}

impl std::error::Error for FilterError {}

/// The full, persisted filter configuration (spec.md §6: nested JSON under
/// `extension`/`size`/`path`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FilterConfig {
	pub extension: ExtensionFilterConfig,
	pub size: SizeFilterConfig,
	pub path: PathFilterConfig,
}

/// Combined filter engine applying path, extension, and size rules in order.
pub struct FilterEngine {
	extension: ExtensionFilter,
	size: SizeFilter,
	path: PathFilter,
}

impl FilterEngine {
	pub fn new(config: &FilterConfig) -> Result<Self, FilterError> {
		Ok(FilterEngine {
			extension: ExtensionFilter::new(config.extension.clone()),
			size: SizeFilter::new(config.size.clone())?,
			path: PathFilter::new(config.path.clone()),
		})
	}

	/// Decide whether `path` is eligible for sync.
	///
	/// `size` and `is_symlink` are ignored for directories; `size` must be
	/// `Some` for files (directories never carry a size rule, spec.md §3).
	pub fn should_sync(
		&self,
		relative_path: &std::path::Path,
		size: Option<u64>,
		is_dir: bool,
		is_symlink: bool,
	) -> bool {
		if !self.path.allows(relative_path, is_symlink) {
			return false;
		}
		if is_dir {
			return true;
		}
		if !self.extension.allows(relative_path) {
			return false;
		}
		if let Some(size) = size {
			if !self.size.allows(size) {
				return false;
			}
		}
		true
	}

	pub fn replace_config(&mut self, config: &FilterConfig) -> Result<(), FilterError> {
		self.extension = ExtensionFilter::new(config.extension.clone());
		self.size = SizeFilter::new(config.size.clone())?;
		self.path = PathFilter::new(config.path.clone());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeSet;
	use std::path::Path;

	fn engine_with(
		ext: ExtensionFilterConfig,
		size: SizeFilterConfig,
		path: PathFilterConfig,
	) -> FilterEngine {
		FilterEngine::new(&FilterConfig { extension: ext, size, path }).unwrap()
	}

	#[test]
	fn test_order_path_rule_rejects_before_extension_checked() {
		// S4: node_modules excluded by path filter even though extension would pass.
		let engine = engine_with(
			ExtensionFilterConfig::default(),
			SizeFilterConfig::default(),
			PathFilterConfig {
				enabled: true,
				excluded_folders: BTreeSet::from(["node_modules".to_string()]),
				exclude_hidden: false,
				exclude_symlinks: false,
			},
		);
		assert!(!engine.should_sync(
			Path::new("node_modules/pkg/x.js"),
			Some(10),
			false,
			false
		));
	}

	#[test]
	fn test_directories_never_filtered_by_extension_or_size() {
		let engine = engine_with(
			ExtensionFilterConfig {
				enabled: true,
				mode: ExtensionMode::Blacklist,
				extensions: BTreeSet::from(["tmp".to_string()]),
			},
			SizeFilterConfig { enabled: true, min_bytes: 100, max_bytes: 200 },
			PathFilterConfig::default(),
		);
		assert!(engine.should_sync(Path::new("some.tmp"), None, true, false));
	}

	#[test]
	fn test_extension_blacklist_then_pass() {
		// S6
		let engine = engine_with(
			ExtensionFilterConfig {
				enabled: true,
				mode: ExtensionMode::Blacklist,
				extensions: BTreeSet::from(["tmp".to_string()]),
			},
			SizeFilterConfig::default(),
			PathFilterConfig::default(),
		);
		assert!(!engine.should_sync(Path::new("scratch.tmp"), Some(5), false, false));
		assert!(engine.should_sync(Path::new("scratch.txt"), Some(5), false, false));
	}

	#[test]
	fn test_size_bounds_inclusive() {
		// Boundary property 10
		let engine = engine_with(
			ExtensionFilterConfig::default(),
			SizeFilterConfig { enabled: true, min_bytes: 10, max_bytes: 100 },
			PathFilterConfig::default(),
		);
		assert!(engine.should_sync(Path::new("f.bin"), Some(10), false, false));
		assert!(engine.should_sync(Path::new("f.bin"), Some(100), false, false));
		assert!(!engine.should_sync(Path::new("f.bin"), Some(9), false, false));
		assert!(!engine.should_sync(Path::new("f.bin"), Some(101), false, false));
	}

	#[test]
	fn test_replace_config_takes_effect() {
		let mut engine = engine_with(
			ExtensionFilterConfig::default(),
			SizeFilterConfig::default(),
			PathFilterConfig::default(),
		);
		assert!(engine.should_sync(Path::new("a.log"), Some(1), false, false));

		let new_config = FilterConfig {
			extension: ExtensionFilterConfig {
				enabled: true,
				mode: ExtensionMode::Blacklist,
				extensions: BTreeSet::from(["log".to_string()]),
			},
			size: SizeFilterConfig::default(),
			path: PathFilterConfig::default(),
		};
		engine.replace_config(&new_config).unwrap();
		assert!(!engine.should_sync(Path::new("a.log"), Some(1), false, false));
	}
}

// vim: ts=4
