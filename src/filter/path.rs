use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathFilterConfig {
	pub enabled: bool,
	pub excluded_folders: BTreeSet<String>,
	pub exclude_hidden: bool,
	pub exclude_symlinks: bool,
}

pub struct PathFilter {
	config: PathFilterConfig,
	excluded_lower: BTreeSet<String>,
}

impl PathFilter {
	pub fn new(config: PathFilterConfig) -> Self {
		let excluded_lower = config.excluded_folders.iter().map(|f| f.to_lowercase()).collect();
		PathFilter { config, excluded_lower }
	}

	/// Applies to both files and directories (spec.md §4.A). `path` is
	/// relative to the sync root.
	pub fn allows(&self, path: &Path, is_symlink: bool) -> bool {
		if !self.config.enabled {
			return true;
		}
		if self.config.exclude_symlinks && is_symlink {
			return false;
		}
		for component in path.components() {
			let name = component.as_os_str().to_string_lossy();
			if self.config.exclude_hidden && name.starts_with('.') {
				return false;
			}
			if self.excluded_lower.contains(name.to_lowercase().as_str()) {
				return false;
			}
		}
		true
	}
}


// vim: ts=4
