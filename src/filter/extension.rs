use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionMode {
	Blacklist,
	Whitelist,
}

impl Default for ExtensionMode {
	fn default() -> Self {
		ExtensionMode::Blacklist
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtensionFilterConfig {
	pub enabled: bool,
	pub mode: ExtensionMode,
	pub extensions: BTreeSet<String>,
}

/// Lowercases, strips a leading dot, and keeps only alphanumeric characters
/// (spec.md §3: "Extensions are normalized: lowercased, leading `.` stripped,
/// alphanumeric only").
pub fn normalize_extension(ext: &str) -> String {
	ext.trim_start_matches('.').chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>().to_lowercase()
}

fn extension_of(path: &Path) -> Option<String> {
	path.extension().map(|e| normalize_extension(&e.to_string_lossy()))
}

pub struct ExtensionFilter {
	config: ExtensionFilterConfig,
	normalized: BTreeSet<String>,
}

impl ExtensionFilter {
	pub fn new(config: ExtensionFilterConfig) -> Self {
		let normalized = config.extensions.iter().map(|e| normalize_extension(e)).collect();
		ExtensionFilter { config, normalized }
	}

	pub fn allows(&self, path: &Path) -> bool {
		if !self.config.enabled {
			return true;
		}
		let ext = extension_of(path);
		let matches = ext.as_deref().map(|e| self.normalized.contains(e)).unwrap_or(false);
		match self.config.mode {
			ExtensionMode::Blacklist => !matches,
			ExtensionMode::Whitelist => matches,
		}
	}
}


// vim: ts=4
