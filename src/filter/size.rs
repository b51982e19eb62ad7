use serde::{Deserialize, Serialize};

use super::FilterError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeFilterConfig {
	pub enabled: bool,
	#[serde(rename = "min")]
	pub min_bytes: u64,
	#[serde(rename = "max")]
	pub max_bytes: u64,
}

impl Default for SizeFilterConfig {
	fn default() -> Self {
		SizeFilterConfig { enabled: false, min_bytes: 0, max_bytes: 0 }
	}
}

pub struct SizeFilter {
	config: SizeFilterConfig,
}

impl SizeFilter {
	pub fn new(config: SizeFilterConfig) -> Result<Self, FilterError> {
		if config.enabled && config.max_bytes != 0 && config.min_bytes > config.max_bytes {
			return Err(FilterError::InvalidSizeBounds { min: config.min_bytes, max: config.max_bytes });
		}
		Ok(SizeFilter { config })
	}

	/// `max_bytes == 0` means unbounded above, matching spec.md §6's
	/// "0 = no bound" convention.
	pub fn allows(&self, size: u64) -> bool {
		if !self.config.enabled {
			return true;
		}
		if size < self.config.min_bytes {
			return false;
		}
		if self.config.max_bytes != 0 && size > self.config.max_bytes {
			return false;
		}
		true
	}
}


// vim: ts=4
