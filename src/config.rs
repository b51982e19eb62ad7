//! Persisted configuration (spec.md §6: "Persisted state").
//!
//! A single JSON config file per endpoint. Priority chain: built-in
//! defaults (`Config::default`), then the config file, then CLI flags
//! (highest priority) — wired up in `main.rs`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::filter::FilterConfig;

/// Unified configuration for a sync endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Directory whose subtree is synchronized.
	pub sync_directory: PathBuf,

	/// Shared, non-secret 6-character identifier presented in `auth_request`.
	pub host_id: String,

	/// Host address a peer connects to. Unused when running as host.
	pub server_ip: String,

	/// Host port a peer connects to. Unused when running as host.
	pub server_port: u16,

	/// Connect automatically on startup instead of waiting for a manual
	/// action from the external GUI/CLI collaborator.
	pub auto_connect: bool,

	/// Path/extension/size filter configuration (spec.md §3, §6).
	pub filter: FilterConfig,

	/// Echo-suppression window, milliseconds (spec.md §4.B: `W >= 3x`
	/// expected watcher latency; default 4s).
	pub skip_window_ms: u64,

	/// Periodic reconciler tick interval, milliseconds (spec.md §4.D: 2-3s).
	pub reconciler_interval_ms: u64,

	/// Settle delay before arming a newly observed directory, milliseconds
	/// (spec.md §4.C: 100-250ms).
	pub watcher_settle_ms: u64,

	/// Per-call deadline for a transport write, seconds (spec.md §4.F).
	pub write_deadline_secs: u64,

	/// Read deadline for the auth handshake, seconds (spec.md §5: 10s).
	pub auth_deadline_secs: u64,

	/// Completion deadline for a full snapshot pull, seconds (spec.md §5:
	/// 60-120s).
	pub snapshot_timeout_secs: u64,

	/// Bounded history ring capacity for resolved conflicts (spec.md §4.I:
	/// default 100).
	pub conflict_history_capacity: usize,

	/// `RUST_LOG`-style default log level, used when the environment
	/// variable itself is unset.
	pub log_level: String,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			sync_directory: std::env::var("HOME")
				.ok()
				.map(|h| PathBuf::from(h).join("syncr"))
				.unwrap_or_else(|| PathBuf::from("./syncr")),
			host_id: String::new(),
			server_ip: "0.0.0.0".to_string(),
			server_port: 7862,
			auto_connect: false,
			filter: FilterConfig::default(),
			skip_window_ms: crate::state::DEFAULT_SKIP_WINDOW.as_millis() as u64,
			reconciler_interval_ms: crate::reconciler::DEFAULT_TICK.as_millis() as u64,
			watcher_settle_ms: crate::watcher::DEFAULT_SETTLE_DELAY.as_millis() as u64,
			write_deadline_secs: crate::transport::DEFAULT_WRITE_DEADLINE.as_secs(),
			auth_deadline_secs: crate::transport::DEFAULT_AUTH_DEADLINE.as_secs(),
			snapshot_timeout_secs: 90,
			conflict_history_capacity: 100,
			log_level: "info".to_string(),
		}
	}
}

impl Config {
	/// Load a config from a JSON file, falling back to defaults for any
	/// field the file omits (via `#[serde(default)]`).
	pub async fn load(path: &std::path::Path) -> std::io::Result<Config> {
		let bytes = tokio::fs::read(path).await?;
		serde_json::from_slice(&bytes)
			.map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
	}

	pub async fn save(&self, path: &std::path::Path) -> std::io::Result<()> {
		let json = serde_json::to_vec_pretty(self)
			.map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		tokio::fs::write(path, json).await
	}
}


// vim: ts=4
