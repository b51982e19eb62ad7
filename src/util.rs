//! Small utility helpers shared across the sync engine.
#![allow(dead_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::Engine;

/// Hash a buffer using BLAKE3 and return a base64-encoded digest.
///
/// Used to compare local and remote file content without shipping full
/// content just to detect a conflict (see the conflict manager).
pub fn hash(buf: &[u8]) -> String {
	let hash = blake3::hash(buf);
	base64::engine::general_purpose::URL_SAFE.encode(hash.as_bytes())
}

/// Base64-encode raw file content for the wire (spec.md §4.E).
pub fn encode_content(buf: &[u8]) -> String {
	base64::engine::general_purpose::STANDARD.encode(buf)
}

/// Base64-decode wire content back to raw bytes.
pub fn decode_content(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
	base64::engine::general_purpose::STANDARD.decode(s)
}

/// Render `st` as `YYYYmmdd_HHMMSS` UTC, for the conflict manager's
/// `keepBoth` rename scheme (spec.md §4.I). Implemented from scratch
/// (Howard Hinnant's civil-from-days algorithm) to avoid pulling in a date
/// crate for one formatting call.
pub fn format_timestamp_utc(st: SystemTime) -> String {
	let secs = st.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0) as i64;
	let days = secs.div_euclid(86_400);
	let time_of_day = secs.rem_euclid(86_400);
	let (hour, minute, second) = (time_of_day / 3600, (time_of_day / 60) % 60, time_of_day % 60);

	// civil_from_days, days since 1970-01-01
	let z = days + 719_468;
	let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
	let doe = (z - era * 146_097) as u64;
	let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
	let y = yoe as i64 + era * 400;
	let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
	let mp = (5 * doy + 2) / 153;
	let day = doy - (153 * mp + 2) / 5 + 1;
	let month = if mp < 10 { mp + 3 } else { mp - 9 };
	let year = if month <= 2 { y + 1 } else { y };

	format!(
		"{:04}{:02}{:02}_{:02}{:02}{:02}",
		year, month, day, hour, minute, second
	)
}


// vim: ts=4
