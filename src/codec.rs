//! Change Record content codec (spec.md §4.E).
//!
//! Wire content is base64 of raw bytes, optionally gzip-compressed first.
//! Compression is attempted when the payload is in `[1 KiB, 50 MiB]` and the
//! path's extension isn't in the known-incompressible set; it is rejected if
//! it doesn't shrink the payload to at least 0.9x its original size.
//!
//! The compressed/uncompressed distinction travels as a one-character tag
//! prefix on the wire string (`"r:"` raw, `"z:"` gzip), which is the
//! "per-record flag" option spec.md §4.E allows as an alternative to a
//! content sentinel.

use std::fmt;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

const MIN_COMPRESS_SIZE: usize = 1024;
const MAX_COMPRESS_SIZE: usize = 50 * 1024 * 1024;
const COMPRESS_ACCEPT_RATIO: f64 = 0.9;

/// Extensions (lowercase, no dot) that are already compressed or are common
/// media formats where gzip rarely helps.
const INCOMPRESSIBLE_EXTENSIONS: &[&str] = &[
	"jpg", "jpeg", "png", "gif", "webp", "bmp", "ico", "heic", "avif", "mp3", "mp4", "mov", "avi",
	"mkv", "webm", "flac", "ogg", "m4a", "aac", "zip", "gz", "tgz", "bz2", "xz", "7z", "rar",
	"zst", "z", "pdf", "docx", "xlsx", "pptx", "woff", "woff2",
];

#[derive(Debug)]
pub enum CodecError {
	UnknownTag(String),
	Malformed,
	Base64(base64::DecodeError),
	Gzip(std::io::Error),
}

impl fmt::Display for CodecError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CodecError::UnknownTag(t) => write!(f, "unknown content tag: {}", t),
			CodecError::Malformed => write!(f, "malformed content field"),
			CodecError::Base64(e) => write!(f, "base64 decode failed: {}", e),
			CodecError::Gzip(e) => write!(f, "gzip decode failed: {}", e),
		}
	}
}

impl std::error::Error for CodecError {}

fn extension_of(path: &str) -> Option<String> {
	path.rsplit('/').next()?.rsplit_once('.').map(|(_, ext)| ext.to_lowercase())
}

/// Whether the producer should attempt compression for this path/size,
/// per spec.md §4.E.
pub fn should_attempt_compression(path: &str, size: usize) -> bool {
	if !(MIN_COMPRESS_SIZE..=MAX_COMPRESS_SIZE).contains(&size) {
		return false;
	}
	match extension_of(path) {
		Some(ext) => !INCOMPRESSIBLE_EXTENSIONS.contains(&ext.as_str()),
		None => true,
	}
}

fn gzip(raw: &[u8]) -> std::io::Result<Vec<u8>> {
	let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
	encoder.write_all(raw)?;
	encoder.finish()
}

fn gunzip(compressed: &[u8]) -> std::io::Result<Vec<u8>> {
	let mut decoder = GzDecoder::new(compressed);
	let mut out = Vec::new();
	decoder.read_to_end(&mut out)?;
	Ok(out)
}

/// Encode raw file bytes into the wire content string for a Change Record,
/// compressing when it's worth it.
pub fn encode_content(path: &str, raw: &[u8]) -> String {
	if should_attempt_compression(path, raw.len()) {
		if let Ok(compressed) = gzip(raw) {
			let ratio = compressed.len() as f64 / raw.len().max(1) as f64;
			if ratio < COMPRESS_ACCEPT_RATIO {
				return format!("z:{}", crate::util::encode_content(&compressed));
			}
		}
	}
	format!("r:{}", crate::util::encode_content(raw))
}

/// Decode a Change Record's wire content string back to raw bytes.
/// Receivers must accept both tags regardless of local compression policy.
pub fn decode_content(content: &str) -> Result<Vec<u8>, CodecError> {
	let (tag, payload) = content.split_once(':').ok_or(CodecError::Malformed)?;
	let decoded = crate::util::decode_content(payload).map_err(CodecError::Base64)?;
	match tag {
		"r" => Ok(decoded),
		"z" => gunzip(&decoded).map_err(CodecError::Gzip),
		other => Err(CodecError::UnknownTag(other.to_string())),
	}
}


// vim: ts=4
