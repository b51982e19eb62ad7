//! Transport session (spec.md §4.F, component F).
//!
//! A duplex, in-order, newline-delimited JSON message channel. Write access
//! is serialized behind a single mutex with a per-call deadline so
//! concurrent emitters never interleave partial frames (spec.md §5: "writes
//! use a single session-wide write mutex with a bounded deadline"). Built
//! over any `AsyncRead + AsyncWrite` pair, so a `TcpStream` and a
//! `tokio::io::duplex()` half are interchangeable — the latter is what the
//! test suite uses to exercise a full host/peer session in-process.
//!
//! Grounded on the teacher's `Arc<Mutex<stream>>`-guarded line-protocol
//! idiom, re-targeted from child-process stdio to a generic async stream.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::{AuthError, TransportError};
use crate::types::ChangeRecord;

pub const DEFAULT_WRITE_DEADLINE: Duration = Duration::from_secs(10);
pub const DEFAULT_AUTH_DEADLINE: Duration = Duration::from_secs(10);

/// Non-Change-Record frames sharing the wire namespace (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
	AuthRequest { host_id: String },
	AuthSuccess,
	AuthFailed { message: String },
	RequestAllFiles { origin: String },
	RequestFileTree { origin: String },
	FileTreeItem { path: String, name: String, is_dir: bool },
	FileTreeComplete,
	DownloadRequest { items: Vec<String> },
}

/// A decoded frame: either a control message or a Change Record. Spec.md
/// §6: "A frame matching both shapes is ambiguous; implementations MUST
/// inspect `type` first" — so a frame is a Change Record iff it has no
/// `type` key at all.
#[derive(Debug, Clone)]
pub enum Frame {
	Control(ControlMessage),
	Change(ChangeRecord),
}

impl Frame {
	fn decode(line: &str) -> Result<Frame, TransportError> {
		let value: serde_json::Value = serde_json::from_str(line)?;
		if value.get("type").is_some() {
			let control: ControlMessage = serde_json::from_value(value)
				.map_err(|e| TransportError::Decode { message: e.to_string() })?;
			Ok(Frame::Control(control))
		} else {
			let record: ChangeRecord = serde_json::from_value(value)
				.map_err(|e| TransportError::Decode { message: e.to_string() })?;
			Ok(Frame::Change(record))
		}
	}

	fn encode(&self) -> Result<String, TransportError> {
		match self {
			Frame::Control(c) => serde_json::to_string(c).map_err(Into::into),
			Frame::Change(r) => serde_json::to_string(r).map_err(Into::into),
		}
	}
}

/// One end of the duplex message channel. Reading is not internally
/// synchronized (only one reader loop should ever call `recv`); writing is,
/// via `write_mutex`.
pub struct TransportSession<S> {
	reader: Mutex<BufReader<tokio::io::ReadHalf<S>>>,
	writer: Mutex<tokio::io::WriteHalf<S>>,
	write_deadline: Duration,
}

impl<S> TransportSession<S>
where
	S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
	pub fn new(stream: S, write_deadline: Duration) -> Self {
		let (read_half, write_half) = tokio::io::split(stream);
		TransportSession {
			reader: Mutex::new(BufReader::new(read_half)),
			writer: Mutex::new(write_half),
			write_deadline,
		}
	}

	/// Read the next frame, blocking until one arrives or the channel closes.
	pub async fn recv(&self) -> Result<Frame, TransportError> {
		let mut reader = self.reader.lock().await;
		let mut line = String::new();
		let bytes_read = reader.read_line(&mut line).await?;
		if bytes_read == 0 {
			return Err(TransportError::Closed);
		}
		Frame::decode(line.trim_end())
	}

	/// Serialize and write one frame, bounded by the write deadline.
	pub async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
		let encoded = frame.encode()?;
		let mut writer = self.writer.lock().await;
		timeout(self.write_deadline, async {
			writer.write_all(encoded.as_bytes()).await?;
			writer.write_all(b"\n").await?;
			writer.flush().await
		})
		.await
		.map_err(|_| TransportError::Closed)??;
		Ok(())
	}

	pub async fn send_change(&self, record: &ChangeRecord) -> Result<(), TransportError> {
		self.send(&Frame::Change(record.clone())).await
	}

	pub async fn send_control(&self, message: ControlMessage) -> Result<(), TransportError> {
		self.send(&Frame::Control(message)).await
	}
}

/// Host side of the auth handshake (spec.md §4.F): read the first frame,
/// verify it's an `auth_request` with a matching `host_id`, respond.
pub async fn authenticate_as_host<S>(
	session: &TransportSession<S>,
	expected_host_id: &str,
	deadline: Duration,
) -> Result<(), AuthError>
where
	S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
	let frame = timeout(deadline, session.recv())
		.await
		.map_err(|_| AuthError::NotAnAuthRequest)?
		.map_err(|_| AuthError::NotAnAuthRequest)?;

	let host_id = match frame {
		Frame::Control(ControlMessage::AuthRequest { host_id }) => host_id,
		_ => {
			let _ = session
				.send_control(ControlMessage::AuthFailed {
					message: "first frame was not an auth_request".to_string(),
				})
				.await;
			return Err(AuthError::NotAnAuthRequest);
		}
	};

	if host_id != expected_host_id {
		let _ = session
			.send_control(ControlMessage::AuthFailed { message: "host id mismatch".to_string() })
			.await;
		return Err(AuthError::HostIdMismatch);
	}

	let _ = session.send_control(ControlMessage::AuthSuccess).await;
	Ok(())
}

/// Peer side: send the auth request, wait for success/failure.
pub async fn authenticate_as_peer<S>(
	session: &TransportSession<S>,
	host_id: &str,
	deadline: Duration,
) -> Result<(), AuthError>
where
	S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
	let _ = session
		.send_control(ControlMessage::AuthRequest { host_id: host_id.to_string() })
		.await;

	let frame = timeout(deadline, session.recv())
		.await
		.map_err(|_| AuthError::NotAnAuthRequest)?
		.map_err(|_| AuthError::NotAnAuthRequest)?;

	match frame {
		Frame::Control(ControlMessage::AuthSuccess) => Ok(()),
		Frame::Control(ControlMessage::AuthFailed { .. }) => Err(AuthError::HostIdMismatch),
		_ => Err(AuthError::NotAnAuthRequest),
	}
}


// vim: ts=4
