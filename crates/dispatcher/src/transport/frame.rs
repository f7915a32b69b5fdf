//! Length-prefixed framing for byte-stream transports.
//!
//! Frame layout: `[length: u32 LE][payload: length bytes of UTF-8]`.

use crate::error::{Error, Result};

/// Size of the little-endian length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest payload accepted in either direction (256 MiB).
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Encodes one payload as a frame.
pub fn encode_frame(payload: &str) -> Result<Vec<u8>> {
	let bytes = payload.as_bytes();
	let prefix = length_prefix(bytes.len())?;
	let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + bytes.len());
	frame.extend_from_slice(&prefix);
	frame.extend_from_slice(bytes);
	Ok(frame)
}

pub(super) fn length_prefix(len: usize) -> Result<[u8; LENGTH_PREFIX_LEN]> {
	let prefix = u32::try_from(len).ok().filter(|_| len <= MAX_FRAME_LEN);
	let prefix = prefix.ok_or_else(|| {
		Error::Transport(format!(
			"Frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
		))
	})?;
	Ok(prefix.to_le_bytes())
}

/// Incremental frame decoder.
///
/// Bytes are appended with [`push`](Self::push); every complete frame is
/// carved out in order and the remainder stays buffered for the next chunk.
#[derive(Debug)]
pub struct FrameDecoder {
	buffer: Vec<u8>,
	max_frame_len: usize,
}

impl Default for FrameDecoder {
	fn default() -> Self {
		Self::with_max_frame_len(MAX_FRAME_LEN)
	}
}

impl FrameDecoder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Decoder that rejects any frame announcing more than `max_frame_len` bytes.
	pub fn with_max_frame_len(max_frame_len: usize) -> Self {
		Self {
			buffer: Vec::new(),
			max_frame_len,
		}
	}

	/// Appends `chunk` and returns every frame completed by it.
	///
	/// A frame whose payload is not UTF-8 is an error; frames carved before it
	/// in the same chunk are lost with it, since the stream is unusable anyway.
	pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
		self.buffer.extend_from_slice(chunk);

		let mut messages = Vec::new();
		let mut pos = 0;
		while let Some(len) = self.frame_len_at(pos) {
			if len > self.max_frame_len {
				return Err(Error::Transport(format!(
					"Frame of {len} bytes exceeds the {} byte limit",
					self.max_frame_len
				)));
			}
			let start = pos + LENGTH_PREFIX_LEN;
			if self.buffer.len() < start + len {
				break;
			}
			let payload = std::str::from_utf8(&self.buffer[start..start + len])
				.map_err(|e| Error::Transport(format!("Frame is not valid UTF-8: {e}")))?;
			messages.push(payload.to_string());
			pos = start + len;
		}

		self.buffer.drain(..pos);
		Ok(messages)
	}

	/// Number of bytes waiting for the rest of their frame.
	pub fn buffered(&self) -> usize {
		self.buffer.len()
	}

	fn frame_len_at(&self, pos: usize) -> Option<usize> {
		let prefix = self.buffer.get(pos..pos + LENGTH_PREFIX_LEN)?;
		let mut len = [0u8; LENGTH_PREFIX_LEN];
		len.copy_from_slice(prefix);
		Some(u32::from_le_bytes(len) as usize)
	}
}
