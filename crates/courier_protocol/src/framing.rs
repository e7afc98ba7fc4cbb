#![forbid(unsafe_code)]

use bytes::{Buf, BufMut, BytesMut};
use prost::Message;
use thiserror::Error;

/// Default maximum frame payload size.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024; // 1 MiB

const PREFIX_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("insufficient data: need={need} have={have}")]
	InsufficientData {
		need: usize,
		have: usize,
	},

	#[error("protobuf decode error: {0}")]
	Decode(#[from] prost::DecodeError),

	#[error("protobuf encode error: {0}")]
	Encode(#[from] prost::EncodeError),
}

fn check_len(len: usize, max: usize) -> Result<(), FramingError> {
	if len > max {
		return Err(FramingError::FrameTooLarge { len, max });
	}
	Ok(())
}

fn peek_len(src: &[u8]) -> Option<usize> {
	let prefix: [u8; PREFIX_LEN] = src.get(..PREFIX_LEN)?.try_into().ok()?;
	Some(u32::from_be_bytes(prefix) as usize)
}

/// Encode a protobuf message into a length-prefixed frame.
pub fn encode_frame<M: Message>(msg: &M, max_frame_size: usize) -> Result<Vec<u8>, FramingError> {
	let mut out = BytesMut::new();
	encode_frame_into(&mut out, msg, max_frame_size)?;
	Ok(out.to_vec())
}

/// Append an encoded frame to `buf`.
pub fn encode_frame_into<M: Message>(buf: &mut BytesMut, msg: &M, max_frame_size: usize) -> Result<(), FramingError> {
	let payload_len = msg.encoded_len();
	check_len(payload_len, max_frame_size)?;

	buf.reserve(frame_len_from_payload_len(payload_len));
	buf.put_u32(payload_len as u32);
	msg.encode(buf)?;
	Ok(())
}

/// Total frame length (prefix + payload).
#[inline]
pub fn frame_len_from_payload_len(payload_len: usize) -> usize {
	PREFIX_LEN + payload_len
}

/// Decode one frame from the start of `src`, returning the message and the
/// number of bytes consumed.
pub fn decode_frame<M: Message + Default>(src: &[u8], max_frame_size: usize) -> Result<(M, usize), FramingError> {
	let Some(len) = peek_len(src) else {
		return Err(FramingError::InsufficientData {
			need: PREFIX_LEN,
			have: src.len(),
		});
	};
	check_len(len, max_frame_size)?;

	let need = frame_len_from_payload_len(len);
	if src.len() < need {
		return Err(FramingError::InsufficientData { need, have: src.len() });
	}

	let msg = M::decode(&src[PREFIX_LEN..need])?;
	Ok((msg, need))
}

/// Accumulates bytes read off a stream and yields complete frames.
///
/// A frame whose prefix exceeds the limit is an error as soon as the prefix
/// is visible; the reader never buffers an oversized payload.
#[derive(Debug)]
pub struct FrameReader {
	buf: BytesMut,
	max_frame_size: usize,
}

impl FrameReader {
	pub fn new(max_frame_size: usize) -> Self {
		Self {
			buf: BytesMut::with_capacity(8 * 1024),
			max_frame_size,
		}
	}

	pub fn push(&mut self, chunk: &[u8]) {
		self.buf.extend_from_slice(chunk);
	}

	/// Bytes buffered but not yet consumed as a frame.
	pub fn buffered(&self) -> usize {
		self.buf.len()
	}

	/// Pop the next complete frame, if any.
	pub fn next_frame<M: Message + Default>(&mut self) -> Result<Option<M>, FramingError> {
		let Some(len) = peek_len(&self.buf) else {
			return Ok(None);
		};
		check_len(len, self.max_frame_size)?;

		if self.buf.len() < frame_len_from_payload_len(len) {
			return Ok(None);
		}

		self.buf.advance(PREFIX_LEN);
		let payload = self.buf.split_to(len);
		Ok(Some(M::decode(payload.freeze())?))
	}
}

impl Default for FrameReader {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_FRAME_SIZE)
	}
}
