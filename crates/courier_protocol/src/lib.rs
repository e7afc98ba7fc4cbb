#![forbid(unsafe_code)]

pub mod framing;
pub mod pb;

pub use framing::{
	DEFAULT_MAX_FRAME_SIZE, FrameReader, FramingError, decode_frame, encode_frame, encode_frame_into,
	frame_len_from_payload_len,
};

/// ALPN identifier negotiated on every QUIC connection.
pub const ALPN: &[u8] = b"courier-v1";

/// Protocol version constants.
pub mod version {
	pub const PROTOCOL_MAJOR: u32 = 1;
	pub const PROTOCOL_MINOR: u32 = 0;

	/// Compact representation carried in `Envelope.version`.
	pub const PROTOCOL_VERSION_U32: u32 = (PROTOCOL_MAJOR << 16) | PROTOCOL_MINOR;

	pub const fn major_of(version: u32) -> u32 {
		version >> 16
	}
}

/// Wrap a message into an envelope stamped with the current version.
pub fn envelope(request_id: impl Into<String>, msg: pb::envelope::Msg) -> pb::Envelope {
	pb::Envelope {
		version: version::PROTOCOL_VERSION_U32,
		request_id: request_id.into(),
		msg: Some(msg),
	}
}
