use bytes::BytesMut;
use courier_protocol::pb::{self, envelope::Msg};
use courier_protocol::{
	DEFAULT_MAX_FRAME_SIZE, FrameReader, FramingError, decode_frame, encode_frame, encode_frame_into, envelope,
	frame_len_from_payload_len, version,
};
use prost::Message;

fn send(conversation: &str, text: &str) -> pb::Envelope {
	envelope(
		"req-1",
		Msg::SendMessage(pb::SendMessage {
			conversation_id: conversation.to_string(),
			body: Some(pb::Body {
				kind: Some(pb::body::Kind::Text(pb::TextBody { text: text.to_string() })),
			}),
		}),
	)
}

#[test]
fn envelope_survives_a_frame() {
	let env = send("dm_a_b", "hi");
	let frame = encode_frame(&env, DEFAULT_MAX_FRAME_SIZE).expect("encode_frame");
	let (decoded, consumed) = decode_frame::<pb::Envelope>(&frame, DEFAULT_MAX_FRAME_SIZE).expect("decode_frame");

	assert_eq!(consumed, frame.len());
	assert_eq!(decoded, env);
	assert_eq!(version::major_of(decoded.version), version::PROTOCOL_MAJOR);
}

#[test]
fn decode_requires_full_frame() {
	let frame = encode_frame(&send("dm_a_b", &"x".repeat(10)), DEFAULT_MAX_FRAME_SIZE).expect("encode");

	let err = decode_frame::<pb::Envelope>(&frame[..4], DEFAULT_MAX_FRAME_SIZE).unwrap_err();
	match err {
		FramingError::InsufficientData { need, have } => {
			assert!(need > have);
		}
		other => panic!("unexpected error: {other:?}"),
	}
}

#[test]
fn reader_assembles_split_frames() {
	let a = send("dm_a_b", "first");
	let b = send("dm_a_b", "second");

	let mut wire = BytesMut::new();
	encode_frame_into(&mut wire, &a, DEFAULT_MAX_FRAME_SIZE).expect("encode a");
	encode_frame_into(&mut wire, &b, DEFAULT_MAX_FRAME_SIZE).expect("encode b");

	let mut reader = FrameReader::default();
	let mut out = Vec::new();
	for chunk in wire.chunks(3) {
		reader.push(chunk);
		while let Some(env) = reader.next_frame::<pb::Envelope>().expect("next_frame") {
			out.push(env);
		}
	}

	assert_eq!(out, vec![a, b]);
	assert_eq!(reader.buffered(), 0);
}

#[test]
fn frame_len_helper_is_correct() {
	let env = send("dm_a_b", "hello");
	let frame = encode_frame(&env, DEFAULT_MAX_FRAME_SIZE).expect("encode");

	assert_eq!(frame_len_from_payload_len(env.encoded_len()), frame.len());
}

#[test]
fn encode_rejects_too_large() {
	let err = encode_frame(&send("dm_a_b", &"a".repeat(10_000)), 32).unwrap_err();
	match err {
		FramingError::FrameTooLarge { len, max } => {
			assert!(len > max);
			assert_eq!(max, 32);
		}
		other => panic!("unexpected error: {other:?}"),
	}
}

#[test]
fn reader_rejects_oversized_prefix_before_payload_arrives() {
	let mut reader = FrameReader::new(64);
	reader.push(&65u32.to_be_bytes());

	match reader.next_frame::<pb::Envelope>() {
		Err(FramingError::FrameTooLarge { len: 65, max: 64 }) => {}
		other => panic!("expected FrameTooLarge, got: {other:?}"),
	}
}

#[test]
fn reader_surfaces_garbage_payloads() {
	let mut reader = FrameReader::default();
	reader.push(&3u32.to_be_bytes());
	reader.push(&[0xff, 0xff, 0xff]);

	match reader.next_frame::<pb::Envelope>() {
		Err(FramingError::Decode(_)) => {}
		other => panic!("expected decode error, got: {other:?}"),
	}
}
