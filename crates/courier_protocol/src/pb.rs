//! Wire types for the `courier.v1` protocol.
//!
//! Every frame on the control stream carries one [`Envelope`]. Requests from
//! the client may set `request_id`; the server echoes it on the matching
//! [`Ack`]. Events are pushed unsolicited with an empty `request_id`.

#![forbid(unsafe_code)]

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
	#[prost(uint32, tag = "1")]
	pub version: u32,
	#[prost(string, tag = "2")]
	pub request_id: ::prost::alloc::string::String,
	#[prost(
		oneof = "envelope::Msg",
		tags = "10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 30, 31, 32, 33, 34"
	)]
	pub msg: ::core::option::Option<envelope::Msg>,
}

pub mod envelope {
	#[allow(clippy::large_enum_variant)]
	#[derive(Clone, PartialEq, ::prost::Oneof)]
	pub enum Msg {
		#[prost(message, tag = "10")]
		Hello(super::Hello),
		#[prost(message, tag = "11")]
		Join(super::Join),
		#[prost(message, tag = "12")]
		Leave(super::Leave),
		#[prost(message, tag = "13")]
		SendMessage(super::SendMessage),
		#[prost(message, tag = "14")]
		MarkRead(super::MarkRead),
		#[prost(message, tag = "15")]
		EditMessage(super::EditMessage),
		#[prost(message, tag = "16")]
		DeleteMessage(super::DeleteMessage),
		#[prost(message, tag = "17")]
		ToggleReaction(super::ToggleReaction),
		#[prost(message, tag = "18")]
		Typing(super::Typing),
		#[prost(message, tag = "19")]
		FetchHistory(super::FetchHistory),
		#[prost(message, tag = "20")]
		OpenDirect(super::OpenDirect),
		#[prost(message, tag = "21")]
		CreateGroup(super::CreateGroup),
		#[prost(message, tag = "22")]
		AddMembers(super::AddMembers),
		#[prost(message, tag = "23")]
		RegisterPushToken(super::RegisterPushToken),
		#[prost(message, tag = "24")]
		UnregisterPushToken(super::UnregisterPushToken),
		#[prost(message, tag = "25")]
		Ping(super::Ping),

		#[prost(message, tag = "30")]
		Welcome(super::Welcome),
		#[prost(message, tag = "31")]
		Pong(super::Pong),
		#[prost(message, tag = "32")]
		Ack(super::Ack),
		#[prost(message, tag = "33")]
		Error(super::Error),
		#[prost(message, tag = "34")]
		Event(super::Event),
	}
}

// ---------------------------------------------------------------------------
// Shared payloads
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageStatus {
	Sent = 0,
	Delivered = 1,
	Read = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ConversationKind {
	Direct = 0,
	Group = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum AckStatus {
	Ok = 0,
	/// Request was valid but had no effect.
	Ignored = 1,
	InvalidArgument = 2,
	NotFound = 3,
	Forbidden = 4,
	Transient = 5,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Body {
	#[prost(oneof = "body::Kind", tags = "1, 2, 3, 4, 5")]
	pub kind: ::core::option::Option<body::Kind>,
}

pub mod body {
	#[derive(Clone, PartialEq, ::prost::Oneof)]
	pub enum Kind {
		#[prost(message, tag = "1")]
		Text(super::TextBody),
		#[prost(message, tag = "2")]
		Image(super::ImageBody),
		#[prost(message, tag = "3")]
		Audio(super::AudioBody),
		#[prost(message, tag = "4")]
		File(super::FileBody),
		#[prost(message, tag = "5")]
		Location(super::LocationBody),
	}
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TextBody {
	#[prost(string, tag = "1")]
	pub text: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ImageBody {
	#[prost(string, tag = "1")]
	pub url: ::prost::alloc::string::String,
	#[prost(string, optional, tag = "2")]
	pub caption: ::core::option::Option<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AudioBody {
	#[prost(string, tag = "1")]
	pub url: ::prost::alloc::string::String,
	#[prost(uint64, tag = "2")]
	pub duration_ms: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileBody {
	#[prost(string, tag = "1")]
	pub url: ::prost::alloc::string::String,
	#[prost(string, tag = "2")]
	pub name: ::prost::alloc::string::String,
	#[prost(uint64, tag = "3")]
	pub size_bytes: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LocationBody {
	#[prost(double, tag = "1")]
	pub latitude: f64,
	#[prost(double, tag = "2")]
	pub longitude: f64,
	#[prost(string, optional, tag = "3")]
	pub label: ::core::option::Option<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Reaction {
	#[prost(string, tag = "1")]
	pub emoji: ::prost::alloc::string::String,
	#[prost(string, repeated, tag = "2")]
	pub user_ids: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireMessage {
	#[prost(uint64, tag = "1")]
	pub message_id: u64,
	#[prost(string, tag = "2")]
	pub conversation_id: ::prost::alloc::string::String,
	#[prost(string, tag = "3")]
	pub sender_id: ::prost::alloc::string::String,
	#[prost(message, optional, tag = "4")]
	pub body: ::core::option::Option<Body>,
	#[prost(int64, tag = "5")]
	pub created_at_unix_ms: i64,
	#[prost(enumeration = "MessageStatus", tag = "6")]
	pub status: i32,
	#[prost(bool, tag = "7")]
	pub edited: bool,
	#[prost(bool, tag = "8")]
	pub deleted: bool,
	#[prost(message, repeated, tag = "9")]
	pub reactions: ::prost::alloc::vec::Vec<Reaction>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LastMessage {
	#[prost(uint64, tag = "1")]
	pub message_id: u64,
	#[prost(string, tag = "2")]
	pub preview: ::prost::alloc::string::String,
	#[prost(string, tag = "3")]
	pub sender_id: ::prost::alloc::string::String,
	#[prost(int64, tag = "4")]
	pub created_at_unix_ms: i64,
	#[prost(bool, tag = "5")]
	pub read: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireConversation {
	#[prost(string, tag = "1")]
	pub conversation_id: ::prost::alloc::string::String,
	#[prost(enumeration = "ConversationKind", tag = "2")]
	pub kind: i32,
	#[prost(string, optional, tag = "3")]
	pub name: ::core::option::Option<::prost::alloc::string::String>,
	#[prost(string, repeated, tag = "4")]
	pub participant_ids: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
	#[prost(message, optional, tag = "5")]
	pub last_message: ::core::option::Option<LastMessage>,
	/// Unread count of the requesting user.
	#[prost(uint64, tag = "6")]
	pub unread_count: u64,
	#[prost(int64, tag = "7")]
	pub created_at_unix_ms: i64,
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Hello {
	#[prost(string, tag = "1")]
	pub client_name: ::prost::alloc::string::String,
	/// Bearer token checked by the configured authenticator.
	#[prost(string, tag = "2")]
	pub auth_token: ::prost::alloc::string::String,
	/// Only honoured by the shared-secret and unauthenticated modes.
	#[prost(string, tag = "3")]
	pub user_id: ::prost::alloc::string::String,
	#[prost(string, tag = "4")]
	pub display_name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Join {
	#[prost(string, tag = "1")]
	pub conversation_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Leave {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendMessage {
	#[prost(string, tag = "1")]
	pub conversation_id: ::prost::alloc::string::String,
	#[prost(message, optional, tag = "2")]
	pub body: ::core::option::Option<Body>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarkRead {
	#[prost(string, tag = "1")]
	pub conversation_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EditMessage {
	#[prost(string, tag = "1")]
	pub conversation_id: ::prost::alloc::string::String,
	#[prost(uint64, tag = "2")]
	pub message_id: u64,
	#[prost(string, tag = "3")]
	pub text: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteMessage {
	#[prost(string, tag = "1")]
	pub conversation_id: ::prost::alloc::string::String,
	#[prost(uint64, tag = "2")]
	pub message_id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToggleReaction {
	#[prost(string, tag = "1")]
	pub conversation_id: ::prost::alloc::string::String,
	#[prost(uint64, tag = "2")]
	pub message_id: u64,
	#[prost(string, tag = "3")]
	pub emoji: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Typing {
	#[prost(string, tag = "1")]
	pub conversation_id: ::prost::alloc::string::String,
	#[prost(bool, tag = "2")]
	pub is_typing: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchHistory {
	#[prost(string, tag = "1")]
	pub conversation_id: ::prost::alloc::string::String,
	/// 0 means the server default.
	#[prost(uint32, tag = "2")]
	pub limit: u32,
	/// Only messages with an id below this one.
	#[prost(uint64, optional, tag = "3")]
	pub before_message_id: ::core::option::Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenDirect {
	#[prost(string, tag = "1")]
	pub peer_user_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateGroup {
	#[prost(string, optional, tag = "1")]
	pub name: ::core::option::Option<::prost::alloc::string::String>,
	#[prost(string, repeated, tag = "2")]
	pub member_ids: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddMembers {
	#[prost(string, tag = "1")]
	pub conversation_id: ::prost::alloc::string::String,
	#[prost(string, repeated, tag = "2")]
	pub member_ids: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterPushToken {
	#[prost(string, tag = "1")]
	pub token: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UnregisterPushToken {
	#[prost(string, tag = "1")]
	pub token: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ping {
	#[prost(int64, tag = "1")]
	pub client_time_unix_ms: i64,
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Welcome {
	#[prost(string, tag = "1")]
	pub server_name: ::prost::alloc::string::String,
	#[prost(uint32, tag = "2")]
	pub protocol_major: u32,
	#[prost(uint32, tag = "3")]
	pub protocol_minor: u32,
	#[prost(uint64, tag = "4")]
	pub connection_id: u64,
	#[prost(string, tag = "5")]
	pub user_id: ::prost::alloc::string::String,
	#[prost(string, tag = "6")]
	pub display_name: ::prost::alloc::string::String,
	#[prost(int64, tag = "7")]
	pub server_time_unix_ms: i64,
	#[prost(uint32, tag = "8")]
	pub max_frame_bytes: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Pong {
	#[prost(int64, tag = "1")]
	pub client_time_unix_ms: i64,
	#[prost(int64, tag = "2")]
	pub server_time_unix_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ack {
	#[prost(enumeration = "AckStatus", tag = "1")]
	pub status: i32,
	#[prost(string, tag = "2")]
	pub detail: ::prost::alloc::string::String,
	#[prost(message, optional, tag = "3")]
	pub message: ::core::option::Option<WireMessage>,
	#[prost(message, optional, tag = "4")]
	pub conversation: ::core::option::Option<WireConversation>,
}

/// Connection-level failure; the server closes the stream after sending it.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Error {
	#[prost(string, tag = "1")]
	pub code: ::prost::alloc::string::String,
	#[prost(string, tag = "2")]
	pub message: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
	#[prost(string, tag = "1")]
	pub conversation_id: ::prost::alloc::string::String,
	#[prost(int64, tag = "2")]
	pub server_time_unix_ms: i64,
	#[prost(oneof = "event::Kind", tags = "10, 11, 12, 13, 14, 15, 16, 17, 18")]
	pub kind: ::core::option::Option<event::Kind>,
}

pub mod event {
	#[derive(Clone, PartialEq, ::prost::Oneof)]
	pub enum Kind {
		#[prost(message, tag = "10")]
		ReceiveMessage(super::ReceiveMessage),
		#[prost(message, tag = "11")]
		MessageStatusUpdate(super::MessageStatusUpdate),
		#[prost(message, tag = "12")]
		MessageEdited(super::MessageEdited),
		#[prost(message, tag = "13")]
		MessageDeleted(super::MessageDeleted),
		#[prost(message, tag = "14")]
		ReactionUpdated(super::ReactionUpdated),
		#[prost(message, tag = "15")]
		DisplayTyping(super::DisplayTyping),
		#[prost(message, tag = "16")]
		OnlineUsers(super::OnlineUsers),
		#[prost(message, tag = "17")]
		LoadHistory(super::LoadHistory),
		#[prost(message, tag = "18")]
		Lagged(super::Lagged),
	}
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReceiveMessage {
	#[prost(message, optional, tag = "1")]
	pub message: ::core::option::Option<WireMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageStatusUpdate {
	#[prost(uint64, tag = "1")]
	pub message_id: u64,
	#[prost(enumeration = "MessageStatus", tag = "2")]
	pub status: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageEdited {
	#[prost(message, optional, tag = "1")]
	pub message: ::core::option::Option<WireMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageDeleted {
	#[prost(uint64, tag = "1")]
	pub message_id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReactionUpdated {
	#[prost(uint64, tag = "1")]
	pub message_id: u64,
	#[prost(message, repeated, tag = "2")]
	pub reactions: ::prost::alloc::vec::Vec<Reaction>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DisplayTyping {
	#[prost(string, tag = "1")]
	pub user_id: ::prost::alloc::string::String,
	#[prost(string, tag = "2")]
	pub display_name: ::prost::alloc::string::String,
	#[prost(bool, tag = "3")]
	pub is_typing: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OnlineUsers {
	#[prost(string, repeated, tag = "1")]
	pub user_ids: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoadHistory {
	/// Oldest first.
	#[prost(message, repeated, tag = "1")]
	pub messages: ::prost::alloc::vec::Vec<WireMessage>,
	#[prost(bool, tag = "2")]
	pub has_more: bool,
}

/// Events were dropped because the connection's outbound queue was full.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Lagged {
	#[prost(uint64, tag = "1")]
	pub dropped: u64,
}
