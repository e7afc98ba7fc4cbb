#![forbid(unsafe_code)]

use courier_domain::{
	Conversation, ConversationKind, DomainError, Message, MessageBody, MessageStatus, Reactions, UserId,
};
use courier_protocol::pb;

use crate::server::events::ServerEvent;

pub fn status_to_pb(status: MessageStatus) -> pb::MessageStatus {
	match status {
		MessageStatus::Sent => pb::MessageStatus::Sent,
		MessageStatus::Delivered => pb::MessageStatus::Delivered,
		MessageStatus::Read => pb::MessageStatus::Read,
	}
}

pub fn ack_status_for(err: &DomainError) -> pb::AckStatus {
	match err {
		DomainError::Forbidden(_) => pb::AckStatus::Forbidden,
		DomainError::NotFound(_) => pb::AckStatus::NotFound,
		DomainError::InvalidArgument(_) => pb::AckStatus::InvalidArgument,
		DomainError::Transient(_) => pb::AckStatus::Transient,
	}
}

pub fn body_to_pb(body: &MessageBody) -> pb::Body {
	use pb::body::Kind;

	let kind = match body {
		MessageBody::Text { text } => Kind::Text(pb::TextBody { text: text.clone() }),
		MessageBody::Image { url, caption } => Kind::Image(pb::ImageBody {
			url: url.clone(),
			caption: caption.clone(),
		}),
		MessageBody::Audio { url, duration_ms } => Kind::Audio(pb::AudioBody {
			url: url.clone(),
			duration_ms: *duration_ms,
		}),
		MessageBody::File { url, name, size_bytes } => Kind::File(pb::FileBody {
			url: url.clone(),
			name: name.clone(),
			size_bytes: *size_bytes,
		}),
		MessageBody::Location {
			latitude,
			longitude,
			label,
		} => Kind::Location(pb::LocationBody {
			latitude: *latitude,
			longitude: *longitude,
			label: label.clone(),
		}),
	};
	pb::Body { kind: Some(kind) }
}

/// Client-supplied body. Content checks happen in the engine.
pub fn body_from_pb(body: Option<pb::Body>) -> Result<MessageBody, DomainError> {
	use pb::body::Kind;

	let kind = body
		.and_then(|b| b.kind)
		.ok_or_else(|| DomainError::invalid("missing message body"))?;
	Ok(match kind {
		Kind::Text(t) => MessageBody::Text { text: t.text },
		Kind::Image(i) => MessageBody::Image {
			url: i.url,
			caption: i.caption,
		},
		Kind::Audio(a) => MessageBody::Audio {
			url: a.url,
			duration_ms: a.duration_ms,
		},
		Kind::File(f) => MessageBody::File {
			url: f.url,
			name: f.name,
			size_bytes: f.size_bytes,
		},
		Kind::Location(l) => MessageBody::Location {
			latitude: l.latitude,
			longitude: l.longitude,
			label: l.label,
		},
	})
}

pub fn reactions_to_pb(reactions: &Reactions) -> Vec<pb::Reaction> {
	reactions
		.iter()
		.map(|(emoji, users)| pb::Reaction {
			emoji: emoji.clone(),
			user_ids: users.iter().map(|u| u.to_string()).collect(),
		})
		.collect()
}

pub fn message_to_pb(message: &Message) -> pb::WireMessage {
	pb::WireMessage {
		message_id: message.id.0,
		conversation_id: message.conversation_id.to_string(),
		sender_id: message.sender_id.to_string(),
		body: Some(body_to_pb(&message.body)),
		created_at_unix_ms: message.created_at_ms,
		status: status_to_pb(message.status) as i32,
		edited: message.edited,
		deleted: message.deleted,
		reactions: reactions_to_pb(&message.reactions),
	}
}

/// Conversation as seen by `viewer`: the unread count is theirs alone.
pub fn conversation_to_pb(conversation: &Conversation, viewer: &UserId) -> pb::WireConversation {
	let kind = match conversation.kind {
		ConversationKind::Direct => pb::ConversationKind::Direct,
		ConversationKind::Group => pb::ConversationKind::Group,
	};
	pb::WireConversation {
		conversation_id: conversation.id.to_string(),
		kind: kind as i32,
		name: conversation.name.clone(),
		participant_ids: conversation.participants.iter().map(|u| u.to_string()).collect(),
		last_message: conversation.last_message.as_ref().map(|s| pb::LastMessage {
			message_id: s.message_id.0,
			preview: s.preview.clone(),
			sender_id: s.sender_id.to_string(),
			created_at_unix_ms: s.created_at_ms,
			read: s.read,
		}),
		unread_count: conversation.unread_for(viewer),
		created_at_unix_ms: conversation.created_at_ms,
	}
}

pub fn event_to_pb(event: &ServerEvent, server_time_unix_ms: i64) -> pb::Event {
	use pb::event::Kind;

	let kind = match event {
		ServerEvent::ReceiveMessage(m) => Kind::ReceiveMessage(pb::ReceiveMessage {
			message: Some(message_to_pb(m)),
		}),
		ServerEvent::MessageStatusUpdate { message_id, status, .. } => {
			Kind::MessageStatusUpdate(pb::MessageStatusUpdate {
				message_id: message_id.0,
				status: status_to_pb(*status) as i32,
			})
		}
		ServerEvent::MessageEdited(m) => Kind::MessageEdited(pb::MessageEdited {
			message: Some(message_to_pb(m)),
		}),
		ServerEvent::MessageDeleted { message_id, .. } => Kind::MessageDeleted(pb::MessageDeleted {
			message_id: message_id.0,
		}),
		ServerEvent::ReactionUpdated {
			message_id, reactions, ..
		} => Kind::ReactionUpdated(pb::ReactionUpdated {
			message_id: message_id.0,
			reactions: reactions_to_pb(reactions),
		}),
		ServerEvent::DisplayTyping {
			user_id,
			display_name,
			is_typing,
			..
		} => Kind::DisplayTyping(pb::DisplayTyping {
			user_id: user_id.to_string(),
			display_name: display_name.clone(),
			is_typing: *is_typing,
		}),
		ServerEvent::OnlineUsers { users, .. } => Kind::OnlineUsers(pb::OnlineUsers {
			user_ids: users.iter().map(|u| u.to_string()).collect(),
		}),
		ServerEvent::LoadHistory { messages, has_more, .. } => Kind::LoadHistory(pb::LoadHistory {
			messages: messages.iter().map(message_to_pb).collect(),
			has_more: *has_more,
		}),
	};

	pb::Event {
		conversation_id: event.conversation_id().to_string(),
		server_time_unix_ms,
		kind: Some(kind),
	}
}
