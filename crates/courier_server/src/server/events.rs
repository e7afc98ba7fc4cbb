#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use courier_domain::{ConversationId, Message, MessageId, MessageStatus, Reactions, UserId};

/// Everything the engine pushes to live connections.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
	ReceiveMessage(Message),
	MessageStatusUpdate {
		conversation_id: ConversationId,
		message_id: MessageId,
		status: MessageStatus,
	},
	MessageEdited(Message),
	MessageDeleted {
		conversation_id: ConversationId,
		message_id: MessageId,
	},
	ReactionUpdated {
		conversation_id: ConversationId,
		message_id: MessageId,
		reactions: Reactions,
	},
	DisplayTyping {
		conversation_id: ConversationId,
		user_id: UserId,
		display_name: String,
		is_typing: bool,
	},
	OnlineUsers {
		conversation_id: ConversationId,
		users: BTreeSet<UserId>,
	},
	/// Oldest first.
	LoadHistory {
		conversation_id: ConversationId,
		messages: Vec<Message>,
		has_more: bool,
	},
}

impl ServerEvent {
	pub fn conversation_id(&self) -> &ConversationId {
		match self {
			ServerEvent::ReceiveMessage(m) | ServerEvent::MessageEdited(m) => &m.conversation_id,
			ServerEvent::MessageStatusUpdate { conversation_id, .. }
			| ServerEvent::MessageDeleted { conversation_id, .. }
			| ServerEvent::ReactionUpdated { conversation_id, .. }
			| ServerEvent::DisplayTyping { conversation_id, .. }
			| ServerEvent::OnlineUsers { conversation_id, .. }
			| ServerEvent::LoadHistory { conversation_id, .. } => conversation_id,
		}
	}

	/// Stable event name, used as a metrics label.
	pub const fn name(&self) -> &'static str {
		match self {
			ServerEvent::ReceiveMessage(_) => "receive_message",
			ServerEvent::MessageStatusUpdate { .. } => "message_status_update",
			ServerEvent::MessageEdited(_) => "message_edited",
			ServerEvent::MessageDeleted { .. } => "message_deleted",
			ServerEvent::ReactionUpdated { .. } => "reaction_updated",
			ServerEvent::DisplayTyping { .. } => "display_typing",
			ServerEvent::OnlineUsers { .. } => "online_users",
			ServerEvent::LoadHistory { .. } => "load_history",
		}
	}
}
