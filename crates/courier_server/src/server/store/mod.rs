#![forbid(unsafe_code)]

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use courier_domain::{Conversation, ConversationId, DomainError, Message, MessageDraft, MessageId, MessageStatus, UserId};

pub use memory::InMemoryMessageStore;
pub use sqlite::SqliteMessageStore;

/// Result of an insert-if-absent on a conversation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
	Created(Conversation),
	Existing(Conversation),
}

impl CreateOutcome {
	pub fn was_created(&self) -> bool {
		matches!(self, CreateOutcome::Created(_))
	}

	pub fn into_conversation(self) -> Conversation {
		match self {
			CreateOutcome::Created(c) | CreateOutcome::Existing(c) => c,
		}
	}
}

/// One applied status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
	pub message_id: MessageId,
	pub status: MessageStatus,
}

/// Durable conversation and message log.
///
/// Backends enforce forward-only status transitions themselves; a request
/// for a status at or below the current one changes nothing.
#[async_trait]
pub trait MessageStore: Send + Sync {
	/// Insert `conversation` unless its id already exists.
	async fn conditional_create(&self, conversation: Conversation) -> Result<CreateOutcome, DomainError>;

	async fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>, DomainError>;

	/// Append members to a group conversation.
	async fn add_participants(&self, id: &ConversationId, users: &[UserId]) -> Result<Conversation, DomainError>;

	/// Persist a message, refresh the conversation summary and bump every other
	/// participant's unread counter in one atomic step.
	///
	/// `created_at_ms` of the stored message is `max(now_ms, previous + 1)`.
	async fn append(&self, id: &ConversationId, draft: MessageDraft, now_ms: i64) -> Result<Message, DomainError>;

	async fn get_message(&self, id: &ConversationId, message_id: MessageId) -> Result<Option<Message>, DomainError>;

	/// Forward-only status write. Returns whether the status changed.
	async fn update_status(
		&self,
		id: &ConversationId,
		message_id: MessageId,
		status: MessageStatus,
	) -> Result<bool, DomainError>;

	/// Move every message not sent by `recipient` and below `to` up to `to`.
	/// Changes are returned in message order.
	async fn advance_statuses(
		&self,
		id: &ConversationId,
		recipient: &UserId,
		to: MessageStatus,
	) -> Result<Vec<StatusChange>, DomainError>;

	/// Newest `limit` messages older than `before`, returned oldest first.
	async fn query(
		&self,
		id: &ConversationId,
		limit: usize,
		before: Option<MessageId>,
	) -> Result<Vec<Message>, DomainError>;

	async fn reset_unread(&self, id: &ConversationId, user: &UserId) -> Result<(), DomainError>;

	/// Flag the summary as read if its message was written by someone other
	/// than `reader`. Returns whether the flag changed.
	async fn mark_last_message_read(&self, id: &ConversationId, reader: &UserId) -> Result<bool, DomainError>;

	/// Replace the text of a text message and flag it edited.
	async fn edit_text(&self, id: &ConversationId, message_id: MessageId, text: &str) -> Result<Message, DomainError>;

	/// Soft delete. `None` when the message was already deleted.
	async fn soft_delete(&self, id: &ConversationId, message_id: MessageId) -> Result<Option<Message>, DomainError>;

	async fn toggle_reaction(
		&self,
		id: &ConversationId,
		message_id: MessageId,
		emoji: &str,
		user: &UserId,
	) -> Result<Message, DomainError>;
}

pub(crate) fn conversation_not_found(id: &ConversationId) -> DomainError {
	DomainError::not_found(format!("conversation {id}"))
}

pub(crate) fn message_not_found(id: &ConversationId, message_id: MessageId) -> DomainError {
	DomainError::not_found(format!("message {message_id} in {id}"))
}
