#![forbid(unsafe_code)]

use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use courier_domain::{Conversation, ConversationId, DomainError, Message, MessageDraft, MessageId, MessageStatus, UserId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

use super::{CreateOutcome, MessageStore, StatusChange, conversation_not_found, message_not_found};
use crate::util::time::monotonic_after;

/// Process-local store. Each conversation's log sits behind its own lock, so
/// unrelated conversations never contend.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
	logs: DashMap<ConversationId, Arc<Mutex<ConversationLog>>>,
	#[cfg(test)]
	fail_appends: AtomicBool,
}

#[derive(Debug)]
struct ConversationLog {
	conversation: Conversation,
	/// Sorted by id.
	messages: Vec<Message>,
	next_id: u64,
}

impl ConversationLog {
	fn new(conversation: Conversation) -> Self {
		Self {
			conversation,
			messages: Vec::new(),
			next_id: 1,
		}
	}

	fn message_mut(&mut self, message_id: MessageId) -> Result<&mut Message, DomainError> {
		match self.messages.binary_search_by_key(&message_id, |m| m.id) {
			Ok(idx) => Ok(&mut self.messages[idx]),
			Err(_) => Err(message_not_found(&self.conversation.id, message_id)),
		}
	}
}

impl InMemoryMessageStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make every subsequent `append` fail with a transient error.
	#[cfg(test)]
	pub fn fail_appends(&self, fail: bool) {
		self.fail_appends.store(fail, Ordering::SeqCst);
	}

	fn log(&self, id: &ConversationId) -> Result<Arc<Mutex<ConversationLog>>, DomainError> {
		self.logs
			.get(id)
			.map(|e| Arc::clone(e.value()))
			.ok_or_else(|| conversation_not_found(id))
	}
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
	async fn conditional_create(&self, conversation: Conversation) -> Result<CreateOutcome, DomainError> {
		match self.logs.entry(conversation.id.clone()) {
			Entry::Occupied(e) => Ok(CreateOutcome::Existing(e.get().lock().conversation.clone())),
			Entry::Vacant(e) => {
				e.insert(Arc::new(Mutex::new(ConversationLog::new(conversation.clone()))));
				Ok(CreateOutcome::Created(conversation))
			}
		}
	}

	async fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>, DomainError> {
		Ok(self.logs.get(id).map(|e| e.value().lock().conversation.clone()))
	}

	async fn add_participants(&self, id: &ConversationId, users: &[UserId]) -> Result<Conversation, DomainError> {
		let log = self.log(id)?;
		let mut log = log.lock();
		log.conversation.add_members(users.iter().cloned())?;
		Ok(log.conversation.clone())
	}

	async fn append(&self, id: &ConversationId, draft: MessageDraft, now_ms: i64) -> Result<Message, DomainError> {
		#[cfg(test)]
		if self.fail_appends.load(Ordering::SeqCst) {
			return Err(DomainError::transient("store unavailable"));
		}

		let log = self.log(id)?;
		let mut log = log.lock();

		let previous = log.messages.last().map(|m| m.created_at_ms);
		let message = Message {
			id: MessageId(log.next_id),
			conversation_id: id.clone(),
			sender_id: draft.sender_id,
			body: draft.body,
			created_at_ms: monotonic_after(previous, now_ms),
			status: MessageStatus::Sent,
			edited: false,
			deleted: false,
			reactions: Default::default(),
		};

		log.next_id += 1;
		log.conversation.record_message(&message);
		log.messages.push(message.clone());
		Ok(message)
	}

	async fn get_message(&self, id: &ConversationId, message_id: MessageId) -> Result<Option<Message>, DomainError> {
		let log = self.log(id)?;
		let mut log = log.lock();
		Ok(log.message_mut(message_id).ok().map(|m| m.clone()))
	}

	async fn update_status(
		&self,
		id: &ConversationId,
		message_id: MessageId,
		status: MessageStatus,
	) -> Result<bool, DomainError> {
		let log = self.log(id)?;
		let mut log = log.lock();
		Ok(log.message_mut(message_id)?.advance_status(status))
	}

	async fn advance_statuses(
		&self,
		id: &ConversationId,
		recipient: &UserId,
		to: MessageStatus,
	) -> Result<Vec<StatusChange>, DomainError> {
		let log = self.log(id)?;
		let mut log = log.lock();
		let changes = log
			.messages
			.iter_mut()
			.filter(|m| &m.sender_id != recipient)
			.filter_map(|m| {
				m.advance_status(to).then_some(StatusChange {
					message_id: m.id,
					status: m.status,
				})
			})
			.collect();
		Ok(changes)
	}

	async fn query(
		&self,
		id: &ConversationId,
		limit: usize,
		before: Option<MessageId>,
	) -> Result<Vec<Message>, DomainError> {
		let log = self.log(id)?;
		let log = log.lock();
		let end = match before {
			Some(before) => log.messages.partition_point(|m| m.id < before),
			None => log.messages.len(),
		};
		let start = end.saturating_sub(limit);
		Ok(log.messages[start..end].to_vec())
	}

	async fn reset_unread(&self, id: &ConversationId, user: &UserId) -> Result<(), DomainError> {
		let log = self.log(id)?;
		log.lock().conversation.reset_unread(user);
		Ok(())
	}

	async fn mark_last_message_read(&self, id: &ConversationId, reader: &UserId) -> Result<bool, DomainError> {
		let log = self.log(id)?;
		let changed = log.lock().conversation.mark_last_read_by(reader);
		Ok(changed)
	}

	async fn edit_text(&self, id: &ConversationId, message_id: MessageId, text: &str) -> Result<Message, DomainError> {
		let log = self.log(id)?;
		let mut log = log.lock();
		let message = log.message_mut(message_id)?;
		message.apply_edit(text)?;
		let message = message.clone();
		log.conversation.refresh_summary(&message);
		Ok(message)
	}

	async fn soft_delete(&self, id: &ConversationId, message_id: MessageId) -> Result<Option<Message>, DomainError> {
		let log = self.log(id)?;
		let mut log = log.lock();
		let message = log.message_mut(message_id)?;
		if !message.apply_delete() {
			return Ok(None);
		}
		let message = message.clone();
		log.conversation.refresh_summary(&message);
		Ok(Some(message))
	}

	async fn toggle_reaction(
		&self,
		id: &ConversationId,
		message_id: MessageId,
		emoji: &str,
		user: &UserId,
	) -> Result<Message, DomainError> {
		let log = self.log(id)?;
		let mut log = log.lock();
		let message = log.message_mut(message_id)?;
		message.toggle_reaction(emoji, user);
		Ok(message.clone())
	}
}
