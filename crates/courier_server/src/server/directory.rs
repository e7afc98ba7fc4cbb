#![forbid(unsafe_code)]

use std::sync::Arc;

use courier_domain::{Conversation, ConversationId, DomainError, UserId};
use tracing::{debug, info, warn};

use crate::server::store::MessageStore;
use crate::util::time::unix_ms_now;

/// Resolves and creates conversations.
///
/// There is no directory-wide lock: direct conversations are deduplicated by
/// the store's insert-if-absent on the canonical id.
#[derive(Clone)]
pub struct ConversationDirectory {
	store: Arc<dyn MessageStore>,
}

impl ConversationDirectory {
	pub fn new(store: Arc<dyn MessageStore>) -> Self {
		Self { store }
	}

	/// The single direct conversation between `a` and `b`, created on first use.
	pub async fn get_or_create_direct(&self, a: &UserId, b: &UserId) -> Result<Conversation, DomainError> {
		let candidate = Conversation::direct(a.clone(), b.clone(), unix_ms_now())?;

		if let Some(existing) = self.store.get_conversation(&candidate.id).await? {
			return ensure_pair(existing, a, b);
		}

		let outcome = self.store.conditional_create(candidate).await?;
		if outcome.was_created() {
			info!(user_a = %a, user_b = %b, "directory: direct conversation created");
		}
		ensure_pair(outcome.into_conversation(), a, b)
	}

	/// A new group with a fresh id. Never deduplicated.
	pub async fn create_group(
		&self,
		creator: &UserId,
		members: Vec<UserId>,
		name: Option<String>,
	) -> Result<Conversation, DomainError> {
		let group = Conversation::group(ConversationId::new_group(), creator.clone(), members, name, unix_ms_now())?;
		let conversation = self.store.conditional_create(group).await?.into_conversation();
		info!(
			conversation_id = %conversation.id,
			creator = %creator,
			members = conversation.participants.len(),
			"directory: group created"
		);
		Ok(conversation)
	}

	pub async fn add_members(
		&self,
		actor: &UserId,
		conversation_id: &ConversationId,
		members: &[UserId],
	) -> Result<Conversation, DomainError> {
		self.require_participant(conversation_id, actor).await?;
		if members.is_empty() {
			return Err(DomainError::invalid("no members to add"));
		}
		let conversation = self.store.add_participants(conversation_id, members).await?;
		debug!(%conversation_id, actor = %actor, "directory: members added");
		Ok(conversation)
	}

	pub async fn get(&self, conversation_id: &ConversationId) -> Result<Conversation, DomainError> {
		self.store
			.get_conversation(conversation_id)
			.await?
			.ok_or_else(|| DomainError::not_found(format!("conversation {conversation_id}")))
	}

	/// The conversation, provided `user` belongs to it.
	pub async fn require_participant(
		&self,
		conversation_id: &ConversationId,
		user: &UserId,
	) -> Result<Conversation, DomainError> {
		let conversation = self.get(conversation_id).await?;
		if !conversation.is_participant(user) {
			return Err(DomainError::forbidden(format!("{user} is not a participant of {conversation_id}")));
		}
		Ok(conversation)
	}
}

/// Ids joined with `_` can collide (`a_b` + `c` vs `a` + `b_c`); the record
/// found under the canonical id must belong to exactly this pair.
fn ensure_pair(conversation: Conversation, a: &UserId, b: &UserId) -> Result<Conversation, DomainError> {
	let is_pair = conversation.participants.len() == 2 && conversation.is_participant(a) && conversation.is_participant(b);
	if !is_pair {
		warn!(conversation_id = %conversation.id, user_a = %a, user_b = %b, "directory: direct id collision");
		return Err(DomainError::invalid(format!(
			"direct conversation {} belongs to a different pair",
			conversation.id
		)));
	}
	Ok(conversation)
}
