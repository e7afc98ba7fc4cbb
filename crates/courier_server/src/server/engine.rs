#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use courier_domain::{
	ConnectionId, Conversation, ConversationId, DomainError, Identity, Message, MessageBody, MessageDraft, MessageId,
	MessageStatus, UserId,
};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tracing::{debug, info, warn};

use crate::config::{DeliverySettings, MAX_HISTORY_PAGE};
use crate::server::directory::ConversationDirectory;
use crate::server::events::ServerEvent;
use crate::server::notify::{NotificationDispatcher, PushRequest};
use crate::server::presence::PresenceRegistry;
use crate::server::room_hub::{FanOut, HubItem, RoomHub};
use crate::server::store::{MessageStore, StatusChange};
use crate::server::tokens::TokenRegistry;
use crate::util::time::unix_ms_now;

const MAX_EMOJI_CHARS: usize = 16;

#[derive(Debug, Clone)]
pub struct EngineConfig {
	pub history_limit: usize,
	pub max_history_page: usize,
	pub max_text_len: usize,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self::from(&DeliverySettings::default())
	}
}

impl From<&DeliverySettings> for EngineConfig {
	fn from(s: &DeliverySettings) -> Self {
		Self {
			history_limit: s.history_limit.min(MAX_HISTORY_PAGE),
			max_history_page: s.max_history_page.clamp(1, MAX_HISTORY_PAGE),
			max_text_len: s.max_text_len,
		}
	}
}

/// What a join produced, for the caller's ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinReport {
	pub delivered: usize,
	pub history: usize,
	pub online: BTreeSet<UserId>,
	pub left: Option<ConversationId>,
}

/// Submit, status transitions and secondary events.
///
/// Every mutation of a conversation runs under that conversation's sequencer,
/// held from the store write until the resulting events are queued, so
/// connections in a room observe events in store order.
pub struct DeliveryEngine {
	store: Arc<dyn MessageStore>,
	directory: ConversationDirectory,
	presence: Arc<PresenceRegistry>,
	hub: RoomHub,
	notifier: Option<NotificationDispatcher>,
	tokens: TokenRegistry,
	sequencers: DashMap<ConversationId, Arc<Mutex<()>>>,
	cfg: EngineConfig,
}

impl DeliveryEngine {
	pub fn new(
		store: Arc<dyn MessageStore>,
		presence: Arc<PresenceRegistry>,
		hub: RoomHub,
		tokens: TokenRegistry,
		notifier: Option<NotificationDispatcher>,
		cfg: EngineConfig,
	) -> Self {
		Self {
			directory: ConversationDirectory::new(Arc::clone(&store)),
			store,
			presence,
			hub,
			notifier,
			tokens,
			sequencers: DashMap::new(),
			cfg,
		}
	}

	pub fn directory(&self) -> &ConversationDirectory {
		&self.directory
	}

	/// Wait for this conversation's turn. The sequencer entry is dropped again
	/// once nobody holds or waits on it.
	async fn sequence(&self, conversation_id: &ConversationId) -> Turn<'_> {
		let seq = Arc::clone(self.sequencers.entry(conversation_id.clone()).or_default().value());
		Turn {
			guard: Some(seq.lock_owned().await),
			conversation_id: conversation_id.clone(),
			sequencers: &self.sequencers,
		}
	}

	#[cfg(test)]
	pub(crate) fn live_sequencers(&self) -> usize {
		self.sequencers.len()
	}

	fn emit_to_room(&self, event: ServerEvent) -> FanOut {
		let targets = self.presence.connections_in(event.conversation_id());
		let name = event.name();
		let report = self.hub.fan_out(targets, event);
		metrics::counter!("courier_server_events_total", "event" => name).increment(report.delivered as u64);
		report
	}

	fn emit_status(&self, conversation_id: &ConversationId, change: StatusChange) {
		self.emit_to_room(ServerEvent::MessageStatusUpdate {
			conversation_id: conversation_id.clone(),
			message_id: change.message_id,
			status: change.status,
		});
		metrics::counter!("courier_server_status_updates_total", "status" => change.status.as_str()).increment(1);
	}

	fn broadcast_online(&self, conversation_id: &ConversationId) {
		let users = self.presence.online_set_for(conversation_id);
		self.emit_to_room(ServerEvent::OnlineUsers {
			conversation_id: conversation_id.clone(),
			users,
		});
	}

	/// Register an authenticated connection and open its outlet.
	pub fn connect(&self, conn: ConnectionId, identity: &Identity) -> mpsc::Receiver<HubItem> {
		let rx = self.hub.register(conn);
		self.presence.register(conn, identity.user_id.clone());
		metrics::gauge!("courier_server_active_connections").increment(1.0);
		info!(conn_id = %conn, user_id = %identity.user_id, "engine: connection registered");
		rx
	}

	/// Tear down a connection. Idempotent.
	pub fn disconnect(&self, conn: ConnectionId) {
		let had_outlet = self.hub.unregister(conn);
		let left = self.presence.on_disconnect(conn);
		if had_outlet {
			metrics::gauge!("courier_server_active_connections").decrement(1.0);
		}
		if let Some(left) = left {
			self.broadcast_online(&left);
		}
		debug!(conn_id = %conn, "engine: connection removed");
	}

	/// Make `conversation_id` the connection's active room.
	///
	/// Messages from other senders still `sent` become `delivered`, the joiner
	/// receives the latest history page and both affected rooms get a fresh
	/// online set.
	pub async fn join(
		&self,
		conn: ConnectionId,
		user: &UserId,
		conversation_id: &ConversationId,
	) -> Result<JoinReport, DomainError> {
		self.directory.require_participant(conversation_id, user).await?;

		let turn = self.sequence(conversation_id).await;

		let changes = self
			.store
			.advance_statuses(conversation_id, user, MessageStatus::Delivered)
			.await?;
		let page = self.store.query(conversation_id, self.cfg.history_limit.saturating_add(1), None).await?;
		let (messages, has_more) = trim_page(page, self.cfg.history_limit);

		let outcome = self
			.presence
			.join(conn, conversation_id)
			.ok_or_else(|| DomainError::not_found(format!("connection {conn}")))?;

		let delivered = changes.len();
		for change in changes {
			self.emit_status(conversation_id, change);
		}

		let history = messages.len();
		self.hub.send_to(
			conn,
			ServerEvent::LoadHistory {
				conversation_id: conversation_id.clone(),
				messages,
				has_more,
			},
		);
		self.broadcast_online(conversation_id);
		drop(turn);

		if let Some(left) = &outcome.left {
			self.broadcast_online(left);
		}

		debug!(conn_id = %conn, user_id = %user, %conversation_id, delivered, history, "engine: joined");
		Ok(JoinReport {
			delivered,
			history,
			online: outcome.online,
			left: outcome.left,
		})
	}

	pub fn leave(&self, conn: ConnectionId) -> Option<ConversationId> {
		let left = self.presence.leave(conn)?;
		self.broadcast_online(&left);
		debug!(conn_id = %conn, conversation_id = %left, "engine: left");
		Some(left)
	}

	/// Persist and fan out a new message.
	///
	/// Nothing is emitted unless the append succeeded. The returned message
	/// already carries `delivered` when another participant was reachable.
	pub async fn submit(
		&self,
		sender: &Identity,
		conversation_id: &ConversationId,
		body: MessageBody,
	) -> Result<Message, DomainError> {
		body.validate(self.cfg.max_text_len)?;
		let conversation = self.directory.require_participant(conversation_id, &sender.user_id).await?;

		let turn = self.sequence(conversation_id).await;

		let draft = MessageDraft {
			sender_id: sender.user_id.clone(),
			body,
		};
		let mut message = self
			.store
			.append(conversation_id, draft, unix_ms_now())
			.await
			.inspect_err(|e| warn!(%conversation_id, user_id = %sender.user_id, error = %e, "engine: append failed"))?;
		metrics::counter!("courier_server_messages_total", "kind" => message.body.kind()).increment(1);

		self.emit_to_room(ServerEvent::ReceiveMessage(message.clone()));

		let reachable = conversation
			.others(&sender.user_id)
			.any(|u| self.presence.is_user_reachable(u));
		if reachable {
			match self
				.store
				.update_status(conversation_id, message.id, MessageStatus::Delivered)
				.await
			{
				Ok(true) => {
					message.advance_status(MessageStatus::Delivered);
					self.emit_status(
						conversation_id,
						StatusChange {
							message_id: message.id,
							status: MessageStatus::Delivered,
						},
					);
				}
				Ok(false) => {}
				Err(e) => warn!(%conversation_id, message_id = %message.id, error = %e, "engine: instant delivery failed"),
			}
		}
		drop(turn);

		self.schedule_push(&conversation, sender, &message);

		debug!(
			%conversation_id,
			message_id = %message.id,
			user_id = %sender.user_id,
			status = %message.status,
			"engine: message submitted"
		);
		Ok(message)
	}

	fn schedule_push(&self, conversation: &Conversation, sender: &Identity, message: &Message) {
		let Some(notifier) = &self.notifier else {
			return;
		};
		let any_offline = conversation
			.others(&sender.user_id)
			.any(|u| !self.presence.is_user_reachable(u));
		if !any_offline {
			return;
		}
		notifier.spawn_dispatch(PushRequest {
			conversation: conversation.clone(),
			exclude: sender.user_id.clone(),
			sender_name: sender.display_name.clone(),
			message_id: message.id,
			preview: message.preview(),
		});
	}

	/// Returns the number of messages that became `read`.
	pub async fn mark_read(&self, reader: &UserId, conversation_id: &ConversationId) -> Result<usize, DomainError> {
		self.directory.require_participant(conversation_id, reader).await?;

		let _turn = self.sequence(conversation_id).await;

		let changes = self
			.store
			.advance_statuses(conversation_id, reader, MessageStatus::Read)
			.await?;
		self.store.reset_unread(conversation_id, reader).await?;
		self.store.mark_last_message_read(conversation_id, reader).await?;

		let count = changes.len();
		for change in changes {
			self.emit_status(conversation_id, change);
		}
		if count > 0 {
			debug!(%conversation_id, user_id = %reader, count, "engine: marked read");
		}
		Ok(count)
	}

	/// `Ok(None)` when `actor` is not the author.
	pub async fn edit_message(
		&self,
		actor: &UserId,
		conversation_id: &ConversationId,
		message_id: MessageId,
		text: &str,
	) -> Result<Option<Message>, DomainError> {
		MessageBody::text(text).validate(self.cfg.max_text_len)?;
		self.directory.require_participant(conversation_id, actor).await?;

		let _turn = self.sequence(conversation_id).await;

		let current = self.existing_message(conversation_id, message_id).await?;
		if &current.sender_id != actor {
			debug!(%conversation_id, %message_id, user_id = %actor, "engine: edit by non-author ignored");
			return Ok(None);
		}
		if current.deleted {
			return Err(DomainError::invalid("message was deleted"));
		}

		let edited = self.store.edit_text(conversation_id, message_id, text).await?;
		self.emit_to_room(ServerEvent::MessageEdited(edited.clone()));
		Ok(Some(edited))
	}

	/// Author-only soft delete. `Ok(None)` when already deleted.
	pub async fn delete_message(
		&self,
		actor: &UserId,
		conversation_id: &ConversationId,
		message_id: MessageId,
	) -> Result<Option<Message>, DomainError> {
		self.directory.require_participant(conversation_id, actor).await?;

		let _turn = self.sequence(conversation_id).await;

		let current = self.existing_message(conversation_id, message_id).await?;
		if &current.sender_id != actor {
			return Err(DomainError::forbidden("only the author may delete a message"));
		}

		let Some(deleted) = self.store.soft_delete(conversation_id, message_id).await? else {
			return Ok(None);
		};
		self.emit_to_room(ServerEvent::MessageDeleted {
			conversation_id: conversation_id.clone(),
			message_id,
		});
		info!(%conversation_id, %message_id, user_id = %actor, "engine: message deleted");
		Ok(Some(deleted))
	}

	pub async fn toggle_reaction(
		&self,
		actor: &UserId,
		conversation_id: &ConversationId,
		message_id: MessageId,
		emoji: &str,
	) -> Result<Message, DomainError> {
		let emoji = emoji.trim();
		if emoji.is_empty() {
			return Err(DomainError::invalid("empty emoji"));
		}
		if emoji.chars().count() > MAX_EMOJI_CHARS {
			return Err(DomainError::invalid("emoji too long"));
		}
		self.directory.require_participant(conversation_id, actor).await?;

		let _turn = self.sequence(conversation_id).await;

		let current = self.existing_message(conversation_id, message_id).await?;
		if current.deleted {
			return Err(DomainError::invalid("message was deleted"));
		}

		let message = self.store.toggle_reaction(conversation_id, message_id, emoji, actor).await?;
		self.emit_to_room(ServerEvent::ReactionUpdated {
			conversation_id: conversation_id.clone(),
			message_id,
			reactions: message.reactions.clone(),
		});
		Ok(message)
	}

	/// Ephemeral; dropped silently for unknown conversations and outsiders.
	pub async fn typing(&self, actor: &Identity, conversation_id: &ConversationId, is_typing: bool) {
		match self.directory.get(conversation_id).await {
			Ok(conversation) if conversation.is_participant(&actor.user_id) => {}
			_ => {
				debug!(%conversation_id, user_id = %actor.user_id, "engine: typing dropped");
				return;
			}
		}

		let targets = self
			.presence
			.connections_in_excluding_user(conversation_id, &actor.user_id);
		self.hub.fan_out(
			targets,
			ServerEvent::DisplayTyping {
				conversation_id: conversation_id.clone(),
				user_id: actor.user_id.clone(),
				display_name: actor.display_name.clone(),
				is_typing,
			},
		);
	}

	/// Send one history page to `conn`. A zero `limit` means the join page size.
	pub async fn fetch_history(
		&self,
		conn: ConnectionId,
		actor: &UserId,
		conversation_id: &ConversationId,
		limit: usize,
		before: Option<MessageId>,
	) -> Result<usize, DomainError> {
		self.directory.require_participant(conversation_id, actor).await?;

		let limit = if limit == 0 {
			self.cfg.history_limit
		} else {
			limit.min(self.cfg.max_history_page)
		};
		let page = self.store.query(conversation_id, limit.saturating_add(1), before).await?;
		let (messages, has_more) = trim_page(page, limit);
		let count = messages.len();

		self.hub.send_to(
			conn,
			ServerEvent::LoadHistory {
				conversation_id: conversation_id.clone(),
				messages,
				has_more,
			},
		);
		Ok(count)
	}

	pub async fn open_direct(&self, actor: &UserId, peer: &UserId) -> Result<Conversation, DomainError> {
		self.directory.get_or_create_direct(actor, peer).await
	}

	pub async fn create_group(
		&self,
		creator: &UserId,
		name: Option<String>,
		members: Vec<UserId>,
	) -> Result<Conversation, DomainError> {
		self.directory.create_group(creator, members, name).await
	}

	pub async fn add_members(
		&self,
		actor: &UserId,
		conversation_id: &ConversationId,
		members: &[UserId],
	) -> Result<Conversation, DomainError> {
		self.directory.add_members(actor, conversation_id, members).await
	}

	pub async fn register_push_token(&self, user: &UserId, token: &str) -> Result<(), DomainError> {
		self.tokens.register_token(user, token).await
	}

	pub async fn unregister_push_token(&self, token: &str) -> Result<bool, DomainError> {
		self.tokens.unregister_token(token).await
	}

	async fn existing_message(
		&self,
		conversation_id: &ConversationId,
		message_id: MessageId,
	) -> Result<Message, DomainError> {
		self.store
			.get_message(conversation_id, message_id)
			.await?
			.ok_or_else(|| DomainError::not_found(format!("message {message_id} in {conversation_id}")))
	}
}

/// A held conversation sequencer.
struct Turn<'a> {
	guard: Option<OwnedMutexGuard<()>>,
	conversation_id: ConversationId,
	sequencers: &'a DashMap<ConversationId, Arc<Mutex<()>>>,
}

impl Drop for Turn<'_> {
	fn drop(&mut self) {
		self.guard.take();
		self.sequencers
			.remove_if(&self.conversation_id, |_, seq| Arc::strong_count(seq) == 1);
	}
}

/// Keep the newest `limit` of an oldest-first page fetched with `limit + 1`.
fn trim_page(mut page: Vec<Message>, limit: usize) -> (Vec<Message>, bool) {
	let has_more = page.len() > limit;
	if has_more {
		page.drain(..page.len() - limit);
	}
	(page, has_more)
}
