#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap, HashSet};

use courier_domain::{ConnectionId, ConversationId, UserId};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

/// Live connection -> identity -> active conversation bookkeeping.
///
/// State is split across three sharded maps. Operations that touch more than
/// one map always lock in the order connection -> room -> user, and never
/// hold a guard of one map while re-entering the same map.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
	connections: DashMap<ConnectionId, ConnectionEntry>,
	rooms: DashMap<ConversationId, HashMap<ConnectionId, UserId>>,
	users: DashMap<UserId, HashSet<ConnectionId>>,
}

#[derive(Debug, Clone)]
struct ConnectionEntry {
	user_id: UserId,
	active: Option<ConversationId>,
}

/// Result of moving a connection into a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
	/// Online set of the joined conversation, joiner included.
	pub online: BTreeSet<UserId>,
	/// Conversation implicitly left by the join, if it differs from the new one.
	pub left: Option<ConversationId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PresenceStats {
	pub connections: usize,
	pub online_users: usize,
	pub occupied_rooms: usize,
}

impl PresenceRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record a freshly authenticated connection.
	pub fn register(&self, conn: ConnectionId, user_id: UserId) {
		let mut entry = self.connections.entry(conn).or_insert_with(|| ConnectionEntry {
			user_id: user_id.clone(),
			active: None,
		});
		if entry.user_id != user_id {
			debug!(%conn, old = %entry.user_id, new = %user_id, "presence: connection re-registered");
			let old = std::mem::replace(&mut entry.user_id, user_id.clone());
			if let Some(active) = entry.active.take() {
				self.remove_from_room(&active, conn);
			}
			self.remove_user_conn(&old, conn);
		}
		self.users.entry(user_id).or_default().insert(conn);
	}

	/// Make `conversation` the connection's only active room.
	///
	/// Returns `None` for an unknown connection.
	pub fn join(&self, conn: ConnectionId, conversation: &ConversationId) -> Option<JoinOutcome> {
		let mut entry = self.connections.get_mut(&conn)?;

		let left = match entry.active.replace(conversation.clone()) {
			Some(prev) if &prev != conversation => {
				self.remove_from_room(&prev, conn);
				Some(prev)
			}
			_ => None,
		};

		let mut room = self.rooms.entry(conversation.clone()).or_default();
		room.insert(conn, entry.user_id.clone());
		let online = room.values().cloned().collect();

		Some(JoinOutcome { online, left })
	}

	/// Leave the active conversation. Idempotent.
	pub fn leave(&self, conn: ConnectionId) -> Option<ConversationId> {
		let mut entry = self.connections.get_mut(&conn)?;
		let prev = entry.active.take()?;
		self.remove_from_room(&prev, conn);
		Some(prev)
	}

	/// Drop every trace of the connection. Idempotent; returns the room it
	/// was active in.
	pub fn on_disconnect(&self, conn: ConnectionId) -> Option<ConversationId> {
		let (_, entry) = self.connections.remove(&conn)?;
		if let Some(active) = &entry.active {
			self.remove_from_room(active, conn);
		}
		self.remove_user_conn(&entry.user_id, conn);
		entry.active
	}

	pub fn online_set_for(&self, conversation: &ConversationId) -> BTreeSet<UserId> {
		self.rooms
			.get(conversation)
			.map(|room| room.values().cloned().collect())
			.unwrap_or_default()
	}

	pub fn connections_in(&self, conversation: &ConversationId) -> Vec<ConnectionId> {
		self.rooms
			.get(conversation)
			.map(|room| room.keys().copied().collect())
			.unwrap_or_default()
	}

	/// Room connections not owned by `user`.
	pub fn connections_in_excluding_user(&self, conversation: &ConversationId, user: &UserId) -> Vec<ConnectionId> {
		self.rooms
			.get(conversation)
			.map(|room| room.iter().filter(|(_, u)| *u != user).map(|(c, _)| *c).collect())
			.unwrap_or_default()
	}

	/// True iff the user has at least one live connection, in any room.
	pub fn is_user_reachable(&self, user: &UserId) -> bool {
		self.users.get(user).is_some_and(|conns| !conns.is_empty())
	}

	pub fn stats(&self) -> PresenceStats {
		PresenceStats {
			connections: self.connections.len(),
			online_users: self.users.len(),
			occupied_rooms: self.rooms.len(),
		}
	}

	fn remove_from_room(&self, conversation: &ConversationId, conn: ConnectionId) {
		self.rooms.remove_if_mut(conversation, |_, room| {
			room.remove(&conn);
			room.is_empty()
		});
	}

	fn remove_user_conn(&self, user: &UserId, conn: ConnectionId) {
		self.users.remove_if_mut(user, |_, conns| {
			conns.remove(&conn);
			conns.is_empty()
		});
	}
}
