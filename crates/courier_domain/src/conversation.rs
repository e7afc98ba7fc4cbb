#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{ConversationId, DomainError, Message, MessageId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
	Direct,
	Group,
}

impl ConversationKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			ConversationKind::Direct => "direct",
			ConversationKind::Group => "group",
		}
	}

	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"direct" => Some(ConversationKind::Direct),
			"group" => Some(ConversationKind::Group),
			_ => None,
		}
	}
}

/// Denormalized preview of the newest message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessageSummary {
	pub message_id: MessageId,
	pub preview: String,
	pub sender_id: UserId,
	pub created_at_ms: i64,
	pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
	pub id: ConversationId,
	pub kind: ConversationKind,
	pub name: Option<String>,
	pub participants: BTreeSet<UserId>,
	pub last_message: Option<LastMessageSummary>,
	pub unread_counts: BTreeMap<UserId, u64>,
	pub created_at_ms: i64,
}

impl Conversation {
	/// New direct conversation under its canonical id.
	pub fn direct(a: UserId, b: UserId, now_ms: i64) -> Result<Self, DomainError> {
		if a == b {
			return Err(DomainError::invalid("direct conversation needs two distinct users"));
		}
		let id = ConversationId::direct(&a, &b);
		Ok(Self::with_members(id, ConversationKind::Direct, None, [a, b], now_ms))
	}

	/// New group conversation; the creator is always a member.
	pub fn group(
		id: ConversationId,
		creator: UserId,
		members: impl IntoIterator<Item = UserId>,
		name: Option<String>,
		now_ms: i64,
	) -> Result<Self, DomainError> {
		let mut members: BTreeSet<UserId> = members.into_iter().collect();
		if members.is_empty() {
			return Err(DomainError::invalid("group needs at least one member"));
		}
		members.insert(creator);
		let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
		Ok(Self::with_members(id, ConversationKind::Group, name, members, now_ms))
	}

	fn with_members(
		id: ConversationId,
		kind: ConversationKind,
		name: Option<String>,
		members: impl IntoIterator<Item = UserId>,
		now_ms: i64,
	) -> Self {
		let participants: BTreeSet<UserId> = members.into_iter().collect();
		let unread_counts = participants.iter().map(|u| (u.clone(), 0)).collect();
		Self {
			id,
			kind,
			name,
			participants,
			last_message: None,
			unread_counts,
			created_at_ms: now_ms,
		}
	}

	pub fn is_participant(&self, user: &UserId) -> bool {
		self.participants.contains(user)
	}

	/// Participants other than `user`.
	pub fn others<'a>(&'a self, user: &'a UserId) -> impl Iterator<Item = &'a UserId> + 'a {
		self.participants.iter().filter(move |p| *p != user)
	}

	pub fn unread_for(&self, user: &UserId) -> u64 {
		self.unread_counts.get(user).copied().unwrap_or(0)
	}

	/// Fold an appended message into the summary and unread counters.
	pub fn record_message(&mut self, msg: &Message) {
		self.last_message = Some(LastMessageSummary {
			message_id: msg.id,
			preview: msg.preview(),
			sender_id: msg.sender_id.clone(),
			created_at_ms: msg.created_at_ms,
			read: false,
		});
		let sender = &msg.sender_id;
		for p in self.participants.iter().filter(|p| *p != sender) {
			*self.unread_counts.entry(p.clone()).or_insert(0) += 1;
		}
	}

	/// Refresh the summary preview if `msg` is the newest message.
	pub fn refresh_summary(&mut self, msg: &Message) {
		if let Some(last) = self.last_message.as_mut()
			&& last.message_id == msg.id
		{
			last.preview = msg.preview();
		}
	}

	pub fn reset_unread(&mut self, user: &UserId) {
		if let Some(count) = self.unread_counts.get_mut(user) {
			*count = 0;
		}
	}

	/// Flag the newest message as read when someone other than `reader`
	/// wrote it. Returns whether the flag changed.
	pub fn mark_last_read_by(&mut self, reader: &UserId) -> bool {
		match self.last_message.as_mut() {
			Some(last) if &last.sender_id != reader && !last.read => {
				last.read = true;
				true
			}
			_ => false,
		}
	}

	/// Append members to a group. Returns the users that were new.
	pub fn add_members(&mut self, users: impl IntoIterator<Item = UserId>) -> Result<Vec<UserId>, DomainError> {
		if self.kind == ConversationKind::Direct {
			return Err(DomainError::invalid("direct conversation membership is fixed"));
		}
		let mut added = Vec::new();
		for u in users {
			if self.participants.insert(u.clone()) {
				self.unread_counts.insert(u.clone(), 0);
				added.push(u);
			}
		}
		Ok(added)
	}
}
