#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{ConversationId, DomainError, MessageId, ParseIdError, UserId};

/// Emoji -> users who reacted with it.
pub type Reactions = BTreeMap<String, BTreeSet<UserId>>;

/// Per-message delivery lifecycle. Ordered: `Sent < Delivered < Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
	Sent,
	Delivered,
	Read,
}

impl MessageStatus {
	pub const fn as_str(self) -> &'static str {
		match self {
			MessageStatus::Sent => "sent",
			MessageStatus::Delivered => "delivered",
			MessageStatus::Read => "read",
		}
	}

	/// Storage rank; comparisons on ranks match comparisons on statuses.
	pub const fn rank(self) -> i64 {
		match self {
			MessageStatus::Sent => 0,
			MessageStatus::Delivered => 1,
			MessageStatus::Read => 2,
		}
	}

	pub const fn from_rank(rank: i64) -> Option<Self> {
		match rank {
			0 => Some(MessageStatus::Sent),
			1 => Some(MessageStatus::Delivered),
			2 => Some(MessageStatus::Read),
			_ => None,
		}
	}

	/// Returns `Some(next)` only for a strictly forward transition.
	///
	/// Every status write goes through this check; regressions and repeats
	/// are no-ops.
	pub fn advance_to(self, next: MessageStatus) -> Option<MessageStatus> {
		(next > self).then_some(next)
	}
}

impl fmt::Display for MessageStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for MessageStatus {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"" => Err(ParseIdError::Empty),
			"sent" => Ok(MessageStatus::Sent),
			"delivered" => Ok(MessageStatus::Delivered),
			"read" => Ok(MessageStatus::Read),
			other => Err(ParseIdError::InvalidFormat(format!("unknown status: {other}"))),
		}
	}
}

/// Message payload: plain text or a reference to out-of-band content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
	Text {
		text: String,
	},
	Image {
		url: String,
		#[serde(default)]
		caption: Option<String>,
	},
	Audio {
		url: String,
		duration_ms: u64,
	},
	File {
		url: String,
		name: String,
		size_bytes: u64,
	},
	Location {
		latitude: f64,
		longitude: f64,
		#[serde(default)]
		label: Option<String>,
	},
}

impl MessageBody {
	pub fn text(text: impl Into<String>) -> Self {
		MessageBody::Text { text: text.into() }
	}

	pub const fn kind(&self) -> &'static str {
		match self {
			MessageBody::Text { .. } => "text",
			MessageBody::Image { .. } => "image",
			MessageBody::Audio { .. } => "audio",
			MessageBody::File { .. } => "file",
			MessageBody::Location { .. } => "location",
		}
	}

	pub fn as_text(&self) -> Option<&str> {
		match self {
			MessageBody::Text { text } => Some(text),
			_ => None,
		}
	}

	/// Short human-readable rendering for summaries and push bodies.
	pub fn preview(&self) -> String {
		fn with_detail(prefix: &str, detail: Option<&str>) -> String {
			match detail.map(str::trim).filter(|d| !d.is_empty()) {
				Some(d) => format!("{prefix} {d}"),
				None => prefix.to_string(),
			}
		}

		match self {
			MessageBody::Text { text } => text.clone(),
			MessageBody::Image { caption, .. } => with_detail("📷", caption.as_deref().or(Some("Photo"))),
			MessageBody::Audio { .. } => "🎤 Voice message".to_string(),
			MessageBody::File { name, .. } => with_detail("📎", Some(name)),
			MessageBody::Location { label, .. } => with_detail("📍", label.as_deref().or(Some("Location"))),
		}
	}

	/// Reject malformed payloads before anything touches the store.
	pub fn validate(&self, max_text_len: usize) -> Result<(), DomainError> {
		let check_url = |url: &str| {
			if url.trim().is_empty() {
				Err(DomainError::invalid(format!("{} message requires a url", self.kind())))
			} else {
				Ok(())
			}
		};

		match self {
			MessageBody::Text { text } => {
				if text.trim().is_empty() {
					return Err(DomainError::invalid("empty message"));
				}
				if text.chars().count() > max_text_len {
					return Err(DomainError::invalid(format!("message exceeds {max_text_len} characters")));
				}
				Ok(())
			}
			MessageBody::Image { url, .. } | MessageBody::Audio { url, .. } => check_url(url),
			MessageBody::File { url, name, .. } => {
				check_url(url)?;
				if name.trim().is_empty() {
					return Err(DomainError::invalid("file message requires a name"));
				}
				Ok(())
			}
			MessageBody::Location { latitude, longitude, .. } => {
				if !latitude.is_finite() || !(-90.0..=90.0).contains(latitude) {
					return Err(DomainError::invalid("latitude out of range"));
				}
				if !longitude.is_finite() || !(-180.0..=180.0).contains(longitude) {
					return Err(DomainError::invalid("longitude out of range"));
				}
				Ok(())
			}
		}
	}
}

/// What a sender submits; the store assigns id, timestamp and status.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
	pub sender_id: UserId,
	pub body: MessageBody,
}

/// A message in a conversation's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
	pub id: MessageId,
	pub conversation_id: ConversationId,
	pub sender_id: UserId,
	pub body: MessageBody,
	pub created_at_ms: i64,
	pub status: MessageStatus,
	pub edited: bool,
	pub deleted: bool,
	#[serde(default)]
	pub reactions: Reactions,
}

impl Message {
	/// Summary text; deleted messages render as a tombstone.
	pub fn preview(&self) -> String {
		if self.deleted {
			return "Message deleted".to_string();
		}
		self.body.preview()
	}

	/// Apply a forward status transition. Returns whether anything changed.
	pub fn advance_status(&mut self, next: MessageStatus) -> bool {
		match self.status.advance_to(next) {
			Some(s) => {
				self.status = s;
				true
			}
			None => false,
		}
	}

	/// Toggle `user`'s `emoji` reaction. Returns `true` if it was added.
	///
	/// Emoji entries with no users left are removed, so toggling twice
	/// restores the original map exactly.
	pub fn toggle_reaction(&mut self, emoji: &str, user: &UserId) -> bool {
		let users = self.reactions.entry(emoji.to_string()).or_default();
		let added = if users.remove(user) {
			false
		} else {
			users.insert(user.clone());
			true
		};
		if users.is_empty() {
			self.reactions.remove(emoji);
		}
		added
	}

	/// Replace the text of a text message and flag it as edited.
	pub fn apply_edit(&mut self, text: &str) -> Result<(), DomainError> {
		match &mut self.body {
			MessageBody::Text { text: current } => {
				*current = text.to_string();
				self.edited = true;
				Ok(())
			}
			other => Err(DomainError::invalid(format!("cannot edit a {} message", other.kind()))),
		}
	}

	/// Soft delete: the log keeps the slot, the content is dropped.
	pub fn apply_delete(&mut self) -> bool {
		if self.deleted {
			return false;
		}
		self.deleted = true;
		self.body = MessageBody::text(String::new());
		self.reactions.clear();
		true
	}
}
