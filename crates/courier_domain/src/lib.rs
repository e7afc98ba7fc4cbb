#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod conversation;
pub mod message;

pub use conversation::{Conversation, ConversationKind, LastMessageSummary};
pub use message::{Message, MessageBody, MessageDraft, MessageStatus, Reactions};

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Engine-level error taxonomy surfaced to the acting connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
	/// Non-participant attempted a conversation action.
	#[error("forbidden: {0}")]
	Forbidden(String),

	#[error("not found: {0}")]
	NotFound(String),

	/// Rejected before anything was persisted.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// Store or push collaborator unavailable.
	#[error("temporarily unavailable: {0}")]
	Transient(String),
}

impl DomainError {
	/// Stable error code used on the wire and in metrics labels.
	pub const fn code(&self) -> &'static str {
		match self {
			DomainError::Forbidden(_) => "FORBIDDEN",
			DomainError::NotFound(_) => "NOT_FOUND",
			DomainError::InvalidArgument(_) => "INVALID_ARGUMENT",
			DomainError::Transient(_) => "TRANSIENT",
		}
	}

	pub fn forbidden(detail: impl Into<String>) -> Self {
		DomainError::Forbidden(detail.into())
	}

	pub fn not_found(detail: impl Into<String>) -> Self {
		DomainError::NotFound(detail.into())
	}

	pub fn invalid(detail: impl Into<String>) -> Self {
		DomainError::InvalidArgument(detail.into())
	}

	pub fn transient(detail: impl Into<String>) -> Self {
		DomainError::Transient(detail.into())
	}
}

impl From<ParseIdError> for DomainError {
	fn from(e: ParseIdError) -> Self {
		DomainError::InvalidArgument(e.to_string())
	}
}

/// Verified user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
	/// Create a non-empty `UserId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for UserId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		UserId::new(s.to_string())
	}
}

/// Stable conversation identifier.
///
/// Direct conversations derive their id from the sorted participant pair,
/// so there is at most one canonical id per unordered pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
	pub const DIRECT_PREFIX: &'static str = "dm_";
	pub const GROUP_PREFIX: &'static str = "grp_";

	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}

	/// Canonical direct id: `dm_<min>_<max>`.
	pub fn direct(a: &UserId, b: &UserId) -> Self {
		let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
		Self(format!("{}{}_{}", Self::DIRECT_PREFIX, lo, hi))
	}

	/// Fresh group id; never deduplicated.
	pub fn new_group() -> Self {
		Self(format!("{}{}", Self::GROUP_PREFIX, uuid::Uuid::new_v4().simple()))
	}

	pub fn is_direct(&self) -> bool {
		self.0.starts_with(Self::DIRECT_PREFIX)
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for ConversationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ConversationId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ConversationId::new(s.to_string())
	}
}

/// Store-assigned message identifier, monotonic within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Opaque id of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "conn-{}", self.0)
	}
}

/// Verified identity handed over by the authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
	pub user_id: UserId,
	pub display_name: String,
}

impl Identity {
	/// Build an identity; a blank display name falls back to the user id.
	pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
		let display_name = display_name.into();
		let display_name = if display_name.trim().is_empty() {
			user_id.as_str().to_string()
		} else {
			display_name
		};
		Self { user_id, display_name }
	}
}
