#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use courier_domain::{
	Conversation, ConversationId, ConversationKind, DomainError, LastMessageSummary, Message, MessageBody, MessageDraft,
	MessageId, MessageStatus, Reactions, UserId,
};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::warn;

use super::{CreateOutcome, MessageStore, StatusChange, conversation_not_found, message_not_found};

const MESSAGE_COLUMNS: &str = "id, sender_id, body, created_at_ms, status, edited, deleted";

type MessageRow = (i64, String, String, i64, i64, bool, bool);

type ConversationRow = (
	String,
	Option<String>,
	i64,
	Option<i64>,
	Option<String>,
	Option<String>,
	Option<i64>,
	bool,
);

/// SQLite-backed message store.
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
	pool: SqlitePool,
}

/// Map driver errors to `Transient`, keeping the anyhow context chain in the detail.
trait DbResultExt<T> {
	fn db(self, what: &'static str) -> Result<T, DomainError>;
}

impl<T, E> DbResultExt<T> for Result<T, E>
where
	E: std::error::Error + Send + Sync + 'static,
{
	fn db(self, what: &'static str) -> Result<T, DomainError> {
		self.context(what).map_err(|e| {
			let detail = format!("{e:#}");
			warn!(error = %detail, "sqlite store error");
			DomainError::transient(detail)
		})
	}
}

fn corrupt(what: impl std::fmt::Display) -> DomainError {
	DomainError::transient(format!("corrupt row: {what}"))
}

fn user_id(s: String) -> Result<UserId, DomainError> {
	UserId::new(s).map_err(corrupt)
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
	matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

fn encode_body(body: &MessageBody) -> Result<String, DomainError> {
	serde_json::to_string(body).map_err(|e| DomainError::invalid(format!("encode body: {e}")))
}

fn message_from_row(conversation_id: &ConversationId, row: MessageRow) -> Result<Message, DomainError> {
	let (id, sender_id, body, created_at_ms, status, edited, deleted) = row;
	let body: MessageBody = serde_json::from_str(&body).map_err(corrupt)?;
	let status = MessageStatus::from_rank(status).ok_or_else(|| corrupt(format!("status rank {status}")))?;
	Ok(Message {
		id: MessageId(id as u64),
		conversation_id: conversation_id.clone(),
		sender_id: user_id(sender_id)?,
		body,
		created_at_ms,
		status,
		edited,
		deleted,
		reactions: Reactions::new(),
	})
}

impl SqliteMessageStore {
	/// Open (creating if needed) the database and run migrations.
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		let opts = SqliteConnectOptions::from_str(database_url)
			.context("parse sqlite url")?
			.create_if_missing(true)
			.foreign_keys(true)
			.busy_timeout(Duration::from_secs(5));

		// Each connection to `:memory:` is its own database.
		let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
		let pool_opts = if in_memory {
			SqlitePoolOptions::new()
				.max_connections(1)
				.min_connections(1)
				.idle_timeout(None)
				.max_lifetime(None)
		} else {
			SqlitePoolOptions::new().max_connections(8)
		};

		let pool = pool_opts.connect_with(opts).await.context("connect sqlite")?;
		sqlx::migrate!("migrations/sqlite")
			.run(&pool)
			.await
			.context("run sqlite migrations")?;

		Ok(Self { pool })
	}

	pub fn pool(&self) -> SqlitePool {
		self.pool.clone()
	}

	async fn load_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>, DomainError> {
		let row: Option<ConversationRow> = sqlx::query_as(
			"SELECT kind, name, created_at_ms, last_message_id, last_preview, last_sender_id, last_created_at_ms, last_read \
			 FROM conversations WHERE id = ?",
		)
		.bind(id.as_str())
		.fetch_optional(&self.pool)
		.await
		.db("select conversation (sqlite)")?;

		let Some((kind, name, created_at_ms, last_id, last_preview, last_sender, last_created, last_read)) = row else {
			return Ok(None);
		};

		let members: Vec<(String, i64)> =
			sqlx::query_as("SELECT user_id, unread_count FROM conversation_participants WHERE conversation_id = ?")
				.bind(id.as_str())
				.fetch_all(&self.pool)
				.await
				.db("select participants (sqlite)")?;

		let mut participants = std::collections::BTreeSet::new();
		let mut unread_counts = BTreeMap::new();
		for (user, unread) in members {
			let user = user_id(user)?;
			unread_counts.insert(user.clone(), unread.max(0) as u64);
			participants.insert(user);
		}

		let last_message = match (last_id, last_preview, last_sender, last_created) {
			(Some(message_id), Some(preview), Some(sender), Some(created_at_ms)) => Some(LastMessageSummary {
				message_id: MessageId(message_id as u64),
				preview,
				sender_id: user_id(sender)?,
				created_at_ms,
				read: last_read,
			}),
			_ => None,
		};

		Ok(Some(Conversation {
			id: id.clone(),
			kind: ConversationKind::parse(&kind).ok_or_else(|| corrupt(format!("conversation kind {kind}")))?,
			name,
			participants,
			last_message,
			unread_counts,
			created_at_ms,
		}))
	}

	/// Attach reactions to `messages`, which must be sorted by id.
	async fn attach_reactions(&self, id: &ConversationId, messages: &mut [Message]) -> Result<(), DomainError> {
		let (Some(first), Some(last)) = (messages.first(), messages.last()) else {
			return Ok(());
		};

		let rows: Vec<(i64, String, String)> = sqlx::query_as(
			"SELECT r.message_id, r.emoji, r.user_id FROM message_reactions r \
			 JOIN messages m ON m.id = r.message_id \
			 WHERE m.conversation_id = ? AND r.message_id BETWEEN ? AND ?",
		)
		.bind(id.as_str())
		.bind(first.id.0 as i64)
		.bind(last.id.0 as i64)
		.fetch_all(&self.pool)
		.await
		.db("select reactions (sqlite)")?;

		for (message_id, emoji, user) in rows {
			let message_id = MessageId(message_id as u64);
			if let Ok(idx) = messages.binary_search_by_key(&message_id, |m| m.id) {
				messages[idx].reactions.entry(emoji).or_default().insert(user_id(user)?);
			}
		}
		Ok(())
	}

	async fn require_message(&self, id: &ConversationId, message_id: MessageId) -> Result<Message, DomainError> {
		self.get_message(id, message_id)
			.await?
			.ok_or_else(|| message_not_found(id, message_id))
	}

	/// Point the summary at `message`'s current preview if it is the newest one.
	async fn refresh_summary(
		tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
		message: &Message,
	) -> Result<(), DomainError> {
		sqlx::query("UPDATE conversations SET last_preview = ? WHERE id = ? AND last_message_id = ?")
			.bind(message.preview())
			.bind(message.conversation_id.as_str())
			.bind(message.id.0 as i64)
			.execute(&mut **tx)
			.await
			.db("refresh summary (sqlite)")?;
		Ok(())
	}
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
	async fn conditional_create(&self, conversation: Conversation) -> Result<CreateOutcome, DomainError> {
		let mut tx = self.pool.begin().await.db("begin sqlite tx")?;

		let inserted = sqlx::query(
			"INSERT INTO conversations (id, kind, name, created_at_ms) VALUES (?, ?, ?, ?) ON CONFLICT(id) DO NOTHING",
		)
		.bind(conversation.id.as_str())
		.bind(conversation.kind.as_str())
		.bind(conversation.name.as_deref())
		.bind(conversation.created_at_ms)
		.execute(&mut *tx)
		.await
		.db("insert conversation (sqlite)")?
		.rows_affected();

		if inserted == 0 {
			tx.rollback().await.db("rollback sqlite tx")?;
			let existing = self
				.load_conversation(&conversation.id)
				.await?
				.ok_or_else(|| conversation_not_found(&conversation.id))?;
			return Ok(CreateOutcome::Existing(existing));
		}

		for user in &conversation.participants {
			sqlx::query("INSERT INTO conversation_participants (conversation_id, user_id, unread_count) VALUES (?, ?, 0)")
				.bind(conversation.id.as_str())
				.bind(user.as_str())
				.execute(&mut *tx)
				.await
				.db("insert participant (sqlite)")?;
		}

		tx.commit().await.db("commit sqlite tx")?;
		Ok(CreateOutcome::Created(conversation))
	}

	async fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>, DomainError> {
		self.load_conversation(id).await
	}

	async fn add_participants(&self, id: &ConversationId, users: &[UserId]) -> Result<Conversation, DomainError> {
		let mut conversation = self.load_conversation(id).await?.ok_or_else(|| conversation_not_found(id))?;
		let added = conversation.add_members(users.iter().cloned())?;
		if added.is_empty() {
			return Ok(conversation);
		}

		let mut tx = self.pool.begin().await.db("begin sqlite tx")?;
		for user in &added {
			sqlx::query(
				"INSERT INTO conversation_participants (conversation_id, user_id, unread_count) VALUES (?, ?, 0) \
				 ON CONFLICT(conversation_id, user_id) DO NOTHING",
			)
			.bind(id.as_str())
			.bind(user.as_str())
			.execute(&mut *tx)
			.await
			.db("insert participant (sqlite)")?;
		}
		tx.commit().await.db("commit sqlite tx")?;

		Ok(conversation)
	}

	async fn append(&self, id: &ConversationId, draft: MessageDraft, now_ms: i64) -> Result<Message, DomainError> {
		let body = encode_body(&draft.body)?;
		let mut tx = self.pool.begin().await.db("begin sqlite tx")?;

		// Write first so the transaction takes the write lock up front.
		let inserted: Result<(i64, i64), sqlx::Error> = sqlx::query_as(
			"INSERT INTO messages (conversation_id, sender_id, body, created_at_ms, status, edited, deleted) \
			 SELECT ?, ?, ?, MAX(?, COALESCE(MAX(created_at_ms) + 1, ?)), 0, 0, 0 \
			 FROM messages WHERE conversation_id = ? \
			 RETURNING id, created_at_ms",
		)
		.bind(id.as_str())
		.bind(draft.sender_id.as_str())
		.bind(&body)
		.bind(now_ms)
		.bind(now_ms)
		.bind(id.as_str())
		.fetch_one(&mut *tx)
		.await;

		let (message_id, created_at_ms) = match inserted {
			Ok(row) => row,
			Err(e) if is_foreign_key_violation(&e) => return Err(conversation_not_found(id)),
			Err(e) => return Err(e).db("insert message (sqlite)"),
		};

		let message = Message {
			id: MessageId(message_id as u64),
			conversation_id: id.clone(),
			sender_id: draft.sender_id,
			body: draft.body,
			created_at_ms,
			status: MessageStatus::Sent,
			edited: false,
			deleted: false,
			reactions: Reactions::new(),
		};

		sqlx::query(
			"UPDATE conversations SET last_message_id = ?, last_preview = ?, last_sender_id = ?, \
			 last_created_at_ms = ?, last_read = 0 WHERE id = ?",
		)
		.bind(message_id)
		.bind(message.preview())
		.bind(message.sender_id.as_str())
		.bind(created_at_ms)
		.bind(id.as_str())
		.execute(&mut *tx)
		.await
		.db("update summary (sqlite)")?;

		sqlx::query(
			"UPDATE conversation_participants SET unread_count = unread_count + 1 \
			 WHERE conversation_id = ? AND user_id <> ?",
		)
		.bind(id.as_str())
		.bind(message.sender_id.as_str())
		.execute(&mut *tx)
		.await
		.db("bump unread (sqlite)")?;

		tx.commit().await.db("commit sqlite tx")?;
		Ok(message)
	}

	async fn get_message(&self, id: &ConversationId, message_id: MessageId) -> Result<Option<Message>, DomainError> {
		let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ? AND id = ?");
		let row: Option<MessageRow> = sqlx::query_as(&sql)
			.bind(id.as_str())
			.bind(message_id.0 as i64)
			.fetch_optional(&self.pool)
			.await
			.db("select message (sqlite)")?;

		let Some(row) = row else {
			return Ok(None);
		};
		let mut messages = [message_from_row(id, row)?];
		self.attach_reactions(id, &mut messages).await?;
		let [message] = messages;
		Ok(Some(message))
	}

	async fn update_status(
		&self,
		id: &ConversationId,
		message_id: MessageId,
		status: MessageStatus,
	) -> Result<bool, DomainError> {
		let changed = sqlx::query("UPDATE messages SET status = ? WHERE conversation_id = ? AND id = ? AND status < ?")
			.bind(status.rank())
			.bind(id.as_str())
			.bind(message_id.0 as i64)
			.bind(status.rank())
			.execute(&self.pool)
			.await
			.db("update status (sqlite)")?
			.rows_affected();

		if changed == 0 {
			self.require_message(id, message_id).await?;
			return Ok(false);
		}
		Ok(true)
	}

	async fn advance_statuses(
		&self,
		id: &ConversationId,
		recipient: &UserId,
		to: MessageStatus,
	) -> Result<Vec<StatusChange>, DomainError> {
		let mut rows: Vec<(i64,)> = sqlx::query_as(
			"UPDATE messages SET status = ? \
			 WHERE conversation_id = ? AND sender_id <> ? AND status < ? \
			 RETURNING id",
		)
		.bind(to.rank())
		.bind(id.as_str())
		.bind(recipient.as_str())
		.bind(to.rank())
		.fetch_all(&self.pool)
		.await
		.db("advance statuses (sqlite)")?;

		rows.sort_unstable();
		Ok(rows
			.into_iter()
			.map(|(message_id,)| StatusChange {
				message_id: MessageId(message_id as u64),
				status: to,
			})
			.collect())
	}

	async fn query(
		&self,
		id: &ConversationId,
		limit: usize,
		before: Option<MessageId>,
	) -> Result<Vec<Message>, DomainError> {
		let before = before
			.and_then(|b| i64::try_from(b.0).ok())
			.unwrap_or(i64::MAX);
		let limit = i64::try_from(limit).unwrap_or(i64::MAX);

		let sql = format!(
			"SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ? AND id < ? ORDER BY id DESC LIMIT ?"
		);
		let rows: Vec<MessageRow> = sqlx::query_as(&sql)
			.bind(id.as_str())
			.bind(before)
			.bind(limit)
			.fetch_all(&self.pool)
			.await
			.db("select history (sqlite)")?;

		let mut messages = rows
			.into_iter()
			.rev()
			.map(|row| message_from_row(id, row))
			.collect::<Result<Vec<_>, _>>()?;
		self.attach_reactions(id, &mut messages).await?;
		Ok(messages)
	}

	async fn reset_unread(&self, id: &ConversationId, user: &UserId) -> Result<(), DomainError> {
		sqlx::query("UPDATE conversation_participants SET unread_count = 0 WHERE conversation_id = ? AND user_id = ?")
			.bind(id.as_str())
			.bind(user.as_str())
			.execute(&self.pool)
			.await
			.db("reset unread (sqlite)")?;
		Ok(())
	}

	async fn mark_last_message_read(&self, id: &ConversationId, reader: &UserId) -> Result<bool, DomainError> {
		let changed = sqlx::query(
			"UPDATE conversations SET last_read = 1 \
			 WHERE id = ? AND last_message_id IS NOT NULL AND last_sender_id <> ? AND last_read = 0",
		)
		.bind(id.as_str())
		.bind(reader.as_str())
		.execute(&self.pool)
		.await
		.db("mark last read (sqlite)")?
		.rows_affected();
		Ok(changed > 0)
	}

	async fn edit_text(&self, id: &ConversationId, message_id: MessageId, text: &str) -> Result<Message, DomainError> {
		let mut message = self.require_message(id, message_id).await?;
		message.apply_edit(text)?;
		let body = encode_body(&message.body)?;

		let mut tx = self.pool.begin().await.db("begin sqlite tx")?;
		sqlx::query("UPDATE messages SET body = ?, edited = 1 WHERE conversation_id = ? AND id = ?")
			.bind(&body)
			.bind(id.as_str())
			.bind(message_id.0 as i64)
			.execute(&mut *tx)
			.await
			.db("edit message (sqlite)")?;
		Self::refresh_summary(&mut tx, &message).await?;
		tx.commit().await.db("commit sqlite tx")?;

		Ok(message)
	}

	async fn soft_delete(&self, id: &ConversationId, message_id: MessageId) -> Result<Option<Message>, DomainError> {
		let mut message = self.require_message(id, message_id).await?;
		if !message.apply_delete() {
			return Ok(None);
		}
		let body = encode_body(&message.body)?;

		let mut tx = self.pool.begin().await.db("begin sqlite tx")?;
		let changed = sqlx::query("UPDATE messages SET deleted = 1, body = ? WHERE conversation_id = ? AND id = ? AND deleted = 0")
			.bind(&body)
			.bind(id.as_str())
			.bind(message_id.0 as i64)
			.execute(&mut *tx)
			.await
			.db("delete message (sqlite)")?
			.rows_affected();

		if changed == 0 {
			tx.rollback().await.db("rollback sqlite tx")?;
			return Ok(None);
		}

		sqlx::query("DELETE FROM message_reactions WHERE message_id = ?")
			.bind(message_id.0 as i64)
			.execute(&mut *tx)
			.await
			.db("clear reactions (sqlite)")?;
		Self::refresh_summary(&mut tx, &message).await?;
		tx.commit().await.db("commit sqlite tx")?;

		Ok(Some(message))
	}

	async fn toggle_reaction(
		&self,
		id: &ConversationId,
		message_id: MessageId,
		emoji: &str,
		user: &UserId,
	) -> Result<Message, DomainError> {
		self.require_message(id, message_id).await?;

		let mut tx = self.pool.begin().await.db("begin sqlite tx")?;
		let removed = sqlx::query("DELETE FROM message_reactions WHERE message_id = ? AND emoji = ? AND user_id = ?")
			.bind(message_id.0 as i64)
			.bind(emoji)
			.bind(user.as_str())
			.execute(&mut *tx)
			.await
			.db("remove reaction (sqlite)")?
			.rows_affected();

		if removed == 0 {
			sqlx::query("INSERT INTO message_reactions (message_id, emoji, user_id) VALUES (?, ?, ?)")
				.bind(message_id.0 as i64)
				.bind(emoji)
				.bind(user.as_str())
				.execute(&mut *tx)
				.await
				.db("insert reaction (sqlite)")?;
		}
		tx.commit().await.db("commit sqlite tx")?;

		self.require_message(id, message_id).await
	}
}
