#![forbid(unsafe_code)]

use std::sync::Arc;

use async_trait::async_trait;
use courier_domain::{DomainError, UserId};
use dashmap::DashMap;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::util::time::unix_ms_now;

const MAX_TOKEN_LEN: usize = 4096;

/// Push-token records, one per token value.
#[async_trait]
pub trait TokenStore: Send + Sync {
	/// Latest write wins: re-registering a token moves it to `user`.
	async fn upsert(&self, user: &UserId, token: &str, now_ms: i64) -> anyhow::Result<()>;

	/// Returns whether a record was removed.
	async fn delete(&self, token: &str) -> anyhow::Result<bool>;

	async fn tokens_for(&self, users: &[UserId]) -> anyhow::Result<Vec<(UserId, String)>>;
}

#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
	by_token: DashMap<String, UserId>,
}

impl InMemoryTokenStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
	async fn upsert(&self, user: &UserId, token: &str, _now_ms: i64) -> anyhow::Result<()> {
		self.by_token.insert(token.to_string(), user.clone());
		Ok(())
	}

	async fn delete(&self, token: &str) -> anyhow::Result<bool> {
		Ok(self.by_token.remove(token).is_some())
	}

	async fn tokens_for(&self, users: &[UserId]) -> anyhow::Result<Vec<(UserId, String)>> {
		let mut out: Vec<(UserId, String)> = self
			.by_token
			.iter()
			.filter(|e| users.contains(e.value()))
			.map(|e| (e.value().clone(), e.key().clone()))
			.collect();
		out.sort();
		Ok(out)
	}
}

/// Token records in the `push_tokens` table.
#[derive(Debug, Clone)]
pub struct SqliteTokenStore {
	pool: SqlitePool,
}

impl SqliteTokenStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
	async fn upsert(&self, user: &UserId, token: &str, now_ms: i64) -> anyhow::Result<()> {
		use anyhow::Context as _;

		sqlx::query(
			"INSERT INTO push_tokens (token, user_id, updated_at_ms) VALUES (?, ?, ?) \
			 ON CONFLICT(token) DO UPDATE SET user_id = excluded.user_id, updated_at_ms = excluded.updated_at_ms",
		)
		.bind(token)
		.bind(user.as_str())
		.bind(now_ms)
		.execute(&self.pool)
		.await
		.context("upsert push token (sqlite)")?;
		Ok(())
	}

	async fn delete(&self, token: &str) -> anyhow::Result<bool> {
		use anyhow::Context as _;

		let removed = sqlx::query("DELETE FROM push_tokens WHERE token = ?")
			.bind(token)
			.execute(&self.pool)
			.await
			.context("delete push token (sqlite)")?
			.rows_affected();
		Ok(removed > 0)
	}

	async fn tokens_for(&self, users: &[UserId]) -> anyhow::Result<Vec<(UserId, String)>> {
		use anyhow::Context as _;

		let mut out = Vec::new();
		for user in users {
			let rows: Vec<(String,)> = sqlx::query_as("SELECT token FROM push_tokens WHERE user_id = ? ORDER BY token")
				.bind(user.as_str())
				.fetch_all(&self.pool)
				.await
				.context("select push tokens (sqlite)")?;
			out.extend(rows.into_iter().map(|(token,)| (user.clone(), token)));
		}
		Ok(out)
	}
}

/// Validating front for push-token registration.
#[derive(Clone)]
pub struct TokenRegistry {
	store: Arc<dyn TokenStore>,
}

impl TokenRegistry {
	pub fn new(store: Arc<dyn TokenStore>) -> Self {
		Self { store }
	}

	pub async fn register_token(&self, user: &UserId, token: &str) -> Result<(), DomainError> {
		let token = validate(token)?;
		self.store.upsert(user, token, unix_ms_now()).await.map_err(|e| {
			warn!(user_id = %user, error = %e, "push token upsert failed");
			DomainError::transient("token store unavailable")
		})?;
		debug!(user_id = %user, "push token registered");
		Ok(())
	}

	/// Explicit logout. Returns whether the token was known.
	pub async fn unregister_token(&self, token: &str) -> Result<bool, DomainError> {
		let token = validate(token)?;
		self.store.delete(token).await.map_err(|e| {
			warn!(error = %e, "push token delete failed");
			DomainError::transient("token store unavailable")
		})
	}
}

fn validate(token: &str) -> Result<&str, DomainError> {
	let token = token.trim();
	if token.is_empty() {
		return Err(DomainError::invalid("empty push token"));
	}
	if token.len() > MAX_TOKEN_LEN {
		return Err(DomainError::invalid("push token too long"));
	}
	Ok(token)
}
