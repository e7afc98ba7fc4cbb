#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use courier_domain::{Conversation, MessageId, UserId};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::presence::PresenceRegistry;
use crate::server::tokens::TokenStore;

/// One multicast request handed to the push sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
	pub tokens: Vec<String>,
	pub title: String,
	pub body: String,
	pub data: BTreeMap<String, String>,
}

/// Per-token result, in the order of `PushMessage::tokens`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
	Delivered,
	/// Token is permanently invalid or unregistered; its record should go.
	InvalidToken,
	Failed(String),
}

/// External push fan-out collaborator.
#[async_trait]
pub trait PushSink: Send + Sync {
	async fn send_multicast(&self, message: &PushMessage) -> anyhow::Result<Vec<PushOutcome>>;
}

/// Sink that only logs; every token counts as delivered.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPushSink;

#[async_trait]
impl PushSink for LoggingPushSink {
	async fn send_multicast(&self, message: &PushMessage) -> anyhow::Result<Vec<PushOutcome>> {
		info!(
			tokens = message.tokens.len(),
			title = %message.title,
			conversation_id = message.data.get("conversation_id").map(String::as_str).unwrap_or_default(),
			"push: multicast"
		);
		Ok(vec![PushOutcome::Delivered; message.tokens.len()])
	}
}

/// What a freshly submitted message needs pushed.
#[derive(Debug, Clone)]
pub struct PushRequest {
	pub conversation: Conversation,
	pub exclude: UserId,
	pub sender_name: String,
	pub message_id: MessageId,
	pub preview: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
	pub recipients: Vec<UserId>,
	pub tokens: usize,
	pub delivered: usize,
	pub pruned: usize,
	pub failed: usize,
}

/// Pushes to participants with no live connection and prunes dead tokens.
#[derive(Clone)]
pub struct NotificationDispatcher {
	sink: Arc<dyn PushSink>,
	tokens: Arc<dyn TokenStore>,
	presence: Arc<PresenceRegistry>,
	title_fallback: String,
}

impl NotificationDispatcher {
	pub fn new(
		sink: Arc<dyn PushSink>,
		tokens: Arc<dyn TokenStore>,
		presence: Arc<PresenceRegistry>,
		title_fallback: impl Into<String>,
	) -> Self {
		Self {
			sink,
			tokens,
			presence,
			title_fallback: title_fallback.into(),
		}
	}

	/// Run `dispatch` on its own task; the caller never waits on push.
	pub fn spawn_dispatch(&self, request: PushRequest) -> JoinHandle<DispatchReport> {
		let this = self.clone();
		tokio::spawn(async move { this.dispatch(request).await })
	}

	/// Recipients are participants minus `exclude` minus anyone reachable.
	/// Failures are logged and counted, never returned.
	pub async fn dispatch(&self, request: PushRequest) -> DispatchReport {
		let conversation_id = request.conversation.id.clone();
		let recipients: Vec<UserId> = request
			.conversation
			.others(&request.exclude)
			.filter(|u| !self.presence.is_user_reachable(u))
			.cloned()
			.collect();

		let mut report = DispatchReport {
			recipients: recipients.clone(),
			..DispatchReport::default()
		};
		if recipients.is_empty() {
			return report;
		}

		let records = match self.tokens.tokens_for(&recipients).await {
			Ok(records) => records,
			Err(e) => {
				warn!(%conversation_id, error = %e, "push: token lookup failed");
				metrics::counter!("courier_server_push_errors_total", "stage" => "tokens").increment(1);
				return report;
			}
		};
		if records.is_empty() {
			debug!(%conversation_id, recipients = recipients.len(), "push: no registered tokens");
			return report;
		}

		let tokens: Vec<String> = records.into_iter().map(|(_, token)| token).collect();
		report.tokens = tokens.len();

		let title = if request.sender_name.trim().is_empty() {
			self.title_fallback.clone()
		} else {
			request.sender_name.clone()
		};
		let message = PushMessage {
			tokens,
			title,
			body: request.preview.clone(),
			data: BTreeMap::from([
				("conversation_id".to_string(), conversation_id.to_string()),
				("message_id".to_string(), request.message_id.to_string()),
				("sender_id".to_string(), request.exclude.to_string()),
			]),
		};

		let outcomes = match self.sink.send_multicast(&message).await {
			Ok(outcomes) => outcomes,
			Err(e) => {
				warn!(%conversation_id, error = %e, "push: multicast failed");
				metrics::counter!("courier_server_push_errors_total", "stage" => "send").increment(1);
				report.failed = message.tokens.len();
				return report;
			}
		};

		for (token, outcome) in message.tokens.iter().zip(outcomes) {
			match outcome {
				PushOutcome::Delivered => report.delivered += 1,
				PushOutcome::InvalidToken => match self.tokens.delete(token).await {
					Ok(_) => report.pruned += 1,
					Err(e) => warn!(%conversation_id, error = %e, "push: stale token cleanup failed"),
				},
				PushOutcome::Failed(reason) => {
					report.failed += 1;
					debug!(%conversation_id, %reason, "push: token delivery failed");
				}
			}
		}

		metrics::counter!("courier_server_push_sent_total").increment(report.delivered as u64);
		metrics::counter!("courier_server_push_pruned_total").increment(report.pruned as u64);
		metrics::counter!("courier_server_push_failed_total").increment(report.failed as u64);
		debug!(
			%conversation_id,
			recipients = report.recipients.len(),
			tokens = report.tokens,
			delivered = report.delivered,
			pruned = report.pruned,
			failed = report.failed,
			"push: dispatched"
		);
		report
	}
}
