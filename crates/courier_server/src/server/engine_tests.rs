#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_domain::{
	ConnectionId, ConversationId, DomainError, Identity, MessageBody, MessageId, MessageStatus, UserId,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::server::engine::{DeliveryEngine, EngineConfig};
use crate::server::events::ServerEvent;
use crate::server::notify::{NotificationDispatcher, PushMessage, PushOutcome, PushSink};
use crate::server::presence::PresenceRegistry;
use crate::server::room_hub::{HubItem, RoomHub, RoomHubConfig};
use crate::server::store::{InMemoryMessageStore, MessageStore};
use crate::server::tokens::{InMemoryTokenStore, TokenRegistry, TokenStore};

struct ChannelSink {
	tx: mpsc::UnboundedSender<PushMessage>,
}

#[async_trait]
impl PushSink for ChannelSink {
	async fn send_multicast(&self, message: &PushMessage) -> anyhow::Result<Vec<PushOutcome>> {
		let _ = self.tx.send(message.clone());
		Ok(vec![PushOutcome::Delivered; message.tokens.len()])
	}
}

struct Harness {
	engine: Arc<DeliveryEngine>,
	store: Arc<InMemoryMessageStore>,
	tokens: Arc<InMemoryTokenStore>,
	pushes: mpsc::UnboundedReceiver<PushMessage>,
}

fn harness_with(cfg: EngineConfig) -> Harness {
	let store = Arc::new(InMemoryMessageStore::new());
	let tokens = Arc::new(InMemoryTokenStore::new());
	let presence = Arc::new(PresenceRegistry::new());
	let hub = RoomHub::new(RoomHubConfig {
		outlet_queue_capacity: 64,
		debug_logs: false,
	});
	let (tx, pushes) = mpsc::unbounded_channel();
	let dispatcher = NotificationDispatcher::new(
		Arc::new(ChannelSink { tx }),
		tokens.clone(),
		Arc::clone(&presence),
		"New message",
	);
	let engine = Arc::new(DeliveryEngine::new(
		store.clone(),
		presence,
		hub,
		TokenRegistry::new(tokens.clone()),
		Some(dispatcher),
		cfg,
	));
	Harness {
		engine,
		store,
		tokens,
		pushes,
	}
}

fn harness() -> Harness {
	harness_with(EngineConfig::default())
}

fn user(s: &str) -> UserId {
	UserId::new(s).expect("valid UserId")
}

fn ident(s: &str, name: &str) -> Identity {
	Identity::new(user(s), name)
}

fn text(s: &str) -> MessageBody {
	MessageBody::text(s)
}

/// Everything currently queued on an outlet.
fn drain(rx: &mut mpsc::Receiver<HubItem>) -> Vec<Arc<ServerEvent>> {
	let mut out = Vec::new();
	while let Ok(item) = rx.try_recv() {
		match item {
			HubItem::Event(ev) => out.push(ev),
			other => panic!("expected Event item, got: {other:?}"),
		}
	}
	out
}

fn names(events: &[Arc<ServerEvent>]) -> Vec<&'static str> {
	events.iter().map(|e| e.name()).collect()
}

async fn direct(h: &Harness, a: &str, b: &str) -> ConversationId {
	h.engine.open_direct(&user(a), &user(b)).await.expect("open direct").id
}

#[tokio::test]
async fn offline_recipient_gets_push_and_unread() {
	let mut h = harness();
	let alice = ident("A", "Alice");
	let conv = direct(&h, "A", "B").await;
	h.tokens.upsert(&user("B"), "tok-b", 1).await.expect("upsert");

	let mut rx_a = h.engine.connect(ConnectionId(1), &alice);
	h.engine.join(ConnectionId(1), &alice.user_id, &conv).await.expect("join");
	drain(&mut rx_a);

	let message = h.engine.submit(&alice, &conv, text("hi")).await.expect("submit");
	assert_eq!(message.status, MessageStatus::Sent);

	let events = drain(&mut rx_a);
	assert_eq!(names(&events), vec!["receive_message"]);

	let push = timeout(Duration::from_millis(500), h.pushes.recv())
		.await
		.expect("push within timeout")
		.expect("push channel open");
	assert_eq!(push.tokens, vec!["tok-b".to_string()]);
	assert_eq!(push.title, "Alice");
	assert_eq!(push.body, "hi");

	let stored = h.store.get_conversation(&conv).await.expect("get").expect("exists");
	assert_eq!(stored.unread_for(&user("B")), 1);
	assert_eq!(stored.last_message.expect("summary").preview, "hi");
}

#[tokio::test]
async fn join_delivers_pending_and_mark_read_reads_them() {
	let h = harness();
	let alice = ident("A", "Alice");
	let bob = ident("B", "Bob");
	let conv = direct(&h, "A", "B").await;

	let mut rx_a = h.engine.connect(ConnectionId(1), &alice);
	h.engine.join(ConnectionId(1), &alice.user_id, &conv).await.expect("join");
	let m1 = h.engine.submit(&alice, &conv, text("hi")).await.expect("submit");
	drain(&mut rx_a);

	let mut rx_b = h.engine.connect(ConnectionId(2), &bob);
	let report = h.engine.join(ConnectionId(2), &bob.user_id, &conv).await.expect("join");
	assert_eq!(report.delivered, 1);
	assert_eq!(report.history, 1);
	assert_eq!(report.online, BTreeSet::from([user("A"), user("B")]));

	let a_events = drain(&mut rx_a);
	assert_eq!(names(&a_events), vec!["message_status_update", "online_users"]);
	match a_events[0].as_ref() {
		ServerEvent::MessageStatusUpdate { message_id, status, .. } => {
			assert_eq!(*message_id, m1.id);
			assert_eq!(*status, MessageStatus::Delivered);
		}
		other => panic!("expected MessageStatusUpdate, got: {other:?}"),
	}

	let b_events = drain(&mut rx_b);
	assert_eq!(names(&b_events), vec!["message_status_update", "load_history", "online_users"]);
	match b_events[1].as_ref() {
		ServerEvent::LoadHistory { messages, has_more, .. } => {
			assert_eq!(messages.len(), 1);
			assert_eq!(messages[0].status, MessageStatus::Delivered);
			assert!(!has_more);
		}
		other => panic!("expected LoadHistory, got: {other:?}"),
	}

	assert_eq!(h.engine.mark_read(&bob.user_id, &conv).await.expect("mark read"), 1);
	match drain(&mut rx_a).as_slice() {
		[ev] => match ev.as_ref() {
			ServerEvent::MessageStatusUpdate { status, .. } => assert_eq!(*status, MessageStatus::Read),
			other => panic!("expected MessageStatusUpdate, got: {other:?}"),
		},
		other => panic!("expected one event, got: {other:?}"),
	}

	let stored = h.store.get_conversation(&conv).await.expect("get").expect("exists");
	assert_eq!(stored.unread_for(&user("B")), 0);
	assert!(stored.last_message.expect("summary").read);

	assert_eq!(h.engine.mark_read(&bob.user_id, &conv).await.expect("mark read"), 0);
	assert!(drain(&mut rx_a).is_empty(), "repeated mark_read emits nothing");
}

#[tokio::test]
async fn reachable_recipient_is_delivered_before_submit_returns() {
	let mut h = harness();
	let alice = ident("A", "Alice");
	let bob = ident("B", "Bob");
	let conv = direct(&h, "A", "B").await;
	h.tokens.upsert(&user("B"), "tok-b", 1).await.expect("upsert");

	let mut rx_a = h.engine.connect(ConnectionId(1), &alice);
	let mut rx_b = h.engine.connect(ConnectionId(2), &bob);
	h.engine.join(ConnectionId(1), &alice.user_id, &conv).await.expect("join");
	h.engine.join(ConnectionId(2), &bob.user_id, &conv).await.expect("join");
	drain(&mut rx_a);
	drain(&mut rx_b);

	let message = h.engine.submit(&alice, &conv, text("hey")).await.expect("submit");
	assert_eq!(message.status, MessageStatus::Delivered);

	for rx in [&mut rx_a, &mut rx_b] {
		assert_eq!(names(&drain(rx)), vec!["receive_message", "message_status_update"]);
	}

	let no_push = timeout(Duration::from_millis(100), h.pushes.recv()).await;
	assert!(no_push.is_err(), "reachable recipient must not be pushed");
}

#[tokio::test]
async fn status_never_regresses() {
	let h = harness();
	let alice = ident("A", "Alice");
	let bob = ident("B", "Bob");
	let conv = direct(&h, "A", "B").await;

	let m = h.engine.submit(&alice, &conv, text("hi")).await.expect("submit");
	h.engine.mark_read(&bob.user_id, &conv).await.expect("mark read");

	let _rx_b = h.engine.connect(ConnectionId(2), &bob);
	let report = h.engine.join(ConnectionId(2), &bob.user_id, &conv).await.expect("join");
	assert_eq!(report.delivered, 0, "read messages are not downgraded to delivered");

	let stored = h.store.get_message(&conv, m.id).await.expect("get").expect("exists");
	assert_eq!(stored.status, MessageStatus::Read);
}

#[tokio::test]
async fn failed_append_emits_nothing() {
	let h = harness();
	let alice = ident("A", "Alice");
	let conv = direct(&h, "A", "B").await;

	let mut rx_a = h.engine.connect(ConnectionId(1), &alice);
	h.engine.join(ConnectionId(1), &alice.user_id, &conv).await.expect("join");
	drain(&mut rx_a);

	h.store.fail_appends(true);
	match h.engine.submit(&alice, &conv, text("lost")).await {
		Err(DomainError::Transient(_)) => {}
		other => panic!("expected Transient, got: {other:?}"),
	}
	assert!(drain(&mut rx_a).is_empty());
	assert!(h.store.query(&conv, 10, None).await.expect("query").is_empty());
}

#[tokio::test]
async fn submit_rejects_outsiders_and_invalid_bodies() {
	let h = harness();
	let conv = direct(&h, "A", "B").await;

	match h.engine.submit(&ident("C", "Carol"), &conv, text("hi")).await {
		Err(DomainError::Forbidden(_)) => {}
		other => panic!("expected Forbidden, got: {other:?}"),
	}
	match h.engine.submit(&ident("A", "Alice"), &conv, text("   ")).await {
		Err(DomainError::InvalidArgument(_)) => {}
		other => panic!("expected InvalidArgument, got: {other:?}"),
	}
	let missing = ConversationId::new("dm_X_Y").expect("valid id");
	match h.engine.submit(&ident("X", "X"), &missing, text("hi")).await {
		Err(DomainError::NotFound(_)) => {}
		other => panic!("expected NotFound, got: {other:?}"),
	}
}

#[tokio::test]
async fn typing_skips_the_actor_and_outsiders() {
	let h = harness();
	let alice = ident("A", "Alice");
	let bob = ident("B", "Bob");
	let conv = direct(&h, "A", "B").await;

	let mut rx_phone = h.engine.connect(ConnectionId(1), &alice);
	let mut rx_laptop = h.engine.connect(ConnectionId(3), &alice);
	let mut rx_b = h.engine.connect(ConnectionId(2), &bob);
	for (conn, who) in [(1, &alice), (3, &alice), (2, &bob)] {
		h.engine.join(ConnectionId(conn), &who.user_id, &conv).await.expect("join");
	}
	drain(&mut rx_phone);
	drain(&mut rx_laptop);
	drain(&mut rx_b);

	h.engine.typing(&alice, &conv, true).await;
	assert!(drain(&mut rx_phone).is_empty());
	assert!(drain(&mut rx_laptop).is_empty());
	match drain(&mut rx_b).as_slice() {
		[ev] => match ev.as_ref() {
			ServerEvent::DisplayTyping {
				user_id,
				display_name,
				is_typing,
				..
			} => {
				assert_eq!(user_id, &user("A"));
				assert_eq!(display_name, "Alice");
				assert!(*is_typing);
			}
			other => panic!("expected DisplayTyping, got: {other:?}"),
		},
		other => panic!("expected one event, got: {other:?}"),
	}

	h.engine.typing(&ident("C", "Carol"), &conv, true).await;
	assert!(drain(&mut rx_b).is_empty(), "outsider typing is dropped");
	assert!(drain(&mut rx_phone).is_empty());
}

#[tokio::test]
async fn only_the_author_edits_or_deletes() {
	let h = harness();
	let alice = ident("A", "Alice");
	let bob = ident("B", "Bob");
	let conv = direct(&h, "A", "B").await;
	let m = h.engine.submit(&alice, &conv, text("helo")).await.expect("submit");

	let mut rx_b = h.engine.connect(ConnectionId(2), &bob);
	h.engine.join(ConnectionId(2), &bob.user_id, &conv).await.expect("join");
	drain(&mut rx_b);

	let ignored = h
		.engine
		.edit_message(&bob.user_id, &conv, m.id, "hijack")
		.await
		.expect("edit");
	assert!(ignored.is_none());
	assert!(drain(&mut rx_b).is_empty());

	let edited = h
		.engine
		.edit_message(&alice.user_id, &conv, m.id, "hello")
		.await
		.expect("edit")
		.expect("author edit applies");
	assert!(edited.edited);
	assert_eq!(names(&drain(&mut rx_b)), vec!["message_edited"]);

	match h.engine.delete_message(&bob.user_id, &conv, m.id).await {
		Err(DomainError::Forbidden(_)) => {}
		other => panic!("expected Forbidden, got: {other:?}"),
	}

	let deleted = h.engine.delete_message(&alice.user_id, &conv, m.id).await.expect("delete");
	assert!(deleted.is_some());
	assert_eq!(names(&drain(&mut rx_b)), vec!["message_deleted"]);
	assert!(h.engine.delete_message(&alice.user_id, &conv, m.id).await.expect("delete").is_none());
	assert!(drain(&mut rx_b).is_empty(), "repeated delete emits nothing");

	match h.engine.edit_message(&alice.user_id, &conv, m.id, "again").await {
		Err(DomainError::InvalidArgument(_)) => {}
		other => panic!("expected InvalidArgument, got: {other:?}"),
	}
	match h.engine.toggle_reaction(&bob.user_id, &conv, m.id, "👍").await {
		Err(DomainError::InvalidArgument(_)) => {}
		other => panic!("expected InvalidArgument, got: {other:?}"),
	}
	match h.engine.delete_message(&alice.user_id, &conv, MessageId(404)).await {
		Err(DomainError::NotFound(_)) => {}
		other => panic!("expected NotFound, got: {other:?}"),
	}
}

#[tokio::test]
async fn reaction_toggle_is_broadcast_and_reversible() {
	let h = harness();
	let alice = ident("A", "Alice");
	let bob = ident("B", "Bob");
	let conv = direct(&h, "A", "B").await;
	let m = h.engine.submit(&alice, &conv, text("hi")).await.expect("submit");

	let mut rx_a = h.engine.connect(ConnectionId(1), &alice);
	h.engine.join(ConnectionId(1), &alice.user_id, &conv).await.expect("join");
	drain(&mut rx_a);

	let once = h.engine.toggle_reaction(&bob.user_id, &conv, m.id, " 👍 ").await.expect("toggle");
	assert!(once.reactions["👍"].contains(&user("B")));
	let twice = h.engine.toggle_reaction(&bob.user_id, &conv, m.id, "👍").await.expect("toggle");
	assert!(twice.reactions.is_empty());

	let events = drain(&mut rx_a);
	assert_eq!(names(&events), vec!["reaction_updated", "reaction_updated"]);

	match h.engine.toggle_reaction(&bob.user_id, &conv, m.id, "   ").await {
		Err(DomainError::InvalidArgument(_)) => {}
		other => panic!("expected InvalidArgument, got: {other:?}"),
	}
}

#[tokio::test]
async fn fetch_history_pages_backwards() {
	let h = harness_with(EngineConfig {
		history_limit: 3,
		max_history_page: 2,
		max_text_len: 100,
	});
	let alice = ident("A", "Alice");
	let conv = direct(&h, "A", "B").await;
	let mut ids = Vec::new();
	for n in 0..5 {
		ids.push(h.engine.submit(&alice, &conv, text(&format!("m{n}"))).await.expect("submit").id);
	}

	let mut rx = h.engine.connect(ConnectionId(1), &alice);

	let page_ids = |ev: &ServerEvent| match ev {
		ServerEvent::LoadHistory { messages, has_more, .. } => {
			(messages.iter().map(|m| m.id).collect::<Vec<_>>(), *has_more)
		}
		other => panic!("expected LoadHistory, got: {other:?}"),
	};

	assert_eq!(h.engine.fetch_history(ConnectionId(1), &alice.user_id, &conv, 0, None).await.expect("fetch"), 3);
	let first = drain(&mut rx);
	assert_eq!(page_ids(first[0].as_ref()), (ids[2..5].to_vec(), true));

	assert_eq!(
		h.engine
			.fetch_history(ConnectionId(1), &alice.user_id, &conv, 10, Some(ids[2]))
			.await
			.expect("fetch"),
		2
	);
	let second = drain(&mut rx);
	assert_eq!(page_ids(second[0].as_ref()), (ids[0..2].to_vec(), false));

	match h.engine.fetch_history(ConnectionId(1), &user("C"), &conv, 0, None).await {
		Err(DomainError::Forbidden(_)) => {}
		other => panic!("expected Forbidden, got: {other:?}"),
	}
}

#[tokio::test]
async fn disconnect_and_room_switch_refresh_online_sets() {
	let h = harness();
	let alice = ident("A", "Alice");
	let bob = ident("B", "Bob");
	let conv = direct(&h, "A", "B").await;
	let group = h
		.engine
		.create_group(&bob.user_id, Some("g".into()), vec![user("A")])
		.await
		.expect("group");

	let mut rx_a = h.engine.connect(ConnectionId(1), &alice);
	let _rx_b = h.engine.connect(ConnectionId(2), &bob);
	h.engine.join(ConnectionId(1), &alice.user_id, &conv).await.expect("join");
	h.engine.join(ConnectionId(2), &bob.user_id, &conv).await.expect("join");
	drain(&mut rx_a);

	let report = h.engine.join(ConnectionId(2), &bob.user_id, &group.id).await.expect("join");
	assert_eq!(report.left.as_ref(), Some(&conv));
	let online_users = |events: Vec<Arc<ServerEvent>>| -> Vec<BTreeSet<UserId>> {
		events
			.iter()
			.filter_map(|e| match e.as_ref() {
				ServerEvent::OnlineUsers { users, .. } => Some(users.clone()),
				_ => None,
			})
			.collect()
	};
	assert_eq!(online_users(drain(&mut rx_a)), vec![BTreeSet::from([user("A")])]);

	h.engine.join(ConnectionId(2), &bob.user_id, &conv).await.expect("join");
	drain(&mut rx_a);
	h.engine.disconnect(ConnectionId(2));
	assert_eq!(online_users(drain(&mut rx_a)), vec![BTreeSet::from([user("A")])]);

	h.engine.disconnect(ConnectionId(2));
	assert!(drain(&mut rx_a).is_empty(), "second disconnect is a no-op");
}

#[tokio::test]
async fn push_tokens_register_and_unregister() {
	let h = harness();
	h.engine.register_push_token(&user("A"), "  tok-a ").await.expect("register");
	assert_eq!(
		h.tokens.tokens_for(&[user("A")]).await.expect("tokens"),
		vec![(user("A"), "tok-a".to_string())]
	);

	assert!(h.engine.unregister_push_token("tok-a").await.expect("unregister"));
	assert!(!h.engine.unregister_push_token("tok-a").await.expect("unregister"));
	match h.engine.register_push_token(&user("A"), "").await {
		Err(DomainError::InvalidArgument(_)) => {}
		other => panic!("expected InvalidArgument, got: {other:?}"),
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submits_keep_store_order_in_the_room() {
	const SENDS: usize = 16;
	let h = harness();
	let alice = ident("A", "Alice");
	let bob = ident("B", "Bob");
	let conv = direct(&h, "A", "B").await;

	let mut rx_a = h.engine.connect(ConnectionId(1), &alice);
	h.engine.join(ConnectionId(1), &alice.user_id, &conv).await.expect("join");
	drain(&mut rx_a);
	let _rx_b = h.engine.connect(ConnectionId(2), &bob);

	let mut tasks = Vec::new();
	for n in 0..SENDS {
		let engine = Arc::clone(&h.engine);
		let sender = if n % 2 == 0 { alice.clone() } else { bob.clone() };
		let conv = conv.clone();
		tasks.push(tokio::spawn(async move {
			engine.submit(&sender, &conv, text(&format!("m{n}"))).await.map(|_| ())
		}));
	}
	let engine = Arc::clone(&h.engine);
	let (join_conv, bob_id) = (conv.clone(), bob.user_id.clone());
	tasks.push(tokio::spawn(async move {
		engine.join(ConnectionId(2), &bob_id, &join_conv).await.map(|_| ())
	}));
	let engine = Arc::clone(&h.engine);
	let (read_conv, bob_id) = (conv.clone(), bob.user_id.clone());
	tasks.push(tokio::spawn(async move {
		engine.mark_read(&bob_id, &read_conv).await.map(|_| ())
	}));
	for task in tasks {
		task.await.expect("task").expect("operation");
	}

	let stored = h.store.query(&conv, 100, None).await.expect("query");
	assert_eq!(stored.len(), SENDS, "no submit may be lost");
	for pair in stored.windows(2) {
		assert!(pair[0].id < pair[1].id, "ids must increase");
		assert!(pair[0].created_at_ms < pair[1].created_at_ms, "timestamps must increase");
	}

	let received: Vec<MessageId> = drain(&mut rx_a)
		.iter()
		.filter_map(|ev| match ev.as_ref() {
			ServerEvent::ReceiveMessage(m) => Some(m.id),
			_ => None,
		})
		.collect();
	let store_order: Vec<MessageId> = stored.iter().map(|m| m.id).collect();
	assert_eq!(received, store_order, "room sees messages in store order");
}

#[tokio::test]
async fn sequencers_are_released_after_use() {
	let h = harness();
	let alice = ident("A", "Alice");
	let bob = ident("B", "Bob");
	let conv = direct(&h, "A", "B").await;

	let _rx_a = h.engine.connect(ConnectionId(1), &alice);
	h.engine.join(ConnectionId(1), &alice.user_id, &conv).await.expect("join");
	let m = h.engine.submit(&alice, &conv, text("hi")).await.expect("submit");
	h.engine.toggle_reaction(&bob.user_id, &conv, m.id, "👍").await.expect("react");
	h.engine.mark_read(&bob.user_id, &conv).await.expect("mark read");
	assert!(h.engine.submit(&ident("C", "Carol"), &conv, text("no")).await.is_err());

	assert_eq!(h.engine.live_sequencers(), 0);
}

#[tokio::test]
async fn unbounded_page_sizes_do_not_overflow() {
	let h = harness_with(EngineConfig {
		history_limit: usize::MAX,
		max_history_page: usize::MAX,
		max_text_len: 100,
	});
	let alice = ident("A", "Alice");
	let conv = direct(&h, "A", "B").await;
	h.engine.submit(&alice, &conv, text("hi")).await.expect("submit");

	let mut rx_a = h.engine.connect(ConnectionId(1), &alice);
	let report = h.engine.join(ConnectionId(1), &alice.user_id, &conv).await.expect("join");
	assert_eq!(report.history, 1);

	let count = h
		.engine
		.fetch_history(ConnectionId(1), &alice.user_id, &conv, usize::MAX, None)
		.await
		.expect("fetch");
	assert_eq!(count, 1);
	assert!(names(&drain(&mut rx_a)).contains(&"load_history"));
}
