#![forbid(unsafe_code)]

use std::sync::Arc;

use courier_domain::{
	Conversation, ConversationId, DomainError, MessageBody, MessageDraft, MessageId, MessageStatus, UserId,
};

use crate::server::store::{InMemoryMessageStore, MessageStore, SqliteMessageStore, StatusChange};

fn user(s: &str) -> UserId {
	UserId::new(s).expect("valid UserId")
}

fn draft(sender: &str, text: &str) -> MessageDraft {
	MessageDraft {
		sender_id: user(sender),
		body: MessageBody::text(text),
	}
}

fn memory() -> Arc<dyn MessageStore> {
	Arc::new(InMemoryMessageStore::new())
}

async fn sqlite() -> Arc<dyn MessageStore> {
	Arc::new(
		SqliteMessageStore::connect("sqlite::memory:")
			.await
			.expect("in-memory sqlite store"),
	)
}

async fn backends() -> Vec<(&'static str, Arc<dyn MessageStore>)> {
	vec![("memory", memory()), ("sqlite", sqlite().await)]
}

async fn direct_ab(store: &Arc<dyn MessageStore>) -> ConversationId {
	let conversation = Conversation::direct(user("A"), user("B"), 1_000).expect("direct conversation");
	let id = conversation.id.clone();
	store.conditional_create(conversation).await.expect("create conversation");
	id
}

#[tokio::test]
async fn conditional_create_keeps_the_first_record() {
	for (backend, store) in backends().await {
		let first = Conversation::direct(user("A"), user("B"), 1).expect("direct");
		let second = Conversation::direct(user("B"), user("A"), 2).expect("direct");
		assert_eq!(first.id, second.id);

		let created = store.conditional_create(first).await.expect("create");
		assert!(created.was_created(), "{backend}");

		let existing = store.conditional_create(second).await.expect("create again");
		assert!(!existing.was_created(), "{backend}");
		assert_eq!(existing.into_conversation().created_at_ms, 1, "{backend}");
	}
}

#[tokio::test]
async fn append_assigns_monotonic_ids_and_timestamps() {
	for (backend, store) in backends().await {
		let id = direct_ab(&store).await;

		let m1 = store.append(&id, draft("A", "one"), 100).await.expect("append");
		let m2 = store.append(&id, draft("B", "two"), 100).await.expect("append");
		let m3 = store.append(&id, draft("A", "three"), 50).await.expect("append");

		assert!(m1.id < m2.id && m2.id < m3.id, "{backend}: ids must increase");
		assert_eq!(
			[m1.created_at_ms, m2.created_at_ms, m3.created_at_ms],
			[100, 101, 102],
			"{backend}: timestamps must be strictly monotonic"
		);
		assert_eq!(m3.status, MessageStatus::Sent, "{backend}");
	}
}

#[tokio::test]
async fn append_updates_summary_and_unread_counts() {
	for (backend, store) in backends().await {
		let id = direct_ab(&store).await;
		let message = store.append(&id, draft("A", "hi"), 5_000).await.expect("append");

		let conversation = store.get_conversation(&id).await.expect("get").expect("exists");
		let last = conversation.last_message.as_ref().expect("summary");
		assert_eq!(last.message_id, message.id, "{backend}");
		assert_eq!(last.preview, "hi", "{backend}");
		assert_eq!(last.sender_id, user("A"), "{backend}");
		assert!(!last.read, "{backend}");
		assert_eq!(conversation.unread_for(&user("B")), 1, "{backend}");
		assert_eq!(conversation.unread_for(&user("A")), 0, "{backend}");
	}
}

#[tokio::test]
async fn append_to_unknown_conversation_is_not_found() {
	for (backend, store) in backends().await {
		let missing = ConversationId::new("dm_X_Y").expect("valid id");
		match store.append(&missing, draft("X", "hi"), 1).await {
			Err(DomainError::NotFound(_)) => {}
			other => panic!("{backend}: expected NotFound, got: {other:?}"),
		}
	}
}

#[tokio::test]
async fn status_only_moves_forward() {
	for (backend, store) in backends().await {
		let id = direct_ab(&store).await;
		let m = store.append(&id, draft("A", "hi"), 1).await.expect("append");

		assert!(store.update_status(&id, m.id, MessageStatus::Delivered).await.expect("update"));
		assert!(!store.update_status(&id, m.id, MessageStatus::Delivered).await.expect("update"));
		assert!(store.update_status(&id, m.id, MessageStatus::Read).await.expect("update"));
		assert!(!store.update_status(&id, m.id, MessageStatus::Delivered).await.expect("update"));
		assert!(!store.update_status(&id, m.id, MessageStatus::Sent).await.expect("update"));

		let stored = store.get_message(&id, m.id).await.expect("get").expect("exists");
		assert_eq!(stored.status, MessageStatus::Read, "{backend}");

		match store.update_status(&id, MessageId(9_999), MessageStatus::Read).await {
			Err(DomainError::NotFound(_)) => {}
			other => panic!("{backend}: expected NotFound, got: {other:?}"),
		}
	}
}

#[tokio::test]
async fn advance_statuses_skips_the_recipients_own_messages() {
	for (backend, store) in backends().await {
		let id = direct_ab(&store).await;
		let m1 = store.append(&id, draft("A", "1"), 1).await.expect("append");
		let _m2 = store.append(&id, draft("B", "2"), 2).await.expect("append");
		let m3 = store.append(&id, draft("A", "3"), 3).await.expect("append");

		let delivered = store
			.advance_statuses(&id, &user("B"), MessageStatus::Delivered)
			.await
			.expect("advance");
		assert_eq!(
			delivered,
			vec![
				StatusChange {
					message_id: m1.id,
					status: MessageStatus::Delivered
				},
				StatusChange {
					message_id: m3.id,
					status: MessageStatus::Delivered
				},
			],
			"{backend}"
		);

		let again = store
			.advance_statuses(&id, &user("B"), MessageStatus::Delivered)
			.await
			.expect("advance");
		assert!(again.is_empty(), "{backend}: repeated advance changes nothing");

		let read = store
			.advance_statuses(&id, &user("B"), MessageStatus::Read)
			.await
			.expect("advance");
		assert_eq!(read.len(), 2, "{backend}");
		assert!(read.iter().all(|c| c.status == MessageStatus::Read), "{backend}");
	}
}

#[tokio::test]
async fn query_pages_newest_window_oldest_first() {
	for (backend, store) in backends().await {
		let id = direct_ab(&store).await;
		let mut ids = Vec::new();
		for n in 0..5 {
			let m = store.append(&id, draft("A", &format!("m{n}")), n).await.expect("append");
			ids.push(m.id);
		}

		let latest: Vec<_> = store.query(&id, 2, None).await.expect("query").iter().map(|m| m.id).collect();
		assert_eq!(latest, ids[3..5].to_vec(), "{backend}");

		let older: Vec<_> = store
			.query(&id, 2, Some(ids[3]))
			.await
			.expect("query")
			.iter()
			.map(|m| m.id)
			.collect();
		assert_eq!(older, ids[1..3].to_vec(), "{backend}");

		assert!(store.query(&id, 10, Some(ids[0])).await.expect("query").is_empty(), "{backend}");
	}
}

#[tokio::test]
async fn read_markers_follow_the_last_sender() {
	for (backend, store) in backends().await {
		let id = direct_ab(&store).await;
		store.append(&id, draft("A", "hi"), 1).await.expect("append");

		assert!(!store.mark_last_message_read(&id, &user("A")).await.expect("mark"), "{backend}");
		assert!(store.mark_last_message_read(&id, &user("B")).await.expect("mark"), "{backend}");
		assert!(!store.mark_last_message_read(&id, &user("B")).await.expect("mark"), "{backend}");

		store.reset_unread(&id, &user("B")).await.expect("reset");
		let conversation = store.get_conversation(&id).await.expect("get").expect("exists");
		assert_eq!(conversation.unread_for(&user("B")), 0, "{backend}");
		assert!(conversation.last_message.expect("summary").read, "{backend}");
	}
}

#[tokio::test]
async fn edit_and_soft_delete_refresh_the_summary() {
	for (backend, store) in backends().await {
		let id = direct_ab(&store).await;
		let m = store.append(&id, draft("A", "helo"), 1).await.expect("append");

		let edited = store.edit_text(&id, m.id, "hello").await.expect("edit");
		assert!(edited.edited, "{backend}");
		assert_eq!(edited.body.as_text(), Some("hello"), "{backend}");
		let summary = store.get_conversation(&id).await.expect("get").expect("exists").last_message;
		assert_eq!(summary.expect("summary").preview, "hello", "{backend}");

		let deleted = store.soft_delete(&id, m.id).await.expect("delete").expect("first delete");
		assert!(deleted.deleted, "{backend}");
		assert_eq!(deleted.body.as_text(), Some(""), "{backend}");
		assert!(store.soft_delete(&id, m.id).await.expect("delete").is_none(), "{backend}");

		let summary = store.get_conversation(&id).await.expect("get").expect("exists").last_message;
		assert_eq!(summary.expect("summary").preview, "Message deleted", "{backend}");
	}
}

#[tokio::test]
async fn non_text_messages_cannot_be_edited() {
	for (backend, store) in backends().await {
		let id = direct_ab(&store).await;
		let image = MessageDraft {
			sender_id: user("A"),
			body: MessageBody::Image {
				url: "https://cdn.example/cat.png".into(),
				caption: None,
			},
		};
		let m = store.append(&id, image, 1).await.expect("append");

		match store.edit_text(&id, m.id, "nope").await {
			Err(DomainError::InvalidArgument(_)) => {}
			other => panic!("{backend}: expected InvalidArgument, got: {other:?}"),
		}
	}
}

#[tokio::test]
async fn reaction_toggle_twice_restores_state() {
	for (backend, store) in backends().await {
		let id = direct_ab(&store).await;
		let m = store.append(&id, draft("A", "hi"), 1).await.expect("append");
		let before = store.get_message(&id, m.id).await.expect("get").expect("exists").reactions;

		let once = store.toggle_reaction(&id, m.id, "👍", &user("B")).await.expect("toggle");
		assert!(once.reactions["👍"].contains(&user("B")), "{backend}");

		let both = store.toggle_reaction(&id, m.id, "👍", &user("A")).await.expect("toggle");
		assert_eq!(both.reactions["👍"].len(), 2, "{backend}");

		store.toggle_reaction(&id, m.id, "👍", &user("A")).await.expect("toggle");
		let twice = store.toggle_reaction(&id, m.id, "👍", &user("B")).await.expect("toggle");
		assert_eq!(twice.reactions, before, "{backend}");
	}
}

#[tokio::test]
async fn soft_delete_clears_reactions() {
	for (backend, store) in backends().await {
		let id = direct_ab(&store).await;
		let m = store.append(&id, draft("A", "hi"), 1).await.expect("append");
		store.toggle_reaction(&id, m.id, "🎉", &user("B")).await.expect("toggle");

		store.soft_delete(&id, m.id).await.expect("delete");
		let stored = store.get_message(&id, m.id).await.expect("get").expect("exists");
		assert!(stored.reactions.is_empty(), "{backend}");
		assert!(stored.deleted, "{backend}");
	}
}

#[tokio::test]
async fn participants_are_append_only_for_groups() {
	for (backend, store) in backends().await {
		let group_id = ConversationId::new("grp_test").expect("valid id");
		let group = Conversation::group(group_id.clone(), user("A"), [user("B")], Some("team".into()), 1).expect("group");
		store.conditional_create(group).await.expect("create");

		let grown = store
			.add_participants(&group_id, &[user("C"), user("B")])
			.await
			.expect("add");
		assert_eq!(grown.participants.len(), 3, "{backend}");
		assert_eq!(grown.unread_for(&user("C")), 0, "{backend}");

		let reloaded = store.get_conversation(&group_id).await.expect("get").expect("exists");
		assert!(reloaded.is_participant(&user("C")), "{backend}");
		assert_eq!(reloaded.name.as_deref(), Some("team"), "{backend}");

		let direct = direct_ab(&store).await;
		match store.add_participants(&direct, &[user("C")]).await {
			Err(DomainError::InvalidArgument(_)) => {}
			other => panic!("{backend}: expected InvalidArgument, got: {other:?}"),
		}
	}
}
