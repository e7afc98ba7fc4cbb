#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use courier_domain::{ConnectionId, ConversationId, UserId};

use crate::server::presence::PresenceRegistry;

fn user(s: &str) -> UserId {
	UserId::new(s).expect("valid UserId")
}

fn conv(s: &str) -> ConversationId {
	ConversationId::new(s).expect("valid ConversationId")
}

#[test]
fn join_reports_online_set_and_previous_room() {
	let presence = PresenceRegistry::new();
	let (a1, b1) = (ConnectionId(1), ConnectionId(2));
	presence.register(a1, user("A"));
	presence.register(b1, user("B"));

	let first = presence.join(a1, &conv("dm_A_B")).expect("known connection");
	assert_eq!(first.online, BTreeSet::from([user("A")]));
	assert_eq!(first.left, None);

	let second = presence.join(b1, &conv("dm_A_B")).expect("known connection");
	assert_eq!(second.online, BTreeSet::from([user("A"), user("B")]));

	let moved = presence.join(a1, &conv("grp_x")).expect("known connection");
	assert_eq!(moved.left, Some(conv("dm_A_B")));
	assert_eq!(presence.online_set_for(&conv("dm_A_B")), BTreeSet::from([user("B")]));
	assert_eq!(presence.connections_in(&conv("grp_x")), vec![a1]);
}

#[test]
fn rejoining_same_room_leaves_nothing() {
	let presence = PresenceRegistry::new();
	let c = ConnectionId(1);
	presence.register(c, user("A"));

	presence.join(c, &conv("dm_A_B")).expect("join");
	let again = presence.join(c, &conv("dm_A_B")).expect("join");
	assert_eq!(again.left, None);
	assert_eq!(presence.connections_in(&conv("dm_A_B")), vec![c]);
}

#[test]
fn unknown_connection_cannot_join() {
	let presence = PresenceRegistry::new();
	assert!(presence.join(ConnectionId(9), &conv("dm_A_B")).is_none());
	assert!(presence.leave(ConnectionId(9)).is_none());
	assert!(presence.on_disconnect(ConnectionId(9)).is_none());
}

#[test]
fn leave_and_disconnect_are_idempotent() {
	let presence = PresenceRegistry::new();
	let c = ConnectionId(1);
	presence.register(c, user("A"));
	presence.join(c, &conv("dm_A_B")).expect("join");

	assert_eq!(presence.leave(c), Some(conv("dm_A_B")));
	assert_eq!(presence.leave(c), None);
	assert!(presence.online_set_for(&conv("dm_A_B")).is_empty());
	assert!(presence.is_user_reachable(&user("A")), "leaving a room keeps the user online");

	presence.join(c, &conv("dm_A_B")).expect("join");
	assert_eq!(presence.on_disconnect(c), Some(conv("dm_A_B")));
	assert_eq!(presence.on_disconnect(c), None);
	assert!(!presence.is_user_reachable(&user("A")));
	assert_eq!(presence.stats().occupied_rooms, 0);
	assert_eq!(presence.stats().connections, 0);
}

#[test]
fn reachability_spans_all_connections_of_a_user() {
	let presence = PresenceRegistry::new();
	let (phone, laptop) = (ConnectionId(1), ConnectionId(2));
	presence.register(phone, user("A"));
	presence.register(laptop, user("A"));

	presence.join(phone, &conv("dm_A_B")).expect("join");
	assert_eq!(presence.stats().online_users, 1);
	assert_eq!(presence.stats().connections, 2);

	presence.on_disconnect(phone);
	assert!(presence.is_user_reachable(&user("A")));
	assert!(presence.online_set_for(&conv("dm_A_B")).is_empty());

	presence.on_disconnect(laptop);
	assert!(!presence.is_user_reachable(&user("A")));
	assert_eq!(presence.stats().online_users, 0);
}

#[test]
fn excluding_user_skips_all_their_connections() {
	let presence = PresenceRegistry::new();
	let room = conv("grp_1");
	for (id, u) in [(1, "A"), (2, "A"), (3, "B")] {
		presence.register(ConnectionId(id), user(u));
		presence.join(ConnectionId(id), &room).expect("join");
	}

	assert_eq!(presence.connections_in_excluding_user(&room, &user("A")), vec![ConnectionId(3)]);
	assert_eq!(presence.connections_in_excluding_user(&room, &user("B")).len(), 2);
}

#[test]
fn concurrent_joins_and_disconnects_leave_no_residue() {
	let presence = Arc::new(PresenceRegistry::new());
	let rooms = [conv("grp_a"), conv("grp_b"), conv("grp_c")];

	let handles: Vec<_> = (0..8u64)
		.map(|t| {
			let presence = Arc::clone(&presence);
			let rooms = rooms.clone();
			std::thread::spawn(move || {
				for i in 0..200u64 {
					let conn = ConnectionId(t * 1_000 + i);
					presence.register(conn, user(&format!("u{}", i % 5)));
					for room in &rooms {
						presence.join(conn, room).expect("join");
					}
					presence.on_disconnect(conn);
				}
			})
		})
		.collect();
	for h in handles {
		h.join().expect("worker thread");
	}

	let stats = presence.stats();
	assert_eq!(stats.connections, 0);
	assert_eq!(stats.online_users, 0);
	assert_eq!(stats.occupied_rooms, 0);
}
