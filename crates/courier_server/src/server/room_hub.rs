#![forbid(unsafe_code)]

use std::sync::Arc;

use courier_domain::ConnectionId;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::server::events::ServerEvent;

/// Per-connection outlets the engine fans events into.
///
/// Every send is a `try_send` on a bounded queue: a slow connection never
/// blocks the sender. Dropped items are counted and reported to the
/// connection as a `Lagged` marker once its queue drains.
#[derive(Debug, Clone)]
pub struct RoomHub {
	outlets: Arc<DashMap<ConnectionId, Outlet>>,
	cfg: RoomHubConfig,
}

#[derive(Debug, Clone)]
pub struct RoomHubConfig {
	/// Maximum number of queued items per connection.
	pub outlet_queue_capacity: usize,

	pub debug_logs: bool,
}

impl Default for RoomHubConfig {
	fn default() -> Self {
		Self {
			outlet_queue_capacity: 256,
			debug_logs: false,
		}
	}
}

/// Items emitted on a connection's outlet.
#[derive(Debug, Clone)]
pub enum HubItem {
	Event(Arc<ServerEvent>),

	/// Items were dropped because the outlet was full.
	Lagged {
		dropped: u64,
	},
}

/// Per-fan-out accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
	pub delivered: usize,
	pub dropped: usize,
}

#[derive(Debug)]
struct Outlet {
	tx: mpsc::Sender<HubItem>,
	pending_lag: u64,
}

enum Push {
	Queued,
	Dropped,
	Closed,
}

impl Outlet {
	fn push(&mut self, item: HubItem) -> Push {
		if self.pending_lag > 0 {
			match self.tx.try_send(HubItem::Lagged {
				dropped: self.pending_lag,
			}) {
				Ok(()) => self.pending_lag = 0,
				Err(mpsc::error::TrySendError::Full(_)) => {
					self.pending_lag = self.pending_lag.saturating_add(1);
					return Push::Dropped;
				}
				Err(mpsc::error::TrySendError::Closed(_)) => return Push::Closed,
			}
		}

		match self.tx.try_send(item) {
			Ok(()) => Push::Queued,
			Err(mpsc::error::TrySendError::Full(_)) => {
				self.pending_lag = self.pending_lag.saturating_add(1);
				Push::Dropped
			}
			Err(mpsc::error::TrySendError::Closed(_)) => Push::Closed,
		}
	}
}

impl RoomHub {
	pub fn new(cfg: RoomHubConfig) -> Self {
		Self {
			outlets: Arc::new(DashMap::new()),
			cfg,
		}
	}

	/// Open an outlet for `conn`, replacing any previous one.
	pub fn register(&self, conn: ConnectionId) -> mpsc::Receiver<HubItem> {
		let (tx, rx) = mpsc::channel(self.cfg.outlet_queue_capacity.max(1));
		self.outlets.insert(conn, Outlet { tx, pending_lag: 0 });

		if self.cfg.debug_logs {
			debug!(%conn, outlets = self.outlets.len(), "room hub: registered");
		}

		rx
	}

	pub fn unregister(&self, conn: ConnectionId) -> bool {
		self.outlets.remove(&conn).is_some()
	}

	/// Queue one event for a single connection.
	pub fn send_to(&self, conn: ConnectionId, event: ServerEvent) -> bool {
		self.fan_out([conn], event).delivered == 1
	}

	/// Queue `event` for every target connection that still has an outlet.
	pub fn fan_out(&self, targets: impl IntoIterator<Item = ConnectionId>, event: ServerEvent) -> FanOut {
		let item = HubItem::Event(Arc::new(event));
		let mut report = FanOut::default();
		let mut closed = Vec::new();

		for conn in targets {
			let Some(mut outlet) = self.outlets.get_mut(&conn) else {
				continue;
			};
			match outlet.push(item.clone()) {
				Push::Queued => report.delivered += 1,
				Push::Dropped => report.dropped += 1,
				Push::Closed => closed.push(conn),
			}
		}

		for conn in closed {
			self.outlets.remove_if(&conn, |_, o| o.tx.is_closed());
		}

		if report.dropped > 0 {
			metrics::counter!("courier_server_hub_dropped_total").increment(report.dropped as u64);
			if self.cfg.debug_logs {
				debug!(dropped = report.dropped, "room hub: dropped due to full outlets");
			}
		}

		report
	}

	pub fn outlet_count(&self) -> usize {
		self.outlets.len()
	}
}
