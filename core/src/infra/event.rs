//! Event bus for sync progress and conflict notifications.
//!
//! Emission is fire-and-forget over a broadcast channel: a slow or dropped
//! subscriber can never fail or block the engine. After [`EventBus::close`]
//! every emission becomes a no-op, so listeners registered before disposal
//! never observe results produced after it.

use std::{
	path::PathBuf,
	sync::atomic::{AtomicBool, Ordering},
};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::service::sync::{ConflictInfo, SyncResult};

const DEFAULT_CAPACITY: usize = 256;

/// Everything the engine reports to the embedding application.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SyncEvent {
	/// Emitted after each entity considered during a pass.
	Progress {
		progress: f64,
		current_file: Option<PathBuf>,
		message: String,
	},
	/// Emitted once per finished pass with the final summary.
	Completed { result: SyncResult },
	/// Emitted when a pass fails one of its preconditions.
	Error { error: String },
	/// Emitted for every detected divergence.
	Conflict { info: ConflictInfo },
}

#[derive(Debug)]
pub struct EventBus {
	sender: broadcast::Sender<SyncEvent>,
	closed: AtomicBool,
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY)
	}
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self {
			sender,
			closed: AtomicBool::new(false),
		}
	}

	/// Emit to all current subscribers. Send failures (no subscribers) are
	/// ignored on purpose.
	pub fn emit(&self, event: SyncEvent) {
		if self.closed.load(Ordering::Acquire) {
			trace!("Dropping event emitted after dispose");
			return;
		}

		let _ = self.sender.send(event);
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
		self.sender.subscribe()
	}

	pub fn subscriber_count(&self) -> usize {
		self.sender.receiver_count()
	}

	/// Permanently silence the bus. Used on dispose.
	pub fn close(&self) {
		self.closed.store(true, Ordering::Release);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn emit_reaches_subscribers() {
		let bus = EventBus::default();
		let mut rx = bus.subscribe();

		bus.emit(SyncEvent::Error {
			error: "boom".into(),
		});

		match rx.recv().await.unwrap() {
			SyncEvent::Error { error } => assert_eq!(error, "boom"),
			other => panic!("unexpected event: {other:?}"),
		}
	}

	#[tokio::test]
	async fn emit_without_subscribers_is_fine() {
		let bus = EventBus::default();
		bus.emit(SyncEvent::Error {
			error: "nobody listening".into(),
		});
	}

	#[tokio::test]
	async fn closed_bus_drops_events() {
		let bus = EventBus::default();
		let mut rx = bus.subscribe();

		bus.close();
		bus.emit(SyncEvent::Error {
			error: "late".into(),
		});

		assert!(matches!(
			rx.try_recv(),
			Err(broadcast::error::TryRecvError::Empty)
		));
	}
}
