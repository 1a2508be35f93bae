//! Continuous bidirectional reconciliation.
//!
//! Two independent event sources feed one drain task: the local filesystem
//! watcher and the remote change subscription. Events are filtered through
//! the ignore rules, coalesced per path over a debounce window, and applied
//! as targeted single-entity syncs through the engine.
//!
//! The engine stamps every write it performs itself into the
//! [`EchoSuppressor`] before touching the disk; watcher events arriving for
//! a suppressed path are dropped. Without this, every pull would fire a
//! local change event and push itself straight back — an infinite loop.

use std::{
	collections::HashMap,
	mem,
	path::{Path, PathBuf},
	pin::pin,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex as StdMutex,
	},
	time::{Duration, Instant},
};

use async_channel as chan;
use futures::StreamExt;
use futures_concurrency::stream::Merge;
use lr_core_ignore_rules::IgnoreFilter;
use notify::{
	event::{AccessKind, AccessMode},
	Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::{spawn, task::JoinHandle, time::MissedTickBehavior};
use tokio_stream::wrappers::{IntervalStream, ReceiverStream};
use tracing::{debug, error, info, trace, warn};

use crate::{
	config::ReplicaConfig,
	error::ReplicaError,
	remote::{RemoteChange, RemoteStore},
	service::sync::SyncEngine,
};

/// Quiet time a path must accumulate before its coalesced change fires.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

/// How long a self-induced write keeps its path muted for watcher events.
pub const ECHO_WINDOW: Duration = Duration::from_secs(2);

const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Time-to-live set of paths the engine is about to touch itself.
///
/// Entries expire on their own, so a crashed write can never mute a path
/// forever.
#[derive(Debug, Clone, Default)]
pub struct EchoSuppressor {
	inner: Arc<StdMutex<HashMap<PathBuf, Instant>>>,
}

impl EchoSuppressor {
	pub fn suppress(&self, path: PathBuf) {
		self.suppress_for(path, ECHO_WINDOW);
	}

	fn suppress_for(&self, path: PathBuf, ttl: Duration) {
		self.lock().insert(path, Instant::now() + ttl);
	}

	pub fn is_suppressed(&self, path: &Path) -> bool {
		let mut map = self.lock();
		match map.get(path) {
			Some(expiry) if *expiry > Instant::now() => true,
			Some(_) => {
				map.remove(path);
				false
			}
			None => false,
		}
	}

	/// Drop expired entries. Called from the drain task's tick.
	pub fn prune(&self) {
		let now = Instant::now();
		self.lock().retain(|_, expiry| *expiry > now);
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Instant>> {
		self.inner
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

enum WatchState {
	Idle,
	Watching {
		// Held so the filesystem watch stays registered; dropped on stop.
		_watcher: RecommendedWatcher,
		stop_tx: chan::Sender<()>,
		_handle: JoinHandle<()>,
	},
}

/// Idle → Watching → Idle. Start is idempotent and a no-op unless the
/// replica is initialized and enabled.
pub struct ReconciliationLoop {
	engine: Arc<SyncEngine>,
	remote: Arc<dyn RemoteStore>,
	suppressor: EchoSuppressor,
	state: StdMutex<WatchState>,
	watching: Arc<AtomicBool>,
}

impl ReconciliationLoop {
	pub fn new(
		engine: Arc<SyncEngine>,
		remote: Arc<dyn RemoteStore>,
		suppressor: EchoSuppressor,
	) -> Self {
		Self {
			engine,
			remote,
			suppressor,
			state: StdMutex::new(WatchState::Idle),
			watching: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn is_watching(&self) -> bool {
		self.watching.load(Ordering::Acquire)
	}

	pub async fn start_watching(&self) -> Result<(), ReplicaError> {
		let Some(config) = self.engine.config() else {
			debug!("Replica not initialized, not starting the reconciliation loop");
			return Ok(());
		};
		if !config.enabled {
			debug!("Replica disabled, not starting the reconciliation loop");
			return Ok(());
		}
		let Some(filter) = self.engine.filter() else {
			return Ok(());
		};

		if self
			.watching
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_err()
		{
			debug!("Reconciliation loop already watching");
			return Ok(());
		}

		match self.spawn_loop(config, filter).await {
			Ok(state) => {
				*self.lock_state() = state;
				Ok(())
			}
			Err(e) => {
				self.watching.store(false, Ordering::Release);
				Err(e)
			}
		}
	}

	async fn spawn_loop(
		&self,
		config: ReplicaConfig,
		filter: IgnoreFilter,
	) -> Result<WatchState, ReplicaError> {
		let (local_tx, local_rx) = chan::unbounded();

		let mut watcher = RecommendedWatcher::new(
			move |result| {
				if !local_tx.is_closed() && local_tx.send_blocking(result).is_err() {
					error!("Unable to deliver filesystem event to the reconciliation loop");
				}
			},
			Config::default(),
		)?;
		watcher.watch(&config.local_root, RecursiveMode::Recursive)?;

		if !self.remote.is_connected(&config.project_id) {
			warn!(
				"Remote project {} is not connected; changes will arrive once the subscription catches up",
				config.project_id
			);
		}
		let remote_rx = self.remote.subscribe_changes(&config.project_id).await?;

		let (stop_tx, stop_rx) = chan::bounded(1);

		info!(
			"Reconciliation loop watching {} for project {}",
			config.local_root.display(),
			config.project_id
		);

		let handle = spawn(drain(
			self.engine.clone(),
			config,
			filter,
			self.suppressor.clone(),
			local_rx,
			remote_rx,
			stop_rx,
			self.watching.clone(),
		));

		Ok(WatchState::Watching {
			_watcher: watcher,
			stop_tx,
			_handle: handle,
		})
	}

	/// Unsubscribe both event sources and return to `Idle`. Safe to call
	/// when not watching.
	pub fn stop_watching(&self) {
		let previous = mem::replace(&mut *self.lock_state(), WatchState::Idle);

		if let WatchState::Watching { stop_tx, .. } = previous {
			let _ = stop_tx.try_send(());
			self.watching.store(false, Ordering::Release);
			info!("Reconciliation loop stopped");
		}
		// The notify watcher is dropped with `previous`, releasing the
		// filesystem watch handles.
	}

	fn lock_state(&self) -> std::sync::MutexGuard<'_, WatchState> {
		self.state
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

/// The drain task: merge both event sources with a periodic tick, coalesce
/// per path, and apply due changes through the engine.
#[allow(clippy::too_many_arguments)]
async fn drain(
	engine: Arc<SyncEngine>,
	config: ReplicaConfig,
	filter: IgnoreFilter,
	suppressor: EchoSuppressor,
	local_rx: chan::Receiver<notify::Result<notify::Event>>,
	remote_rx: tokio::sync::mpsc::Receiver<RemoteChange>,
	stop_rx: chan::Receiver<()>,
	watching: Arc<AtomicBool>,
) {
	enum StreamMessage {
		Local(notify::Result<notify::Event>),
		Remote(RemoteChange),
		Tick,
		Stop,
	}

	let mut pending_local: HashMap<PathBuf, Instant> = HashMap::new();
	let mut pending_remote: HashMap<String, Instant> = HashMap::new();

	let mut tick_interval =
		tokio::time::interval_at(tokio::time::Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
	tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

	let mut msg_stream = pin!((
		local_rx.map(StreamMessage::Local),
		ReceiverStream::new(remote_rx).map(StreamMessage::Remote),
		IntervalStream::new(tick_interval).map(|_| StreamMessage::Tick),
		stop_rx.map(|()| StreamMessage::Stop),
	)
		.merge());

	while let Some(message) = msg_stream.next().await {
		match message {
			StreamMessage::Local(Ok(event)) => {
				if !is_relevant(&event.kind) {
					continue;
				}

				for path in &event.paths {
					if suppressor.is_suppressed(path) {
						trace!("Suppressed self-induced event for {}", path.display());
						continue;
					}

					let Ok(rel) = path.strip_prefix(&config.local_root) else {
						continue;
					};
					if rel.as_os_str().is_empty() || filter.should_ignore(rel) {
						continue;
					}

					trace!("Queued local change {}", rel.display());
					pending_local.insert(rel.to_owned(), Instant::now() + DEBOUNCE_WINDOW);
				}
			}

			StreamMessage::Local(Err(e)) => warn!("Filesystem watcher error: {e}"),

			StreamMessage::Remote(change) => {
				debug!(
					"Remote change {} for entity {}",
					change.change, change.entity_id
				);
				pending_remote.insert(change.entity_id, Instant::now() + DEBOUNCE_WINDOW);
			}

			StreamMessage::Tick => {
				suppressor.prune();
				let now = Instant::now();

				let due = pending_local
					.iter()
					.filter(|(_, deadline)| **deadline <= now)
					.map(|(path, _)| path.clone())
					.collect::<Vec<_>>();
				for rel in due {
					pending_local.remove(&rel);
					debug!("Pushing coalesced local change {}", rel.display());

					let result = engine.push_path(&rel).await;
					for e in &result.errors {
						warn!("Push of {} failed: {e}", rel.display());
					}
				}

				let due = pending_remote
					.iter()
					.filter(|(_, deadline)| **deadline <= now)
					.map(|(id, _)| id.clone())
					.collect::<Vec<_>>();
				for entity_id in due {
					pending_remote.remove(&entity_id);
					debug!("Pulling coalesced remote change {entity_id}");

					let result = engine.pull_remote_entity(&entity_id).await;
					for e in &result.errors {
						warn!("Pull of entity {entity_id} failed: {e}");
					}
				}
			}

			StreamMessage::Stop => {
				debug!("Reconciliation loop received stop signal");
				break;
			}
		}
	}

	watching.store(false, Ordering::Release);
	info!("Reconciliation loop exited");
}

/// Content-affecting event kinds. Everything else (metadata-only access,
/// attribute changes) is noise for replication purposes.
fn is_relevant(kind: &EventKind) -> bool {
	matches!(
		kind,
		EventKind::Create(_)
			| EventKind::Modify(_)
			| EventKind::Remove(_)
			| EventKind::Access(AccessKind::Close(AccessMode::Write))
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn suppressed_paths_are_muted_until_expiry() {
		let suppressor = EchoSuppressor::default();
		let path = PathBuf::from("/replica/main.tex");

		suppressor.suppress(path.clone());
		assert!(suppressor.is_suppressed(&path));
		assert!(!suppressor.is_suppressed(Path::new("/replica/other.tex")));

		suppressor.suppress_for(path.clone(), Duration::ZERO);
		assert!(!suppressor.is_suppressed(&path));
	}

	#[test]
	fn prune_drops_expired_entries() {
		let suppressor = EchoSuppressor::default();
		suppressor.suppress_for(PathBuf::from("/a"), Duration::ZERO);
		suppressor.suppress(PathBuf::from("/b"));

		suppressor.prune();

		assert!(!suppressor.is_suppressed(Path::new("/a")));
		assert!(suppressor.is_suppressed(Path::new("/b")));
	}

	#[test]
	fn relevant_event_kinds() {
		use notify::event::{CreateKind, ModifyKind, RemoveKind};

		assert!(is_relevant(&EventKind::Create(CreateKind::File)));
		assert!(is_relevant(&EventKind::Modify(ModifyKind::Any)));
		assert!(is_relevant(&EventKind::Remove(RemoveKind::File)));
		assert!(is_relevant(&EventKind::Access(AccessKind::Close(
			AccessMode::Write
		))));
		assert!(!is_relevant(&EventKind::Access(AccessKind::Open(
			AccessMode::Read
		))));
		assert!(!is_relevant(&EventKind::Any));
	}
}
