//! Public facade wiring the engine, the reconciliation loop and the event
//! bus together.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::{
	config::{ConfigStore, ReplicaConfig},
	error::ReplicaError,
	infra::event::{EventBus, SyncEvent},
	remote::RemoteStore,
	service::{
		sync::{SyncEngine, SyncResult},
		watcher::{EchoSuppressor, ReconciliationLoop},
	},
};

/// One local replica of one remote project.
///
/// Construction wires the collaborators; nothing touches the filesystem
/// until [`init`](Self::init) runs. The usual lifecycle is `init` →
/// `sync_from_remote` → `start_watching`, which
/// [`bootstrap`](Self::bootstrap) performs in one call.
pub struct LocalReplica {
	engine: Arc<SyncEngine>,
	watcher: ReconciliationLoop,
	events: Arc<EventBus>,
}

impl LocalReplica {
	pub fn new(remote: Arc<dyn RemoteStore>, config_store: Arc<dyn ConfigStore>) -> Self {
		let events = Arc::new(EventBus::default());
		let suppressor = EchoSuppressor::default();
		let engine = Arc::new(SyncEngine::new(
			remote.clone(),
			config_store,
			events.clone(),
			suppressor.clone(),
		));
		let watcher = ReconciliationLoop::new(engine.clone(), remote, suppressor);

		Self {
			engine,
			watcher,
			events,
		}
	}

	/// Recreate a replica from a previously persisted configuration, if
	/// one exists in the store.
	pub async fn resume(
		remote: Arc<dyn RemoteStore>,
		config_store: Arc<dyn ConfigStore>,
	) -> Result<Self, ReplicaError> {
		let replica = Self::new(remote, config_store.clone());

		if let Some(config) = ReplicaConfig::load(config_store.as_ref()) {
			replica.engine.init(config).await?;
		}

		Ok(replica)
	}

	/// Validate and persist the configuration. Returns `Ok(false)` when
	/// the local directory is not writable.
	pub async fn init(&self, config: ReplicaConfig) -> Result<bool, ReplicaError> {
		self.engine.init(config).await
	}

	/// `init`, one full pull, then continuous watching.
	pub async fn bootstrap(&self, config: ReplicaConfig) -> Result<SyncResult, ReplicaError> {
		if !self.engine.init(config).await? {
			return Err(ReplicaError::RootNotWritable);
		}

		let result = self.engine.sync_from_remote().await;
		if self.is_enabled() {
			self.watcher.start_watching().await?;
		}

		Ok(result)
	}

	pub fn config(&self) -> Option<ReplicaConfig> {
		self.engine.config()
	}

	pub fn is_enabled(&self) -> bool {
		self.engine.is_enabled()
	}

	/// Enable or disable synchronization. Disabling while watching stops
	/// the reconciliation loop as a side effect.
	pub async fn set_enabled(&self, enabled: bool) -> Result<(), ReplicaError> {
		self.engine.set_enabled(enabled)?;

		if !enabled && self.watcher.is_watching() {
			self.watcher.stop_watching();
		}

		Ok(())
	}

	/// Replace the configuration, restarting the reconciliation loop if it
	/// was running.
	pub async fn update_config(&self, config: ReplicaConfig) -> Result<bool, ReplicaError> {
		let was_watching = self.watcher.is_watching();
		if was_watching {
			self.watcher.stop_watching();
		}

		let initialized = self.engine.init(config).await?;

		if initialized && was_watching && self.is_enabled() {
			self.watcher.start_watching().await?;
		}

		Ok(initialized)
	}

	pub async fn sync_from_remote(&self) -> SyncResult {
		self.engine.sync_from_remote().await
	}

	pub async fn sync_to_remote(&self) -> SyncResult {
		self.engine.sync_to_remote().await
	}

	pub async fn start_watching(&self) -> Result<(), ReplicaError> {
		self.watcher.start_watching().await
	}

	pub fn stop_watching(&self) {
		self.watcher.stop_watching();
	}

	pub fn is_watching(&self) -> bool {
		self.watcher.is_watching()
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
		self.events.subscribe()
	}

	/// Stop watching, release subscriptions and silence all listeners.
	/// In-flight passes finish but their results are discarded.
	pub fn dispose(&self) {
		self.watcher.stop_watching();
		self.engine.dispose();
		debug!("Local replica disposed");
	}
}
