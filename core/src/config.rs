//! Replica configuration and its persistence contracts.
//!
//! The engine never reaches for process-wide configuration state; it is
//! handed a [`ConfigStore`] at construction and talks only to that handle.

use std::{
	collections::BTreeMap,
	io,
	path::{Path, PathBuf},
	sync::Mutex,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Key under which the replica configuration document is persisted.
pub const CONFIG_KEY: &str = "local_replica";

/// Hidden settings marker written directly under the replica root.
pub const SETTINGS_FILE_NAME: &str = ".replica.json";

const SETTINGS_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("config serialization error: {0}")]
	Serde(#[from] serde_json::Error),
	#[error("config I/O error at {}: {source}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

/// Identifies one remote project and the local directory replicating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
	pub project_id: String,
	pub project_name: String,
	pub local_root: PathBuf,
	pub enabled: bool,
	/// Custom glob patterns appended to the default ignore set. They can
	/// only extend the defaults, never replace them.
	#[serde(default)]
	pub ignore_patterns: Vec<String>,
}

impl ReplicaConfig {
	pub fn new(
		project_id: impl Into<String>,
		project_name: impl Into<String>,
		local_root: impl Into<PathBuf>,
	) -> Self {
		Self {
			project_id: project_id.into(),
			project_name: project_name.into(),
			local_root: local_root.into(),
			enabled: true,
			ignore_patterns: Vec::new(),
		}
	}

	/// Load the persisted configuration, if any.
	pub fn load(store: &dyn ConfigStore) -> Option<Self> {
		let value = store.get(CONFIG_KEY)?;
		match serde_json::from_value(value) {
			Ok(config) => Some(config),
			Err(e) => {
				debug!("Ignoring unparseable persisted replica config: {e}");
				None
			}
		}
	}

	pub fn persist(&self, store: &dyn ConfigStore) -> Result<(), ConfigError> {
		store.set(CONFIG_KEY, serde_json::to_value(self)?)
	}
}

/// Injected key/value configuration handle.
pub trait ConfigStore: Send + Sync {
	fn get(&self, key: &str) -> Option<serde_json::Value>;
	fn set(&self, key: &str, value: serde_json::Value) -> Result<(), ConfigError>;
}

/// JSON-document backed store. The whole document is rewritten through a
/// temp file + rename on every `set`, so readers never observe a partial
/// document.
#[derive(Debug)]
pub struct JsonConfigStore {
	path: PathBuf,
	state: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl JsonConfigStore {
	pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
		let path = path.into();
		let state = match std::fs::read(&path) {
			Ok(bytes) => serde_json::from_slice(&bytes)?,
			Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
			Err(source) => return Err(ConfigError::Io { path, source }),
		};

		Ok(Self {
			path,
			state: Mutex::new(state),
		})
	}

	fn flush(&self, state: &BTreeMap<String, serde_json::Value>) -> Result<(), ConfigError> {
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
				path: parent.to_owned(),
				source,
			})?;
		}

		let tmp = self.path.with_extension("json.tmp");
		let bytes = serde_json::to_vec_pretty(state)?;

		std::fs::write(&tmp, bytes).map_err(|source| ConfigError::Io {
			path: tmp.clone(),
			source,
		})?;
		std::fs::rename(&tmp, &self.path).map_err(|source| ConfigError::Io {
			path: self.path.clone(),
			source,
		})
	}
}

impl ConfigStore for JsonConfigStore {
	fn get(&self, key: &str) -> Option<serde_json::Value> {
		self.state
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.get(key)
			.cloned()
	}

	fn set(&self, key: &str, value: serde_json::Value) -> Result<(), ConfigError> {
		let mut state = self
			.state
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner());
		state.insert(key.to_string(), value);
		self.flush(&state)
	}
}

/// In-memory store for tests and ephemeral embedding.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
	state: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl ConfigStore for MemoryConfigStore {
	fn get(&self, key: &str) -> Option<serde_json::Value> {
		self.state
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.get(key)
			.cloned()
	}

	fn set(&self, key: &str, value: serde_json::Value) -> Result<(), ConfigError> {
		self.state
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.insert(key.to_string(), value);
		Ok(())
	}
}

/// On-disk marker identifying which remote project a directory replicates.
///
/// Written on `init` and refreshed after each completed pass. Dot-prefixed,
/// so the default ignore rules keep it out of synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaSettings {
	pub version: u32,
	pub project_id: String,
	pub project_name: String,
	pub created_at: DateTime<Utc>,
	pub last_synced_at: Option<DateTime<Utc>>,
}

impl ReplicaSettings {
	pub fn new(project_id: impl Into<String>, project_name: impl Into<String>) -> Self {
		Self {
			version: SETTINGS_VERSION,
			project_id: project_id.into(),
			project_name: project_name.into(),
			created_at: Utc::now(),
			last_synced_at: None,
		}
	}

	pub async fn load(root: &Path) -> Result<Option<Self>, ConfigError> {
		let path = root.join(SETTINGS_FILE_NAME);
		match tokio::fs::read(&path).await {
			Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(source) => Err(ConfigError::Io { path, source }),
		}
	}

	pub async fn save(&self, root: &Path) -> Result<(), ConfigError> {
		let path = root.join(SETTINGS_FILE_NAME);
		let tmp = root.join(format!("{SETTINGS_FILE_NAME}.tmp"));
		let bytes = serde_json::to_vec_pretty(self)?;

		tokio::fs::write(&tmp, bytes)
			.await
			.map_err(|source| ConfigError::Io {
				path: tmp.clone(),
				source,
			})?;
		tokio::fs::rename(&tmp, &path)
			.await
			.map_err(|source| ConfigError::Io { path, source })
	}

	pub fn touch_synced(&mut self) {
		self.last_synced_at = Some(Utc::now());
	}
}
