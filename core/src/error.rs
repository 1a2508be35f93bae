use lr_core_ignore_rules::IgnoreFilterError;
use thiserror::Error;

use crate::{config::ConfigError, infra::fs::LocalFsError, remote::RemoteError};

/// Top level error for fallible replica operations.
///
/// Full sync passes never surface this; their failures are folded into the
/// returned [`SyncResult`](crate::service::sync::SyncResult).
#[derive(Error, Debug)]
pub enum ReplicaError {
	#[error(transparent)]
	Ignore(#[from] IgnoreFilterError),
	#[error(transparent)]
	Fs(#[from] LocalFsError),
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error(transparent)]
	Remote(#[from] RemoteError),
	#[error("filesystem watcher error: {0}")]
	Watcher(#[from] notify::Error),
	#[error("local replica is not initialized")]
	NotInitialized,
	#[error("replica root directory is not writable")]
	RootNotWritable,
}
