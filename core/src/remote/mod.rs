//! Remote store collaborator traits.
//!
//! The engine never talks to a transport directly; it is handed an
//! implementation of these traits. Two return conventions matter for
//! accounting: `Ok(None)` means the remote store cannot resolve an entity
//! that the tree claimed to exist (the caller records a skip), while `Err`
//! is a transport failure (the caller records an error).

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::{EntityKind, ProjectTree};

#[derive(Error, Debug)]
pub enum RemoteError {
	#[error("remote transport failure: {0}")]
	Transport(String),
	#[error("remote store rejected the request: {0}")]
	Rejected(String),
	#[error("not connected to remote project {0}")]
	NotConnected(String),
}

/// One change observed on the remote side, delivered through the
/// subscription channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteChange {
	pub entity_id: String,
	pub kind: EntityKind,
	pub change: RemoteChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteChangeKind {
	Created,
	Updated,
	Deleted,
}

impl fmt::Display for RemoteChangeKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Created => write!(f, "created"),
			Self::Updated => write!(f, "updated"),
			Self::Deleted => write!(f, "deleted"),
		}
	}
}

/// Structure and change-notification side of the remote store.
#[async_trait]
pub trait ProjectTreeProvider: Send + Sync {
	/// Snapshot of the project tree, or `Ok(None)` if the project is
	/// unknown to the remote store.
	async fn get_project_tree(&self, project_id: &str)
		-> Result<Option<ProjectTree>, RemoteError>;

	/// Subscribe to remote change notifications for the project. Dropping
	/// the receiver unsubscribes.
	async fn subscribe_changes(
		&self,
		project_id: &str,
	) -> Result<mpsc::Receiver<RemoteChange>, RemoteError>;

	fn is_connected(&self, project_id: &str) -> bool;
}

/// Content side of the remote store.
#[async_trait]
pub trait ContentProvider: Send + Sync {
	async fn get_doc(
		&self,
		project_id: &str,
		doc_id: &str,
	) -> Result<Option<String>, RemoteError>;

	async fn download_file(
		&self,
		project_id: &str,
		file_id: &str,
	) -> Result<Option<Vec<u8>>, RemoteError>;

	/// Create a text document under `parent_id`; returns the new entity ID.
	async fn create_doc(
		&self,
		project_id: &str,
		parent_id: &str,
		name: &str,
		content: &str,
	) -> Result<String, RemoteError>;

	/// Create a folder under `parent_id`; returns the new entity ID.
	async fn create_folder(
		&self,
		project_id: &str,
		parent_id: &str,
		name: &str,
	) -> Result<String, RemoteError>;

	/// Upload a binary file under `parent_id`, replacing any entity with the
	/// same name; returns the entity ID.
	async fn upload_file(
		&self,
		project_id: &str,
		parent_id: &str,
		name: &str,
		bytes: &[u8],
	) -> Result<String, RemoteError>;

	async fn update_doc(
		&self,
		project_id: &str,
		doc_id: &str,
		content: &str,
	) -> Result<(), RemoteError>;

	async fn rename_entity(
		&self,
		project_id: &str,
		entity_id: &str,
		new_name: &str,
	) -> Result<(), RemoteError>;

	async fn move_entity(
		&self,
		project_id: &str,
		entity_id: &str,
		new_parent_id: &str,
	) -> Result<(), RemoteError>;

	async fn delete_entity(&self, project_id: &str, entity_id: &str) -> Result<(), RemoteError>;
}

/// Full remote store seam consumed by the engine.
pub trait RemoteStore: ProjectTreeProvider + ContentProvider {}

impl<T: ProjectTreeProvider + ContentProvider> RemoteStore for T {}
