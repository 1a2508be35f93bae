//! Last-synced state per relative path.
//!
//! The ledger is the memory between passes: a path's last synced content
//! hash is what turns "local and remote differ" into "which side moved".
//! It is an in-memory arena with single-writer discipline — every mutation
//! happens under the engine's sync mutex — and can always be rebuilt by
//! re-hashing, so losing it costs a re-download at worst, never data.

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	time::SystemTime,
};

use crate::domain::EntityKind;

/// What we knew about a path after the last time it was synchronized.
#[derive(Debug, Clone)]
pub struct FileRecord {
	/// blake3 hex digest of the content as of the last sync.
	pub hash: String,
	/// Local mtime right after the last sync. Optimization hint only;
	/// hashing remains the ground truth.
	pub mtime: Option<SystemTime>,
	pub remote_id: Option<String>,
	pub kind: EntityKind,
}

#[derive(Debug, Default)]
pub struct SyncLedger {
	records: HashMap<PathBuf, FileRecord>,
}

impl SyncLedger {
	pub fn get(&self, path: &Path) -> Option<&FileRecord> {
		self.records.get(path)
	}

	pub fn last_hash(&self, path: &Path) -> Option<&str> {
		self.records.get(path).map(|record| record.hash.as_str())
	}

	pub fn upsert(&mut self, path: PathBuf, record: FileRecord) {
		self.records.insert(path, record);
	}

	pub fn remove(&mut self, path: &Path) -> Option<FileRecord> {
		self.records.remove(path)
	}

	/// Path currently associated with a remote entity ID.
	pub fn path_for_remote_id(&self, remote_id: &str) -> Option<&Path> {
		self.records
			.iter()
			.find(|(_, record)| record.remote_id.as_deref() == Some(remote_id))
			.map(|(path, _)| path.as_path())
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}
}
