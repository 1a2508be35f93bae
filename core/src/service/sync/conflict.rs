//! Hash based divergence classification.
//!
//! Modification times are unreliable across the two storage systems (the
//! remote store may not report them at all), so the last-synced content
//! hash is the ground truth for deciding which side moved.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// blake3 digest of content, rendered as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
	blake3::hash(bytes).to_hex().to_string()
}

/// Relation of a path's local and remote content to the last synced state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
	/// Neither side diverged; nothing to do.
	Unchanged,
	/// Only the remote side diverged; safe to pull.
	RemoteNewer,
	/// Only the local side diverged; safe to push.
	LocalNewer,
	/// Both sides diverged to different content. Reported, never merged.
	Conflict,
}

/// Classify a path given the last synced hash and whatever content is
/// available on each side. `None` content means the side has no entry for
/// the path (absent file, unresolvable entity).
pub fn classify(
	last_hash: Option<&str>,
	local: Option<&[u8]>,
	remote: Option<&[u8]>,
) -> SyncStatus {
	let local_hash = local.map(content_hash);
	let remote_hash = remote.map(content_hash);

	match last_hash {
		Some(last) => {
			let local_changed = local_hash.as_deref() != Some(last);
			let remote_changed = remote_hash.as_deref() != Some(last);

			match (local_changed, remote_changed) {
				(false, false) => SyncStatus::Unchanged,
				(false, true) => SyncStatus::RemoteNewer,
				(true, false) => SyncStatus::LocalNewer,
				// Both moved to the same content: converged on their own.
				(true, true) if local_hash == remote_hash => SyncStatus::Unchanged,
				(true, true) => SyncStatus::Conflict,
			}
		}
		// Never synced before: whichever side has content is "newer".
		None => match (&local_hash, &remote_hash) {
			(None, None) => SyncStatus::Unchanged,
			(None, Some(_)) => SyncStatus::RemoteNewer,
			(Some(_), None) => SyncStatus::LocalNewer,
			(Some(local), Some(remote)) if local == remote => SyncStatus::Unchanged,
			(Some(_), Some(_)) => SyncStatus::Conflict,
		},
	}
}

/// One detected divergence, emitted through the event bus.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictInfo {
	pub path: PathBuf,
	pub local_hash: String,
	pub remote_hash: String,
	pub local_mtime: Option<DateTime<Utc>>,
	pub remote_mtime: Option<DateTime<Utc>>,
	pub detected_at: DateTime<Utc>,
}

impl ConflictInfo {
	pub fn new(
		path: &Path,
		local: &[u8],
		remote: &[u8],
		local_mtime: Option<DateTime<Utc>>,
	) -> Self {
		Self {
			path: path.to_owned(),
			local_hash: content_hash(local),
			remote_hash: content_hash(remote),
			local_mtime,
			// The remote store does not expose per-entity timestamps.
			remote_mtime: None,
			detected_at: Utc::now(),
		}
	}
}
