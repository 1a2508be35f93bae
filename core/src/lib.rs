//! Local Replica synchronization engine.
//!
//! Keeps a local filesystem directory consistent with a remote hierarchical
//! document project (nested folders, text documents and binary files
//! addressed by opaque IDs), in both directions.
//!
//! The engine is handed its collaborators instead of owning transports: a
//! [`remote::RemoteStore`] implementation for the remote side and a
//! [`config::ConfigStore`] for persistence. A full pull
//! ([`LocalReplica::sync_from_remote`]) or push
//! ([`LocalReplica::sync_to_remote`]) walks the whole non-ignored tree;
//! after the initial pass the reconciliation loop
//! ([`LocalReplica::start_watching`]) applies targeted single-entity syncs
//! driven by filesystem events and remote change notifications, with echo
//! suppression so the loop never feeds on its own writes.
//!
//! Divergence is detected by comparing blake3 content hashes against the
//! last synced state; conflicting simultaneous edits are reported through
//! [`SyncEvent::Conflict`] and in [`SyncResult::conflicts`], never merged
//! automatically.

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod remote;
pub mod service;

mod replica;

// Re-exported so embedders don't need a direct dependency for rule types.
pub use lr_core_ignore_rules as ignore_rules;

pub use config::{ConfigStore, JsonConfigStore, MemoryConfigStore, ReplicaConfig, ReplicaSettings};
pub use error::ReplicaError;
pub use infra::event::SyncEvent;
pub use replica::LocalReplica;
pub use service::sync::{
	conflict::{ConflictInfo, SyncStatus},
	SyncResult,
};
