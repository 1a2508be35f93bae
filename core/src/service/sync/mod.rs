//! Directional synchronization passes.
//!
//! A full pass walks either the remote tree snapshot (pull) or the local
//! directory (push) and reconciles every non-ignored doc/file through the
//! hash based classifier. All passes and the reconciliation loop's targeted
//! single-entity syncs serialize on one mutex, so a pass always observes
//! the fully completed state of the previous one.
//!
//! Nothing escapes a pass as an error: every failure is folded into the
//! returned [`SyncResult`] and/or emitted as an event.

pub mod conflict;
pub mod ledger;

use std::{
	collections::HashMap,
	path::{Component, Path, PathBuf},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, RwLock,
	},
};

use chrono::{DateTime, Utc};
use lr_core_ignore_rules::IgnoreFilter;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::{
	config::{ConfigStore, ReplicaConfig, ReplicaSettings},
	domain::{EntityKind, EntityRef, PathMapper, ProjectTree},
	error::ReplicaError,
	infra::{
		event::{EventBus, SyncEvent},
		fs::LocalFs,
	},
	remote::RemoteStore,
	service::watcher::EchoSuppressor,
};

pub use conflict::{ConflictInfo, SyncStatus};

use conflict::{classify, content_hash};
use ledger::{FileRecord, SyncLedger};

const NO_CONFIG: &str = "No local replica is configured";
const DISABLED: &str = "Local replica sync is disabled";
const DISPOSED: &str = "Local replica has been disposed";
const NO_REMOTE_TREE: &str = "Unable to get remote project details";

/// Extensions treated as text documents when pushing new entities; anything
/// else is uploaded as a binary file.
const TEXT_EXTENSIONS: &[&str] = &[
	"bib", "bst", "cls", "csv", "md", "sty", "tex", "txt", "typ", "xml",
];

/// Immutable summary of one sync pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
	pub synced: usize,
	pub skipped: usize,
	pub errors: Vec<String>,
	pub conflicts: Vec<PathBuf>,
}

impl SyncResult {
	fn failure(message: impl Into<String>) -> Self {
		Self {
			errors: vec![message.into()],
			..Self::default()
		}
	}
}

/// Everything derived from one `init` call.
#[derive(Clone)]
struct Session {
	config: ReplicaConfig,
	filter: IgnoreFilter,
	fs: LocalFs,
}

/// Orchestrates directional sync passes over the remote store and the
/// local filesystem.
pub struct SyncEngine {
	remote: Arc<dyn RemoteStore>,
	config_store: Arc<dyn ConfigStore>,
	events: Arc<EventBus>,
	suppressor: EchoSuppressor,
	session: RwLock<Option<Session>>,
	/// Serializes full passes and targeted single-entity syncs.
	sync_guard: Mutex<()>,
	ledger: Mutex<SyncLedger>,
	disposed: AtomicBool,
}

impl SyncEngine {
	pub fn new(
		remote: Arc<dyn RemoteStore>,
		config_store: Arc<dyn ConfigStore>,
		events: Arc<EventBus>,
		suppressor: EchoSuppressor,
	) -> Self {
		Self {
			remote,
			config_store,
			events,
			suppressor,
			session: RwLock::new(None),
			sync_guard: Mutex::new(()),
			ledger: Mutex::new(SyncLedger::default()),
			disposed: AtomicBool::new(false),
		}
	}

	/// Validate the local directory, probe write permission and persist the
	/// configuration. Returns `Ok(false)` when the directory is not
	/// writable, without touching the persisted configuration.
	pub async fn init(&self, config: ReplicaConfig) -> Result<bool, ReplicaError> {
		let filter = IgnoreFilter::new(&config.ignore_patterns)?;
		let fs = LocalFs::new(&config.local_root);

		fs.ensure_root().await?;
		if !fs.probe_writable().await {
			return Ok(false);
		}

		let mut settings = match ReplicaSettings::load(fs.root()).await? {
			Some(existing) => existing,
			None => ReplicaSettings::new(&config.project_id, &config.project_name),
		};
		settings.project_id = config.project_id.clone();
		settings.project_name = config.project_name.clone();
		settings.save(fs.root()).await?;

		config.persist(self.config_store.as_ref())?;

		info!(
			"Initialized local replica for project {} at {}",
			config.project_id,
			config.local_root.display()
		);

		*self.write_session() = Some(Session { config, filter, fs });
		Ok(true)
	}

	pub fn config(&self) -> Option<ReplicaConfig> {
		self.read_session().as_ref().map(|s| s.config.clone())
	}

	pub fn is_enabled(&self) -> bool {
		self.read_session()
			.as_ref()
			.map(|s| s.config.enabled)
			.unwrap_or(false)
	}

	pub fn set_enabled(&self, enabled: bool) -> Result<(), ReplicaError> {
		let mut guard = self.write_session();
		let session = guard.as_mut().ok_or(ReplicaError::NotInitialized)?;

		if session.config.enabled != enabled {
			session.config.enabled = enabled;
			session.config.persist(self.config_store.as_ref())?;
			info!(
				"Local replica sync {}",
				if enabled { "enabled" } else { "disabled" }
			);
		}

		Ok(())
	}

	/// Pull the whole remote tree into the local directory.
	pub async fn sync_from_remote(&self) -> SyncResult {
		let _guard = self.sync_guard.lock().await;

		let Some(session) = self.current_session() else {
			return self.fail(NO_CONFIG);
		};
		if !session.config.enabled {
			return self.fail(DISABLED);
		}
		if self.disposed.load(Ordering::Acquire) {
			return SyncResult::failure(DISPOSED);
		}

		info!(
			"Starting sync from remote for project {}",
			session.config.project_id
		);

		let Some(tree) = self.fetch_tree(&session).await else {
			return self.fail(NO_REMOTE_TREE);
		};

		let entries = PathMapper::walk(&tree);
		let total = entries
			.iter()
			.filter(|(path, entity)| {
				!matches!(entity, EntityRef::Folder(_)) && !session.filter.should_ignore(path)
			})
			.count();

		let mut result = SyncResult::default();
		let mut seen = 0usize;

		for (rel, entity) in &entries {
			if session.filter.should_ignore(rel) {
				trace!("Ignoring {}", rel.display());
				continue;
			}

			match entity {
				EntityRef::Folder(_) => {
					self.suppressor.suppress(session.fs.root().join(rel));
					if let Err(e) = session.fs.ensure_dir(rel).await {
						result
							.errors
							.push(format!("Failed to create directory {}: {e}", rel.display()));
					}
				}
				EntityRef::Doc(doc) => {
					self.pull_one(&session, rel, &doc.id, EntityKind::Doc, &mut result)
						.await;
					seen += 1;
					self.emit_progress(seen, total, rel);
				}
				EntityRef::File(file) => {
					self.pull_one(&session, rel, &file.id, EntityKind::File, &mut result)
						.await;
					seen += 1;
					self.emit_progress(seen, total, rel);
				}
			}
		}

		self.finish_pass(&session, "sync from remote", result).await
	}

	/// Push the whole local directory into the remote project.
	pub async fn sync_to_remote(&self) -> SyncResult {
		let _guard = self.sync_guard.lock().await;

		let Some(session) = self.current_session() else {
			return self.fail(NO_CONFIG);
		};
		if !session.config.enabled {
			return self.fail(DISABLED);
		}
		if self.disposed.load(Ordering::Acquire) {
			return SyncResult::failure(DISPOSED);
		}

		info!(
			"Starting sync to remote for project {}",
			session.config.project_id
		);

		let Some(tree) = self.fetch_tree(&session).await else {
			return self.fail(NO_REMOTE_TREE);
		};

		let files = match session.fs.list_files().await {
			Ok(files) => files,
			Err(e) => return self.fail(&format!("Unable to list local files: {e}")),
		};
		let files = files
			.into_iter()
			.filter(|path| !session.filter.should_ignore(path))
			.collect::<Vec<_>>();
		let total = files.len();

		let mut folders = seed_folder_cache(&tree);
		let mut result = SyncResult::default();

		for (index, rel) in files.iter().enumerate() {
			self.push_one(&session, &tree, &mut folders, rel, &mut result)
				.await;
			self.emit_progress(index + 1, total, rel);
		}

		self.finish_pass(&session, "sync to remote", result).await
	}

	/// Targeted pull of a single remote entity, used by the reconciliation
	/// loop. An entity that vanished from the tree prunes its local
	/// counterpart.
	pub async fn pull_remote_entity(&self, entity_id: &str) -> SyncResult {
		let _guard = self.sync_guard.lock().await;

		let Some(session) = self.current_session() else {
			return SyncResult::failure(NO_CONFIG);
		};
		if !session.config.enabled || self.disposed.load(Ordering::Acquire) {
			return SyncResult::default();
		}

		let Some(tree) = self.fetch_tree(&session).await else {
			return SyncResult::failure(NO_REMOTE_TREE);
		};

		let mut result = SyncResult::default();

		match PathMapper::entity_by_id(&tree, entity_id) {
			Some((rel, entity)) => {
				if session.filter.should_ignore(&rel) {
					trace!("Ignoring remote change for {}", rel.display());
					return result;
				}

				match entity {
					EntityRef::Folder(_) => {
						self.suppressor.suppress(session.fs.root().join(&rel));
						if let Err(e) = session.fs.ensure_dir(&rel).await {
							result.errors.push(format!(
								"Failed to create directory {}: {e}",
								rel.display()
							));
						}
					}
					EntityRef::Doc(_) => {
						self.pull_one(&session, &rel, entity_id, EntityKind::Doc, &mut result)
							.await;
					}
					EntityRef::File(_) => {
						self.pull_one(&session, &rel, entity_id, EntityKind::File, &mut result)
							.await;
					}
				}
			}
			None => {
				let known_path = {
					let ledger = self.ledger.lock().await;
					ledger.path_for_remote_id(entity_id).map(Path::to_owned)
				};

				match known_path {
					Some(path) if !session.filter.should_ignore(&path) => {
						self.suppressor.suppress(session.fs.root().join(&path));
						match session.fs.remove(&path).await {
							Ok(()) => {
								self.ledger.lock().await.remove(&path);
								info!("Removed {} (deleted remotely)", path.display());
								result.synced += 1;
							}
							Err(e) => result
								.errors
								.push(format!("Failed to remove {}: {e}", path.display())),
						}
					}
					_ => result.skipped += 1,
				}
			}
		}

		result
	}

	/// Targeted push of a single local path, used by the reconciliation
	/// loop. A path that no longer exists locally deletes its known remote
	/// counterpart.
	pub async fn push_path(&self, rel: &Path) -> SyncResult {
		let _guard = self.sync_guard.lock().await;

		let Some(session) = self.current_session() else {
			return SyncResult::failure(NO_CONFIG);
		};
		if !session.config.enabled || self.disposed.load(Ordering::Acquire) {
			return SyncResult::default();
		}
		if session.filter.should_ignore(rel) {
			return SyncResult::default();
		}

		// Directories are only materialized remotely when files under them
		// are pushed.
		if let Ok(true) = session.fs.is_dir(rel).await {
			return SyncResult::default();
		}

		let Some(tree) = self.fetch_tree(&session).await else {
			return SyncResult::failure(NO_REMOTE_TREE);
		};

		let mut folders = seed_folder_cache(&tree);
		let mut result = SyncResult::default();
		self.push_one(&session, &tree, &mut folders, rel, &mut result)
			.await;
		result
	}

	/// Silence the engine. In-flight passes finish their walk but their
	/// results are no longer delivered to listeners.
	pub fn dispose(&self) {
		self.disposed.store(true, Ordering::Release);
		self.events.close();
		debug!("Sync engine disposed");
	}

	pub(crate) fn filter(&self) -> Option<IgnoreFilter> {
		self.read_session().as_ref().map(|s| s.filter.clone())
	}

	// Internals

	fn read_session(&self) -> std::sync::RwLockReadGuard<'_, Option<Session>> {
		self.session
			.read()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn write_session(&self) -> std::sync::RwLockWriteGuard<'_, Option<Session>> {
		self.session
			.write()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn current_session(&self) -> Option<Session> {
		self.read_session().clone()
	}

	fn fail(&self, message: &str) -> SyncResult {
		warn!("Sync pass failed: {message}");
		self.events.emit(SyncEvent::Error {
			error: message.to_string(),
		});
		SyncResult::failure(message)
	}

	async fn fetch_tree(&self, session: &Session) -> Option<ProjectTree> {
		match self
			.remote
			.get_project_tree(&session.config.project_id)
			.await
		{
			Ok(Some(tree)) => Some(tree),
			Ok(None) => None,
			Err(e) => {
				error!(
					"Failed to fetch project tree for {}: {e}",
					session.config.project_id
				);
				None
			}
		}
	}

	fn emit_progress(&self, seen: usize, total: usize, rel: &Path) {
		self.events.emit(SyncEvent::Progress {
			progress: seen as f64 / total.max(1) as f64,
			current_file: Some(rel.to_owned()),
			message: format!("Processed {}", rel.display()),
		});
	}

	async fn finish_pass(
		&self,
		session: &Session,
		label: &str,
		result: SyncResult,
	) -> SyncResult {
		match ReplicaSettings::load(session.fs.root()).await {
			Ok(Some(mut settings)) => {
				settings.touch_synced();
				if let Err(e) = settings.save(session.fs.root()).await {
					warn!("Failed to refresh replica settings marker: {e}");
				}
			}
			Ok(None) => {}
			Err(e) => warn!("Failed to read replica settings marker: {e}"),
		}

		info!(
			"Completed {label}: {} synced, {} skipped, {} errors, {} conflicts",
			result.synced,
			result.skipped,
			result.errors.len(),
			result.conflicts.len()
		);

		self.events.emit(SyncEvent::Completed {
			result: result.clone(),
		});
		result
	}

	/// Reconcile one remote doc/file into the local tree.
	async fn pull_one(
		&self,
		session: &Session,
		rel: &Path,
		entity_id: &str,
		kind: EntityKind,
		result: &mut SyncResult,
	) {
		let project_id = &session.config.project_id;

		let fetched = match kind {
			EntityKind::Doc => self
				.remote
				.get_doc(project_id, entity_id)
				.await
				.map(|content| content.map(String::into_bytes)),
			EntityKind::File => self.remote.download_file(project_id, entity_id).await,
			EntityKind::Folder => {
				if let Err(e) = session.fs.ensure_dir(rel).await {
					result
						.errors
						.push(format!("Failed to create directory {}: {e}", rel.display()));
				}
				return;
			}
		};

		let remote_bytes = match fetched {
			Ok(Some(bytes)) => bytes,
			Ok(None) => {
				// The tree listed the entity but the store cannot resolve
				// it: expected absence, not a failure.
				debug!("Remote entity for {} is gone, skipping", rel.display());
				result.skipped += 1;
				return;
			}
			Err(e) => {
				result
					.errors
					.push(format!("Failed to fetch {}: {e}", rel.display()));
				return;
			}
		};

		let local_bytes = match session.fs.read(rel).await {
			Ok(bytes) => bytes,
			Err(e) => {
				result
					.errors
					.push(format!("Failed to read local {}: {e}", rel.display()));
				return;
			}
		};

		let mut ledger = self.ledger.lock().await;
		let status = classify(
			ledger.last_hash(rel),
			local_bytes.as_deref(),
			Some(&remote_bytes),
		);

		match status {
			SyncStatus::Unchanged => {
				ledger.upsert(
					rel.to_owned(),
					FileRecord {
						hash: content_hash(&remote_bytes),
						mtime: None,
						remote_id: Some(entity_id.to_string()),
						kind,
					},
				);
				result.skipped += 1;
			}
			SyncStatus::LocalNewer => {
				// A pull never clobbers a local-only edit; the next push
				// will carry it to the remote side.
				trace!("{} is newer locally, leaving in place", rel.display());
				result.skipped += 1;
			}
			SyncStatus::Conflict => {
				drop(ledger);
				self.report_conflict(
					session,
					rel,
					local_bytes.as_deref().unwrap_or_default(),
					&remote_bytes,
					result,
				)
				.await;
			}
			SyncStatus::RemoteNewer => {
				self.suppressor.suppress(session.fs.root().join(rel));
				match session.fs.write(rel, &remote_bytes).await {
					Ok(mtime) => {
						ledger.upsert(
							rel.to_owned(),
							FileRecord {
								hash: content_hash(&remote_bytes),
								mtime: Some(mtime),
								remote_id: Some(entity_id.to_string()),
								kind,
							},
						);
						debug!("Pulled {}", rel.display());
						result.synced += 1;
					}
					Err(e) => {
						result
							.errors
							.push(format!("Failed to write {}: {e}", rel.display()));
					}
				}
			}
		}
	}

	/// Reconcile one local file into the remote project.
	async fn push_one(
		&self,
		session: &Session,
		tree: &ProjectTree,
		folders: &mut HashMap<PathBuf, String>,
		rel: &Path,
		result: &mut SyncResult,
	) {
		let project_id = &session.config.project_id;

		let local_bytes = match session.fs.read(rel).await {
			Ok(Some(bytes)) => bytes,
			Ok(None) => {
				self.push_missing_local(session, rel, result).await;
				return;
			}
			Err(e) => {
				result
					.errors
					.push(format!("Failed to read local {}: {e}", rel.display()));
				return;
			}
		};

		match PathMapper::resolve(tree, rel) {
			Some(EntityRef::Doc(doc)) => {
				let remote_text = match self.remote.get_doc(project_id, &doc.id).await {
					Ok(Some(text)) => text,
					Ok(None) => {
						debug!("Remote doc for {} is gone, skipping", rel.display());
						result.skipped += 1;
						return;
					}
					Err(e) => {
						result
							.errors
							.push(format!("Failed to fetch {}: {e}", rel.display()));
						return;
					}
				};

				let mut ledger = self.ledger.lock().await;
				match classify(
					ledger.last_hash(rel),
					Some(&local_bytes),
					Some(remote_text.as_bytes()),
				) {
					SyncStatus::Unchanged => {
						ledger.upsert(
							rel.to_owned(),
							FileRecord {
								hash: content_hash(&local_bytes),
								mtime: None,
								remote_id: Some(doc.id.clone()),
								kind: EntityKind::Doc,
							},
						);
						result.skipped += 1;
					}
					SyncStatus::RemoteNewer => {
						// A push never clobbers a remote-only edit.
						trace!("{} is newer remotely, leaving in place", rel.display());
						result.skipped += 1;
					}
					SyncStatus::Conflict => {
						drop(ledger);
						self.report_conflict(
							session,
							rel,
							&local_bytes,
							remote_text.as_bytes(),
							result,
						)
						.await;
					}
					SyncStatus::LocalNewer => {
						let text = match String::from_utf8(local_bytes.clone()) {
							Ok(text) => text,
							Err(_) => {
								result.errors.push(format!(
									"{} is not valid UTF-8, cannot update remote document",
									rel.display()
								));
								return;
							}
						};

						match self.remote.update_doc(project_id, &doc.id, &text).await {
							Ok(()) => {
								ledger.upsert(
									rel.to_owned(),
									FileRecord {
										hash: content_hash(&local_bytes),
										mtime: session.fs.mtime(rel).await.ok().flatten(),
										remote_id: Some(doc.id.clone()),
										kind: EntityKind::Doc,
									},
								);
								debug!("Pushed {}", rel.display());
								result.synced += 1;
							}
							Err(e) => {
								result
									.errors
									.push(format!("Failed to update {}: {e}", rel.display()));
							}
						}
					}
				}
			}

			Some(EntityRef::File(file)) => {
				let remote_bytes = match self.remote.download_file(project_id, &file.id).await {
					Ok(Some(bytes)) => bytes,
					Ok(None) => {
						debug!("Remote file for {} is gone, skipping", rel.display());
						result.skipped += 1;
						return;
					}
					Err(e) => {
						result
							.errors
							.push(format!("Failed to fetch {}: {e}", rel.display()));
						return;
					}
				};

				let mut ledger = self.ledger.lock().await;
				match classify(
					ledger.last_hash(rel),
					Some(&local_bytes),
					Some(&remote_bytes),
				) {
					SyncStatus::Unchanged => {
						ledger.upsert(
							rel.to_owned(),
							FileRecord {
								hash: content_hash(&local_bytes),
								mtime: None,
								remote_id: Some(file.id.clone()),
								kind: EntityKind::File,
							},
						);
						result.skipped += 1;
					}
					SyncStatus::RemoteNewer => {
						result.skipped += 1;
					}
					SyncStatus::Conflict => {
						drop(ledger);
						self.report_conflict(session, rel, &local_bytes, &remote_bytes, result)
							.await;
					}
					SyncStatus::LocalNewer => {
						drop(ledger);
						self.upload_replacing(
							session,
							tree,
							folders,
							rel,
							&local_bytes,
							result,
						)
						.await;
					}
				}
			}

			Some(EntityRef::Folder(_)) => {
				result.errors.push(format!(
					"Local file {} collides with a remote folder",
					rel.display()
				));
			}

			None => {
				self.create_remote(session, tree, folders, rel, &local_bytes, result)
					.await;
			}
		}
	}

	/// Local file vanished: delete the remote counterpart we know about.
	async fn push_missing_local(&self, session: &Session, rel: &Path, result: &mut SyncResult) {
		let remote_id = {
			let ledger = self.ledger.lock().await;
			ledger.get(rel).and_then(|record| record.remote_id.clone())
		};

		let Some(remote_id) = remote_id else {
			result.skipped += 1;
			return;
		};

		match self
			.remote
			.delete_entity(&session.config.project_id, &remote_id)
			.await
		{
			Ok(()) => {
				self.ledger.lock().await.remove(rel);
				info!("Deleted remote entity for {} (removed locally)", rel.display());
				result.synced += 1;
			}
			Err(e) => {
				result
					.errors
					.push(format!("Failed to delete remote {}: {e}", rel.display()));
			}
		}
	}

	/// Create a brand new remote doc/file for a local path with no
	/// counterpart, creating missing parent folders first.
	async fn create_remote(
		&self,
		session: &Session,
		tree: &ProjectTree,
		folders: &mut HashMap<PathBuf, String>,
		rel: &Path,
		local_bytes: &[u8],
		result: &mut SyncResult,
	) {
		let project_id = &session.config.project_id;

		let Some(name) = rel.file_name().map(|n| n.to_string_lossy().into_owned()) else {
			result
				.errors
				.push(format!("Cannot push {}: no file name", rel.display()));
			return;
		};
		let parent_rel = rel.parent().unwrap_or_else(|| Path::new(""));

		let parent_id = match self
			.ensure_remote_folders(project_id, &tree.root.id, folders, parent_rel)
			.await
		{
			Ok(id) => id,
			Err(e) => {
				result.errors.push(format!(
					"Failed to create remote folders for {}: {e}",
					rel.display()
				));
				return;
			}
		};

		let created = if is_text_document(rel) {
			match std::str::from_utf8(local_bytes) {
				Ok(text) => {
					self.remote
						.create_doc(project_id, &parent_id, &name, text)
						.await
				}
				// Extension lied about the content; fall back to binary.
				Err(_) => {
					self.remote
						.upload_file(project_id, &parent_id, &name, local_bytes)
						.await
				}
			}
		} else {
			self.remote
				.upload_file(project_id, &parent_id, &name, local_bytes)
				.await
		};

		match created {
			Ok(new_id) => {
				let kind = if is_text_document(rel) {
					EntityKind::Doc
				} else {
					EntityKind::File
				};
				self.ledger.lock().await.upsert(
					rel.to_owned(),
					FileRecord {
						hash: content_hash(local_bytes),
						mtime: session.fs.mtime(rel).await.ok().flatten(),
						remote_id: Some(new_id),
						kind,
					},
				);
				info!("Created remote entity for {}", rel.display());
				result.synced += 1;
			}
			Err(e) => {
				result
					.errors
					.push(format!("Failed to create remote {}: {e}", rel.display()));
			}
		}
	}

	/// Replace the content of an existing remote binary file by re-upload.
	async fn upload_replacing(
		&self,
		session: &Session,
		tree: &ProjectTree,
		folders: &mut HashMap<PathBuf, String>,
		rel: &Path,
		local_bytes: &[u8],
		result: &mut SyncResult,
	) {
		let project_id = &session.config.project_id;

		let Some(name) = rel.file_name().map(|n| n.to_string_lossy().into_owned()) else {
			result
				.errors
				.push(format!("Cannot push {}: no file name", rel.display()));
			return;
		};
		let parent_rel = rel.parent().unwrap_or_else(|| Path::new(""));

		let parent_id = match self
			.ensure_remote_folders(project_id, &tree.root.id, folders, parent_rel)
			.await
		{
			Ok(id) => id,
			Err(e) => {
				result.errors.push(format!(
					"Failed to resolve remote folder for {}: {e}",
					rel.display()
				));
				return;
			}
		};

		match self
			.remote
			.upload_file(project_id, &parent_id, &name, local_bytes)
			.await
		{
			Ok(remote_id) => {
				self.ledger.lock().await.upsert(
					rel.to_owned(),
					FileRecord {
						hash: content_hash(local_bytes),
						mtime: session.fs.mtime(rel).await.ok().flatten(),
						remote_id: Some(remote_id),
						kind: EntityKind::File,
					},
				);
				debug!("Re-uploaded {}", rel.display());
				result.synced += 1;
			}
			Err(e) => {
				result
					.errors
					.push(format!("Failed to upload {}: {e}", rel.display()));
			}
		}
	}

	/// Walk `dir` component by component, creating any folder the remote
	/// side is missing. Directory creation always precedes the file writes
	/// under it.
	async fn ensure_remote_folders(
		&self,
		project_id: &str,
		root_id: &str,
		cache: &mut HashMap<PathBuf, String>,
		dir: &Path,
	) -> Result<String, crate::remote::RemoteError> {
		if dir.as_os_str().is_empty() {
			return Ok(root_id.to_string());
		}
		if let Some(id) = cache.get(dir) {
			return Ok(id.clone());
		}

		let mut current = PathBuf::new();
		let mut parent_id = root_id.to_string();

		for component in dir.components() {
			if let Component::Normal(name) = component {
				current.push(name);
				parent_id = match cache.get(&current) {
					Some(id) => id.clone(),
					None => {
						let id = self
							.remote
							.create_folder(project_id, &parent_id, &name.to_string_lossy())
							.await?;
						debug!("Created remote folder {}", current.display());
						cache.insert(current.clone(), id.clone());
						id
					}
				};
			}
		}

		Ok(parent_id)
	}

	async fn report_conflict(
		&self,
		session: &Session,
		rel: &Path,
		local: &[u8],
		remote: &[u8],
		result: &mut SyncResult,
	) {
		let local_mtime = session
			.fs
			.mtime(rel)
			.await
			.ok()
			.flatten()
			.map(DateTime::<Utc>::from);

		warn!("Conflicting edits detected at {}", rel.display());

		let info = ConflictInfo::new(rel, local, remote, local_mtime);
		result.skipped += 1;
		result.conflicts.push(rel.to_owned());
		self.events.emit(SyncEvent::Conflict { info });
	}
}

fn is_text_document(path: &Path) -> bool {
	path.extension()
		.map(|extension| {
			let extension = extension.to_string_lossy().to_lowercase();
			TEXT_EXTENSIONS.contains(&extension.as_str())
		})
		.unwrap_or(false)
}

/// Pre-populate the per-pass folder cache with every folder the snapshot
/// already has.
fn seed_folder_cache(tree: &ProjectTree) -> HashMap<PathBuf, String> {
	PathMapper::walk(tree)
		.into_iter()
		.filter_map(|(path, entity)| match entity {
			EntityRef::Folder(folder) => Some((path, folder.id.clone())),
			EntityRef::Doc(_) | EntityRef::File(_) => None,
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn text_extension_split() {
		assert!(is_text_document(Path::new("main.tex")));
		assert!(is_text_document(Path::new("refs.bib")));
		assert!(is_text_document(Path::new("sec/Notes.MD")));
		assert!(!is_text_document(Path::new("logo.png")));
		assert!(!is_text_document(Path::new("no_extension")));
	}
}
