//! Local filesystem facade rooted at the replica directory.
//!
//! All mutating operations go through here so that writes are atomic and
//! no operation can escape the replica root.

use std::{
	io,
	path::{Component, Path, PathBuf},
	time::SystemTime,
};

use thiserror::Error;
use tokio::fs;
use tracing::{trace, warn};
use uuid::Uuid;

const WRITE_PROBE_NAME: &str = ".replica-write-test";

#[derive(Error, Debug)]
pub enum LocalFsError {
	#[error("file I/O error at {}: {source}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("path escapes the replica root: {}", .0.display())]
	OutsideRoot(PathBuf),
}

impl LocalFsError {
	fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
		let path = path.into();
		move |source| Self::Io { path, source }
	}
}

/// Filesystem handle scoped to one replica root directory.
#[derive(Debug, Clone)]
pub struct LocalFs {
	root: PathBuf,
}

impl LocalFs {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Absolute path for a relative one, rejecting absolute inputs and
	/// `..` traversal.
	pub fn absolute(&self, relative: &Path) -> Result<PathBuf, LocalFsError> {
		let escapes = relative.components().any(|component| {
			matches!(
				component,
				Component::ParentDir | Component::RootDir | Component::Prefix(_)
			)
		});
		if escapes {
			return Err(LocalFsError::OutsideRoot(relative.to_owned()));
		}

		Ok(self.root.join(relative))
	}

	/// Create the replica root if it does not exist yet.
	pub async fn ensure_root(&self) -> Result<(), LocalFsError> {
		fs::create_dir_all(&self.root)
			.await
			.map_err(LocalFsError::io(&self.root))
	}

	/// Recursively create a directory below the root. Idempotent.
	pub async fn ensure_dir(&self, relative: &Path) -> Result<(), LocalFsError> {
		let path = self.absolute(relative)?;
		fs::create_dir_all(&path)
			.await
			.map_err(LocalFsError::io(path))
	}

	/// Atomically write a file, creating all parent directories first.
	///
	/// The bytes land in a dot-prefixed temp file next to the destination
	/// and are moved into place with a rename, so a crash mid-write never
	/// leaves a truncated file at the final path. Returns the resulting
	/// modification time.
	pub async fn write(&self, relative: &Path, bytes: &[u8]) -> Result<SystemTime, LocalFsError> {
		let dest = self.absolute(relative)?;

		if let Some(parent) = dest.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(LocalFsError::io(parent))?;
		}

		let file_name = dest
			.file_name()
			.ok_or_else(|| LocalFsError::OutsideRoot(relative.to_owned()))?
			.to_string_lossy()
			.into_owned();
		let tmp = dest.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

		fs::write(&tmp, bytes)
			.await
			.map_err(LocalFsError::io(&tmp))?;

		if let Err(source) = fs::rename(&tmp, &dest).await {
			// Leave no temp file behind on a failed rename.
			if let Err(e) = fs::remove_file(&tmp).await {
				warn!("Failed to clean up temp file {}: {e}", tmp.display());
			}
			return Err(LocalFsError::Io { path: dest, source });
		}

		trace!("Wrote {} bytes to {}", bytes.len(), dest.display());

		let metadata = fs::metadata(&dest)
			.await
			.map_err(LocalFsError::io(&dest))?;
		metadata.modified().map_err(LocalFsError::io(dest))
	}

	/// Read a file, `Ok(None)` if it does not exist.
	pub async fn read(&self, relative: &Path) -> Result<Option<Vec<u8>>, LocalFsError> {
		let path = self.absolute(relative)?;
		match fs::read(&path).await {
			Ok(bytes) => Ok(Some(bytes)),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(source) => Err(LocalFsError::Io { path, source }),
		}
	}

	/// Remove a file, or a directory recursively. Missing paths are fine.
	pub async fn remove(&self, relative: &Path) -> Result<(), LocalFsError> {
		let path = self.absolute(relative)?;
		let metadata = match fs::symlink_metadata(&path).await {
			Ok(metadata) => metadata,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
			Err(source) => return Err(LocalFsError::Io { path, source }),
		};

		if metadata.is_dir() {
			fs::remove_dir_all(&path)
				.await
				.map_err(LocalFsError::io(path))
		} else {
			fs::remove_file(&path)
				.await
				.map_err(LocalFsError::io(path))
		}
	}

	pub async fn rename(&self, from: &Path, to: &Path) -> Result<(), LocalFsError> {
		let from_abs = self.absolute(from)?;
		let to_abs = self.absolute(to)?;

		if let Some(parent) = to_abs.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(LocalFsError::io(parent))?;
		}

		fs::rename(&from_abs, &to_abs)
			.await
			.map_err(LocalFsError::io(from_abs))
	}

	pub async fn exists(&self, relative: &Path) -> Result<bool, LocalFsError> {
		let path = self.absolute(relative)?;
		fs::try_exists(&path).await.map_err(LocalFsError::io(path))
	}

	/// Whether the path currently exists as a directory.
	pub async fn is_dir(&self, relative: &Path) -> Result<bool, LocalFsError> {
		let path = self.absolute(relative)?;
		match fs::metadata(&path).await {
			Ok(metadata) => Ok(metadata.is_dir()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
			Err(source) => Err(LocalFsError::Io { path, source }),
		}
	}

	/// Modification time of a file, `Ok(None)` if it does not exist.
	pub async fn mtime(&self, relative: &Path) -> Result<Option<SystemTime>, LocalFsError> {
		let path = self.absolute(relative)?;
		match fs::metadata(&path).await {
			Ok(metadata) => metadata
				.modified()
				.map(Some)
				.map_err(LocalFsError::io(path)),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(source) => Err(LocalFsError::Io { path, source }),
		}
	}

	/// Recursive listing of all regular files below the root, as relative
	/// paths. Symlinks are not followed.
	pub async fn list_files(&self) -> Result<Vec<PathBuf>, LocalFsError> {
		let mut files = Vec::new();
		let mut stack = vec![self.root.clone()];

		while let Some(dir) = stack.pop() {
			let mut entries = fs::read_dir(&dir)
				.await
				.map_err(LocalFsError::io(&dir))?;

			while let Some(entry) = entries
				.next_entry()
				.await
				.map_err(LocalFsError::io(&dir))?
			{
				let path = entry.path();
				let file_type = entry
					.file_type()
					.await
					.map_err(LocalFsError::io(&path))?;

				if file_type.is_symlink() {
					continue;
				}

				if file_type.is_dir() {
					stack.push(path);
				} else if let Ok(relative) = path.strip_prefix(&self.root) {
					files.push(relative.to_owned());
				}
			}
		}

		files.sort();
		Ok(files)
	}

	/// Probe write permission by creating and removing a marker file.
	pub async fn probe_writable(&self) -> bool {
		let marker = self.root.join(WRITE_PROBE_NAME);

		if let Err(e) = fs::write(&marker, b"probe").await {
			warn!("Replica root {} is not writable: {e}", self.root.display());
			return false;
		}

		if let Err(e) = fs::remove_file(&marker).await {
			warn!("Failed to remove write probe {}: {e}", marker.display());
		}

		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use tempfile::tempdir;

	#[tokio::test]
	async fn write_creates_parent_directories() {
		let dir = tempdir().unwrap();
		let fs = LocalFs::new(dir.path());

		fs.write(Path::new("a/b/c.tex"), b"content").await.unwrap();

		assert!(dir.path().join("a").is_dir());
		assert!(dir.path().join("a/b").is_dir());
		assert_eq!(
			fs.read(Path::new("a/b/c.tex")).await.unwrap(),
			Some(b"content".to_vec())
		);
	}

	#[tokio::test]
	async fn write_leaves_no_temp_files() {
		let dir = tempdir().unwrap();
		let fs = LocalFs::new(dir.path());

		fs.write(Path::new("main.tex"), b"\\documentclass{article}")
			.await
			.unwrap();

		let names = std::fs::read_dir(dir.path())
			.unwrap()
			.map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
			.collect::<Vec<_>>();
		assert_eq!(names, vec!["main.tex".to_string()]);
	}

	#[tokio::test]
	async fn read_missing_file_is_none() {
		let dir = tempdir().unwrap();
		let fs = LocalFs::new(dir.path());

		assert_eq!(fs.read(Path::new("nope.tex")).await.unwrap(), None);
	}

	#[tokio::test]
	async fn rejects_escaping_paths() {
		let dir = tempdir().unwrap();
		let fs = LocalFs::new(dir.path());

		assert!(matches!(
			fs.read(Path::new("../outside")).await,
			Err(LocalFsError::OutsideRoot(_))
		));
		assert!(matches!(
			fs.write(Path::new("/etc/passwd"), b"x").await,
			Err(LocalFsError::OutsideRoot(_))
		));
	}

	#[tokio::test]
	async fn list_files_is_recursive_and_relative() {
		let dir = tempdir().unwrap();
		let fs = LocalFs::new(dir.path());

		fs.write(Path::new("main.tex"), b"a").await.unwrap();
		fs.write(Path::new("sec/intro.tex"), b"b").await.unwrap();
		fs.ensure_dir(Path::new("empty")).await.unwrap();

		let files = fs.list_files().await.unwrap();
		assert_eq!(
			files,
			vec![PathBuf::from("main.tex"), PathBuf::from("sec/intro.tex")]
		);
	}

	#[tokio::test]
	async fn remove_handles_files_and_directories() {
		let dir = tempdir().unwrap();
		let fs = LocalFs::new(dir.path());

		fs.write(Path::new("sec/intro.tex"), b"x").await.unwrap();
		fs.remove(Path::new("sec")).await.unwrap();
		assert!(!dir.path().join("sec").exists());

		// Removing a missing path is not an error
		fs.remove(Path::new("sec")).await.unwrap();
	}

	#[tokio::test]
	async fn probe_writable_cleans_up_marker() {
		let dir = tempdir().unwrap();
		let fs = LocalFs::new(dir.path());

		assert!(fs.probe_writable().await);
		assert!(!dir.path().join(WRITE_PROBE_NAME).exists());
	}
}
