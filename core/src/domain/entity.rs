use serde::{Deserialize, Serialize};

/// Read-only snapshot of a remote project tree.
///
/// Owned by the remote store; the sync engine fetches a fresh snapshot per
/// pass and never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectTree {
	pub root: FolderNode,
}

/// A text document. Content is fetched separately by remote ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocNode {
	pub id: String,
	pub name: String,
}

/// A binary file. Content is fetched separately by remote ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
	pub id: String,
	pub name: String,
}

/// A folder with child docs, files and folders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderNode {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub docs: Vec<DocNode>,
	#[serde(default)]
	pub files: Vec<FileNode>,
	#[serde(default)]
	pub folders: Vec<FolderNode>,
}

/// What kind of entity a tree node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
	Doc,
	File,
	Folder,
}

/// Borrowed reference to any node in a [`ProjectTree`].
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
	Doc(&'a DocNode),
	File(&'a FileNode),
	Folder(&'a FolderNode),
}

impl<'a> EntityRef<'a> {
	pub fn id(&self) -> &'a str {
		match *self {
			Self::Doc(doc) => &doc.id,
			Self::File(file) => &file.id,
			Self::Folder(folder) => &folder.id,
		}
	}

	pub fn name(&self) -> &'a str {
		match *self {
			Self::Doc(doc) => &doc.name,
			Self::File(file) => &file.name,
			Self::Folder(folder) => &folder.name,
		}
	}

	pub fn kind(&self) -> EntityKind {
		match self {
			Self::Doc(_) => EntityKind::Doc,
			Self::File(_) => EntityKind::File,
			Self::Folder(_) => EntityKind::Folder,
		}
	}
}

impl FolderNode {
	/// An empty folder, mostly useful for building fixtures.
	pub fn empty(id: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			name: name.into(),
			docs: Vec::new(),
			files: Vec::new(),
			folders: Vec::new(),
		}
	}
}
