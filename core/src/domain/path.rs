//! Conversion between remote tree positions and relative local paths.
//!
//! The remote store addresses entities by opaque ID; the local filesystem
//! addresses them by relative path. `PathMapper` bridges the two, given a
//! tree snapshot. Folders are always emitted before their contents so that
//! directory creation can precede file writes downstream.

use std::path::{Component, Path, PathBuf};

use super::entity::{EntityRef, FolderNode, ProjectTree};

pub struct PathMapper;

impl PathMapper {
	/// Depth-first enumeration of every entity below the root, paired with
	/// its relative path. The root folder itself is not emitted; it maps to
	/// the replica root directory.
	pub fn walk(tree: &ProjectTree) -> Vec<(PathBuf, EntityRef<'_>)> {
		let mut out = Vec::new();
		Self::walk_folder(&tree.root, Path::new(""), &mut out);
		out
	}

	fn walk_folder<'t>(
		folder: &'t FolderNode,
		prefix: &Path,
		out: &mut Vec<(PathBuf, EntityRef<'t>)>,
	) {
		// Folder entry first, then children: directories before files.
		for child in &folder.folders {
			let path = prefix.join(&child.name);
			out.push((path.clone(), EntityRef::Folder(child)));
			Self::walk_folder(child, &path, out);
		}

		for doc in &folder.docs {
			out.push((prefix.join(&doc.name), EntityRef::Doc(doc)));
		}

		for file in &folder.files {
			out.push((prefix.join(&file.name), EntityRef::File(file)));
		}
	}

	/// Relative path of the entity with the given remote ID, built by
	/// concatenating ancestor names. `None` if the ID is not in the tree.
	pub fn path_of(tree: &ProjectTree, id: &str) -> Option<PathBuf> {
		if tree.root.id == id {
			return Some(PathBuf::new());
		}

		Self::walk(tree)
			.into_iter()
			.find(|(_, entity)| entity.id() == id)
			.map(|(path, _)| path)
	}

	/// Entity with the given remote ID, paired with its relative path.
	pub fn entity_by_id<'t>(
		tree: &'t ProjectTree,
		id: &str,
	) -> Option<(PathBuf, EntityRef<'t>)> {
		Self::walk(tree)
			.into_iter()
			.find(|(_, entity)| entity.id() == id)
	}

	/// Resolve a relative path to its remote entity.
	///
	/// Duplicate sibling names are preserved as given by the remote tree;
	/// resolution returns the first match in document order (docs, then
	/// files, then folders).
	pub fn resolve<'t>(tree: &'t ProjectTree, relative_path: &Path) -> Option<EntityRef<'t>> {
		let mut components = relative_path
			.components()
			.filter_map(|component| match component {
				Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
				_ => None,
			})
			.peekable();

		components.peek()?;

		let mut current = &tree.root;
		loop {
			let name = components.next()?;
			let is_last = components.peek().is_none();

			if is_last {
				if let Some(doc) = current.docs.iter().find(|doc| doc.name == name) {
					return Some(EntityRef::Doc(doc));
				}
				if let Some(file) = current.files.iter().find(|file| file.name == name) {
					return Some(EntityRef::File(file));
				}
				return current
					.folders
					.iter()
					.find(|folder| folder.name == name)
					.map(EntityRef::Folder);
			}

			current = current.folders.iter().find(|folder| folder.name == name)?;
		}
	}

	/// Remote folder ID for a relative directory path; the empty path maps
	/// to the root folder.
	pub fn folder_id_at<'t>(tree: &'t ProjectTree, relative_dir: &Path) -> Option<&'t str> {
		if relative_dir.as_os_str().is_empty() {
			return Some(&tree.root.id);
		}

		match Self::resolve(tree, relative_dir)? {
			EntityRef::Folder(folder) => Some(&folder.id),
			EntityRef::Doc(_) | EntityRef::File(_) => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::entity::{DocNode, FileNode};
	use pretty_assertions::assert_eq;

	fn fixture() -> ProjectTree {
		ProjectTree {
			root: FolderNode {
				id: "root".into(),
				name: "rootFolder".into(),
				docs: vec![DocNode {
					id: "d1".into(),
					name: "main.tex".into(),
				}],
				files: vec![FileNode {
					id: "f1".into(),
					name: "logo.png".into(),
				}],
				folders: vec![FolderNode {
					id: "folder-sec".into(),
					name: "sec".into(),
					docs: vec![DocNode {
						id: "d2".into(),
						name: "intro étude.tex".into(),
					}],
					files: vec![],
					folders: vec![],
				}],
			},
		}
	}

	#[test]
	fn walk_emits_folders_before_their_contents() {
		let tree = fixture();
		let paths = PathMapper::walk(&tree)
			.into_iter()
			.map(|(path, _)| path)
			.collect::<Vec<_>>();

		let folder_pos = paths
			.iter()
			.position(|p| p == Path::new("sec"))
			.expect("folder missing from walk");
		let doc_pos = paths
			.iter()
			.position(|p| p == Path::new("sec/intro étude.tex"))
			.expect("nested doc missing from walk");

		assert!(folder_pos < doc_pos);
	}

	#[test]
	fn path_of_concatenates_ancestor_names() {
		let tree = fixture();

		assert_eq!(
			PathMapper::path_of(&tree, "d2"),
			Some(PathBuf::from("sec/intro étude.tex"))
		);
		assert_eq!(PathMapper::path_of(&tree, "root"), Some(PathBuf::new()));
		assert_eq!(PathMapper::path_of(&tree, "nope"), None);
	}

	#[test]
	fn resolve_round_trips_every_walked_path() {
		let tree = fixture();

		for (path, entity) in PathMapper::walk(&tree) {
			let resolved = PathMapper::resolve(&tree, &path)
				.unwrap_or_else(|| panic!("path did not resolve: {}", path.display()));
			assert_eq!(resolved.id(), entity.id());
		}
	}

	#[test]
	fn resolve_prefers_first_match_for_duplicate_names() {
		let mut tree = fixture();
		tree.root.docs.push(DocNode {
			id: "d1-dup".into(),
			name: "main.tex".into(),
		});

		let resolved = PathMapper::resolve(&tree, Path::new("main.tex")).expect("must resolve");
		assert_eq!(resolved.id(), "d1");
	}

	#[test]
	fn folder_id_at_maps_empty_path_to_root() {
		let tree = fixture();

		assert_eq!(PathMapper::folder_id_at(&tree, Path::new("")), Some("root"));
		assert_eq!(
			PathMapper::folder_id_at(&tree, Path::new("sec")),
			Some("folder-sec")
		);
		assert_eq!(PathMapper::folder_id_at(&tree, Path::new("main.tex")), None);
	}
}
