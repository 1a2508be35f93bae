//! Domain model: the remote project tree and its mapping onto relative
//! local paths. Plain data, no I/O.

pub mod entity;
pub mod path;

pub use entity::{DocNode, EntityKind, EntityRef, FileNode, FolderNode, ProjectTree};
pub use path::PathMapper;
