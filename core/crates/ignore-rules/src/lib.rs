//! Ignore rules for replica synchronization.
//!
//! Every path handed to the sync engine or the reconciliation loop is
//! evaluated against a fixed default rule set plus any user supplied glob
//! patterns. Verdicts depend only on the relative path and the compiled
//! pattern set, never on filesystem state.

#![warn(
	clippy::all,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms
)]

use std::path::{Component, Path};

use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;

/// Patterns always rejected, regardless of user configuration.
///
/// Dotfiles and dot-directories (which also cover `.git`, `.hg`, `.svn` and
/// the replica settings marker) are rejected by a path component check in
/// [`IgnoreFilter::should_ignore`], so they don't need globs here.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
	// LaTeX build byproducts
	"*.aux",
	"*.bbl",
	"*.bcf",
	"*.blg",
	"*.fdb_latexmk",
	"*.fls",
	"*.lof",
	"*.log",
	"*.lot",
	"*.nav",
	"*.out",
	"*.run.xml",
	"*.snm",
	"*.synctex.gz",
	"*.synctex(busy)",
	"*.toc",
	"*.vrb",
	"*.xdv",
	// Editor and OS droppings
	"*~",
	"*.swp",
	"*.tmp",
	"Thumbs.db",
	"desktop.ini",
];

#[derive(Error, Debug)]
pub enum IgnoreFilterError {
	#[error("glob builder error: {0}")]
	Glob(#[from] globset::Error),
}

/// Compiled ignore pattern set.
///
/// Custom patterns only ever extend [`DEFAULT_IGNORE_PATTERNS`]; there is no
/// way to un-ignore a default.
#[derive(Debug, Clone)]
pub struct IgnoreFilter {
	set: GlobSet,
	pattern_count: usize,
}

impl IgnoreFilter {
	/// Compile the default rule set plus `custom` patterns.
	///
	/// Each pattern is also registered in a `**/`-prefixed form so that it
	/// applies at any depth of the tree, matching shell-glob expectations.
	pub fn new(custom: &[String]) -> Result<Self, IgnoreFilterError> {
		let mut builder = GlobSetBuilder::new();
		let mut pattern_count = 0;

		for pattern in DEFAULT_IGNORE_PATTERNS
			.iter()
			.copied()
			.chain(custom.iter().map(String::as_str))
		{
			builder.add(pattern.parse::<Glob>()?);
			pattern_count += 1;

			if !pattern.starts_with("**/") {
				builder.add(format!("**/{pattern}").parse::<Glob>()?);
			}
		}

		Ok(Self {
			set: builder.build()?,
			pattern_count,
		})
	}

	/// Compile the default rule set only.
	pub fn defaults() -> Result<Self, IgnoreFilterError> {
		Self::new(&[])
	}

	/// Whether `relative_path` must be excluded from synchronization.
	pub fn should_ignore(&self, relative_path: &Path) -> bool {
		if relative_path.components().any(|component| {
			matches!(
				component,
				Component::Normal(name) if name.to_string_lossy().starts_with('.')
			)
		}) {
			return true;
		}

		self.set.is_match(relative_path)
	}

	/// Number of source patterns this filter was compiled from.
	pub fn pattern_count(&self) -> usize {
		self.pattern_count
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use std::path::PathBuf;

	fn filter(custom: &[&str]) -> IgnoreFilter {
		let custom = custom.iter().map(ToString::to_string).collect::<Vec<_>>();
		IgnoreFilter::new(&custom).expect("patterns must compile")
	}

	#[test]
	fn rejects_latex_byproducts() {
		let filter = filter(&[]);

		for path in [
			"main.aux",
			"main.log",
			"main.synctex.gz",
			"chapters/intro.aux",
			"deep/nested/dir/notes.toc",
		] {
			assert!(filter.should_ignore(Path::new(path)), "expected ignore: {path}");
		}
	}

	#[test]
	fn rejects_dotfiles_and_vcs_directories() {
		let filter = filter(&[]);

		for path in [".gitignore", ".git/config", "sub/.DS_Store", ".replica.json"] {
			assert!(filter.should_ignore(Path::new(path)), "expected ignore: {path}");
		}
	}

	#[test]
	fn accepts_regular_project_files() {
		let filter = filter(&[]);

		for path in [
			"main.tex",
			"sec/intro.tex",
			"bibliography.bib",
			"figures/plot.png",
			"notes with spaces.md",
			"résumé.tex",
		] {
			assert!(
				!filter.should_ignore(Path::new(path)),
				"expected accept: {path}"
			);
		}
	}

	#[test]
	fn custom_patterns_extend_defaults() {
		let filter = filter(&["build/**", "*.bak"]);

		assert!(filter.should_ignore(Path::new("build/output.pdf")));
		assert!(filter.should_ignore(Path::new("draft.bak")));
		assert!(filter.should_ignore(Path::new("sub/dir/draft.bak")));
		// Defaults still apply
		assert!(filter.should_ignore(Path::new("main.aux")));
		assert!(!filter.should_ignore(Path::new("main.tex")));
	}

	#[test]
	fn verdicts_are_deterministic() {
		let filter = filter(&["*.bak"]);
		let path = PathBuf::from("sec/intro.tex");

		let first = filter.should_ignore(&path);
		for _ in 0..16 {
			assert_eq!(first, filter.should_ignore(&path));
		}
	}

	#[test]
	fn invalid_custom_glob_fails_at_construction() {
		let result = IgnoreFilter::new(&["a{b".to_string()]);
		assert!(matches!(result, Err(IgnoreFilterError::Glob(_))));
	}
}
