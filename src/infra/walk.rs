//! Filepath: src/infra/walk.rs
//! Glob-filtered file walker used for every root a prompt enumerates.
//! - Extra exclusion globs (early prune + late filter), case-sensitive,
//!   matched against paths relative to the walked root
//! - Regular files only; symlinks and directories never surface
//! - Hidden files included; ignore files are opt-in
//! - Deterministic ordering for stable prompts and tests
//! - Unreadable entries are reported to a caller sink, not dropped silently
//!
//! Backed by ripgrep's `ignore` crate and `globset`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{DirEntry, WalkBuilder};
use regex::Regex;
use serde::Serialize;

/// A file's location inside a root, always `/`-separated.
///
/// This is the join key between two roots during reconciliation, so it
/// must not depend on the host separator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RelativePath(String);

impl RelativePath
{
    /// Normalize a root-relative path. Returns `None` for paths that
    /// escape the root or carry a prefix.
    pub fn from_path(rel: &Path) -> Option<Self>
    {
        let mut parts: Vec<String> = Vec::new();
        for comp in rel.components()
        {
            match comp
            {
                Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return None,
            }
        }
        if parts.is_empty()
        {
            return None;
        }
        Some(Self(parts.join("/")))
    }

    pub fn as_str(&self) -> &str
    {
        &self.0
    }

    /// Path segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &str>
    {
        self.0
            .split('/')
    }

    /// Lowercased extension without the dot (`""` when absent).
    pub fn extension(&self) -> String
    {
        let name = self
            .segments()
            .last()
            .unwrap_or("");
        match name.rfind('.')
        {
            Some(i) if i > 0 => name[i + 1..].to_ascii_lowercase(),
            _ => String::new(),
        }
    }
}

impl fmt::Display for RelativePath
{
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result
    {
        f.write_str(&self.0)
    }
}

impl From<&str> for RelativePath
{
    fn from(s: &str) -> Self
    {
        Self(s.replace('\\', "/"))
    }
}

/// An entry that could not be read during a walk or a content read.
/// Never fatal to the pass; handed to the caller's diagnostic sink.
#[derive(Debug, thiserror::Error)]
#[error("skipped {}: {message}", .path.display())]
pub struct TraversalIo
{
    pub path: PathBuf,
    pub message: String,
}

/// Glob-filtered walker with optional extras.
/// Extra globs are applied in two places:
///   1) Early: prune directories during traversal (filter_entry).
///   2) Late: filter out files that still slipped through.
pub struct FileWalker
{
    /// Compiled set of exclusion patterns
    ignore_patterns: GlobSet,

    /// Honor .gitignore/.ignore files; default false
    respect_ignore_files: bool,

    /// Include hidden (dot) files; default true
    include_hidden: bool,

    /// Maximum recursion depth; default None (unbounded)
    max_depth: Option<usize>,
}

impl FileWalker
{
    /// Build a walker with exclusion patterns (e.g., "target/**",
    /// "**/*.min.js"). Patterns match on root-relative paths.
    pub fn new(exclude: &[String]) -> Result<Self>
    {
        let mut builder = GlobSetBuilder::new();

        for pattern in exclude
        {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self {
            ignore_patterns: builder.build()?,
            respect_ignore_files: false,
            include_hidden: true,
            max_depth: None,
        })
    }

    /// (Optional) Honor .gitignore, .ignore and global excludes.
    pub fn with_ignore_files(
        mut self,
        respect: bool,
    ) -> Self
    {
        self.respect_ignore_files = respect;
        self
    }

    /// (Optional) Include or exclude hidden files (dotfiles).
    pub fn with_include_hidden(
        mut self,
        include_hidden: bool,
    ) -> Self
    {
        self.include_hidden = include_hidden;
        self
    }

    /// (Optional) Limit recursion depth (`None` = unbounded).
    pub fn with_max_depth(
        mut self,
        depth: Option<usize>,
    ) -> Self
    {
        self.max_depth = depth;
        self
    }

    /// Internal: construct a configured WalkBuilder for `root`.
    fn build_walk(
        &self,
        root: &Path,
    ) -> WalkBuilder
    {
        let mut b = WalkBuilder::new(root);

        // WalkBuilder::hidden(true) skips dotfiles
        b.hidden(!self.include_hidden);

        let ignore_files = self.respect_ignore_files;
        b.ignore(ignore_files);
        b.parents(ignore_files);
        b.git_ignore(ignore_files);
        b.git_global(ignore_files);
        b.git_exclude(ignore_files);

        b.follow_links(false);
        b.max_depth(self.max_depth);

        // Early directory pruning on the root-relative path.
        let extra = self
            .ignore_patterns
            .clone();
        let base = root.to_path_buf();
        b.filter_entry(move |ent: &DirEntry| {
            let is_dir = ent
                .file_type()
                .map(|ft| ft.is_dir())
                .unwrap_or(false);
            if !is_dir
            {
                return true;
            }
            match ent
                .path()
                .strip_prefix(&base)
            {
                Ok(rel) if !rel
                    .as_os_str()
                    .is_empty() =>
                {
                    !extra.is_match(rel)
                }
                _ => true,
            }
        });

        b
    }

    /// Traverse regular files under `root`, keyed by normalized relative
    /// path. Entries that cannot be read are reported through `on_error`.
    pub fn walk_relative<P: AsRef<Path>>(
        &self,
        root: P,
        on_error: &mut dyn FnMut(TraversalIo),
    ) -> BTreeMap<RelativePath, PathBuf>
    {
        let root_path = root.as_ref();
        let mut out = BTreeMap::new();

        for res in self
            .build_walk(root_path)
            .build()
        {
            let entry = match res
            {
                Ok(entry) => entry,
                Err(err) =>
                {
                    on_error(TraversalIo {
                        path: error_path(&err).unwrap_or_else(|| root_path.to_path_buf()),
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            // Keep only regular files (symlinks report their own type)
            if !entry
                .file_type()
                .is_some_and(|ft| ft.is_file())
            {
                continue;
            }

            let abs = entry.into_path();
            let Ok(rel) = abs.strip_prefix(root_path)
            else
            {
                continue;
            };
            if self
                .ignore_patterns
                .is_match(rel)
            {
                continue;
            }
            if let Some(key) = RelativePath::from_path(rel)
            {
                out.insert(key, abs);
            }
        }

        out
    }
}

/// Dig the offending path out of an `ignore` error, if it carries one.
fn error_path(err: &ignore::Error) -> Option<PathBuf>
{
    match err
    {
        ignore::Error::WithPath { path, .. } => Some(path.clone()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } =>
        {
            error_path(err)
        }
        _ => None,
    }
}

/// Drop exclusion patterns whose only job is hiding one extension that a
/// registered viewer knows how to display. Viewers always win.
///
/// Recognized forms: `*.ext` and `**/*.ext`.
pub fn suppress_viewer_exclusions(
    patterns: &[String],
    viewer_extensions: &[String],
) -> Vec<String>
{
    let ext_only = Regex::new(r"^(?:\*\*/)?\*\.([^./*?\[\]{}]+)$").ok();
    let viewers: Vec<String> = viewer_extensions
        .iter()
        .map(|e| {
            e.trim_start_matches('.')
                .to_string()
        })
        .collect();

    patterns
        .iter()
        .filter(|p| {
            let ext = ext_only
                .as_ref()
                .and_then(|re| re.captures(p))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str());
            !matches!(ext, Some(ext) if viewers.iter().any(|v| v == ext))
        })
        .cloned()
        .collect()
}
