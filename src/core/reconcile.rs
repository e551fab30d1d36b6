//! PathSet reconciliation between two roots.
//!
//! Both roots are walked with the same exclusion rules, keyed by
//! [`RelativePath`], filtered by the extension allow-list, and merged into
//! one lexicographically ordered list. Content comparison is left to the
//! diff formatter; this module only decides *where* a path exists.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use crate::infra::walk::{FileWalker, RelativePath, TraversalIo, suppress_viewer_exclusions};

/// Where a reconciled path was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    /// In both roots; modified or unchanged depending on content.
    Both { before: PathBuf, after: PathBuf },
    /// Only in the before-root.
    Deleted { before: PathBuf },
    /// Only in the after-root.
    Added { after: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledEntry {
    pub path: RelativePath,
    pub presence: Presence,
}

/// Walks roots under one set of exclusion and extension rules.
pub struct Reconciler {
    walker: FileWalker,
    extensions: Vec<String>,
}

impl Reconciler {
    /// `exclude` globs are adjusted so that extensions with a registered
    /// viewer are never excluded by an extension-only pattern.
    pub fn new(exclude: &[String], extensions: &[String], viewer_exts: &[String]) -> Result<Self> {
        let effective = suppress_viewer_exclusions(exclude, viewer_exts);
        if effective.len() != exclude.len() {
            debug!(
                dropped = exclude.len() - effective.len(),
                "exclusions overridden by registered viewers"
            );
        }
        Ok(Self {
            walker: FileWalker::new(&effective)?,
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        })
    }

    /// Whether `path` passes the extension allow-list (empty list allows all).
    pub fn allows(&self, path: &RelativePath) -> bool {
        self.extensions.is_empty() || self.extensions.contains(&path.extension())
    }

    /// Files of a single root that pass every filter, in path order.
    pub fn scan(
        &self,
        root: &Path,
        on_error: &mut dyn FnMut(TraversalIo),
    ) -> BTreeMap<RelativePath, PathBuf> {
        let mut files = self.walker.walk_relative(root, on_error);
        files.retain(|rel, _| self.allows(rel));
        files
    }

    /// Union of both roots' paths, each classified by presence.
    pub fn reconcile(
        &self,
        before_root: &Path,
        after_root: &Path,
        on_error: &mut dyn FnMut(TraversalIo),
    ) -> Vec<ReconciledEntry> {
        let mut before = self.scan(before_root, on_error);
        let after = self.scan(after_root, on_error);
        debug!(
            before = before.len(),
            after = after.len(),
            "reconciling {} against {}",
            before_root.display(),
            after_root.display()
        );

        // BTreeMap iteration is already sorted; merge the two key sets.
        let mut merged: BTreeMap<RelativePath, Presence> = BTreeMap::new();
        for (rel, after_abs) in after {
            let presence = match before.remove(&rel) {
                Some(before_abs) => Presence::Both {
                    before: before_abs,
                    after: after_abs,
                },
                None => Presence::Added { after: after_abs },
            };
            merged.insert(rel, presence);
        }
        for (rel, before_abs) in before {
            merged.insert(rel, Presence::Deleted { before: before_abs });
        }

        merged
            .into_iter()
            .map(|(path, presence)| ReconciledEntry { path, presence })
            .collect()
    }
}

/// Convenience wrapper over [`Reconciler::reconcile`].
pub fn reconcile(
    before_root: &Path,
    after_root: &Path,
    exclude: &[String],
    extensions: &[String],
    on_error: &mut dyn FnMut(TraversalIo),
) -> Result<Vec<ReconciledEntry>> {
    Ok(Reconciler::new(exclude, extensions, &[])?.reconcile(before_root, after_root, on_error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) {
        let p = root.join(rel);
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(p, body).unwrap();
    }

    fn kinds(entries: &[ReconciledEntry]) -> Vec<(&str, &'static str)> {
        entries
            .iter()
            .map(|e| {
                let k = match e.presence {
                    Presence::Both { .. } => "both",
                    Presence::Deleted { .. } => "deleted",
                    Presence::Added { .. } => "added",
                };
                (e.path.as_str(), k)
            })
            .collect()
    }

    #[test]
    fn test_classifies_union_in_order() -> Result<()> {
        let before = TempDir::new()?;
        let after = TempDir::new()?;
        write(before.path(), "a.js", "X");
        write(before.path(), "gone.js", "old");
        write(after.path(), "a.js", "Y");
        write(after.path(), "lib/new.js", "new");

        let entries = reconcile(before.path(), after.path(), &[], &[], &mut |_| {})?;
        assert_eq!(
            kinds(&entries),
            vec![("a.js", "both"), ("gone.js", "deleted"), ("lib/new.js", "added")]
        );
        Ok(())
    }

    #[test]
    fn test_extension_filter_skips_entirely() -> Result<()> {
        let before = TempDir::new()?;
        let after = TempDir::new()?;
        write(before.path(), "a.js", "1");
        write(before.path(), "notes.md", "1");
        write(after.path(), "a.js", "2");
        write(after.path(), "README.md", "2");

        let entries = reconcile(before.path(), after.path(), &[], &["js".into()], &mut |_| {})?;
        assert_eq!(kinds(&entries), vec![("a.js", "both")]);
        Ok(())
    }

    #[test]
    fn test_viewer_extension_beats_exclusion() -> Result<()> {
        let root = TempDir::new()?;
        write(root.path(), "doc.pdf", "%PDF");
        write(root.path(), "img.png", "png");

        let exclude = vec!["**/*.pdf".to_string(), "**/*.png".to_string()];
        let reconciler = Reconciler::new(&exclude, &[], &["pdf".to_string()])?;
        let files = reconciler.scan(root.path(), &mut |_| {});
        let keys: Vec<&str> = files.keys().map(RelativePath::as_str).collect();
        assert_eq!(keys, vec!["doc.pdf"]);
        Ok(())
    }
}
