//! Context assembly: roots in, `{tree, files}` out.
//!
//! Diff mode needs both the diff flag and a second root. The root given
//! in `root` is the *before* state and `diff_root` the *after* (current)
//! state; the tree always shows the after state, while `files` shows what
//! changed. Plain mode enumerates `root` alone.
//!
//! Every call builds a fresh reconciliation and record list, so one
//! options value can be assembled repeatedly (or different options
//! interleaved) without state leaking between calls.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::core::diff::{FileRecord, format_change, format_plain};
use crate::core::reconcile::{Presence, Reconciler};
use crate::core::tree::TreeNode;
use crate::core::viewer::ViewerRegistry;
use crate::infra::io::{DEFAULT_MAX_BYTES, read_head};
use crate::infra::walk::{RelativePath, TraversalIo};

/// What to enumerate and how.
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    /// Plain-mode root, or the before-root in diff mode
    pub root: PathBuf,
    /// Diff mode flag; ignored unless `diff_root` is also set
    pub diff: bool,
    /// After-root (current state) for diff mode
    pub diff_root: Option<PathBuf>,
    /// Extension allow-list (empty = all)
    pub extensions: Vec<String>,
    /// Exclusion globs
    pub exclude: Vec<String>,
    /// Per-file byte cap; `None` reads whole files
    pub max_bytes: Option<usize>,
}

impl AssembleOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            diff: false,
            diff_root: None,
            extensions: Vec::new(),
            exclude: Vec::new(),
            max_bytes: Some(DEFAULT_MAX_BYTES),
        }
    }

    /// Compare `root` (before) against `after`.
    pub fn with_diff(mut self, after: impl Into<PathBuf>) -> Self {
        self.diff = true;
        self.diff_root = Some(after.into());
        self
    }

    pub fn with_extensions(mut self, exts: &[&str]) -> Self {
        self.extensions = exts.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn with_exclude(mut self, globs: &[&str]) -> Self {
        self.exclude = globs.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn with_max_bytes(mut self, cap: Option<usize>) -> Self {
        self.max_bytes = cap;
        self
    }

    fn diff_target(&self) -> Option<&Path> {
        if self.diff {
            self.diff_root.as_deref()
        } else {
            None
        }
    }
}

/// Result of one assembly pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    /// Canonical form of `options.root`
    pub absolute_path: PathBuf,
    /// After-root in diff mode
    pub diff_path: Option<PathBuf>,
    pub tree: String,
    pub files: Vec<FileRecord>,
}

impl Assembly {
    /// Template variables. Keys already present in `caller` win; only
    /// missing ones are filled in.
    pub fn into_variables(self, mut caller: Map<String, Value>, show_project_path: bool) -> Map<String, Value> {
        let diff_path = self
            .diff_path
            .as_ref()
            .map_or(Value::Null, |p| json!(p.to_string_lossy()));
        let defaults = [
            ("absolute_code_path", json!(self.absolute_path.to_string_lossy())),
            ("source_tree", Value::String(self.tree)),
            ("files", json!(self.files)),
            ("diffPath", diff_path),
            ("showProjectPath", Value::Bool(show_project_path)),
        ];
        for (key, value) in defaults {
            let slot = caller.entry(key.to_string()).or_insert(Value::Null);
            if slot.is_null() {
                *slot = value;
            }
        }
        caller
    }
}

/// Enumerate, reconcile and format according to `options`.
///
/// Unreadable files are skipped and reported through `on_error`; only
/// configuration problems (such as an invalid glob) fail the call.
pub fn assemble(
    options: &AssembleOptions,
    viewers: &ViewerRegistry,
    on_error: &mut dyn FnMut(TraversalIo),
) -> Result<Assembly> {
    let reconciler = Reconciler::new(&options.exclude, &options.extensions, &viewers.extensions())?;
    let absolute_path = absolute(&options.root);
    let loader = ContentLoader {
        viewers,
        max_bytes: options.max_bytes,
    };

    let Some(after_root) = options.diff_target() else {
        debug!(root = %absolute_path.display(), "plain mode");
        let files = reconciler.scan(&options.root, on_error);
        let tree = TreeNode::from_paths(files.keys()).render();
        let mut records = Vec::with_capacity(files.len());
        for (rel, abs) in &files {
            if let Some(content) = loader.load(rel, abs, on_error) {
                records.push(format_plain(rel, &content));
            }
        }
        return Ok(Assembly {
            absolute_path,
            diff_path: None,
            tree,
            files: records,
        });
    };

    debug!(
        before = %absolute_path.display(),
        after = %after_root.display(),
        "diff mode"
    );
    let entries = reconciler.reconcile(&options.root, after_root, on_error);

    // The tree reflects the after state only.
    let tree = TreeNode::from_paths(entries.iter().filter_map(|e| match e.presence {
        Presence::Deleted { .. } => None,
        _ => Some(&e.path),
    }))
    .render();

    let mut records = Vec::new();
    for entry in &entries {
        let rel = &entry.path;
        let record = match &entry.presence {
            Presence::Both { before, after } => {
                let Some(old) = loader.load(rel, before, on_error) else {
                    continue;
                };
                let Some(new) = loader.load(rel, after, on_error) else {
                    continue;
                };
                format_change(rel, Some(&old), Some(&new))
            }
            Presence::Deleted { before } => loader
                .load(rel, before, on_error)
                .and_then(|old| format_change(rel, Some(&old), None)),
            Presence::Added { after } => loader
                .load(rel, after, on_error)
                .and_then(|new| format_change(rel, None, Some(&new))),
        };
        if let Some(record) = record {
            records.push(record);
        }
    }

    Ok(Assembly {
        absolute_path,
        diff_path: Some(absolute(after_root)),
        tree,
        files: records,
    })
}

/// Reads file content through a registered viewer or the byte-capped reader.
struct ContentLoader<'a> {
    viewers: &'a ViewerRegistry,
    max_bytes: Option<usize>,
}

impl ContentLoader<'_> {
    fn load(
        &self,
        rel: &RelativePath,
        abs: &Path,
        on_error: &mut dyn FnMut(TraversalIo),
    ) -> Option<String> {
        let result = match self.viewers.get(&rel.extension()) {
            Some(viewer) => {
                debug!(file = %rel, "custom viewer");
                viewer.view(abs)
            }
            None => read_head(abs, self.max_bytes),
        };
        match result {
            Ok(text) => Some(text),
            Err(err) => {
                on_error(TraversalIo {
                    path: abs.to_path_buf(),
                    message: format!("{err:#}"),
                });
                None
            }
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
