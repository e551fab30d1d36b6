//! Filepath: src/core/tree.rs
//! Source-tree view of a set of relative paths.
//!
//! - `render` produces the plain ASCII tree embedded in prompts
//!   (`├── `, `└── `, `|   ` continuation).
//! - `print_tree` is the terminal view used by `cpr tree`, colored by
//!   extension and drawn with ptree.
//! - BTreeMap children keep sibling order deterministic.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use owo_colors::OwoColorize;
use ptree::TreeBuilder;

use crate::cli::{AppContext, TreeArgs};
use crate::core::reconcile::Reconciler;
use crate::infra::config::load_config;
use crate::infra::walk::RelativePath;

/// One level of the tree: a directory of named children, or a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    Branch(BTreeMap<String, TreeNode>),
    Leaf(RelativePath),
}

impl Default for TreeNode {
    fn default() -> Self {
        TreeNode::Branch(BTreeMap::new())
    }
}

impl TreeNode {
    /// Build a tree from paths. A later path never turns an existing leaf
    /// into a branch (or the reverse); the first shape wins.
    pub fn from_paths<'a, I>(paths: I) -> Self
    where
        I: IntoIterator<Item = &'a RelativePath>,
    {
        let mut root = TreeNode::default();
        for p in paths {
            root.insert(p);
        }
        root
    }

    fn insert(&mut self, path: &RelativePath) {
        let segments: Vec<&str> = path.segments().collect();
        let Some((file, dirs)) = segments.split_last() else {
            return;
        };

        let mut current = self;
        for dir in dirs {
            let TreeNode::Branch(children) = current else {
                return;
            };
            current = children
                .entry((*dir).to_string())
                .or_insert_with(TreeNode::default);
        }

        if let TreeNode::Branch(children) = current {
            children
                .entry((*file).to_string())
                .or_insert_with(|| TreeNode::Leaf(path.clone()));
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, TreeNode>> {
        match self {
            TreeNode::Branch(c) => Some(c),
            TreeNode::Leaf(_) => None,
        }
    }

    /// Plain ASCII rendering, one entry per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let TreeNode::Branch(children) = self {
            render_level(children, "", &mut out);
        }
        out
    }
}

fn render_level(children: &BTreeMap<String, TreeNode>, prefix: &str, out: &mut String) {
    let last = children.len().saturating_sub(1);
    for (i, (name, node)) in children.iter().enumerate() {
        let is_last = i == last;
        out.push_str(prefix);
        out.push_str(if is_last { "└── " } else { "├── " });
        out.push_str(name);
        out.push('\n');

        if let TreeNode::Branch(grand) = node
            && !grand.is_empty()
        {
            let next = format!("{prefix}{}", if is_last { "    " } else { "|   " });
            render_level(grand, &next, out);
        }
    }
}

pub fn run(args: TreeArgs, ctx: &AppContext) -> Result<()> {
    let config = load_config()?;

    // Combine config ignore patterns with CLI args
    let mut ignore_patterns = config.ignore_patterns.clone();
    ignore_patterns.extend(args.ignore);
    let mut extensions = config.extensions.clone();
    extensions.extend(args.extensions);

    let viewer_exts: Vec<String> = config.viewers.keys().cloned().collect();
    let reconciler = Reconciler::new(&ignore_patterns, &extensions, &viewer_exts)?;
    let files = reconciler.scan(&args.path, &mut |e| tracing::warn!("{e}"));
    let tree = TreeNode::from_paths(files.keys());

    if !ctx.quiet {
        print_tree(&args.path, &tree, !ctx.no_color)?;
    }

    Ok(())
}

/// Print the tree with colored labels.
fn print_tree(root: &Path, tree: &TreeNode, color: bool) -> Result<()> {
    let root_label = root
        .file_name()
        .unwrap_or(root.as_os_str())
        .to_string_lossy()
        .to_string();
    let mut builder = TreeBuilder::new(dir_label(&root_label, color));

    if let Some(children) = tree.children() {
        add_children_to_builder(&mut builder, children, color);
    }

    let tree = builder.build();
    ptree::print_tree(&tree)?;

    Ok(())
}

fn add_children_to_builder(
    builder: &mut TreeBuilder,
    children: &BTreeMap<String, TreeNode>,
    color: bool,
) {
    for (name, child) in children {
        match child {
            TreeNode::Leaf(_) => {
                builder.add_empty_child(file_label(name, color));
            }
            TreeNode::Branch(grand) => {
                builder.begin_child(dir_label(name, color));
                add_children_to_builder(builder, grand, color);
                builder.end_child();
            }
        }
    }
}

fn dir_label(name: &str, color: bool) -> String {
    if color {
        format!("{}/", name.blue())
    } else {
        format!("{name}/")
    }
}

fn file_label(name: &str, color: bool) -> String {
    if !color {
        return name.to_string();
    }
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    match ext {
        "rs" => name.yellow().to_string(),
        "py" => name.green().to_string(),
        "js" | "jsx" | "ts" | "tsx" => name.cyan().to_string(),
        "go" => name.magenta().to_string(),
        "c" | "cpp" | "cc" | "cxx" | "h" | "hpp" => name.red().to_string(),
        "toml" | "yaml" | "yml" | "json" => name.bright_blue().to_string(),
        _ => name.to_string(),
    }
}
