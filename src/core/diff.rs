//! Per-file change formatting.
//!
//! Every file that reaches a prompt becomes a [`FileRecord`]: a one-line
//! `# file:` header followed by a fenced block. Changed files carry a
//! unified diff (3 lines of context); deleted files carry only a stub so
//! that removed content does not spend prompt budget.

use serde::Serialize;
use similar::TextDiff;

use crate::infra::io::line_count;
use crate::infra::walk::RelativePath;

/// Lines of context around each hunk.
pub const CONTEXT_LINES: usize = 3;

/// Marker emitted in place of a deleted file's content.
pub const OMISSION_MARKER: &str = "-// contents omitted …";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Deleted,
    Modified,
    Unchanged,
}

/// A rendered file block, ready for the template's `files` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub path: RelativePath,
    pub status: ChangeStatus,
    /// Header plus fenced body, exposed to templates as `code`.
    #[serde(rename = "code")]
    pub content: String,
}

/// Format one reconciled path.
///
/// Returns `None` when both sides exist and are identical: unchanged
/// files keep their place in the tree but never appear in diff output.
/// Both sides absent is also `None`.
pub fn format_change(
    path: &RelativePath,
    before: Option<&str>,
    after: Option<&str>,
) -> Option<FileRecord> {
    match (before, after) {
        (Some(b), Some(a)) if b == a => None,
        (Some(b), Some(a)) => Some(modified(path, b, a)),
        (Some(b), None) => Some(deleted(path, b)),
        (None, Some(a)) => Some(added(path, a)),
        (None, None) => None,
    }
}

fn modified(path: &RelativePath, before: &str, after: &str) -> FileRecord {
    let diff = TextDiff::from_lines(before, after);
    let body = diff
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .to_string();

    FileRecord {
        path: path.clone(),
        status: ChangeStatus::Modified,
        content: fenced(
            &format!("# file: {path} | change: modified"),
            "diff",
            body.trim_end_matches('\n'),
        ),
    }
}

fn deleted(path: &RelativePath, before: &str) -> FileRecord {
    let stub = format!("@@ -1,{} +0,0 @@\n{OMISSION_MARKER}", line_count(before));
    FileRecord {
        path: path.clone(),
        status: ChangeStatus::Deleted,
        content: fenced(&format!("# file: {path} | change: deleted"), "diff", &stub),
    }
}

fn added(path: &RelativePath, after: &str) -> FileRecord {
    let mut body = format!("@@ -0,0 +1,{} @@", line_count(after));
    for line in after.lines() {
        body.push_str("\n+");
        body.push_str(line);
    }
    FileRecord {
        path: path.clone(),
        status: ChangeStatus::Added,
        content: fenced(&format!("# file: {path} | change: new"), "diff", &body),
    }
}

/// Plain (non-diff) record: raw content in a fence tagged by extension.
pub fn format_plain(path: &RelativePath, content: &str) -> FileRecord {
    FileRecord {
        path: path.clone(),
        status: ChangeStatus::Unchanged,
        content: fenced(&format!("# file: {path}"), &path.extension(), content),
    }
}

fn fenced(header: &str, lang: &str, body: &str) -> String {
    format!("{header}\n\n```{lang}\n{body}\n```")
}
