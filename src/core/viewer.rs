//! Custom content viewers keyed by file extension.
//!
//! A viewer turns a file that is not plain text (pdf, docx, xlsx...) into
//! prompt-ready text. Registered extensions also override extension-only
//! exclusion globs, see [`crate::infra::walk::suppress_viewer_exclusions`].

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};

/// Produces the textual view of one file.
pub trait FileViewer: Send + Sync {
    fn view(&self, path: &Path) -> Result<String>;
}

impl<F> FileViewer for F
where
    F: Fn(&Path) -> Result<String> + Send + Sync,
{
    fn view(&self, path: &Path) -> Result<String> {
        self(path)
    }
}

/// Runs an external program and captures its stdout as the view.
///
/// The command line is split into shell-style words; the token `{path}` is replaced
/// by the file path. Without a `{path}` token the path is appended.
#[derive(Debug, Clone)]
pub struct CommandViewer {
    program: String,
    args: Vec<String>,
}

impl CommandViewer {
    /// Split `command_line` into program and arguments. Whitespace
    /// separates words except inside single or double quotes; a
    /// backslash outside single quotes escapes the next character.
    pub fn parse(command_line: &str) -> Result<Self> {
        let mut parts = split_words(command_line)?.into_iter();
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty viewer command"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

fn split_words(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') | (None, '\\') => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("viewer command ends with a backslash"))?;
                word.push(escaped);
                in_word = true;
            }
            (Some(_), c) => word.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            (None, c) => {
                word.push(c);
                in_word = true;
            }
        }
    }
    if quote.is_some() {
        anyhow::bail!("unterminated quote in viewer command: {line}");
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}

impl FileViewer for CommandViewer {
    fn view(&self, path: &Path) -> Result<String> {
        let path_arg = path.to_string_lossy();
        let mut has_placeholder = false;
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                if a.contains("{path}") {
                    has_placeholder = true;
                    a.replace("{path}", &path_arg)
                } else {
                    a.clone()
                }
            })
            .collect();

        let mut cmd = Command::new(&self.program);
        cmd.args(&args);
        if !has_placeholder {
            cmd.arg(path);
        }

        let output = cmd
            .output()
            .with_context(|| format!("Failed to spawn viewer {}", self.program))?;
        if !output.status.success() {
            bail!(
                "viewer {} failed on {}: {}",
                self.program,
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Extension → viewer table. Built once from configuration and only read
/// during a pass.
#[derive(Default)]
pub struct ViewerRegistry {
    viewers: BTreeMap<String, Box<dyn FileViewer>>,
}

impl ViewerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `viewer` for `ext` (with or without the leading dot).
    pub fn register(&mut self, ext: &str, viewer: Box<dyn FileViewer>) {
        let key = normalize_ext(ext);
        tracing::debug!(ext = %key, "viewer registered");
        self.viewers.insert(key, viewer);
    }

    /// Build from `ext = "command {path}"` pairs.
    pub fn from_commands<'a, I>(commands: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut reg = Self::new();
        for (ext, command_line) in commands {
            let viewer = CommandViewer::parse(command_line)
                .with_context(|| format!("invalid viewer for .{ext}"))?;
            reg.register(ext, Box::new(viewer));
        }
        Ok(reg)
    }

    pub fn get(&self, ext: &str) -> Option<&dyn FileViewer> {
        self.viewers.get(&normalize_ext(ext)).map(|v| v.as_ref())
    }

    /// Registered extensions, without dots.
    pub fn extensions(&self) -> Vec<String> {
        self.viewers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.viewers.is_empty()
    }
}

fn normalize_ext(ext: &str) -> String {
    ext.trim_start_matches('.').to_ascii_lowercase()
}
