//! Script execution for template blocks.
//!
//! Each dialect is a [`ScriptEngine`]: it wraps the block body into a
//! runnable source file, names the interpreter, and parses what the
//! interpreter printed. The runner owns the shared plumbing: temp files,
//! process spawning, exit status and error context.
//!
//! The execution context is handed over as a JSON file whose path is the
//! script's first argument (`CODEPROMPT_CONTEXT` for shell blocks), so
//! its size is not bounded by pipe buffers or argv limits.
//!
//! Node and Python blocks also get helper functions: `extractCodeBlocks`
//! for fenced blocks in a string, and `queryLLM` / `queryContext`, which
//! call back into this binary (`CODEPROMPT_BIN ask`) and return the
//! answer's `data`. Node blocks additionally get `executeScript`, which
//! runs a further snippet against the same context.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, trace};

use crate::core::template::{Language, ScriptBlock};
use crate::infra::config::ScriptsConfig;

/// Separates a block's own stdout from the wrapper's JSON result.
const RESULT_SENTINEL: &str = "__CODEPROMPT_RESULT__";

/// Shell values longer than this are left out of the environment; the
/// full context is still in `CODEPROMPT_CONTEXT`.
const MAX_ENV_VALUE: usize = 32 * 1024;

/// Binary the query helpers call back into.
pub const BIN_ENV: &str = "CODEPROMPT_BIN";
/// Root (and optional diff root) handed to `queryContext`.
pub const ROOT_ENV: &str = "CODEPROMPT_ROOT";
pub const DIFF_ROOT_ENV: &str = "CODEPROMPT_DIFF_ROOT";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("block #{index} ({dialect}): could not start `{program}`")]
    Spawn {
        index: usize,
        dialect: Language,
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("block #{index} ({dialect}) exited with {status}: {stderr}")]
    Failed {
        index: usize,
        dialect: Language,
        status: String,
        stderr: String,
    },

    #[error("block #{index} ({dialect}) produced unreadable output: {message}")]
    BadOutput {
        index: usize,
        dialect: Language,
        message: String,
    },
}

impl ScriptError {
    pub fn index(&self) -> usize {
        match self {
            ScriptError::Spawn { index, .. }
            | ScriptError::Failed { index, .. }
            | ScriptError::BadOutput { index, .. } => *index,
        }
    }
}

/// What a block handed back.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOutput {
    /// A returned object, merged top-level
    Object(Map<String, Value>),
    /// Shell `KEY=value` bindings, merged top-level
    Vars(Map<String, Value>),
    /// Anything that is not an object leaves the context alone
    Discarded,
}

impl ScriptOutput {
    pub fn into_delta(self) -> Option<Map<String, Value>> {
        match self {
            ScriptOutput::Object(m) | ScriptOutput::Vars(m) => Some(m),
            ScriptOutput::Discarded => None,
        }
    }
}

/// One scripting dialect.
pub trait ScriptEngine: Send + Sync {
    /// Interpreter to spawn.
    fn program(&self) -> &str;

    /// Extension for the generated source file.
    fn file_suffix(&self) -> &str;

    /// Full program text for a block body run against `ctx`.
    fn wrap(&self, body: &str, ctx: &Map<String, Value>) -> String;

    /// Extra process setup, such as environment bindings.
    fn configure(&self, _cmd: &mut Command, _ctx: &Map<String, Value>) {}

    /// Turn captured stdout into an output, or explain why it can't be.
    fn parse(&self, stdout: &str) -> Result<ScriptOutput, String>;
}

/// JSON result following the last sentinel line.
fn parse_sentinel(stdout: &str) -> Result<ScriptOutput, String> {
    let mut lines = stdout.lines().rev().peekable();
    let mut payload = None;
    while let Some(line) = lines.next() {
        if lines.peek() == Some(&RESULT_SENTINEL) {
            payload = Some(line);
            break;
        }
    }
    let payload = payload.ok_or_else(|| "script ended before returning".to_string())?;
    match serde_json::from_str(payload).map_err(|e| e.to_string())? {
        Value::Object(map) => Ok(ScriptOutput::Object(map)),
        _ => Ok(ScriptOutput::Discarded),
    }
}

/// Node.js. Context keys are ambient through `with`, and the body runs
/// as an async function so it may `await` and `return`.
pub struct NodeEngine {
    program: String,
}

impl ScriptEngine for NodeEngine {
    fn program(&self) -> &str {
        &self.program
    }

    fn file_suffix(&self) -> &str {
        ".cjs"
    }

    fn wrap(&self, body: &str, _ctx: &Map<String, Value>) -> String {
        format!(
            r#"const __fs = require("fs");
const __child = require("child_process");
const context = JSON.parse(__fs.readFileSync(process.argv[2], "utf8") || "{{}}");
function extractCodeBlocks(text) {{
  const found = [];
  const re = /```([^\n`]*)\n([\s\S]*?)```/g;
  let m;
  while ((m = re.exec(String(text))) !== null) {{
    found.push({{ lang: m[1].trim(), code: m[2] }});
  }}
  return found;
}}
function __ask(args) {{
  const bin = process.env.{BIN_ENV} || "cpr";
  const out = __child.execFileSync(bin, ["--quiet", "ask", ...args], {{ encoding: "utf8", stdio: ["ignore", "pipe", "inherit"] }});
  return JSON.parse(out).data;
}}
async function queryLLM(question) {{
  return __ask(["--no-context", process.env.{ROOT_ENV} || ".", String(question)]);
}}
async function queryContext(question) {{
  const args = [process.env.{ROOT_ENV} || "."];
  if (process.env.{DIFF_ROOT_ENV}) args.push("--diff-path", process.env.{DIFF_ROOT_ENV});
  args.push(String(question));
  return __ask(args);
}}
const __AsyncFunction = Object.getPrototypeOf(async function () {{}}).constructor;
async function executeScript(code) {{
  return await new __AsyncFunction("__scope", "with (__scope) {{ return (async function () {{\n" + code + "\n}})(); }}")(context);
}}
const __block = (function () {{ with (context) {{ return async function () {{
{body}
}}; }} }})();
__block().then((__result) => {{
  const __json = JSON.stringify(__result === undefined ? null : __result);
  process.stdout.write("\n{RESULT_SENTINEL}\n" + (__json === undefined ? "null" : __json) + "\n");
}}).catch((err) => {{
  console.error(err && err.stack ? err.stack : String(err));
  process.exit(1);
}});
"#
        )
    }

    fn parse(&self, stdout: &str) -> Result<ScriptOutput, String> {
        parse_sentinel(stdout)
    }
}

/// CPython. Context keys become module globals and the body is the
/// body of a function whose return value is the result.
pub struct PythonEngine {
    program: String,
}

impl ScriptEngine for PythonEngine {
    fn program(&self) -> &str {
        &self.program
    }

    fn file_suffix(&self) -> &str {
        ".py"
    }

    fn wrap(&self, body: &str, ctx: &Map<String, Value>) -> String {
        let names: Vec<&str> = ctx
            .keys()
            .map(String::as_str)
            .filter(|k| is_python_name(k))
            .collect();
        let mut indented = String::new();
        if !names.is_empty() {
            indented.push_str("    global ");
            indented.push_str(&names.join(", "));
            indented.push('\n');
        }
        for line in body.lines() {
            indented.push_str("    ");
            indented.push_str(line);
            indented.push('\n');
        }
        format!(
            r#"import json as __json
import sys as __sys
with open(__sys.argv[1], encoding="utf-8") as __f:
    context = __json.load(__f)
globals().update(context)

def extractCodeBlocks(text):
    import re as __re
    return [{{"lang": m.group(1).strip(), "code": m.group(2)}}
            for m in __re.finditer(r"```([^\n`]*)\n(.*?)```", str(text), __re.S)]

def __ask(args):
    import os as __os
    import subprocess as __subprocess
    bin = __os.environ.get("{BIN_ENV}", "cpr")
    out = __subprocess.run([bin, "--quiet", "ask", *args], check=True, stdout=__subprocess.PIPE, text=True).stdout
    return __json.loads(out)["data"]

def queryLLM(question):
    import os as __os
    return __ask(["--no-context", __os.environ.get("{ROOT_ENV}", "."), str(question)])

def queryContext(question):
    import os as __os
    args = [__os.environ.get("{ROOT_ENV}", ".")]
    if __os.environ.get("{DIFF_ROOT_ENV}"):
        args += ["--diff-path", __os.environ["{DIFF_ROOT_ENV}"]]
    return __ask(args + [str(question)])

def __block():
{indented}    pass

__result = __block()
__sys.stdout.write("\n{RESULT_SENTINEL}\n" + __json.dumps(__result, default=str) + "\n")
"#
        )
    }

    fn parse(&self, stdout: &str) -> Result<ScriptOutput, String> {
        parse_sentinel(stdout)
    }
}

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del",
    "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda", "nonlocal",
    "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

/// Context keys the block may read and rebind as plain names.
fn is_python_name(key: &str) -> bool {
    is_env_name(key) && !PYTHON_KEYWORDS.contains(&key)
}

/// POSIX shell. Context keys are exported; `KEY=value` lines on stdout
/// become bindings.
pub struct ShellEngine {
    program: String,
}

fn is_env_name(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl ScriptEngine for ShellEngine {
    fn program(&self) -> &str {
        &self.program
    }

    fn file_suffix(&self) -> &str {
        ".sh"
    }

    fn wrap(&self, body: &str, _ctx: &Map<String, Value>) -> String {
        format!("{body}\n")
    }

    fn configure(&self, cmd: &mut Command, ctx: &Map<String, Value>) {
        for (key, value) in ctx {
            if !is_env_name(key) {
                continue;
            }
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            if text.len() > MAX_ENV_VALUE {
                trace!(key, "context value too large for the environment");
                continue;
            }
            cmd.env(key, text);
        }
    }

    fn parse(&self, stdout: &str) -> Result<ScriptOutput, String> {
        let mut vars = Map::new();
        for line in stdout.lines() {
            if let Some((key, value)) = line.split_once('=')
                && is_env_name(key)
            {
                vars.insert(key.to_string(), Value::String(value.to_string()));
            }
        }
        Ok(ScriptOutput::Vars(vars))
    }
}

/// Dispatches blocks to their dialect's engine.
pub struct ScriptRunner {
    node: NodeEngine,
    python: PythonEngine,
    shell: ShellEngine,
    template_dir: Option<PathBuf>,
    roots: Option<(PathBuf, Option<PathBuf>)>,
}

impl ScriptRunner {
    pub fn new(config: &ScriptsConfig) -> Self {
        Self {
            node: NodeEngine {
                program: config.node.clone(),
            },
            python: PythonEngine {
                program: config.python.clone(),
            },
            shell: ShellEngine {
                program: config.shell.clone(),
            },
            template_dir: None,
            roots: None,
        }
    }

    /// Directory exposed to Python blocks as `templateDir`.
    pub fn with_template_dir(mut self, dir: Option<&Path>) -> Self {
        self.template_dir = dir.map(Path::to_path_buf);
        self
    }

    /// Roots the `queryContext` helper asks about.
    pub fn with_roots(mut self, root: &Path, diff_root: Option<&Path>) -> Self {
        self.roots = Some((root.to_path_buf(), diff_root.map(Path::to_path_buf)));
        self
    }

    pub fn engine(&self, language: &Language) -> Option<&dyn ScriptEngine> {
        match language {
            Language::JavaScript => Some(&self.node),
            Language::Python => Some(&self.python),
            Language::Shell => Some(&self.shell),
            Language::Other(_) => None,
        }
    }

    /// Execute one block against `ctx`. Blocks in a dialect without an
    /// engine are skipped and yield [`ScriptOutput::Discarded`].
    pub fn run(&self, block: &ScriptBlock, ctx: &Map<String, Value>) -> Result<ScriptOutput, ScriptError> {
        let Some(engine) = self.engine(&block.language) else {
            debug!(index = block.index, language = %block.language, "no engine, block skipped");
            return Ok(ScriptOutput::Discarded);
        };

        let mut ctx = ctx.clone();
        if block.language == Language::Python {
            let dir = self
                .template_dir
                .as_ref()
                .map_or(Value::Null, |d| Value::String(d.to_string_lossy().into_owned()));
            ctx.insert("templateDir".to_string(), dir);
        }

        let spawn_err = |source: io::Error| ScriptError::Spawn {
            index: block.index,
            dialect: block.language.clone(),
            program: engine.program().to_string(),
            source,
        };

        let script = write_temp(engine.file_suffix(), &engine.wrap(&block.body, &ctx)).map_err(spawn_err)?;
        let context_json = serde_json::to_string(&ctx).map_err(|e| spawn_err(e.into()))?;
        let context_file = write_temp(".json", &context_json).map_err(spawn_err)?;

        let mut cmd = Command::new(engine.program());
        cmd.arg(script.path())
            .arg(context_file.path())
            .env("CODEPROMPT_CONTEXT", context_file.path())
            .stdin(Stdio::null());
        if let Ok(bin) = std::env::current_exe() {
            cmd.env(BIN_ENV, bin);
        }
        if let Some((root, diff_root)) = &self.roots {
            cmd.env(ROOT_ENV, root);
            if let Some(diff_root) = diff_root {
                cmd.env(DIFF_ROOT_ENV, diff_root);
            }
        }
        engine.configure(&mut cmd, &ctx);

        debug!(index = block.index, language = %block.language, phase = ?block.phase, "running block");
        let output = cmd.output().map_err(spawn_err)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(ScriptError::Failed {
                index: block.index,
                dialect: block.language.clone(),
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        if !stderr.trim().is_empty() {
            debug!(index = block.index, stderr = %stderr.trim(), "block wrote to stderr");
        }

        engine
            .parse(&stdout)
            .map_err(|message| ScriptError::BadOutput {
                index: block.index,
                dialect: block.language.clone(),
                message,
            })
    }
}

fn write_temp(suffix: &str, text: &str) -> io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("codeprompt-")
        .suffix(suffix)
        .tempfile()?;
    file.write_all(text.as_bytes())?;
    file.flush()?;
    Ok(file)
}
