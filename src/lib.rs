//! **codeprompt** - Diff-aware context prompts from source trees
//!
//! Walks one directory (or reconciles two), renders the files and tree into a
//! handlebars template, runs the template's embedded scripts before and after
//! rendering, and sends the result to the first eligible LLM provider.

/// Command-line interface with clap integration
pub mod cli;

/// Shell completion generation
pub mod completion;

/// Prompt assembly, templates, scripts and providers
pub mod core {
    /// Enumerate, reconcile and format files into template variables
    pub mod assemble;
    pub use assemble::{AssembleOptions, Assembly, assemble};

    /// Per-file change formatting (unified hunks, omission markers)
    pub mod diff;
    pub use diff::{ChangeStatus, FileRecord};

    /// Pre-phase, render, post-phase orchestration
    pub mod pipeline;
    pub use pipeline::{ExecutionContext, OnError, Pipeline, PipelineOutcome, RenderStep, Stage};

    /// High-level prompt generator and command handlers
    pub mod prompt;
    pub use prompt::{CodePrompt, PromptContext, QaRecord};

    /// LLM providers and the fallback driver
    pub mod provider;
    pub use provider::{FallbackDriver, HttpClients, ProviderError, ProviderId, RequestError};

    /// Before/after presence for two scanned roots
    pub mod reconcile;
    pub use reconcile::{Presence, ReconciledEntry, Reconciler};

    /// Template rendering seam (handlebars)
    pub mod render;
    pub use render::{HandlebarsRenderer, Renderer};

    /// Answer schemas inferred from example JSON
    pub mod schema;
    pub use schema::{Schema, SchemaError};

    /// Interpreter-backed execution of script blocks
    pub mod script;
    pub use script::{ScriptError, ScriptRunner};

    /// Fenced-block extraction from templates
    pub mod template;
    pub use template::{ExtractedTemplate, Language, Phase, ScriptBlock, TemplateError};

    /// tiktoken-based prompt token counting
    pub mod tokens;
    pub use tokens::{TokenCount, TokenCounter};

    /// Source tree rendering
    pub mod tree;
    pub use tree::run as tree_run;

    /// External viewers for binary-ish extensions
    pub mod viewer;
    pub use viewer::{FileViewer, ViewerRegistry};
}

/// Infrastructure - configuration, I/O, walking and logging
pub mod infra {
    /// Layered configuration (file + CODEPROMPT_ env)
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// Bounded file reads
    pub mod io;

    /// tracing subscriber setup
    pub mod logging;

    /// Gitignore-aware directory walking
    pub mod walk;
    pub use walk::{FileWalker, RelativePath, TraversalIo};
}

pub use crate::cli::{AppContext, Cli, Commands};
pub use crate::core::{CodePrompt, FallbackDriver, ProviderId, tree_run};
pub use crate::infra::{Config, load_config};
