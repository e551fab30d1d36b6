//! High-level entry points: render a codebase prompt, ask a provider
//! about it, or run a scripted template end to end.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::cli::{AppContext, AskArgs, PromptArgs, RunArgs, SourceArgs};
use crate::core::assemble::{AssembleOptions, assemble};
use crate::core::pipeline::{ExecutionContext, OnError, Pipeline, PipelineOutcome, RenderStep};
use crate::core::provider::{FallbackDriver, HttpClients, ProviderId, RequestOutcome, compose_prompt};
use crate::core::render::{DEFAULT_TEMPLATE, HandlebarsRenderer, Renderer};
use crate::core::schema::{Schema, WRAPPER_FIELD};
use crate::core::script::ScriptRunner;
use crate::core::template::{ExtractedTemplate, ScriptBlock, extract};
use crate::core::tokens::TokenCounter;
use crate::core::viewer::ViewerRegistry;
use crate::infra::config::{Config, ProvidersConfig, ScriptsConfig, load_config};
use crate::infra::walk::TraversalIo;

/// Rendered prompt plus the variables it was rendered from.
#[derive(Debug, Serialize)]
pub struct PromptContext {
    pub context: Map<String, Value>,
    pub rendered: String,
    /// Files left out because they could not be read
    #[serde(skip)]
    pub skipped: Vec<TraversalIo>,
}

/// One answered question, kept while a QA session is recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QaRecord {
    pub question: String,
    pub answer: Value,
}

#[derive(Debug, Default)]
struct QaLog {
    active: Option<String>,
    sessions: IndexMap<String, Vec<QaRecord>>,
}

/// A configured prompt generator for one root (or root pair).
pub struct CodePrompt {
    options: AssembleOptions,
    viewers: ViewerRegistry,
    template: ExtractedTemplate,
    template_dir: Option<PathBuf>,
    show_project_path: bool,
    renderer: Box<dyn Renderer>,
    scripts: ScriptsConfig,
    qa: Mutex<QaLog>,
}

impl CodePrompt {
    /// Generator with the built-in template and default settings.
    pub fn new(options: AssembleOptions) -> Result<Self> {
        Ok(Self {
            options,
            viewers: ViewerRegistry::new(),
            template: extract(DEFAULT_TEMPLATE)?,
            template_dir: None,
            show_project_path: true,
            renderer: Box::new(HandlebarsRenderer::new()),
            scripts: ScriptsConfig::default(),
            qa: Mutex::new(QaLog::default()),
        })
    }

    /// Generator whose viewers, script interpreters and project-path flag
    /// come from `config`.
    pub fn from_config(options: AssembleOptions, config: &Config) -> Result<Self> {
        let mut this = Self::new(options)?;
        this.viewers = ViewerRegistry::from_commands(&config.viewers)?;
        this.scripts = config.scripts.clone();
        this.show_project_path = config.show_project_path;
        Ok(this)
    }

    /// Use `text` as the template. `dir` becomes `templateDir` for
    /// Python blocks.
    pub fn with_template_text(mut self, text: &str, dir: Option<&Path>) -> Result<Self> {
        self.template = extract(text)?;
        self.template_dir = dir.map(Path::to_path_buf);
        Ok(self)
    }

    pub fn load_template(self, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read template {}", path.display()))?;
        let dir = path
            .parent()
            .map(|p| dunce::canonicalize(p).unwrap_or_else(|_| p.to_path_buf()));
        self.with_template_text(&text, dir.as_deref())
    }

    pub fn with_viewers(mut self, viewers: ViewerRegistry) -> Self {
        self.viewers = viewers;
        self
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_scripts(mut self, scripts: ScriptsConfig) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_show_project_path(mut self, show: bool) -> Self {
        self.show_project_path = show;
        self
    }

    pub fn template(&self) -> &ExtractedTemplate {
        &self.template
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.template.schema.as_ref()
    }

    /// Assemble and render; returns the prompt text.
    pub fn generate_prompt(&self, vars: Map<String, Value>) -> Result<String> {
        Ok(self.generate_prompt_with_context(vars)?.rendered)
    }

    /// Assemble and render, keeping the variables used.
    pub fn generate_prompt_with_context(&self, vars: Map<String, Value>) -> Result<PromptContext> {
        let mut skipped = Vec::new();
        let assembly = assemble(&self.options, &self.viewers, &mut |e| {
            warn!("{e}");
            skipped.push(e);
        })?;
        let context = assembly.into_variables(vars, self.show_project_path);
        let rendered = self
            .renderer
            .render(&self.template.template, &context)?;
        Ok(PromptContext {
            context,
            rendered,
            skipped,
        })
    }

    /// Record every later answered question under `session`. An empty
    /// name stops recording; earlier sessions are kept.
    pub fn record_qa(&self, session: &str) {
        let mut log = self.qa.lock().unwrap_or_else(PoisonError::into_inner);
        if session.is_empty() {
            log.active = None;
            return;
        }
        log.sessions.entry(session.to_string()).or_default();
        log.active = Some(session.to_string());
    }

    /// Questions and answers recorded under `session`, oldest first.
    pub fn qa_recordings(&self, session: &str) -> Option<Vec<QaRecord>> {
        self.qa
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .get(session)
            .cloned()
    }

    fn remember(&self, question: &str, outcome: &RequestOutcome) {
        let mut log = self.qa.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(active) = log.active.clone() else {
            return;
        };
        log.sessions
            .entry(active)
            .or_default()
            .push(QaRecord {
                question: question.to_string(),
                answer: outcome.data.clone(),
            });
    }

    /// Ask a question without any codebase context.
    pub fn query(&self, driver: &FallbackDriver<'_>, question: &str, schema: Option<&Schema>) -> Result<RequestOutcome> {
        let outcome = driver.request_default(question, schema)?;
        self.remember(question, &outcome);
        Ok(outcome)
    }

    /// Ask a question about the rendered codebase. Without an explicit
    /// schema the template's schema block is used.
    pub fn request(
        &self,
        driver: &FallbackDriver<'_>,
        question: Option<&str>,
        schema: Option<&Schema>,
        vars: Map<String, Value>,
    ) -> Result<RequestOutcome> {
        let rendered = self.generate_prompt(vars)?;
        let prompt = compose_prompt(&rendered, question);
        let outcome = driver.request_default(&prompt, schema.or(self.schema()))?;
        self.remember(question.unwrap_or_default(), &outcome);
        Ok(outcome)
    }

    /// Assemble, run pre blocks, render, ask (when a driver is given and
    /// the template is not blank), then run post blocks. The provider's
    /// answer lands in the context under `schema`.
    pub fn run_template(
        &self,
        driver: Option<&FallbackDriver<'_>>,
        question: Option<&str>,
        vars: Map<String, Value>,
    ) -> Result<PipelineOutcome> {
        let assembly = assemble(&self.options, &self.viewers, &mut |e| warn!("{e}"))?;
        let context = assembly.into_variables(vars, self.show_project_path);

        let diff_root = self
            .options
            .diff_root
            .as_deref()
            .filter(|_| self.options.diff);
        let runner = ScriptRunner::new(&self.scripts)
            .with_template_dir(self.template_dir.as_deref())
            .with_roots(&self.options.root, diff_root);
        let on_error = self.scripts.on_error;
        let mut step = TemplateStep {
            prompt: self,
            driver,
            question,
        };
        Pipeline::new(&runner, on_error).run(&self.template.blocks, context, &mut step)
    }

    pub fn on_error(&self) -> OnError {
        self.scripts.on_error
    }
}

/// Render step of [`CodePrompt::run_template`].
struct TemplateStep<'p, 'd> {
    prompt: &'p CodePrompt,
    driver: Option<&'p FallbackDriver<'d>>,
    question: Option<&'p str>,
}

impl RenderStep for TemplateStep<'_, '_> {
    fn render(&mut self, ctx: &ExecutionContext) -> Result<String> {
        self.prompt
            .renderer
            .render(&self.prompt.template.template, ctx)
    }

    fn rendered(&mut self, text: &str, _ctx: &ExecutionContext) -> Result<ExecutionContext> {
        let mut delta = Map::new();
        if let Some(driver) = self.driver {
            let prompt = compose_prompt(text, self.question);
            let outcome = driver.request_default(&prompt, self.prompt.schema())?;
            delta.insert(WRAPPER_FIELD.to_string(), outcome.data);
        }
        Ok(delta)
    }
}

// Command handlers

/// Merge CLI source options over the loaded config.
pub fn assemble_options(source: &SourceArgs, config: &Config) -> AssembleOptions {
    let mut options = AssembleOptions::new(&source.path);
    if let Some(after) = &source.diff_path
        && !source.no_diff
    {
        options = options.with_diff(after);
    }

    options.exclude = config.ignore_patterns.clone();
    options.exclude.extend(source.ignore.iter().cloned());
    options.extensions = config.extensions.clone();
    options.extensions.extend(source.extensions.iter().cloned());

    let cap = source.max_bytes.unwrap_or(config.max_bytes_per_file);
    options.with_max_bytes((cap > 0).then_some(cap))
}

/// Parse repeated `KEY=VALUE` flags. Values that parse as JSON keep
/// their type; anything else is a string.
pub fn parse_vars(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut vars = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("expected KEY=VALUE, got '{pair}'"))?;
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("empty variable name in '{pair}'");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        vars.insert(key.to_string(), value);
    }
    Ok(vars)
}

fn build(source: &SourceArgs, config: &Config) -> Result<CodePrompt> {
    let mut cp = CodePrompt::from_config(assemble_options(source, config), config)?;
    if source.hide_path {
        cp = cp.with_show_project_path(false);
    }
    if let Some(path) = &source.template {
        cp = cp.load_template(path)?;
    }
    Ok(cp)
}

fn providers_for(config: &Config, order: &[ProviderId]) -> ProvidersConfig {
    let mut providers = config.providers.clone();
    if !order.is_empty() {
        providers.preferences = order.to_vec();
    }
    providers
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `cpr prompt`
pub fn run(args: PromptArgs, ctx: &AppContext) -> Result<()> {
    let config = load_config()?;
    let cp = build(&args.source, &config)?;
    let vars = parse_vars(&args.source.vars)?;
    let generated = cp.generate_prompt_with_context(vars)?;

    if !generated.skipped.is_empty() && !ctx.quiet {
        eprintln!("Skipped {} unreadable file(s)", generated.skipped.len());
    }

    let text = if args.json {
        serde_json::to_string_pretty(&generated)?
    } else {
        generated.rendered
    };

    match args.output {
        Some(path) => {
            std::fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
            if !ctx.quiet {
                eprintln!("Wrote prompt to {}", path.display());
            }
        }
        None => print!("{text}"),
    }
    Ok(())
}

#[derive(Serialize)]
struct RunReport<'a> {
    context: &'a ExecutionContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    rendered: Option<&'a str>,
    skipped: Vec<String>,
}

/// `cpr run`
pub fn run_scripted(args: RunArgs, ctx: &AppContext) -> Result<()> {
    let config = load_config()?;
    let cp = build(&args.source, &config)?;
    let vars = parse_vars(&args.source.vars)?;

    let outcome = if args.no_llm {
        cp.run_template(None, args.question.as_deref(), vars)?
    } else {
        let providers = providers_for(&config, &args.providers);
        let counter = TokenCounter::new(&providers.tokenizer)?;
        let driver = FallbackDriver::new(&providers, &counter, &HttpClients);
        cp.run_template(Some(&driver), args.question.as_deref(), vars)?
    };

    if !outcome.skipped.is_empty() && !ctx.quiet {
        eprintln!("{} block(s) failed and were skipped", outcome.skipped.len());
    }
    print_json(&RunReport {
        context: &outcome.context,
        rendered: outcome.rendered.as_deref(),
        skipped: outcome.skipped.iter().map(ToString::to_string).collect(),
    })
}

#[derive(Serialize)]
struct AskReport<'a> {
    #[serde(flatten)]
    outcome: &'a RequestOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocks: Option<&'a [ScriptBlock]>,
}

/// `cpr ask`
pub fn ask(args: AskArgs, ctx: &AppContext) -> Result<()> {
    let config = load_config()?;
    let providers = providers_for(&config, &args.providers);
    let counter = TokenCounter::new(&providers.tokenizer)?;
    let driver = FallbackDriver::new(&providers, &counter, &HttpClients);
    let cp = build(&args.source, &config)?;

    let (outcome, context) = if args.no_context {
        let question = args
            .question
            .as_deref()
            .context("a question is required with --no-context")?;
        (cp.query(&driver, question, cp.schema())?, None)
    } else {
        let generated = cp.generate_prompt_with_context(parse_vars(&args.source.vars)?)?;
        let prompt = compose_prompt(&generated.rendered, args.question.as_deref());
        let outcome = driver.request_default(&prompt, cp.schema())?;
        (outcome, Some(generated.context))
    };

    for failure in &outcome.failures {
        if !ctx.quiet {
            eprintln!("{} failed: {}", failure.provider, failure.error);
        }
    }

    let report = AskReport {
        outcome: &outcome,
        context: context.as_ref().filter(|_| args.meta),
        blocks: args.meta.then_some(cp.template().blocks.as_slice()),
    };
    print_json(&report)
}
