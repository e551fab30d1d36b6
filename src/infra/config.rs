use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};
use crate::core::pipeline::OnError;
use crate::core::provider::ProviderId;
use crate::infra::io::DEFAULT_MAX_BYTES;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
    /// Exclusion globs, matched against root-relative paths
    pub ignore_patterns: Vec<String>,

    /// Extension allow-list (empty = every extension)
    pub extensions: Vec<String>,

    /// Per-file byte budget
    pub max_bytes_per_file: usize,

    /// Expose `showProjectPath` to templates
    pub show_project_path: bool,

    /// Extension -> external viewer command (`{path}` is substituted)
    pub viewers: BTreeMap<String, String>,

    /// Script interpreters and failure policy
    pub scripts: ScriptsConfig,

    /// Provider preferences and credentials
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig
{
    pub node: String,
    pub python: String,
    pub shell: String,
    pub on_error: OnError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ProvidersFile")]
pub struct ProvidersConfig
{
    /// Ordered provider preference
    pub preferences: Vec<ProviderId>,

    /// Model or encoding name used to count prompt tokens
    pub tokenizer: String,

    pub openai: ProviderConfig,
    pub anthropic: ProviderConfig,
    pub groq: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig
{
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    pub context_window: usize,
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// On-disk shape of `[providers]`: every key optional, merged over the
/// per-provider defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProvidersFile
{
    preferences: Option<Vec<ProviderId>>,
    tokenizer: Option<String>,
    openai: ProviderPatch,
    anthropic: ProviderPatch,
    groq: ProviderPatch,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProviderPatch
{
    api_key: Option<String>,
    model: Option<String>,
    context_window: Option<usize>,
    timeout_secs: Option<u64>,
    base_url: Option<String>,
}

impl ProviderPatch
{
    fn apply(
        self,
        base: &mut ProviderConfig,
    )
    {
        if self
            .api_key
            .is_some()
        {
            base.api_key = self.api_key;
        }
        if let Some(model) = self.model
        {
            base.model = model;
        }
        if let Some(window) = self.context_window
        {
            base.context_window = window;
        }
        if let Some(secs) = self.timeout_secs
        {
            base.timeout_secs = secs;
        }
        if self
            .base_url
            .is_some()
        {
            base.base_url = self.base_url;
        }
    }
}

impl From<ProvidersFile> for ProvidersConfig
{
    fn from(file: ProvidersFile) -> Self
    {
        let mut cfg = Self::default();
        if let Some(preferences) = file.preferences
        {
            cfg.preferences = preferences;
        }
        if let Some(tokenizer) = file.tokenizer
        {
            cfg.tokenizer = tokenizer;
        }
        file.openai
            .apply(&mut cfg.openai);
        file.anthropic
            .apply(&mut cfg.anthropic);
        file.groq
            .apply(&mut cfg.groq);
        cfg
    }
}

impl Default for Config
{
    fn default() -> Self
    {
        Self {
            ignore_patterns: vec![
                "**/.git".to_string(),
                "**/node_modules".to_string(),
                "**/target".to_string(),
                "**/__pycache__".to_string(),
                "**/*.pyc".to_string(),
                "**/.DS_Store".to_string(),
                "**/Thumbs.db".to_string(),
            ],
            extensions: Vec::new(),
            max_bytes_per_file: DEFAULT_MAX_BYTES,
            show_project_path: true,
            viewers: BTreeMap::new(),
            scripts: ScriptsConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl Default for ScriptsConfig
{
    fn default() -> Self
    {
        Self {
            node: "node".to_string(),
            python: "python3".to_string(),
            shell: "bash".to_string(),
            on_error: OnError::Abort,
        }
    }
}

impl Default for ProvidersConfig
{
    fn default() -> Self
    {
        Self {
            preferences: vec![ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Groq],
            tokenizer: "gpt-4".to_string(),
            openai: ProviderConfig {
                api_key: None,
                model: "gpt-4o".to_string(),
                context_window: 128_000,
                timeout_secs: 20,
                base_url: None,
            },
            anthropic: ProviderConfig {
                api_key: None,
                model: "claude-3-5-haiku-20241022".to_string(),
                context_window: 200_000,
                timeout_secs: 40,
                base_url: None,
            },
            groq: ProviderConfig {
                api_key: None,
                model: "llama-3.3-70b-versatile".to_string(),
                context_window: 128_000,
                timeout_secs: 20,
                base_url: None,
            },
        }
    }
}

impl ProvidersConfig
{
    pub fn get(
        &self,
        id: ProviderId,
    ) -> &ProviderConfig
    {
        match id
        {
            ProviderId::OpenAi => &self.openai,
            ProviderId::Anthropic => &self.anthropic,
            ProviderId::Groq => &self.groq,
        }
    }

    /// Fill missing API keys from the vendors' conventional variables.
    pub fn with_env_credentials(mut self) -> Self
    {
        for (slot, var) in [
            (&mut self.openai, "OPENAI_API_KEY"),
            (&mut self.anthropic, "ANTHROPIC_API_KEY"),
            (&mut self.groq, "GROQ_API_KEY"),
        ]
        {
            if slot
                .api_key
                .is_none()
                && let Ok(key) = std::env::var(var)
                && !key.is_empty()
            {
                slot.api_key = Some(key);
            }
        }
        self
    }
}

pub fn load_config() -> Result<Config>
{
    let mut builder = config::Config::builder();

    // Load from config files in priority order
    let config_paths = ["codeprompt.toml", "codeprompt.yaml", "codeprompt.json", ".codeprompt.toml"];

    for path in &config_paths
    {
        if Path::new(path).exists()
        {
            builder = builder.add_source(config::File::with_name(path));
            break;
        }
    }

    // Add environment variables with CODEPROMPT_ prefix
    builder = builder.add_source(
        config::Environment::with_prefix("CODEPROMPT")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let mut parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;
    parsed.providers = parsed
        .providers
        .with_env_credentials();

    Ok(parsed)
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = args
        .path
        .join("codeprompt.toml");

    if config_path.exists() && !args.force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}
