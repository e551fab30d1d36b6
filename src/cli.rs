use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::core::provider::ProviderId;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub verbose: bool,  // global --verbose
}

#[derive(Parser)]
#[command(name = "cpr")]
#[command(about = "Turn a codebase, or the diff between two versions of it, into an LLM prompt")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Log debug diagnostics to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render the context prompt for a directory (or a diff of two)
    Prompt(PromptArgs),

    /// Display the project tree
    Tree(TreeArgs),

    /// Execute a scripted template and print the resulting context
    Run(RunArgs),

    /// Send the prompt to the first eligible LLM provider
    Ask(AskArgs),

    /// Initialize a codeprompt.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Options shared by every command that assembles a prompt.
#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// Root directory; the *before* state when --diff-path is given
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Current (*after*) state to diff against PATH
    #[arg(long, value_name = "DIR")]
    pub diff_path: Option<PathBuf>,

    /// Disable diff mode even when --diff-path is given
    #[arg(long)]
    pub no_diff: bool,

    /// Only include files with these extensions (repeatable)
    #[arg(short, long = "ext", value_name = "EXT")]
    pub extensions: Vec<String>,

    /// Additional glob patterns to ignore
    #[arg(short, long, value_name = "GLOB")]
    pub ignore: Vec<String>,

    /// Template file (defaults to the built-in layout)
    #[arg(short, long, value_name = "FILE")]
    pub template: Option<PathBuf>,

    /// Per-file byte cap (0 = read whole files)
    #[arg(long, value_name = "N")]
    pub max_bytes: Option<usize>,

    /// Extra template variables (KEY=VALUE, repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// Omit the project path section
    #[arg(long)]
    pub hide_path: bool,
}

#[derive(Parser)]
pub struct PromptArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Write the prompt to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print the rendered prompt together with its variables as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct TreeArgs {
    /// Root directory to scan
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Additional glob patterns to ignore
    #[arg(short, long)]
    pub ignore: Vec<String>,

    /// Only include files with these extensions (repeatable)
    #[arg(short, long = "ext")]
    pub extensions: Vec<String>,
}

#[derive(Parser)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Question appended to the rendered template
    #[arg(short, long)]
    pub question: Option<String>,

    /// Skip the provider request between the phases
    #[arg(long)]
    pub no_llm: bool,

    /// Provider preference order (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub providers: Vec<ProviderId>,
}

#[derive(Parser)]
pub struct AskArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Question appended to the prompt
    pub question: Option<String>,

    /// Send only the question, without codebase context
    #[arg(long)]
    pub no_context: bool,

    /// Include the render context and template blocks in the output
    #[arg(long)]
    pub meta: bool,

    /// Provider preference order (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub providers: Vec<ProviderId>,
}

#[derive(Parser)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Output directory; if omitted and --stdout not set, prints error
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Print completion script to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_prompt_with_diff() {
        let cli = Cli::try_parse_from([
            "cpr", "prompt", "before", "--diff-path", "after", "-e", "rs", "-e", "toml", "--var", "k=v",
        ])
        .unwrap();
        let Commands::Prompt(args) = cli.command else {
            panic!("prompt expected");
        };
        assert_eq!(args.source.path, PathBuf::from("before"));
        assert_eq!(args.source.diff_path, Some(PathBuf::from("after")));
        assert_eq!(args.source.extensions, vec!["rs", "toml"]);
        assert_eq!(args.source.vars, vec!["k=v"]);
    }

    #[test]
    fn test_parse_provider_list() {
        let cli = Cli::try_parse_from(["cpr", "ask", ".", "why?", "--providers", "groq,OPENAI"]).unwrap();
        let Commands::Ask(args) = cli.command else {
            panic!("ask expected");
        };
        assert_eq!(args.providers, vec![ProviderId::Groq, ProviderId::OpenAi]);
        assert_eq!(args.question.as_deref(), Some("why?"));
        assert!(Cli::try_parse_from(["cpr", "ask", "--providers", "nope"]).is_err());
    }
}
