use anyhow::Result;
use clap::Parser;
use codeprompt::cli::{AppContext, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build a context once, pass everywhere
    let ctx = AppContext {
        quiet: cli.quiet,
        no_color: cli.no_color,
        verbose: cli.verbose,
    };
    codeprompt::infra::logging::init(ctx.verbose, ctx.no_color);

    match cli.command {
        Commands::Prompt(args) => codeprompt::core::prompt::run(args, &ctx),
        Commands::Tree(args) => codeprompt::tree_run(args, &ctx),
        Commands::Run(args) => codeprompt::core::prompt::run_scripted(args, &ctx),
        Commands::Ask(args) => codeprompt::core::prompt::ask(args, &ctx),
        Commands::Init(args) => codeprompt::infra::config::init(args, &ctx),
        Commands::Completions(args) => codeprompt::completion::run(args, &ctx),
    }
}
