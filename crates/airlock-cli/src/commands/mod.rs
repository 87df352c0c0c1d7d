//! Command-line surface.

mod repo;
mod run;

use clap::{Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "airlock", version, about = "Syscall-interposition sandbox")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a program under the sandbox.
    Run(run::RunArgs),
    /// Manage overlay repositories.
    #[command(subcommand)]
    Repo(repo::RepoCmd),
}

/// Dispatches a parsed CLI invocation.
///
/// # Errors
///
/// Returns an error if the selected command fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => run::execute(args),
        Command::Repo(cmd) => repo::execute(cmd),
    }
}
