//! `airlock repo`: overlay repository management.

use std::path::PathBuf;

use anyhow::Context;
use clap::Subcommand;

use airlock_ogl::Repo;

/// Repository subcommands.
#[derive(Debug, Subcommand)]
pub enum RepoCmd {
    /// Create an empty repository.
    Init {
        /// Directory to create.
        path: PathBuf,
    },
    /// Print the current root object hash.
    ShowRoot {
        /// Repository directory.
        path: PathBuf,
    },
}

/// Runs a repository subcommand.
///
/// # Errors
///
/// Returns an error if the repository operation fails.
pub fn execute(cmd: RepoCmd) -> anyhow::Result<()> {
    match cmd {
        RepoCmd::Init { path } => {
            Repo::init(&path)
                .with_context(|| format!("initializing repository {}", path.display()))?;
            println!("initialized {}", path.display());
            Ok(())
        }
        RepoCmd::ShowRoot { path } => {
            let root_ref = path.join("root-ref");
            let contents = std::fs::read_to_string(&root_ref)
                .with_context(|| format!("reading {}", root_ref.display()))?;
            print!("{contents}");
            Ok(())
        }
    }
}
