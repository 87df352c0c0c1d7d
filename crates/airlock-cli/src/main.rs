//! # airlock: syscall-interposition sandbox
//!
//! Launches a target program under supervision: a seccomp-BPF filter in
//! the target traps a chosen syscall set to SIGSYS, and the in-process
//! scout forwards those calls to this supervisor, which answers them
//! against the host filesystem or an OGL overlay repository.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod commands;

use clap::Parser;

use crate::commands::Cli;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = commands::execute(cli) {
        eprintln!("airlock: {err:#}");
        // Setup failures must stay distinguishable from mission exits.
        std::process::exit(255);
    }
}
