//! `airlock run`: launch a mission.

use std::ffi::CString;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};

use airlock_ogl::Repo;
use airlock_runtime::carrier::Carrier;
use airlock_runtime::fs::{HostFs, MissionFs, OverlayFs};
use airlock_runtime::signals;

/// Arguments for `airlock run`.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the scout shared object (defaults to
    /// `libairlock_scout.so` next to this binary).
    #[arg(long)]
    scout: Option<PathBuf>,

    /// Serve paths under this root through the overlay repository.
    #[arg(long, requires = "repo")]
    overlay_root: Option<PathBuf>,

    /// Overlay repository directory (see `airlock repo init`).
    #[arg(long, requires = "overlay_root")]
    repo: Option<PathBuf>,

    /// Program to run, followed by its arguments.
    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,
}

fn default_scout_so() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("libairlock_scout.so")))
        .unwrap_or_else(|| PathBuf::from("libairlock_scout.so"))
}

/// Runs a mission to completion and exits with its status.
///
/// # Errors
///
/// Returns an error if the supervisor cannot be set up or the mission
/// cannot be launched; a mission that sets up but fails at runtime
/// surfaces through the propagated exit status instead.
pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let fs: Box<dyn MissionFs> = match (&args.overlay_root, &args.repo) {
        (Some(root), Some(repo_path)) => {
            let repo = Repo::open(root, repo_path)
                .with_context(|| format!("opening overlay repository {}", repo_path.display()))?;
            tracing::info!(root = %root.display(), repo = %repo_path.display(), "overlay enabled");
            Box::new(OverlayFs::new(repo))
        }
        _ => Box::new(HostFs),
    };

    let scout_so = args.scout.unwrap_or_else(default_scout_so);
    anyhow::ensure!(
        scout_so.exists(),
        "scout shared object not found at {} (build airlock-scout or pass --scout)",
        scout_so.display()
    );

    let argv: Vec<CString> = args
        .command
        .iter()
        .map(|a| CString::new(a.as_str()).context("argument contains a nul byte"))
        .collect::<anyhow::Result<_>>()?;

    let mut carrier = Carrier::new(fs, scout_so).context("supervisor setup failed")?;
    let pid = carrier.start_mission(&argv).context("mission launch failed")?;

    signals::install_sigchld(pid)?;

    // The mission may have finished before the handler was ready.
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::Exited(_, code)) => std::process::exit(code),
        Ok(WaitStatus::Signaled(_, sig, _)) => std::process::exit(128 + sig as i32),
        _ => {}
    }

    carrier.handle_messages();
    std::process::exit(signals::mission_status());
}
