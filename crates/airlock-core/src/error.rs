//! Error types for tracee manipulation.

use thiserror::Error;

/// Failures while driving a tracee or preparing the injection.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A ptrace request failed.
    #[error("ptrace {op} on pid {pid}: {errno}")]
    Ptrace {
        /// Request name.
        op: &'static str,
        /// Target pid.
        pid: i32,
        /// Errno reported by the kernel.
        errno: nix::errno::Errno,
    },

    /// `waitpid` failed.
    #[error("waitpid on pid {pid}: {errno}")]
    Wait {
        /// Target pid.
        pid: i32,
        /// Errno reported by the kernel.
        errno: nix::errno::Errno,
    },

    /// The tracee stopped with something other than the expected signal.
    #[error("pid {pid} stopped unexpectedly: {status}")]
    UnexpectedStop {
        /// Target pid.
        pid: i32,
        /// Human-readable wait status.
        status: String,
    },

    /// A syscall executed inside the tracee returned an error.
    #[error("injected syscall {nr} returned errno {errno}")]
    InjectedSyscall {
        /// Syscall number.
        nr: i64,
        /// Negated return value.
        errno: i64,
    },

    /// The loader reported a failure from inside the tracee.
    #[error("loader returned {ret}")]
    LoaderFailed {
        /// Loader return value (negative errno, or 255).
        ret: i64,
    },

    /// The scout shared object could not be read.
    #[error("cannot read scout object {path}: {source}")]
    ScoutObject {
        /// Path of the shared object.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The scout shared object is structurally invalid.
    #[error("malformed scout object: {reason}")]
    BadElf {
        /// What was wrong.
        reason: String,
    },

    /// A required dynamic symbol is missing from the scout object.
    #[error("scout object does not export `{name}`")]
    MissingSymbol {
        /// Symbol name.
        name: &'static str,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;
