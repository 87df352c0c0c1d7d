//! Supervisor error types.

use thiserror::Error;

/// Failures inside the supervisor.
///
/// Per-syscall policy failures never show up here; those convert to
/// negative errnos and travel back to the tracee. These are the
/// supervisor's own problems: transport, ptrace surgery, setup.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Socket plumbing failed.
    #[error(transparent)]
    Common(#[from] airlock_common::CommonError),

    /// Tracee manipulation failed.
    #[error(transparent)]
    Core(#[from] airlock_core::CoreError),

    /// Overlay repository failure.
    #[error(transparent)]
    Ogl(#[from] airlock_ogl::OglError),

    /// A frame from a scout failed to decode.
    #[error("malformed scout frame: {0}")]
    Frame(#[from] airlock_common::codec::CodecError),

    /// A scout sent a command number the protocol does not define.
    #[error("unknown command {cmd:#x} from scout fd {fd}")]
    UnknownCommand {
        /// Raw command word.
        cmd: u32,
        /// Originating socket.
        fd: i32,
    },

    /// A frame broke the protocol's shape or fd contract. A traced
    /// process can send these at will, so they must never abort the
    /// supervisor.
    #[error("malformed {what} frame from fd {fd}")]
    Malformed {
        /// Which contract was violated.
        what: &'static str,
        /// Originating socket.
        fd: i32,
    },

    /// A syscall in the supervisor's own setup path failed.
    #[error("{op} failed: {errno}")]
    Sys {
        /// Name of the failing operation.
        op: &'static str,
        /// Errno reported by the kernel.
        errno: nix::errno::Errno,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;
