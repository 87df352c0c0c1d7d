//! Supervisor-side error types for the shared plumbing.

use thiserror::Error;

use crate::codec::CodecError;

/// Errors from the socket helpers and frame handling.
#[derive(Debug, Error)]
pub enum CommonError {
    /// A socket syscall failed.
    #[error("{op} failed: {errno}")]
    Socket {
        /// Name of the failing operation.
        op: &'static str,
        /// Errno reported by the kernel.
        errno: nix::errno::Errno,
    },

    /// A datagram was cut short by the kernel (`MSG_TRUNC`).
    #[error("datagram truncated (buffer {buf} bytes)")]
    Truncated {
        /// Size of the receive buffer.
        buf: usize,
    },

    /// A datagram carried more `SCM_RIGHTS` fds than the protocol
    /// allows; the excess descriptors have already been closed.
    #[error("datagram carried {count} fds (protocol maximum is 2)")]
    TooManyFds {
        /// Number of fds the peer attached.
        count: usize,
    },

    /// `sendmsg` wrote fewer bytes than the frame holds.
    #[error("short send: {sent} of {len} bytes")]
    ShortSend {
        /// Bytes actually sent.
        sent: usize,
        /// Frame length.
        len: usize,
    },

    /// A frame failed to decode.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CommonError>;
