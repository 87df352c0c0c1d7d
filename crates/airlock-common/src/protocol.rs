//! Protocol constants shared by the supervisor and the scout.
//!
//! These values are part of the ABI between the two processes; changing
//! any of them requires rebuilding both the supervisor binary and the
//! scout shared object.

/// Well-known fd number of the carrier socket inside every mission.
///
/// The carrier `dup2`s its end of the supervisor socketpair onto this fd
/// and leaves it open across `execve` so a freshly injected scout can
/// bootstrap its private channel.
pub const CARRIER_SOCK: libc::c_int = 73;

/// Fixed address of the syscall trampoline page inside every mission.
///
/// The BPF filter whitelists syscalls whose instruction pointer lies in
/// `[TRAMPOLINE_ADDR, TRAMPOLINE_ADDR + TRAMPOLINE_PAGE_SIZE)`.
pub const TRAMPOLINE_ADDR: usize = 0x2000_0000_0000;

/// Size of the trampoline page.
pub const TRAMPOLINE_PAGE_SIZE: usize = 4096;

/// Offset of the frameless vfork stub within the trampoline page.
pub const VFORK_STUB_OFFSET: usize = 2048;

/// Carrier-socket command: a scout registers its private socket.
///
/// Carries exactly one fd as `SCM_RIGHTS` ancillary data.
pub const SCOUT_CONNECT_CMD: u32 = 0x37fa;

/// Carrier-socket command: stop the message loop.
///
/// Sent by the supervisor to itself from signal context so the loop
/// exits from its normal dispatch path.
pub const STOP_MSG_LOOP_CMD: u32 = 0x37fb;

/// Scout flag: the seccomp filter is already installed in this process
/// image (it survives `execve`), so the constructor must not install it
/// again.
pub const FLAG_FILTER_INSTALLED: u64 = 0x1;

/// Scout flag: the private channel to the command center is already up.
pub const FLAG_CC_COMM_READY: u64 = 0x2;

/// Upper bound on a single protocol datagram, including the size prefix.
pub const MSG_BUF_SIZE: usize = 8192;

/// Commands a scout sends on its private socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ScoutCmd {
    /// Liveness probe; no payload, no reply.
    Hello = 1,
    /// `open(path, flags, mode)`.
    Open = 2,
    /// `openat(dirfd, path, flags, mode)`.
    OpenAt = 3,
    /// `access(path, mode)`.
    Access = 4,
    /// `fstat(fd)`; the fd travels as ancillary data.
    Fstat = 5,
    /// `stat(path)`.
    Stat = 6,
    /// `lstat(path)`.
    Lstat = 7,
    /// Exec handoff request; the supervisor re-attaches before replying.
    Execve = 8,
    /// `readlink(path, bufsize)`.
    Readlink = 9,
    /// `unlink(path)`.
    Unlink = 10,
    /// One-way lifecycle notification before the vfork fake frame runs.
    Vfork = 11,
}

impl ScoutCmd {
    /// Decodes a wire command number.
    #[must_use]
    pub const fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::Hello,
            2 => Self::Open,
            3 => Self::OpenAt,
            4 => Self::Access,
            5 => Self::Fstat,
            6 => Self::Stat,
            7 => Self::Lstat,
            8 => Self::Execve,
            9 => Self::Readlink,
            10 => Self::Unlink,
            11 => Self::Vfork,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ScoutCmd;

    #[test]
    fn cmd_numbers_are_sequential() {
        assert_eq!(ScoutCmd::from_u32(1), Some(ScoutCmd::Hello));
        assert_eq!(ScoutCmd::from_u32(11), Some(ScoutCmd::Vfork));
        assert_eq!(ScoutCmd::from_u32(0), None);
        assert_eq!(ScoutCmd::from_u32(12), None);
    }
}
