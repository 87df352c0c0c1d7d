//! Carrier: supervisor bootstrap and mission launch.
//!
//! The carrier creates the supervisor socketpair, parks the far end at
//! the well-known fd 73 (left open across `execve` so freshly injected
//! scouts can register), and forks the first mission. The child is
//! injected *before* its `execvp`: the parent attaches, flies the scout
//! in, detaches, then releases the child through a one-byte handshake.
//! The child's own `execvp` then traps through the fresh filter and
//! takes the normal exec-handoff path.

use std::ffi::CString;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use nix::errno::Errno;
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
use nix::unistd::{ForkResult, Pid, execvp, fork};

use airlock_common::protocol::CARRIER_SOCK;
use airlock_core::{flightdeck, ptrace};

use crate::cmdcenter::CmdCenter;
use crate::error::{Result, RuntimeError};
use crate::fs::MissionFs;
use crate::signals;

/// The supervisor-launcher: owns the command center and its socket.
pub struct Carrier {
    cc: CmdCenter,
    // Keeps the command center's end of the socketpair alive.
    _local: OwnedFd,
}

impl Carrier {
    /// Builds the carrier socket topology and the command center.
    ///
    /// # Errors
    ///
    /// Returns an error if the socketpair, the `dup2` onto fd 73, or
    /// the command center setup fails.
    pub fn new(fs: Box<dyn MissionFs>, scout_so: PathBuf) -> Result<Self> {
        let (local, remote) = socketpair(
            AddressFamily::Unix,
            SockType::Datagram,
            None,
            SockFlag::empty(),
        )
        .map_err(|errno| RuntimeError::Sys {
            op: "socketpair",
            errno,
        })?;

        // Park the mission-facing end at the well-known fd. dup2 clears
        // close-on-exec, which is exactly what the fd needs to survive
        // the mission's execve.
        Errno::result(unsafe { libc::dup2(remote.as_raw_fd(), CARRIER_SOCK) }).map_err(
            |errno| RuntimeError::Sys {
                op: "dup2",
                errno,
            },
        )?;
        drop(remote);

        // The supervisor-side end must not leak into missions.
        Errno::result(unsafe {
            libc::fcntl(local.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC)
        })
        .map_err(|errno| RuntimeError::Sys {
            op: "fcntl",
            errno,
        })?;

        let cc = CmdCenter::new(local.as_raw_fd(), fs, scout_so)?;
        Ok(Self { cc, _local: local })
    }

    /// Forks and launches a mission under the sandbox.
    ///
    /// Returns the mission pid. The parent injects the scout while the
    /// child waits on the handshake socket; the child then `execvp`s
    /// the target (inheriting the environment).
    ///
    /// # Errors
    ///
    /// Returns an error if the fork, the injection, or the handshake
    /// fails.
    pub fn start_mission(&mut self, argv: &[CString]) -> Result<Pid> {
        assert!(!argv.is_empty(), "mission needs a program to run");
        let (parent_sock, child_sock) =
            UnixStream::pair().map_err(|e| RuntimeError::Sys {
                op: "socketpair",
                errno: Errno::from_raw(e.raw_os_error().unwrap_or(libc::EIO)),
            })?;

        // SAFETY: the child only touches the handshake socket and exec.
        match unsafe { fork() }.map_err(|errno| RuntimeError::Sys { op: "fork", errno })? {
            ForkResult::Parent { child } => {
                drop(child_sock);

                ptrace::attach(child)?;
                flightdeck::scout_takeoff(child, self.cc.scout_so(), 0)?;
                // Detach before releasing the child, or the pending
                // stop would deadlock its execvp.
                ptrace::detach(child)?;

                let mut sock = parent_sock;
                sock.write_all(&[0xff]).map_err(|e| RuntimeError::Sys {
                    op: "handshake write",
                    errno: Errno::from_raw(e.raw_os_error().unwrap_or(libc::EIO)),
                })?;
                tracing::info!(pid = child.as_raw(), "mission launched");
                Ok(child)
            }
            ForkResult::Child => {
                drop(parent_sock);
                // Wait for takeoff in the parent.
                let mut byte = [0u8; 1];
                let mut sock = child_sock;
                let _ = sock.read_exact(&mut byte);
                drop(sock);

                match execvp(&argv[0], argv) {
                    Ok(infallible) => match infallible {},
                    Err(_) => std::process::exit(255),
                }
            }
        }
    }

    /// Runs the message loop until the stop frame arrives.
    pub fn handle_messages(&mut self) {
        self.cc.handle_messages();
    }

    /// Requests a clean loop stop (see [`signals::stop_msg_loop`]).
    pub fn stop_msg_loop() {
        signals::stop_msg_loop();
    }

    /// The command center, for inspection.
    #[must_use]
    pub fn cmd_center(&self) -> &CmdCenter {
        &self.cc
    }
}
