//! Command center: the supervisor's event loop and syscall handlers.
//!
//! One blocking epoll loop multiplexes the carrier socket (where new
//! scouts register and the stop frame arrives) and one private socket
//! per sandboxed process. Every scout message is handled to completion
//! before the next event is dispatched; requests on a single socket are
//! strictly ordered because the scout blocks for each reply.

use std::ffi::OsStr;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::unistd::Pid;

use airlock_common::codec::{Packer, Unpacker};
use airlock_common::protocol::{
    FLAG_FILTER_INSTALLED, MSG_BUF_SIZE, SCOUT_CONNECT_CMD, STOP_MSG_LOOP_CMD, ScoutCmd,
};
use airlock_common::socket::{MsgReceiver, send_msg};
use airlock_core::{flightdeck, ptrace};

use crate::error::{Result, RuntimeError};
use crate::fs::MissionFs;
use crate::signals;

const MAX_EVENTS: usize = 16;

/// What a decoded scout request asks the supervisor to do.
pub enum Action {
    /// Nothing to send back.
    None,
    /// Send a reply frame, optionally with one ancillary fd.
    Reply {
        /// Size-prefixed reply bytes.
        bytes: Vec<u8>,
        /// Fd to attach; the supervisor's copy closes after the send.
        fd: Option<OwnedFd>,
    },
    /// Run the exec handoff for this pid, then reply `{ok}` inline.
    Exec {
        /// Pid about to call `execve`.
        pid: Pid,
    },
}

fn stat_bytes(st: &libc::stat) -> &[u8] {
    // SAFETY: stat is plain-old-data; the reply carries it raw (the
    // scout shares this ABI by construction).
    unsafe {
        std::slice::from_raw_parts(
            std::ptr::from_ref(st).cast::<u8>(),
            std::mem::size_of::<libc::stat>(),
        )
    }
}

fn reply_ret(ret: i32) -> Vec<u8> {
    let mut buf = [0u8; 16];
    let mut p = Packer::new(&mut buf);
    p.put_i32(ret).unwrap_or_else(|_| unreachable!());
    p.finish().to_vec()
}

fn reply_ret_stat(st: &libc::stat) -> Vec<u8> {
    let mut buf = [0u8; 256];
    let mut p = Packer::new(&mut buf);
    p.put_i32(0).unwrap_or_else(|_| unreachable!());
    p.put_raw(stat_bytes(st)).unwrap_or_else(|_| unreachable!());
    p.finish().to_vec()
}

fn errno_ret(errno: Errno) -> i32 {
    -(errno as i32)
}

fn path_field(u: &mut Unpacker<'_>) -> Result<PathBuf> {
    Ok(PathBuf::from(OsStr::from_bytes(u.cstr()?.to_bytes())))
}

/// Decodes one scout datagram and runs it against the backend.
///
/// Received fds are adopted immediately so they close no matter which
/// branch runs. `sock` is only for diagnostics.
///
/// # Errors
///
/// Returns an error for unknown commands, malformed frames, and fd
/// contract violations (e.g. `hello` with a payload); a mission can
/// forge any of these, so the caller logs and keeps the loop alive.
/// Policy failures travel back inside the reply as negative errnos.
pub fn handle_request(
    fs: &mut dyn MissionFs,
    datagram: &[u8],
    fds: &[RawFd],
    sock: RawFd,
) -> Result<Action> {
    // SAFETY: SCM_RIGHTS fds belong to the receiver; adopting them here
    // guarantees close-on-drop.
    let owned: Vec<OwnedFd> = fds
        .iter()
        .map(|&fd| unsafe { OwnedFd::from_raw_fd(fd) })
        .collect();

    let mut u = Unpacker::from_datagram(datagram)?;
    let cmd_raw = u.u32()?;
    let Some(cmd) = ScoutCmd::from_u32(cmd_raw) else {
        return Err(RuntimeError::UnknownCommand {
            cmd: cmd_raw,
            fd: sock,
        });
    };

    match cmd {
        ScoutCmd::Hello => {
            if !u.finished() || !owned.is_empty() {
                return Err(RuntimeError::Malformed {
                    what: "hello",
                    fd: sock,
                });
            }
            tracing::debug!(sock, "scout says hello");
            Ok(Action::None)
        }

        ScoutCmd::Open => {
            let path = path_field(&mut u)?;
            let flags = u.i32()?;
            let mode = u.u32()?;
            Ok(match fs.open(&path, flags, mode) {
                Ok(fd) => Action::Reply {
                    bytes: reply_ret(fd.as_raw_fd()),
                    fd: Some(fd),
                },
                Err(errno) => Action::Reply {
                    bytes: reply_ret(errno_ret(errno)),
                    fd: None,
                },
            })
        }

        ScoutCmd::OpenAt => {
            let dirfd = u.i32()?;
            let path = path_field(&mut u)?;
            let flags = u.i32()?;
            let mode = u.u32()?;
            let dir = if dirfd >= 0 {
                // A real dirfd passes exactly one fd in ancillary data.
                if owned.len() != 1 {
                    return Err(RuntimeError::Malformed {
                        what: "openat",
                        fd: sock,
                    });
                }
                Some(owned[0].as_fd())
            } else {
                None
            };
            Ok(match fs.openat(dir, &path, flags, mode) {
                Ok(fd) => Action::Reply {
                    bytes: reply_ret(fd.as_raw_fd()),
                    fd: Some(fd),
                },
                Err(errno) => Action::Reply {
                    bytes: reply_ret(errno_ret(errno)),
                    fd: None,
                },
            })
        }

        ScoutCmd::Access => {
            let path = path_field(&mut u)?;
            let mode = u.i32()?;
            let ret = match fs.access(&path, mode) {
                Ok(()) => 0,
                Err(errno) => errno_ret(errno),
            };
            Ok(Action::Reply {
                bytes: reply_ret(ret),
                fd: None,
            })
        }

        ScoutCmd::Fstat => {
            let _fd_value = u.i32()?;
            if owned.len() != 1 {
                return Err(RuntimeError::Malformed {
                    what: "fstat",
                    fd: sock,
                });
            }
            Ok(match fs.fstat(owned[0].as_fd()) {
                Ok(st) => Action::Reply {
                    bytes: reply_ret_stat(&st),
                    fd: None,
                },
                Err(errno) => Action::Reply {
                    bytes: reply_ret(errno_ret(errno)),
                    fd: None,
                },
            })
        }

        ScoutCmd::Stat | ScoutCmd::Lstat => {
            let path = path_field(&mut u)?;
            let result = if cmd == ScoutCmd::Stat {
                fs.stat(&path)
            } else {
                fs.lstat(&path)
            };
            Ok(match result {
                Ok(st) => Action::Reply {
                    bytes: reply_ret_stat(&st),
                    fd: None,
                },
                Err(errno) => Action::Reply {
                    bytes: reply_ret(errno_ret(errno)),
                    fd: None,
                },
            })
        }

        ScoutCmd::Readlink => {
            let path = path_field(&mut u)?;
            let bufsize = usize::try_from(u.u64()?).unwrap_or(0).min(4096);
            let mut buf = [0u8; MSG_BUF_SIZE];
            let mut p = Packer::new(&mut buf);
            match fs.readlink(&path, bufsize) {
                Ok(bytes) => {
                    p.put_i64(bytes.len() as i64)?;
                    p.put_buf(&bytes)?;
                }
                Err(errno) => p.put_i64(i64::from(errno_ret(errno)))?,
            }
            Ok(Action::Reply {
                bytes: p.finish().to_vec(),
                fd: None,
            })
        }

        ScoutCmd::Unlink => {
            let path = path_field(&mut u)?;
            let ret = match fs.unlink(&path) {
                Ok(()) => 0,
                Err(errno) => errno_ret(errno),
            };
            Ok(Action::Reply {
                bytes: reply_ret(ret),
                fd: None,
            })
        }

        ScoutCmd::Execve => {
            let pid = u.i32()?;
            let path = path_field(&mut u)?;
            tracing::info!(pid, path = %path.display(), "exec handoff requested");
            Ok(Action::Exec {
                pid: Pid::from_raw(pid),
            })
        }

        ScoutCmd::Vfork => {
            let pid = u.i32()?;
            tracing::debug!(pid, "vfork announced");
            Ok(Action::None)
        }
    }
}

/// The supervisor's event loop and scout registry.
pub struct CmdCenter {
    epoll: Epoll,
    carrier_fd: RawFd,
    scouts: Vec<OwnedFd>,
    stopping: bool,
    fs: Box<dyn MissionFs>,
    scout_so: PathBuf,
}

impl CmdCenter {
    /// Creates the center around the carrier's local socket end.
    ///
    /// # Errors
    ///
    /// Returns an error if the epoll fd cannot be created or the
    /// carrier socket cannot be registered.
    pub fn new(carrier_fd: RawFd, fs: Box<dyn MissionFs>, scout_so: PathBuf) -> Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(|errno| {
            RuntimeError::Sys {
                op: "epoll_create1",
                errno,
            }
        })?;
        // SAFETY: the carrier keeps this fd open for the center's
        // whole lifetime.
        let borrowed = unsafe { BorrowedFd::borrow_raw(carrier_fd) };
        epoll
            .add(borrowed, EpollEvent::new(EpollFlags::EPOLLIN, carrier_fd as u64))
            .map_err(|errno| RuntimeError::Sys {
                op: "epoll_ctl",
                errno,
            })?;
        Ok(Self {
            epoll,
            carrier_fd,
            scouts: Vec::new(),
            stopping: false,
            fs,
            scout_so,
        })
    }

    /// Number of registered scouts.
    #[must_use]
    pub fn num_scouts(&self) -> usize {
        self.scouts.len()
    }

    /// Runs the loop until the stop frame arrives or the carrier
    /// socket dies.
    pub fn handle_messages(&mut self) {
        while !self.stopping {
            match self.handle_message() {
                Ok(()) => {}
                Err(e) => {
                    tracing::error!(error = %e, "message loop failed");
                    break;
                }
            }
        }
        self.stopping = false;
    }

    /// Dispatches one epoll batch.
    ///
    /// # Errors
    ///
    /// Returns an error only for carrier-socket failures; scout-side
    /// problems remove the scout and keep the loop alive.
    pub fn handle_message(&mut self) -> Result<()> {
        let mut events = [EpollEvent::empty(); MAX_EVENTS];
        let n = loop {
            match self.epoll.wait(&mut events, EpollTimeout::NONE) {
                Ok(n) => break n,
                Err(Errno::EINTR) => {
                    if self.stopping {
                        return Ok(());
                    }
                }
                Err(errno) => {
                    return Err(RuntimeError::Sys {
                        op: "epoll_wait",
                        errno,
                    });
                }
            }
        };

        for ev in &events[..n] {
            let fd = ev.data() as RawFd;
            if ev.events().contains(EpollFlags::EPOLLRDHUP) {
                self.remove_scout(fd);
            } else if fd == self.carrier_fd {
                self.handle_carrier_msg()?;
            } else {
                self.handle_scout_msg(fd);
            }
        }
        Ok(())
    }

    /// Fd 73 is writable by every mission, so nothing a frame carries
    /// may take the supervisor down: forgeable receive problems and
    /// malformed frames are logged and dropped, and ancillary fds are
    /// adopted up front so every path closes them.
    fn handle_carrier_msg(&mut self) -> Result<()> {
        let mut rcvr = MsgReceiver::new(self.carrier_fd);
        match rcvr.receive_one() {
            Ok(()) => {}
            Err(
                e @ (airlock_common::CommonError::Truncated { .. }
                | airlock_common::CommonError::TooManyFds { .. }),
            ) => {
                tracing::warn!(error = %e, "carrier datagram dropped");
                return Ok(());
            }
            // The carrier socket itself failing is fatal.
            Err(e) => return Err(e.into()),
        }
        // SAFETY: SCM_RIGHTS fds belong to the receiver; adopting them
        // here guarantees close-on-drop in every branch below.
        let mut owned: Vec<OwnedFd> = rcvr
            .fds()
            .iter()
            .map(|&fd| unsafe { OwnedFd::from_raw_fd(fd) })
            .collect();

        let cmd = match Unpacker::from_datagram(rcvr.data()).and_then(|mut u| u.u32()) {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::warn!(error = %e, "malformed carrier frame dropped");
                return Ok(());
            }
        };
        if cmd == SCOUT_CONNECT_CMD {
            if owned.len() == 1 {
                let fd = owned.pop().unwrap_or_else(|| unreachable!());
                self.add_scout(fd)?;
            } else {
                tracing::warn!(fds = owned.len(), "scout connect without exactly one fd");
            }
        } else if cmd == STOP_MSG_LOOP_CMD {
            tracing::debug!("stop requested");
            self.stopping = true;
        } else {
            tracing::warn!(cmd, "unknown carrier command ignored");
        }
        Ok(())
    }

    fn add_scout(&mut self, fd: OwnedFd) -> Result<()> {
        let raw = fd.as_raw_fd();
        assert!(
            self.scouts.iter().all(|s| s.as_raw_fd() != raw),
            "scout fd already registered"
        );
        self.epoll
            .add(
                fd.as_fd(),
                EpollEvent::new(EpollFlags::EPOLLIN | EpollFlags::EPOLLRDHUP, raw as u64),
            )
            .map_err(|errno| RuntimeError::Sys {
                op: "epoll_ctl",
                errno,
            })?;
        tracing::info!(fd = raw, "scout connected");
        self.scouts.push(fd);
        Ok(())
    }

    fn remove_scout(&mut self, raw: RawFd) {
        let Some(idx) = self.scouts.iter().position(|s| s.as_raw_fd() == raw) else {
            return;
        };
        let fd = self.scouts.swap_remove(idx);
        if let Err(errno) = self.epoll.delete(fd.as_fd()) {
            tracing::warn!(fd = raw, %errno, "epoll delete failed");
        }
        tracing::info!(fd = raw, "scout disconnected");
        // fd closes on drop; the epoll registration and the record go
        // together.
    }

    fn handle_scout_msg(&mut self, sock: RawFd) {
        let mut rcvr = MsgReceiver::new(sock);
        if let Err(e) = rcvr.receive_one() {
            tracing::warn!(sock, error = %e, "scout receive failed");
            self.remove_scout(sock);
            return;
        }

        match handle_request(self.fs.as_mut(), rcvr.data(), rcvr.fds(), sock) {
            Ok(Action::None) => {}
            Ok(Action::Reply { bytes, fd }) => {
                let raw = fd.as_ref().map_or(-1, AsRawFd::as_raw_fd);
                if let Err(e) = send_msg(sock, &bytes, raw, -1) {
                    tracing::warn!(sock, error = %e, "reply send failed");
                }
                // The supervisor's copy of an opened fd closes here.
                drop(fd);
            }
            Ok(Action::Exec { pid }) => {
                if let Err(e) = self.handle_exec(pid, sock) {
                    tracing::error!(pid = pid.as_raw(), error = %e, "exec handoff failed");
                }
            }
            Err(e) => {
                // Self-delimited frames keep the stream in sync; log
                // and move on.
                tracing::warn!(sock, error = %e, "scout request rejected");
            }
        }
    }

    /// Exec handoff: re-attach, let the real `execve` run, re-inject.
    fn handle_exec(&mut self, pid: Pid, sock: RawFd) -> Result<()> {
        signals::SIGCHLD_IGNORE.store(true, std::sync::atomic::Ordering::Relaxed);
        let result = self.exec_handoff(pid, sock);
        signals::SIGCHLD_IGNORE.store(false, std::sync::atomic::Ordering::Relaxed);
        result
    }

    fn exec_handoff(&mut self, pid: Pid, sock: RawFd) -> Result<()> {
        ptrace::attach(pid)?;
        ptrace::set_options(pid, nix::sys::ptrace::Options::PTRACE_O_TRACEEXEC)?;
        ptrace::cont(pid)?;

        // Release the scout into the real execve.
        let mut buf = [0u8; 16];
        let mut p = Packer::new(&mut buf);
        p.put_i32(1)?;
        let _ = send_msg(sock, p.finish(), -1, -1)?;

        let event = ptrace::wait_trap(pid)?;
        if event == ptrace::EVENT_EXEC {
            // Run the first post-exec instruction so the kernel
            // finalizes the register image; without this the injected
            // register state is overwritten on return to user space.
            ptrace::step(pid)?;
            // The filter survived the execve; only the handler and the
            // channel need reinstalling.
            flightdeck::scout_takeoff(pid, &self.scout_so, FLAG_FILTER_INSTALLED)?;
        } else {
            // The execve failed; the scout raised SIGTRAP to tell us.
            tracing::warn!(pid = pid.as_raw(), event, "execve did not complete");
        }

        ptrace::set_options(pid, nix::sys::ptrace::Options::empty())?;
        ptrace::detach(pid)?;
        Ok(())
    }

    /// Path of the scout shared object used for injections.
    #[must_use]
    pub fn scout_so(&self) -> &Path {
        &self.scout_so
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::fs::HostFs;

    fn frame(build: impl FnOnce(&mut Packer<'_>)) -> Vec<u8> {
        let mut buf = [0u8; MSG_BUF_SIZE];
        let mut p = Packer::new(&mut buf);
        build(&mut p);
        p.finish().to_vec()
    }

    fn put_path(p: &mut Packer<'_>, path: &Path) {
        let c = std::ffi::CString::new(path.as_os_str().as_bytes()).expect("path");
        p.put_cstr(&c).expect("cstr");
    }

    #[test]
    fn open_replies_with_fd_and_matching_ret() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("f");
        std::fs::write(&file, b"forwarded").expect("write");

        let req = frame(|p| {
            p.put_u32(ScoutCmd::Open as u32).expect("cmd");
            put_path(p, &file);
            p.put_i32(libc::O_RDONLY).expect("flags");
            p.put_u32(0).expect("mode");
        });
        let mut fs = HostFs;
        let action = handle_request(&mut fs, &req, &[], 7).expect("request");
        let Action::Reply { bytes, fd } = action else {
            panic!("open must reply");
        };
        let fd = fd.expect("ancillary fd");
        let mut u = Unpacker::from_datagram(&bytes).expect("reply");
        assert_eq!(u.i32().expect("ret"), fd.as_raw_fd());

        let mut contents = String::new();
        let _ = std::fs::File::from(fd)
            .read_to_string(&mut contents)
            .expect("read");
        assert_eq!(contents, "forwarded");
    }

    #[test]
    fn access_missing_replies_minus_enoent() {
        let req = frame(|p| {
            p.put_u32(ScoutCmd::Access as u32).expect("cmd");
            put_path(p, Path::new("/definitely/missing"));
            p.put_i32(libc::F_OK).expect("mode");
        });
        let mut fs = HostFs;
        let Action::Reply { bytes, fd } = handle_request(&mut fs, &req, &[], 7).expect("request")
        else {
            panic!("access must reply");
        };
        assert!(fd.is_none());
        let mut u = Unpacker::from_datagram(&bytes).expect("reply");
        assert_eq!(u.i32().expect("ret"), -libc::ENOENT);
    }

    #[test]
    fn stat_reply_carries_the_raw_struct() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("f");
        std::fs::write(&file, b"12345").expect("write");

        let req = frame(|p| {
            p.put_u32(ScoutCmd::Stat as u32).expect("cmd");
            put_path(p, &file);
        });
        let mut fs = HostFs;
        let Action::Reply { bytes, .. } = handle_request(&mut fs, &req, &[], 7).expect("request")
        else {
            panic!("stat must reply");
        };
        let mut u = Unpacker::from_datagram(&bytes).expect("reply");
        assert_eq!(u.i32().expect("ret"), 0);
        let raw = u.raw(std::mem::size_of::<libc::stat>()).expect("stat");
        // SAFETY: the reply carries a raw stat of exactly this size.
        let st: libc::stat = unsafe { std::ptr::read_unaligned(raw.as_ptr().cast()) };
        assert_eq!(st.st_size, 5);
    }

    #[test]
    fn readlink_zero_bufsize_returns_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let link = dir.path().join("l");
        std::os::unix::fs::symlink("somewhere", &link).expect("symlink");

        let req = frame(|p| {
            p.put_u32(ScoutCmd::Readlink as u32).expect("cmd");
            put_path(p, &link);
            p.put_u64(0).expect("bufsize");
        });
        let mut fs = HostFs;
        let Action::Reply { bytes, .. } = handle_request(&mut fs, &req, &[], 7).expect("request")
        else {
            panic!("readlink must reply");
        };
        let mut u = Unpacker::from_datagram(&bytes).expect("reply");
        assert_eq!(u.i64().expect("ret"), 0);
        assert_eq!(u.buf().expect("buf"), b"");
    }

    #[test]
    fn readlink_returns_target_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let link = dir.path().join("l");
        std::os::unix::fs::symlink("/etc/hosts", &link).expect("symlink");

        let req = frame(|p| {
            p.put_u32(ScoutCmd::Readlink as u32).expect("cmd");
            put_path(p, &link);
            p.put_u64(256).expect("bufsize");
        });
        let mut fs = HostFs;
        let Action::Reply { bytes, .. } = handle_request(&mut fs, &req, &[], 7).expect("request")
        else {
            panic!("readlink must reply");
        };
        let mut u = Unpacker::from_datagram(&bytes).expect("reply");
        assert_eq!(u.i64().expect("ret"), 10);
        assert_eq!(u.buf().expect("buf"), b"/etc/hosts");
    }

    #[test]
    fn unknown_command_is_rejected() {
        let req = frame(|p| {
            p.put_u32(0xdead).expect("cmd");
        });
        let mut fs = HostFs;
        assert!(matches!(
            handle_request(&mut fs, &req, &[], 7),
            Err(RuntimeError::UnknownCommand { cmd: 0xdead, .. })
        ));
    }

    #[test]
    fn hello_with_payload_is_rejected_without_panicking() {
        let req = frame(|p| {
            p.put_u32(ScoutCmd::Hello as u32).expect("cmd");
            p.put_u32(42).expect("garbage");
        });
        let mut fs = HostFs;
        assert!(matches!(
            handle_request(&mut fs, &req, &[], 7),
            Err(RuntimeError::Malformed { what: "hello", .. })
        ));
    }

    #[test]
    fn fstat_without_its_fd_is_rejected_without_panicking() {
        let req = frame(|p| {
            p.put_u32(ScoutCmd::Fstat as u32).expect("cmd");
            p.put_i32(5).expect("fd value");
        });
        let mut fs = HostFs;
        // A mission controls this frame; it must surface as Err, never
        // abort the supervisor.
        assert!(matches!(
            handle_request(&mut fs, &req, &[], 7),
            Err(RuntimeError::Malformed { what: "fstat", .. })
        ));
    }

    #[test]
    fn execve_decodes_into_an_exec_action() {
        let req = frame(|p| {
            p.put_u32(ScoutCmd::Execve as u32).expect("cmd");
            p.put_i32(4321).expect("pid");
            put_path(p, Path::new("/bin/true"));
        });
        let mut fs = HostFs;
        let Action::Exec { pid } = handle_request(&mut fs, &req, &[], 7).expect("request") else {
            panic!("execve must request a handoff");
        };
        assert_eq!(pid.as_raw(), 4321);
    }

    #[test]
    fn fstat_uses_the_ancillary_fd() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("f");
        std::fs::write(&file, b"abc").expect("write");
        let f = std::fs::File::open(&file).expect("open");
        // handle_request adopts (and closes) the fd; dup one for it.
        let duped = f.try_clone().expect("dup");

        let req = frame(|p| {
            p.put_u32(ScoutCmd::Fstat as u32).expect("cmd");
            p.put_i32(duped.as_raw_fd()).expect("fd value");
        });
        let raw = std::os::fd::IntoRawFd::into_raw_fd(duped);
        let mut fs = HostFs;
        let Action::Reply { bytes, .. } =
            handle_request(&mut fs, &req, &[raw], 7).expect("request")
        else {
            panic!("fstat must reply");
        };
        let mut u = Unpacker::from_datagram(&bytes).expect("reply");
        assert_eq!(u.i32().expect("ret"), 0);
        assert_eq!(u.remaining(), std::mem::size_of::<libc::stat>());
    }
}
