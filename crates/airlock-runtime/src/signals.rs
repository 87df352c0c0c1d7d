//! SIGCHLD-driven shutdown.
//!
//! The mission's death must stop the message loop, but the loop sits in
//! a blocking `epoll_wait`. The handler therefore sends the
//! `STOP_MSG_LOOP` frame to the carrier socket (a single `send(2)`,
//! async-signal-safe) so the loop exits through its normal dispatch
//! path rather than from signal context.
//!
//! `SIGCHLD_IGNORE` suppresses the handler during exec handoff: the
//! ptrace attach/detach dance produces child-stop notifications that
//! must not be mistaken for the mission dying.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::unistd::Pid;

use airlock_common::protocol::{CARRIER_SOCK, STOP_MSG_LOOP_CMD};

use crate::error::{Result, RuntimeError};

/// Suppresses the handler while the supervisor is ptrace-attached to a
/// mission around `execve`. Relaxed ordering is deliberate: the flag is
/// only ever read from signal context on the same thread that set it.
pub static SIGCHLD_IGNORE: AtomicBool = AtomicBool::new(false);

static MISSION_PID: AtomicI32 = AtomicI32::new(-1);
static MISSION_STATUS: AtomicI32 = AtomicI32::new(255);
static MISSION_DONE: AtomicBool = AtomicBool::new(false);

/// Records which pid counts as "the mission".
pub fn watch_mission(pid: Pid) {
    MISSION_PID.store(pid.as_raw(), Ordering::Relaxed);
}

/// Exit status to propagate for the mission, 255 until it finishes.
pub fn mission_status() -> i32 {
    MISSION_STATUS.load(Ordering::Relaxed)
}

/// Whether the mission has already been seen exiting.
pub fn mission_done() -> bool {
    MISSION_DONE.load(Ordering::Relaxed)
}

/// Sends the stop frame to the carrier socket.
///
/// Callable from signal context: one `send(2)` on a datagram socket,
/// no allocation, no locks.
pub fn stop_msg_loop() {
    let mut frame = [0u8; 8];
    frame[..4].copy_from_slice(&4u32.to_le_bytes());
    frame[4..].copy_from_slice(&STOP_MSG_LOOP_CMD.to_le_bytes());
    // SAFETY: plain send on an fd the carrier keeps open for the
    // process lifetime; failure just means shutdown is already racing.
    let _ = unsafe {
        libc::send(
            CARRIER_SOCK,
            frame.as_ptr().cast(),
            frame.len(),
            0,
        )
    };
}

extern "C" fn sigchld_handler(
    _signo: libc::c_int,
    info: *mut libc::siginfo_t,
    _ctx: *mut libc::c_void,
) {
    if SIGCHLD_IGNORE.load(Ordering::Relaxed) {
        return;
    }
    // SAFETY: the kernel hands a valid siginfo to an SA_SIGINFO handler.
    let (pid, code, status) = unsafe { ((*info).si_pid(), (*info).si_code, (*info).si_status()) };
    if pid != MISSION_PID.load(Ordering::Relaxed) {
        return;
    }
    match code {
        libc::CLD_EXITED => {
            MISSION_STATUS.store(status, Ordering::Relaxed);
            MISSION_DONE.store(true, Ordering::Relaxed);
            stop_msg_loop();
        }
        libc::CLD_KILLED | libc::CLD_DUMPED => {
            // SIGSYS/SIGSTOP terminations are sandbox mechanics, not
            // the mission finishing.
            if status != libc::SIGSYS && status != libc::SIGSTOP {
                MISSION_STATUS.store(128 + status, Ordering::Relaxed);
                MISSION_DONE.store(true, Ordering::Relaxed);
                stop_msg_loop();
            }
        }
        // Stops and continues happen throughout ptrace traffic.
        _ => {}
    }
}

/// Installs the SIGCHLD handler watching `pid`.
///
/// # Errors
///
/// Returns an error if `sigaction` fails.
pub fn install_sigchld(pid: Pid) -> Result<()> {
    watch_mission(pid);
    let action = SigAction::new(
        SigHandler::SigAction(sigchld_handler),
        SaFlags::SA_SIGINFO,
        SigSet::empty(),
    );
    // SAFETY: the handler only touches atomics and calls send(2).
    let _ = unsafe { sigaction(Signal::SIGCHLD, &action) }.map_err(|errno| RuntimeError::Sys {
        op: "sigaction",
        errno,
    })?;
    Ok(())
}
