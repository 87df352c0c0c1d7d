//! Narrow ptrace surface.
//!
//! Every tracee manipulation in the workspace goes through this module.
//! The invariant all callers maintain: the tracee is stopped at every
//! `set_regs`/`poke_text` call, and there is exactly one attacher at a
//! time.

use libc::user_regs_struct;
use nix::errno::Errno;
use nix::sys::ptrace as nixpt;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

use crate::error::{CoreError, Result};

/// Ptrace event payload for `PTRACE_EVENT_EXEC`.
pub const EVENT_EXEC: i32 = libc::PTRACE_EVENT_EXEC;

/// `syscall; int3`, padded to one poke word.
const SYSCALL_STUB: [u8; 8] = [0x0f, 0x05, 0xcc, 0x90, 0x90, 0x90, 0x90, 0x90];

/// Room left below the interrupted stack pointer before running an
/// injected syscall, so the red zone and live frame stay intact.
const STACK_SHIFT: u64 = 512;

fn pt_err(op: &'static str, pid: Pid) -> impl FnOnce(Errno) -> CoreError {
    move |errno| CoreError::Ptrace {
        op,
        pid: pid.as_raw(),
        errno,
    }
}

/// Attaches to `pid` and waits for the attach stop.
///
/// # Errors
///
/// Returns an error if the attach or the wait fails.
pub fn attach(pid: Pid) -> Result<()> {
    nixpt::attach(pid).map_err(pt_err("attach", pid))?;
    wait_stop(pid, Signal::SIGSTOP)
}

/// Detaches from `pid`.
///
/// # Errors
///
/// Returns an error if the detach fails.
pub fn detach(pid: Pid) -> Result<()> {
    nixpt::detach(pid, None).map_err(pt_err("detach", pid))
}

/// Resumes `pid`.
///
/// # Errors
///
/// Returns an error if the continue request fails.
pub fn cont(pid: Pid) -> Result<()> {
    nixpt::cont(pid, None).map_err(pt_err("cont", pid))
}

/// Single-steps one instruction and waits for the resulting trap.
///
/// # Errors
///
/// Returns an error if the step fails or the stop is not a `SIGTRAP`.
pub fn step(pid: Pid) -> Result<()> {
    nixpt::step(pid, None).map_err(pt_err("step", pid))?;
    wait_stop(pid, Signal::SIGTRAP)
}

/// Sets ptrace options on a stopped tracee.
///
/// # Errors
///
/// Returns an error if the request fails.
pub fn set_options(pid: Pid, options: nixpt::Options) -> Result<()> {
    nixpt::setoptions(pid, options).map_err(pt_err("setoptions", pid))
}

/// Waits until `pid` stops with `expected`.
///
/// Any other stop reason is surfaced as an error: an unexpected signal
/// during tracee surgery means the invariants are already gone.
///
/// # Errors
///
/// Returns an error on wait failure or an unexpected stop.
pub fn wait_stop(pid: Pid, expected: Signal) -> Result<()> {
    match wait_once(pid)? {
        WaitStatus::Stopped(_, sig) if sig == expected => Ok(()),
        other => Err(CoreError::UnexpectedStop {
            pid: pid.as_raw(),
            status: format!("{other:?}"),
        }),
    }
}

/// Waits until `pid` traps, returning the ptrace event
/// (`(status >> 16) & 0xff`, zero for a plain trap).
///
/// # Errors
///
/// Returns an error on wait failure or a non-trap stop.
pub fn wait_trap(pid: Pid) -> Result<i32> {
    match wait_once(pid)? {
        WaitStatus::Stopped(_, Signal::SIGTRAP) => Ok(0),
        WaitStatus::PtraceEvent(_, Signal::SIGTRAP, event) => Ok(event),
        other => Err(CoreError::UnexpectedStop {
            pid: pid.as_raw(),
            status: format!("{other:?}"),
        }),
    }
}

fn wait_once(pid: Pid) -> Result<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => return Ok(status),
            Err(Errno::EINTR) => {}
            Err(errno) => {
                return Err(CoreError::Wait {
                    pid: pid.as_raw(),
                    errno,
                });
            }
        }
    }
}

/// Reads the full general-register image.
///
/// # Errors
///
/// Returns an error if the request fails.
pub fn get_regs(pid: Pid) -> Result<user_regs_struct> {
    nixpt::getregs(pid).map_err(pt_err("getregs", pid))
}

/// Writes the full general-register image.
///
/// # Errors
///
/// Returns an error if the request fails.
pub fn set_regs(pid: Pid, regs: &user_regs_struct) -> Result<()> {
    nixpt::setregs(pid, *regs).map_err(pt_err("setregs", pid))
}

/// Copies `buf` into the tracee at `addr`.
///
/// # Errors
///
/// Returns an error if a poke fails.
///
/// # Panics
///
/// Panics unless `buf.len()` is a multiple of 8 (poke granularity).
pub fn poke_text(pid: Pid, addr: u64, buf: &[u8]) -> Result<()> {
    assert_eq!(buf.len() % 8, 0, "poke length must be 8-byte aligned");
    for (i, word) in buf.chunks_exact(8).enumerate() {
        let mut le = [0u8; 8];
        le.copy_from_slice(word);
        let dest = (addr + 8 * i as u64) as nixpt::AddressType;
        // SAFETY: the tracee is stopped and dest points into its
        // address space; POKETEXT writes exactly one word.
        unsafe { nixpt::write(pid, dest, i64::from_le_bytes(le)) }
            .map_err(pt_err("poketext", pid))?;
    }
    Ok(())
}

/// Reads `buf.len()` bytes from the tracee at `addr`.
///
/// # Errors
///
/// Returns an error if a peek fails.
///
/// # Panics
///
/// Panics unless `buf.len()` is a multiple of 8 (peek granularity).
pub fn peek_text(pid: Pid, addr: u64, buf: &mut [u8]) -> Result<()> {
    assert_eq!(buf.len() % 8, 0, "peek length must be 8-byte aligned");
    for (i, word) in buf.chunks_exact_mut(8).enumerate() {
        let src = (addr + 8 * i as u64) as nixpt::AddressType;
        let v = nixpt::read(pid, src).map_err(pt_err("peektext", pid))?;
        word.copy_from_slice(&v.to_le_bytes());
    }
    Ok(())
}

fn mk_syscall_args(regs: &mut user_regs_struct, nr: i64, args: [u64; 6]) {
    regs.rax = nr as u64;
    regs.rdi = args[0];
    regs.rsi = args[1];
    regs.rdx = args[2];
    regs.r10 = args[3];
    regs.r8 = args[4];
    regs.r9 = args[5];
}

/// Runs one syscall inside a stopped tracee and returns its raw result.
///
/// Saves the code under the current `rip` and the register image,
/// overwrites the code with a `syscall; int3` stub, runs it, then
/// restores both. When `saved_regs` is given it is used as the base
/// register image instead of fetching one (and is what gets restored).
///
/// # Errors
///
/// Returns an error if any ptrace step fails; a negative syscall
/// result is returned to the caller, not treated as an error here.
pub fn inject_run_syscall(
    pid: Pid,
    nr: i64,
    args: [u64; 6],
    saved_regs: Option<&user_regs_struct>,
) -> Result<i64> {
    let regs = match saved_regs {
        Some(r) => *r,
        None => get_regs(pid)?,
    };

    let mut saved_code = [0u8; SYSCALL_STUB.len()];
    peek_text(pid, regs.rip, &mut saved_code)?;

    let mut call_regs = regs;
    mk_syscall_args(&mut call_regs, nr, args);
    // Keep clear of the interrupted frame and the red zone.
    call_regs.rsp = regs.rsp - STACK_SHIFT;
    set_regs(pid, &call_regs)?;
    poke_text(pid, regs.rip, &SYSCALL_STUB)?;

    cont(pid)?;
    wait_stop(pid, Signal::SIGTRAP)?;

    let after = get_regs(pid)?;
    poke_text(pid, regs.rip, &saved_code)?;
    set_regs(pid, &regs)?;
    Ok(after.rax as i64)
}

/// Runs a code block already poked (or about to be poked) at a chosen
/// address; registers are *not* saved, and on completion they are restored
/// from `restore`.
///
/// `template` supplies the full register image for the run (the caller
/// sets `rip`/`rsp` there); `args` land in the SysV argument registers.
/// Returns `rax` at the trap.
///
/// # Errors
///
/// Returns an error if any ptrace step fails or the stop is not the
/// expected trap.
pub fn inject_run_funcall_nosave(
    pid: Pid,
    code: &[u8],
    dest: u64,
    args: [u64; 6],
    template: &user_regs_struct,
    restore: &user_regs_struct,
) -> Result<i64> {
    let mut padded = code.to_vec();
    while padded.len() % 8 != 0 {
        padded.push(0xcc);
    }
    poke_text(pid, dest, &padded)?;

    let mut regs = *template;
    regs.rdi = args[0];
    regs.rsi = args[1];
    regs.rdx = args[2];
    regs.rcx = args[3];
    regs.r8 = args[4];
    regs.r9 = args[5];
    set_regs(pid, &regs)?;

    cont(pid)?;
    wait_stop(pid, Signal::SIGTRAP)?;

    let after = get_regs(pid)?;
    set_regs(pid, restore)?;
    Ok(after.rax as i64)
}

/// Runs `mmap` inside the tracee.
///
/// # Errors
///
/// Returns an error if the injection fails or the mapping itself
/// reports an errno.
#[allow(clippy::too_many_arguments)]
pub fn inject_mmap(
    pid: Pid,
    addr: u64,
    length: u64,
    prot: i32,
    flags: i32,
    fd: i32,
    offset: u64,
    saved_regs: Option<&user_regs_struct>,
) -> Result<u64> {
    let ret = inject_run_syscall(
        pid,
        libc::SYS_mmap,
        [
            addr,
            length,
            prot as u64,
            flags as u64,
            fd as u64,
            offset,
        ],
        saved_regs,
    )?;
    if ret < 0 {
        return Err(CoreError::InjectedSyscall {
            nr: libc::SYS_mmap,
            errno: -ret,
        });
    }
    Ok(ret as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_stub_is_one_poke_word() {
        assert_eq!(SYSCALL_STUB.len() % 8, 0);
        // syscall = 0f 05, int3 = cc; the padding must be inert.
        assert_eq!(&SYSCALL_STUB[..3], &[0x0f, 0x05, 0xcc]);
        assert!(SYSCALL_STUB[3..].iter().all(|&b| b == 0x90));
    }

    #[test]
    #[should_panic(expected = "8-byte aligned")]
    fn unaligned_poke_is_rejected() {
        let _ = poke_text(Pid::from_raw(1), 0, &[0u8; 4]);
    }
}
