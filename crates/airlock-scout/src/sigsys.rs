//! SIGSYS handler: reconstructs trapped syscalls and fakes returns.
//!
//! `SECCOMP_RET_TRAP` delivers `SIGSYS` synchronously on the offending
//! thread with the syscall number in the saved `rax` and its arguments
//! in `rdi, rsi, rdx, r10, r8, r9`. The handler dispatches on the
//! number, obtains a result (from the supervisor, the trampoline, or a
//! fake frame), and writes it back into the saved `rax` so the
//! interrupted code observes an ordinary return.
//!
//! SIGSYS stays unblocked during handling (`SA_NODEFER`) by design:
//! every syscall issued from here goes through the whitelisted
//! trampoline page, so no nested trap can occur.

use core::ffi::{c_char, c_int, c_void};

use crate::bridge;
use crate::fakeframe;
use crate::trampoline::sys;

/// Kernel-layout sigaction for the raw `rt_sigaction` call (the libc
/// struct has a different field order and an oversized mask).
#[repr(C)]
struct KernelSigaction {
    handler: u64,
    flags: u64,
    restorer: u64,
    mask: u64,
}

/// `SA_RESTORER`, per the Linux kernel's `<asm-generic/signal-defs.h>`.
/// `libc` doesn't expose this constant since glibc sets it implicitly.
const SA_RESTORER: c_int = 0x0400_0000;

/// Explicit signal-return stub: nothing links a libc restorer here.
#[unsafe(naked)]
unsafe extern "C" fn sigreturn_stub() {
    core::arch::naked_asm!(
        "mov eax, 15", // __NR_rt_sigreturn
        "syscall",
    )
}

/// Installs the handler via a raw `rt_sigaction` through the
/// trampoline (`rt_sigaction` itself is in the trap set, and on
/// re-injection the filter is already live).
pub fn install_handler() {
    let act = KernelSigaction {
        handler: sigsys_handler as u64,
        flags: (libc::SA_SIGINFO | libc::SA_NODEFER | SA_RESTORER) as u64,
        restorer: sigreturn_stub as u64,
        mask: 0,
    };
    let _ = sys(
        libc::SYS_rt_sigaction,
        i64::from(libc::SIGSYS),
        &raw const act as i64,
        0,
        8, // sizeof(kernel sigset_t)
        0,
        0,
    );
}

extern "C" fn sigsys_handler(_signo: c_int, _info: *mut libc::siginfo_t, ctx: *mut c_void) {
    unsafe {
        let uc = &mut *ctx.cast::<libc::ucontext_t>();
        let gregs: &mut [i64; fakeframe::NGREG] = &mut uc.uc_mcontext.gregs;
        handle_syscall(gregs);
    }
}

unsafe fn handle_syscall(gregs: &mut [i64; fakeframe::NGREG]) {
    let nr = gregs[libc::REG_RAX as usize];
    let a1 = gregs[libc::REG_RDI as usize];
    let a2 = gregs[libc::REG_RSI as usize];
    let a3 = gregs[libc::REG_RDX as usize];
    let a4 = gregs[libc::REG_R10 as usize];

    let ret = unsafe {
        match nr {
            libc::SYS_open => bridge::send_open(a1 as *const c_char, a2 as i32, a3 as u32),
            libc::SYS_openat => {
                bridge::send_openat(a1 as i32, a2 as *const c_char, a3 as i32, a4 as u32)
            }
            libc::SYS_access => bridge::send_access(a1 as *const c_char, a2 as i32),
            libc::SYS_fstat => bridge::send_fstat(a1 as i32, a2 as *mut libc::stat),
            libc::SYS_stat => bridge::send_stat(a1 as *const c_char, a2 as *mut libc::stat),
            libc::SYS_lstat => bridge::send_lstat(a1 as *const c_char, a2 as *mut libc::stat),
            libc::SYS_readlink => {
                bridge::send_readlink(a1 as *const c_char, a2 as *mut u8, a3 as u64)
            }
            libc::SYS_unlink => bridge::send_unlink(a1 as *const c_char),

            // Trapped to reserve future policy; no supervisor hop.
            libc::SYS_dup => sys(libc::SYS_dup, a1, 0, 0, 0, 0, 0),
            libc::SYS_dup2 => sys(libc::SYS_dup2, a1, a2, 0, 0, 0, 0),

            libc::SYS_rt_sigaction => {
                if a1 == i64::from(libc::SIGSYS) {
                    // The sandbox keeps its SIGSYS handler; report
                    // success without applying the change.
                    0
                } else {
                    sys(libc::SYS_rt_sigaction, a1, a2, a3, a4, 0, 0)
                }
            }

            libc::SYS_execve => fakeframe::divert_execve(gregs),
            libc::SYS_vfork => {
                fakeframe::divert_vfork(gregs);
                0
            }

            // The filter never traps anything else.
            _ => -i64::from(libc::ENOSYS),
        }
    };
    gregs[libc::REG_RAX as usize] = ret;
}
