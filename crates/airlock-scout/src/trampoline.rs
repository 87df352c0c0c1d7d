//! The syscall trampoline page.
//!
//! A 4 KiB RWX page is mapped at the fixed address the BPF filter
//! whitelists by instruction pointer. Two stubs are copied in:
//!
//! - offset 0: a generic `syscall(2)` in the SysV convention, kernel
//!   errno convention (negative return, no `errno` variable);
//! - offset 2048: a frameless `vfork` stub. `vfork` must not return
//!   through an intervening stack frame, so the stub parks the return
//!   address in `rsi` around the `syscall` (the kernel preserves every
//!   register across `syscall` except rax, rcx and r11).
//!
//! After installation, every syscall the scout makes goes through this
//! page; `mmap` is the single exception, because mapping the page is
//! what makes the rest possible and `mmap` is never in the trap set.

use airlock_common::protocol::{TRAMPOLINE_ADDR, TRAMPOLINE_PAGE_SIZE, VFORK_STUB_OFFSET};

type SyscallFn = unsafe extern "C" fn(i64, i64, i64, i64, i64, i64, i64) -> i64;
type VforkFn = unsafe extern "C" fn() -> i64;

/// Bytes copied per stub. Both stubs are far smaller; the surrounding
/// shared-object mapping guarantees the over-read stays valid.
const STUB_COPY: usize = 256;

/// Template for the generic stub at page offset 0.
#[unsafe(naked)]
pub unsafe extern "C" fn syscall_template(
    nr: i64,
    a1: i64,
    a2: i64,
    a3: i64,
    a4: i64,
    a5: i64,
    a6: i64,
) -> i64 {
    core::arch::naked_asm!(
        "mov rax, rdi",
        "mov rdi, rsi",
        "mov rsi, rdx",
        "mov rdx, rcx",
        "mov r10, r8",
        "mov r8, r9",
        "mov r9, [rsp + 8]",
        "syscall",
        "ret",
    )
}

/// Template for the frameless `vfork` stub at page offset 2048.
#[unsafe(naked)]
pub unsafe extern "C" fn vfork_template() -> i64 {
    core::arch::naked_asm!(
        "pop rsi",
        "mov eax, 58", // __NR_vfork
        "syscall",
        "jmp rsi",
    )
}

/// Maps the fixed page and copies both stubs in.
///
/// Idempotent: `MAP_FIXED` replaces any previous mapping, so calling
/// this again (the loader also installs a copy) is harmless.
pub fn install() {
    unsafe {
        // Direct syscall from scout text: legal because mmap is never
        // trapped, even when a filter from a previous image is live.
        let page = syscall_template(
            libc::SYS_mmap,
            TRAMPOLINE_ADDR as i64,
            TRAMPOLINE_PAGE_SIZE as i64,
            i64::from(libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC),
            i64::from(libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED),
            -1,
            0,
        );
        if page != TRAMPOLINE_ADDR as i64 {
            // Nothing workable without the page.
            core::arch::asm!("ud2", options(noreturn));
        }

        let dst = TRAMPOLINE_ADDR as *mut u8;
        core::ptr::copy_nonoverlapping(syscall_template as *const u8, dst, STUB_COPY);
        core::ptr::copy_nonoverlapping(
            vfork_template as *const u8,
            dst.add(VFORK_STUB_OFFSET),
            STUB_COPY,
        );
    }
}

/// Issues a syscall through the whitelisted page.
#[inline]
pub fn sys(nr: i64, a1: i64, a2: i64, a3: i64, a4: i64, a5: i64, a6: i64) -> i64 {
    unsafe {
        let f: SyscallFn = core::mem::transmute(TRAMPOLINE_ADDR);
        f(nr, a1, a2, a3, a4, a5, a6)
    }
}

/// Issues `vfork` through the whitelisted frameless stub.
///
/// # Safety
///
/// Standard `vfork` rules: until the child execs or exits, parent and
/// child share the address space and the child must not return through
/// the caller's frames. [`crate::fakeframe::vfork_handler`] is the only
/// sanctioned caller.
#[inline]
pub unsafe fn vfork() -> i64 {
    unsafe {
        let f: VforkFn = core::mem::transmute(TRAMPOLINE_ADDR + VFORK_STUB_OFFSET);
        f()
    }
}
