//! The scout: Airlock's in-process sandbox agent.
//!
//! Built as a self-contained `cdylib` and spliced into every mission by
//! the flight deck: no dynamic loader, no libc. The crate is `no_std`
//! (the test harness builds it with std), provides its own `mem*`
//! primitives, and issues every system call through the trampoline page
//! at a fixed address that the seccomp filter whitelists by instruction
//! pointer.
//!
//! The constructor runs from the injected loader's init-array pass:
//!
//! 1. recover the caller's flags from the relocated [`global_flags`]
//!    cell;
//! 2. install the syscall trampoline page;
//! 3. establish the private channel to the command center (unless the
//!    channel survived, per the flags);
//! 4. install the `SIGSYS` handler;
//! 5. install the seccomp filter (unless one is already live; it
//!    survives `execve`).

#![cfg_attr(not(test), no_std)]
#![allow(clippy::missing_safety_doc)]

pub mod bridge;
pub mod channel;
pub mod fakeframe;
pub mod filter;
pub mod sigsys;
pub mod trampoline;

mod mem;

use airlock_common::protocol::{FLAG_CC_COMM_READY, FLAG_FILTER_INSTALLED};

/// Flag cell smuggled through the relocation pass.
///
/// The flight deck appends a synthetic relocation `(offset_of(
/// global_flags), offset_of(global_flags) + flags)`, so after the
/// loader's uniform `*(base + offset) = base + addend` walk this cell
/// holds `&global_flags + flags`. Subtracting the cell's own address
/// recovers the flags while staying immune to the relocation pass.
#[unsafe(no_mangle)]
pub static mut global_flags: u64 = 0;

fn recover_flags() -> u64 {
    let cell = unsafe { core::ptr::read_volatile(&raw const global_flags) };
    cell.wrapping_sub(&raw const global_flags as u64)
}

/// Constructor body, invoked from the loader's init-array walk.
extern "C" fn scout_init() {
    let flags = recover_flags();

    trampoline::install();

    if flags & FLAG_CC_COMM_READY == 0 {
        let _ = channel::establish();
        bridge::send_hello();
    }

    sigsys::install_handler();

    if flags & FLAG_FILTER_INSTALLED == 0 {
        filter::install();
    }
}

#[unsafe(link_section = ".init_array")]
#[used]
static SCOUT_CTOR: extern "C" fn() = scout_init;

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    // No unwinder and nothing sane to report to; die loudly.
    unsafe { core::arch::asm!("ud2", options(noreturn)) }
}
