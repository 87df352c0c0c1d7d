//! Position-independent loader blob.
//!
//! Everything between [`loader_start`] and [`loader_end`] is copied
//! byte-for-byte into a tracee and executed there, so the code in this
//! module obeys three hard rules:
//!
//! 1. no calls or data references outside the `[loader_start,
//!    loader_end)` byte range: every helper lives in the same linker
//!    section, and byte copies use volatile stores so the compiler
//!    cannot outline them into `memcpy`;
//! 2. no panics, no slices, no bounds checks; raw pointers only;
//! 3. the only syscalls issued directly from loader text are ones the
//!    seccomp filter never traps (`mmap`, `exit`). Everything else goes
//!    through the trampoline page the loader installs first, because on
//!    re-injection after `execve` the filter is already live.

use airlock_common::protocol::{TRAMPOLINE_ADDR, TRAMPOLINE_PAGE_SIZE};

/// One `PT_LOAD` segment, as handed to the loader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgHeader {
    /// File offset of the segment.
    pub offset: u64,
    /// Virtual address relative to the load base.
    pub addr: u64,
    /// Bytes present in the file.
    pub file_size: u64,
    /// Bytes occupied in memory.
    pub mem_size: u64,
}

const PG_SZ: u64 = 4096;

/// Bytes copied from [`loader_syscall`] into the trampoline page. The
/// stub is far smaller; the injected region always has slack behind the
/// loader, so over-copying is harmless.
const SYSCALL_STUB_COPY: usize = 256;

type Trampoline = unsafe extern "C" fn(i64, i64, i64, i64, i64, i64, i64) -> i64;

/// Start marker. Must stay the first definition in this section.
#[unsafe(no_mangle)]
#[unsafe(link_section = ".text.airlock_loader")]
pub extern "C" fn loader_start() {}

/// Raw `syscall(2)` in the SysV calling convention, kernel errno
/// convention (negative return, no `errno` variable).
///
/// Also serves as the template for the trampoline page: its first
/// [`SYSCALL_STUB_COPY`] bytes are copied to [`TRAMPOLINE_ADDR`].
#[unsafe(naked)]
#[unsafe(no_mangle)]
#[unsafe(link_section = ".text.airlock_loader")]
pub unsafe extern "C" fn loader_syscall(
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

/// Maps the scout shared object into this (tracee) address space.
///
/// Called from the injected trap stub with the argument block assembled
/// by the flight deck. Steps: install the trampoline page, open the
/// object, map one anonymous RWX region covering every segment, read
/// the segments in, apply the `(offset, addend)` relocation list, close
/// the fd, run the init array.
///
/// Returns 0 on success or the failing syscall's negative errno; exits
/// with status 255 if the first segment is not `(0, 0)` (the layout
/// assumption everything else builds on).
///
/// # Safety
///
/// Only callable inside a tracee prepared by the flight deck: every
/// pointer argument must point into the injected block.
#[unsafe(no_mangle)]
#[unsafe(link_section = ".text.airlock_loader")]
pub unsafe extern "C" fn load_shared_object(
    path: *const u8,
    headers: *const ProgHeader,
    header_num: i64,
    init_array: *const u64,
    rela: *const u64,
    _flags: u64,
) -> i64 {
    unsafe {
        // The filter (if present) never traps mmap, so this one direct
        // syscall is safe; everything after it goes through the page.
        let page = loader_syscall(
            libc::SYS_mmap,
            TRAMPOLINE_ADDR as i64,
            TRAMPOLINE_PAGE_SIZE as i64,
            (libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC) as i64,
            (libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED) as i64,
            -1,
            0,
        );
        if page < 0 {
            return page;
        }
        let src = loader_syscall as *const u8;
        let dst = page as *mut u8;
        let mut i = 0;
        while i < SYSCALL_STUB_COPY {
            core::ptr::write_volatile(dst.add(i), core::ptr::read_volatile(src.add(i)));
            i += 1;
        }
        let trampo: Trampoline = core::mem::transmute(TRAMPOLINE_ADDR);

        let fd = trampo(libc::SYS_open, path as i64, libc::O_RDONLY as i64, 0, 0, 0, 0);
        if fd < 0 {
            return fd;
        }

        if (*headers).offset != 0 || (*headers).addr != 0 {
            // The first segment must start at file offset 0 and load at
            // relative address 0.
            let _ = trampo(libc::SYS_exit, 255, 0, 0, 0, 0, 0);
        }

        let mut msz: u64 = 0;
        let mut i = 0;
        while i < header_num {
            let h = headers.offset(i as isize);
            let stop = ((*h).addr + (*h).mem_size + PG_SZ - 1) & !(PG_SZ - 1);
            if stop > msz {
                msz = stop;
            }
            i += 1;
        }

        let base = trampo(
            libc::SYS_mmap,
            0,
            msz as i64,
            (libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC) as i64,
            (libc::MAP_PRIVATE | libc::MAP_ANONYMOUS) as i64,
            -1,
            0,
        );
        if base < 0 {
            return base;
        }

        let mut i = 0;
        while i < header_num {
            let h = headers.offset(i as isize);
            let r = trampo(
                libc::SYS_lseek,
                fd,
                (*h).offset as i64,
                libc::SEEK_SET as i64,
                0,
                0,
                0,
            );
            if r < 0 {
                return r;
            }
            let r = trampo(
                libc::SYS_read,
                fd,
                base + (*h).addr as i64,
                (*h).file_size as i64,
                0,
                0,
                0,
            );
            if r < 0 {
                return r;
            }
            i += 1;
        }

        // (offset, addend) pairs, terminated by a zero offset.
        let mut p = rela;
        while *p != 0 {
            let offset = *p;
            let addend = *p.add(1);
            let slot = (base as u64 + offset) as *mut u64;
            core::ptr::write_volatile(slot, base as u64 + addend);
            p = p.add(2);
        }

        let r = trampo(libc::SYS_close, fd, 0, 0, 0, 0, 0);
        if r < 0 {
            return r;
        }

        let mut p = init_array;
        while *p != 0 {
            let ctor: extern "C" fn() = core::mem::transmute(base as u64 + *p);
            ctor();
            p = p.add(1);
        }

        0
    }
}

/// End marker. Must stay the last definition in this section.
#[unsafe(no_mangle)]
#[unsafe(link_section = ".text.airlock_loader")]
pub extern "C" fn loader_end() {}

/// Byte range of the loader blob in this process image.
#[must_use]
pub fn loader_bytes() -> &'static [u8] {
    let start = loader_start as usize;
    let end = loader_end as usize;
    assert!(end > start, "loader section was reordered");
    // SAFETY: the markers bracket one contiguous text section.
    unsafe { core::slice::from_raw_parts(start as *const u8, end - start) }
}

/// Offset of the loader entry point within [`loader_bytes`].
#[must_use]
pub fn loader_entry_offset() -> usize {
    load_shared_object as usize - loader_start as usize
}
