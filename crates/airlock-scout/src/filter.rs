//! The seccomp-BPF program.
//!
//! Layout, in classic BPF:
//!
//! ```text
//! ip_lo = load instruction_pointer[0..4]
//! if ip_lo >= 4096 goto check_nr          // past the trampoline page
//! ip_hi = load instruction_pointer[4..8]
//! if ip_hi == 0x2000 return ALLOW         // trampoline page: allow
//! check_nr:
//! nr = load nr
//! if nr in TRAPPED return TRAP
//! return ALLOW
//! ```
//!
//! Only the trampoline page's syscalls bypass the number check, so a
//! trapped call issued from anywhere else, including this library's
//! own text, lands in the SIGSYS handler.

use airlock_common::protocol::TRAMPOLINE_ADDR;

use crate::trampoline::sys;

#[repr(C)]
struct SockFilter {
    code: u16,
    jt: u8,
    jf: u8,
    k: u32,
}

#[repr(C)]
struct SockFprog {
    len: u16,
    filter: *const SockFilter,
}

const BPF_LD: u16 = 0x00;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JMP: u16 = 0x05;
const BPF_JEQ: u16 = 0x10;
const BPF_JGE: u16 = 0x30;
const BPF_K: u16 = 0x00;
const BPF_RET: u16 = 0x06;

const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
const SECCOMP_RET_TRAP: u32 = 0x0003_0000;

/// `struct seccomp_data` offsets: nr, arch, instruction_pointer, args.
const OFF_NR: u32 = 0;
const OFF_IP_LO: u32 = 8;
const OFF_IP_HI: u32 = 12;

const fn stmt(code: u16, k: u32) -> SockFilter {
    SockFilter {
        code,
        jt: 0,
        jf: 0,
        k,
    }
}

const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> SockFilter {
    SockFilter { code, jt, jf, k }
}

/// Syscalls delivered to the SIGSYS handler.
pub const TRAPPED: [i64; 13] = [
    libc::SYS_rt_sigaction,
    libc::SYS_dup,
    libc::SYS_dup2,
    libc::SYS_open,
    libc::SYS_openat,
    libc::SYS_access,
    libc::SYS_fstat,
    libc::SYS_lstat,
    libc::SYS_execve,
    libc::SYS_readlink,
    libc::SYS_stat,
    libc::SYS_unlink,
    libc::SYS_vfork,
];

static FILTER: [SockFilter; 20] = [
    // Always allow requests made from the trampoline page.
    stmt(BPF_LD | BPF_W | BPF_ABS, OFF_IP_LO),
    jump(BPF_JMP | BPF_JGE | BPF_K, 4096, 2, 0),
    stmt(BPF_LD | BPF_W | BPF_ABS, OFF_IP_HI),
    jump(
        BPF_JMP | BPF_JEQ | BPF_K,
        (TRAMPOLINE_ADDR >> 32) as u32,
        14,
        0,
    ),
    stmt(BPF_LD | BPF_W | BPF_ABS, OFF_NR),
    jump(BPF_JMP | BPF_JEQ | BPF_K, TRAPPED[0] as u32, 13, 0),
    jump(BPF_JMP | BPF_JEQ | BPF_K, TRAPPED[1] as u32, 12, 0),
    jump(BPF_JMP | BPF_JEQ | BPF_K, TRAPPED[2] as u32, 11, 0),
    jump(BPF_JMP | BPF_JEQ | BPF_K, TRAPPED[3] as u32, 10, 0),
    jump(BPF_JMP | BPF_JEQ | BPF_K, TRAPPED[4] as u32, 9, 0),
    jump(BPF_JMP | BPF_JEQ | BPF_K, TRAPPED[5] as u32, 8, 0),
    jump(BPF_JMP | BPF_JEQ | BPF_K, TRAPPED[6] as u32, 7, 0),
    jump(BPF_JMP | BPF_JEQ | BPF_K, TRAPPED[7] as u32, 6, 0),
    jump(BPF_JMP | BPF_JEQ | BPF_K, TRAPPED[8] as u32, 5, 0),
    jump(BPF_JMP | BPF_JEQ | BPF_K, TRAPPED[9] as u32, 4, 0),
    jump(BPF_JMP | BPF_JEQ | BPF_K, TRAPPED[10] as u32, 3, 0),
    jump(BPF_JMP | BPF_JEQ | BPF_K, TRAPPED[11] as u32, 2, 0),
    jump(BPF_JMP | BPF_JEQ | BPF_K, TRAPPED[12] as u32, 1, 0),
    stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW),
    stmt(BPF_RET | BPF_K, SECCOMP_RET_TRAP),
];

/// Installs the filter: `no_new_privs`, then `seccomp(2)`.
///
/// Installed exactly once per process tree: the filter survives
/// `execve`, and re-injection passes `FLAG_FILTER_INSTALLED` so the
/// constructor skips this.
pub fn install() {
    let _ = sys(
        libc::SYS_prctl,
        i64::from(libc::PR_SET_NO_NEW_PRIVS),
        1,
        0,
        0,
        0,
        0,
    );
    let prog = SockFprog {
        len: FILTER.len() as u16,
        filter: FILTER.as_ptr(),
    };
    let _ = sys(
        libc::SYS_seccomp,
        i64::from(libc::SECCOMP_SET_MODE_FILTER),
        0,
        &raw const prog as i64,
        0,
        0,
        0,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_trapped_syscall_has_a_match_row() {
        // Rows 5..18 are the JEQ ladder, one per trapped syscall.
        for (i, nr) in TRAPPED.iter().enumerate() {
            let row = &FILTER[5 + i];
            assert_eq!(row.code, BPF_JMP | BPF_JEQ | BPF_K);
            assert_eq!(row.k, *nr as u32, "row for syscall {nr}");
        }
    }

    #[test]
    fn match_rows_all_jump_to_the_trap_return() {
        let trap_index = FILTER.len() - 1;
        assert_eq!(FILTER[trap_index].k, SECCOMP_RET_TRAP);
        for (i, nr) in TRAPPED.iter().enumerate() {
            let row_index = 5 + i;
            let target = row_index + 1 + FILTER[row_index].jt as usize;
            assert_eq!(target, trap_index, "syscall {nr} must jump to TRAP");
        }
    }

    #[test]
    fn fallthrough_is_allow() {
        let allow_index = FILTER.len() - 2;
        assert_eq!(FILTER[allow_index].k, SECCOMP_RET_ALLOW);
        // The last JEQ falls through to ALLOW.
        let last_jeq = 5 + TRAPPED.len() - 1;
        assert_eq!(last_jeq + 1, allow_index);
    }

    #[test]
    fn trampoline_page_check_reaches_allow() {
        // Row 3 compares the ip high word; jt must land on ALLOW.
        let target = 3 + 1 + FILTER[3].jt as usize;
        assert_eq!(FILTER[target].k, SECCOMP_RET_ALLOW);
        assert_eq!(FILTER[3].k, (TRAMPOLINE_ADDR >> 32) as u32);
        // Row 1 skips the page check for ip_lo >= page size.
        let target = 1 + 1 + FILTER[1].jt as usize;
        assert_eq!(target, 4);
        assert_eq!(FILTER[4].code, BPF_LD | BPF_W | BPF_ABS);
        assert_eq!(FILTER[4].k, OFF_NR);
    }
}
