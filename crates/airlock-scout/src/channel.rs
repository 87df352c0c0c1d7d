//! Private channel to the command center.
//!
//! The scout creates a `SOCK_DGRAM` socketpair, ships one end to the
//! supervisor over the carrier socket (well-known fd 73) with a
//! `SCOUT_CONNECT` frame carrying the fd as `SCM_RIGHTS`, and keeps the
//! other end close-on-exec; after `execve` the re-injected scout
//! bootstraps a fresh channel the same way.

use core::mem;
use core::sync::atomic::{AtomicI32, Ordering};

use airlock_common::codec::Packer;
use airlock_common::protocol::{CARRIER_SOCK, SCOUT_CONNECT_CMD};

use crate::trampoline::sys;

static SCOUT_SOCK: AtomicI32 = AtomicI32::new(-1);

/// The private socket, or -1 before [`establish`] succeeds.
pub fn sock() -> i32 {
    SCOUT_SOCK.load(Ordering::Relaxed)
}

/// Creates the socketpair and registers with the command center.
///
/// Returns false if any step fails; the scout then runs without a
/// channel and every forwarded syscall reports `-EIO`.
pub fn establish() -> bool {
    let mut socks = [0i32; 2];
    let r = sys(
        libc::SYS_socketpair,
        i64::from(libc::AF_UNIX),
        i64::from(libc::SOCK_DGRAM),
        0,
        socks.as_mut_ptr() as i64,
        0,
        0,
    );
    if r < 0 {
        return false;
    }

    let mut frame_buf = [0u8; 16];
    let mut p = Packer::new(&mut frame_buf);
    if p.put_u32(SCOUT_CONNECT_CMD).is_err() {
        return false;
    }
    let frame = p.finish();

    let sent = send_msg(CARRIER_SOCK, frame, socks[1], -1);
    let _ = sys(libc::SYS_close, i64::from(socks[1]), 0, 0, 0, 0, 0);
    if sent < 0 {
        let _ = sys(libc::SYS_close, i64::from(socks[0]), 0, 0, 0, 0, 0);
        return false;
    }

    let _ = sys(
        libc::SYS_fcntl,
        i64::from(socks[0]),
        i64::from(libc::F_SETFD),
        i64::from(libc::FD_CLOEXEC),
        0,
        0,
        0,
    );
    SCOUT_SOCK.store(socks[0], Ordering::Relaxed);
    true
}

/// Sends one datagram with up to two `SCM_RIGHTS` fds.
///
/// Mirrors the supervisor-side helper, but issues the raw `sendmsg`
/// through the trampoline since no libc is linked here.
pub fn send_msg(sock: i32, data: &[u8], fd1: i32, fd2: i32) -> i64 {
    let mut fds = [0i32; 2];
    let mut nfds = 0usize;
    if fd1 >= 0 {
        fds[nfds] = fd1;
        nfds += 1;
    }
    if fd2 >= 0 {
        fds[nfds] = fd2;
        nfds += 1;
    }

    let mut iov = libc::iovec {
        iov_base: data.as_ptr().cast_mut().cast(),
        iov_len: data.len(),
    };
    // Aligned backing store for the control block.
    let mut cmsg_buf = [0u64; 8];

    // SAFETY: msghdr is plain-old-data.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &raw mut iov;
    msg.msg_iovlen = 1;
    if nfds > 0 {
        unsafe {
            msg.msg_control = cmsg_buf.as_mut_ptr().cast();
            msg.msg_controllen = libc::CMSG_SPACE((nfds * 4) as u32) as usize;
            let cmsg = libc::CMSG_FIRSTHDR(&raw const msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN((nfds * 4) as u32) as usize;
            core::ptr::copy_nonoverlapping(
                fds.as_ptr(),
                libc::CMSG_DATA(cmsg).cast::<i32>(),
                nfds,
            );
        }
    }

    sys(
        libc::SYS_sendmsg,
        i64::from(sock),
        &raw const msg as i64,
        0,
        0,
        0,
        0,
    )
}

/// Result of one blocking receive.
pub struct Received {
    /// Bytes filled in the caller's buffer.
    pub len: usize,
    /// Ancillary fds, -1 when absent.
    pub fds: [i32; 2],
    /// Number of valid entries in `fds`.
    pub nfds: usize,
}

/// Receives one datagram (blocking) into `buf`.
///
/// Returns `None` on receive failure or kernel-side truncation; both
/// mean the channel is unusable and the caller reports `-EIO`.
pub fn receive_one(sock: i32, buf: &mut [u8]) -> Option<Received> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    let mut cmsg_buf = [0u64; 8];

    // SAFETY: msghdr is plain-old-data.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &raw mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast();
    msg.msg_controllen = mem::size_of_val(&cmsg_buf);

    let n = sys(
        libc::SYS_recvmsg,
        i64::from(sock),
        &raw mut msg as i64,
        0,
        0,
        0,
        0,
    );
    if n < 0 || msg.msg_flags & libc::MSG_TRUNC != 0 {
        return None;
    }

    let mut out = Received {
        len: n as usize,
        fds: [-1; 2],
        nfds: 0,
    };
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&raw const msg);
        if !cmsg.is_null()
            && (*cmsg).cmsg_level == libc::SOL_SOCKET
            && (*cmsg).cmsg_type == libc::SCM_RIGHTS
        {
            let count = ((*cmsg).cmsg_len - libc::CMSG_LEN(0) as usize) / 4;
            let count = count.min(2);
            core::ptr::copy_nonoverlapping(
                libc::CMSG_DATA(cmsg).cast::<i32>(),
                out.fds.as_mut_ptr(),
                count,
            );
            out.nfds = count;
        }
    }
    Some(out)
}
