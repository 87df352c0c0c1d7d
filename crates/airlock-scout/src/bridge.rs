//! RPC client: marshals trapped syscalls to the command center.
//!
//! Each call packs a size-prefixed request into a stack buffer, sends
//! it on the private socket, blocks for the reply datagram, and unpacks
//! the result. Transport failure (no channel, send/receive error, bad
//! frame) surfaces as `-EIO` to the interrupted user code.

use core::ffi::{CStr, c_char};

use airlock_common::codec::{Packer, Unpacker};
use airlock_common::protocol::{MSG_BUF_SIZE, ScoutCmd};

use crate::channel::{self, Received, receive_one, send_msg};
use crate::trampoline::sys;

const EIO: i64 = -(libc::EIO as i64);

/// readlink buffers are capped at PATH_MAX so replies fit one datagram.
pub const READLINK_CAP: u64 = 4096;

fn stat_size() -> usize {
    core::mem::size_of::<libc::stat>()
}

/// Sends `frame` (with an optional fd) and blocks for one reply.
fn call(frame: &[u8], fd1: i32, reply: &mut [u8]) -> Option<Received> {
    let sock = channel::sock();
    if sock < 0 {
        return None;
    }
    if send_msg(sock, frame, fd1, -1) < 0 {
        return None;
    }
    receive_one(sock, reply)
}

/// Sends `frame` without waiting for a reply.
fn notify(frame: &[u8]) {
    let sock = channel::sock();
    if sock >= 0 {
        let _ = send_msg(sock, frame, -1, -1);
    }
}

/// Liveness probe after the channel comes up.
pub fn send_hello() {
    let mut buf = [0u8; 16];
    let mut p = Packer::new(&mut buf);
    if p.put_u32(ScoutCmd::Hello as u32).is_ok() {
        notify(p.finish());
    }
}

fn ret_only_reply(rcvd: &Received, reply: &[u8]) -> i64 {
    let Ok(mut u) = Unpacker::from_datagram(&reply[..rcvd.len]) else {
        return EIO;
    };
    u.i32().map_or(EIO, i64::from)
}

/// Reply carrying `{ret}` plus the opened fd in ancillary data.
fn fd_reply(rcvd: &Received, reply: &[u8]) -> i64 {
    let Ok(mut u) = Unpacker::from_datagram(&reply[..rcvd.len]) else {
        return EIO;
    };
    let Ok(ret) = u.i32() else {
        return EIO;
    };
    if ret < 0 {
        return i64::from(ret);
    }
    if rcvd.nfds != 1 {
        return EIO;
    }
    // The ancillary fd is this process's handle on the opened file.
    i64::from(rcvd.fds[0])
}

/// Forwarded `open(path, flags, mode)`.
pub unsafe fn send_open(path: *const c_char, flags: i32, mode: u32) -> i64 {
    let cpath = unsafe { CStr::from_ptr(path) };
    let mut req = [0u8; MSG_BUF_SIZE];
    let mut p = Packer::new(&mut req);
    if p.put_u32(ScoutCmd::Open as u32).is_err()
        || p.put_cstr(cpath).is_err()
        || p.put_i32(flags).is_err()
        || p.put_u32(mode).is_err()
    {
        return EIO;
    }
    let frame = p.finish();
    let mut reply = [0u8; MSG_BUF_SIZE];
    match call(frame, -1, &mut reply) {
        Some(rcvd) => fd_reply(&rcvd, &reply),
        None => EIO,
    }
}

/// Forwarded `openat(dirfd, path, flags, mode)`.
///
/// A real directory fd travels as ancillary data so the supervisor can
/// resolve against it; negative dirfds (`AT_FDCWD` included) go by
/// value only.
pub unsafe fn send_openat(dirfd: i32, path: *const c_char, flags: i32, mode: u32) -> i64 {
    let cpath = unsafe { CStr::from_ptr(path) };
    let mut req = [0u8; MSG_BUF_SIZE];
    let mut p = Packer::new(&mut req);
    if p.put_u32(ScoutCmd::OpenAt as u32).is_err()
        || p.put_i32(dirfd).is_err()
        || p.put_cstr(cpath).is_err()
        || p.put_i32(flags).is_err()
        || p.put_u32(mode).is_err()
    {
        return EIO;
    }
    let frame = p.finish();
    let ancillary = if dirfd >= 0 { dirfd } else { -1 };
    let mut reply = [0u8; MSG_BUF_SIZE];
    match call(frame, ancillary, &mut reply) {
        Some(rcvd) => fd_reply(&rcvd, &reply),
        None => EIO,
    }
}

/// Forwarded `access(path, mode)`.
pub unsafe fn send_access(path: *const c_char, mode: i32) -> i64 {
    let cpath = unsafe { CStr::from_ptr(path) };
    let mut req = [0u8; MSG_BUF_SIZE];
    let mut p = Packer::new(&mut req);
    if p.put_u32(ScoutCmd::Access as u32).is_err()
        || p.put_cstr(cpath).is_err()
        || p.put_i32(mode).is_err()
    {
        return EIO;
    }
    let frame = p.finish();
    let mut reply = [0u8; MSG_BUF_SIZE];
    match call(frame, -1, &mut reply) {
        Some(rcvd) => ret_only_reply(&rcvd, &reply),
        None => EIO,
    }
}

fn stat_reply(rcvd: &Received, reply: &[u8], statbuf: *mut libc::stat) -> i64 {
    let Ok(mut u) = Unpacker::from_datagram(&reply[..rcvd.len]) else {
        return EIO;
    };
    let Ok(ret) = u.i32() else {
        return EIO;
    };
    if ret == 0 {
        let Ok(raw) = u.raw(stat_size()) else {
            return EIO;
        };
        unsafe {
            core::ptr::copy_nonoverlapping(raw.as_ptr(), statbuf.cast::<u8>(), stat_size());
        }
    }
    i64::from(ret)
}

/// Forwarded `fstat(fd)`; the fd itself travels as ancillary data and
/// the supervisor closes its copy after use.
pub unsafe fn send_fstat(fd: i32, statbuf: *mut libc::stat) -> i64 {
    let mut req = [0u8; 64];
    let mut p = Packer::new(&mut req);
    if p.put_u32(ScoutCmd::Fstat as u32).is_err() || p.put_i32(fd).is_err() {
        return EIO;
    }
    let frame = p.finish();
    let mut reply = [0u8; MSG_BUF_SIZE];
    match call(frame, fd, &mut reply) {
        Some(rcvd) => stat_reply(&rcvd, &reply, statbuf),
        None => EIO,
    }
}

/// Forwarded `stat(path)`.
pub unsafe fn send_stat(path: *const c_char, statbuf: *mut libc::stat) -> i64 {
    unsafe { stat_like(ScoutCmd::Stat, path, statbuf) }
}

/// Forwarded `lstat(path)`.
pub unsafe fn send_lstat(path: *const c_char, statbuf: *mut libc::stat) -> i64 {
    unsafe { stat_like(ScoutCmd::Lstat, path, statbuf) }
}

unsafe fn stat_like(cmd: ScoutCmd, path: *const c_char, statbuf: *mut libc::stat) -> i64 {
    let cpath = unsafe { CStr::from_ptr(path) };
    let mut req = [0u8; MSG_BUF_SIZE];
    let mut p = Packer::new(&mut req);
    if p.put_u32(cmd as u32).is_err() || p.put_cstr(cpath).is_err() {
        return EIO;
    }
    let frame = p.finish();
    let mut reply = [0u8; MSG_BUF_SIZE];
    match call(frame, -1, &mut reply) {
        Some(rcvd) => stat_reply(&rcvd, &reply, statbuf),
        None => EIO,
    }
}

/// Forwarded `readlink(path, buf, bufsize)`.
pub unsafe fn send_readlink(path: *const c_char, buf: *mut u8, bufsize: u64) -> i64 {
    let cpath = unsafe { CStr::from_ptr(path) };
    let capped = bufsize.min(READLINK_CAP);
    let mut req = [0u8; MSG_BUF_SIZE];
    let mut p = Packer::new(&mut req);
    if p.put_u32(ScoutCmd::Readlink as u32).is_err()
        || p.put_cstr(cpath).is_err()
        || p.put_u64(capped).is_err()
    {
        return EIO;
    }
    let frame = p.finish();
    let mut reply = [0u8; MSG_BUF_SIZE];
    let Some(rcvd) = call(frame, -1, &mut reply) else {
        return EIO;
    };
    let Ok(mut u) = Unpacker::from_datagram(&reply[..rcvd.len]) else {
        return EIO;
    };
    let Ok(ret) = u.i64() else {
        return EIO;
    };
    if ret > 0 {
        let Ok(bytes) = u.buf() else {
            return EIO;
        };
        let n = (ret as usize).min(bytes.len()).min(bufsize as usize);
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), buf, n) };
    }
    ret
}

/// Forwarded `unlink(path)`.
pub unsafe fn send_unlink(path: *const c_char) -> i64 {
    let cpath = unsafe { CStr::from_ptr(path) };
    let mut req = [0u8; MSG_BUF_SIZE];
    let mut p = Packer::new(&mut req);
    if p.put_u32(ScoutCmd::Unlink as u32).is_err() || p.put_cstr(cpath).is_err() {
        return EIO;
    }
    let frame = p.finish();
    let mut reply = [0u8; MSG_BUF_SIZE];
    match call(frame, -1, &mut reply) {
        Some(rcvd) => ret_only_reply(&rcvd, &reply),
        None => EIO,
    }
}

/// Announces an imminent `execve` and waits for the supervisor to
/// re-attach. Returns 0 once the supervisor acknowledged.
pub unsafe fn send_execve_notice(path: *const c_char) -> i64 {
    let cpath = unsafe { CStr::from_ptr(path) };
    let pid = sys(libc::SYS_getpid, 0, 0, 0, 0, 0, 0);
    let mut req = [0u8; MSG_BUF_SIZE];
    let mut p = Packer::new(&mut req);
    if p.put_u32(ScoutCmd::Execve as u32).is_err()
        || p.put_i32(pid as i32).is_err()
        || p.put_cstr(cpath).is_err()
    {
        return EIO;
    }
    let frame = p.finish();
    let mut reply = [0u8; MSG_BUF_SIZE];
    let Some(rcvd) = call(frame, -1, &mut reply) else {
        return EIO;
    };
    let Ok(mut u) = Unpacker::from_datagram(&reply[..rcvd.len]) else {
        return EIO;
    };
    match u.i32() {
        Ok(1) => 0,
        _ => EIO,
    }
}

/// One-way lifecycle notification ahead of the vfork fake frame.
pub fn send_vfork_notice() {
    let pid = sys(libc::SYS_getpid, 0, 0, 0, 0, 0, 0);
    let mut req = [0u8; 32];
    let mut p = Packer::new(&mut req);
    if p.put_u32(ScoutCmd::Vfork as u32).is_ok() && p.put_i32(pid as i32).is_ok() {
        notify(p.finish());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // No channel is established in the test build, so every forwarded
    // call must fail fast with -EIO before touching any transport.
    #[test]
    fn forwarded_calls_fail_with_eio_before_a_channel_exists() {
        let mut st = core::mem::MaybeUninit::<libc::stat>::uninit();
        unsafe {
            assert_eq!(send_open(c"/x".as_ptr(), 0, 0), EIO);
            assert_eq!(send_access(c"/x".as_ptr(), 0), EIO);
            assert_eq!(send_stat(c"/x".as_ptr(), st.as_mut_ptr()), EIO);
            assert_eq!(send_unlink(c"/x".as_ptr()), EIO);
            assert_eq!(send_readlink(c"/x".as_ptr(), core::ptr::null_mut(), 16), EIO);
        }
    }
}
