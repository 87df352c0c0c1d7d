//! Datagram send/receive with `SCM_RIGHTS` fd passing.
//!
//! Built directly on `libc::sendmsg`/`recvmsg`: the protocol's fixed
//! "zero, one, or two fds" ancillary contract is simpler to state with a
//! hand-built `msghdr` than through higher-level wrappers.

use std::mem;
use std::os::fd::RawFd;
use std::ptr;

use nix::errno::Errno;

use crate::error::{CommonError, Result};

/// Maximum number of fds a single datagram may carry.
pub const MAX_FDS: usize = 2;

const CMSG_CAPACITY: usize = 64;

/// Sends one datagram, optionally attaching one or two fds.
///
/// Pass `-1` for an unused fd slot. A partial send is an error: the
/// protocol is datagram-oriented and a frame is never split.
///
/// # Errors
///
/// Returns an error if `sendmsg` fails or writes a short count.
pub fn send_msg(sock: RawFd, data: &[u8], fd1: RawFd, fd2: RawFd) -> Result<usize> {
    let mut fds = [0 as RawFd; MAX_FDS];
    let mut nfds = 0;
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

    // SAFETY: msghdr is plain-old-data; zeroed is a valid initial state.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &raw mut iov;
    msg.msg_iovlen = 1;

    let mut cmsg_buf = [0u8; CMSG_CAPACITY];
    if nfds > 0 {
        let cmsg_space = unsafe { libc::CMSG_SPACE((nfds * mem::size_of::<RawFd>()) as u32) };
        assert!((cmsg_space as usize) <= CMSG_CAPACITY);
        msg.msg_control = cmsg_buf.as_mut_ptr().cast();
        msg.msg_controllen = cmsg_space as usize;

        // SAFETY: msg_control points at a buffer of msg_controllen bytes.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&raw const msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN((nfds * mem::size_of::<RawFd>()) as u32) as usize;
            ptr::copy_nonoverlapping(fds.as_ptr(), libc::CMSG_DATA(cmsg).cast::<RawFd>(), nfds);
        }
    }

    // SAFETY: all pointers in msg outlive the call.
    let sent = Errno::result(unsafe { libc::sendmsg(sock, &raw const msg, 0) })
        .map_err(|errno| CommonError::Socket { op: "sendmsg", errno })?;
    let sent = usize::try_from(sent).unwrap_or(0);
    if sent != data.len() {
        return Err(CommonError::ShortSend {
            sent,
            len: data.len(),
        });
    }
    Ok(sent)
}

/// One-datagram receiver with ancillary fd capture.
///
/// Owns a receive buffer large enough for any protocol frame and a
/// fixed-size control buffer sized for [`MAX_FDS`] descriptors.
pub struct MsgReceiver {
    sock: RawFd,
    data: Vec<u8>,
    data_bytes: usize,
    fds: [RawFd; MAX_FDS],
    nfds: usize,
}

impl MsgReceiver {
    /// Creates a receiver for `sock` with the protocol's standard buffer.
    #[must_use]
    pub fn new(sock: RawFd) -> Self {
        Self {
            sock,
            data: vec![0u8; crate::protocol::MSG_BUF_SIZE],
            data_bytes: 0,
            fds: [-1; MAX_FDS],
            nfds: 0,
        }
    }

    /// Receives exactly one datagram (blocking).
    ///
    /// # Errors
    ///
    /// Returns an error if `recvmsg` fails, the kernel truncated the
    /// message (`MSG_TRUNC` set), or the peer attached more than
    /// [`MAX_FDS`] descriptors. A peer on the other end of a scout or
    /// carrier socket can forge any of these, so none may abort the
    /// supervisor; over-limit fds are closed before returning.
    pub fn receive_one(&mut self) -> Result<()> {
        self.nfds = 0;
        self.data_bytes = 0;

        let mut iov = libc::iovec {
            iov_base: self.data.as_mut_ptr().cast(),
            iov_len: self.data.len(),
        };
        let mut cmsg_buf = [0u8; CMSG_CAPACITY];

        // SAFETY: msghdr is plain-old-data; zeroed is a valid initial state.
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &raw mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr().cast();
        msg.msg_controllen = cmsg_buf.len();

        // SAFETY: all pointers in msg outlive the call.
        let n = Errno::result(unsafe { libc::recvmsg(self.sock, &raw mut msg, 0) })
            .map_err(|errno| CommonError::Socket { op: "recvmsg", errno })?;
        if msg.msg_flags & libc::MSG_TRUNC != 0 {
            return Err(CommonError::Truncated {
                buf: self.data.len(),
            });
        }
        self.data_bytes = usize::try_from(n).unwrap_or(0);

        // SAFETY: the kernel filled msg_control up to msg_controllen.
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&raw const msg);
            while !cmsg.is_null() {
                if (*cmsg).cmsg_level == libc::SOL_SOCKET
                    && (*cmsg).cmsg_type == libc::SCM_RIGHTS
                {
                    let payload =
                        (*cmsg).cmsg_len - libc::CMSG_LEN(0) as usize;
                    let count = payload / mem::size_of::<RawFd>();
                    if count > MAX_FDS {
                        // The descriptors are already installed in our
                        // table; close them so a flood of oversized
                        // frames cannot exhaust it.
                        let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                        for i in 0..count {
                            let _ = libc::close(ptr::read(data.add(i)));
                        }
                        return Err(CommonError::TooManyFds { count });
                    }
                    ptr::copy_nonoverlapping(
                        libc::CMSG_DATA(cmsg).cast::<RawFd>(),
                        self.fds.as_mut_ptr(),
                        count,
                    );
                    self.nfds = count;
                }
                cmsg = libc::CMSG_NXTHDR(&raw mut msg, cmsg);
            }
        }
        Ok(())
    }

    /// Bytes of the last datagram.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_bytes]
    }

    /// File descriptors received with the last datagram.
    #[must_use]
    pub fn fds(&self) -> &[RawFd] {
        &self.fds[..self.nfds]
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::{Read, Seek, Write};
    use std::os::fd::{AsRawFd, FromRawFd};
    use std::os::unix::net::UnixDatagram;

    use super::*;

    #[test]
    fn datagram_round_trip_without_fds() {
        let (a, b) = UnixDatagram::pair().expect("socketpair");
        let sent = send_msg(a.as_raw_fd(), b"hello scout", -1, -1).expect("send");
        assert_eq!(sent, 11);

        let mut rcvr = MsgReceiver::new(b.as_raw_fd());
        rcvr.receive_one().expect("receive");
        assert_eq!(rcvr.data(), b"hello scout");
        assert!(rcvr.fds().is_empty());
    }

    #[test]
    fn one_fd_travels_in_ancillary_data() {
        let (a, b) = UnixDatagram::pair().expect("socketpair");
        let mut file = tempfile::tempfile().expect("tempfile");
        file.write_all(b"payload").expect("write");

        let _ = send_msg(a.as_raw_fd(), &[1, 2, 3], file.as_raw_fd(), -1).expect("send");

        let mut rcvr = MsgReceiver::new(b.as_raw_fd());
        rcvr.receive_one().expect("receive");
        assert_eq!(rcvr.data(), &[1, 2, 3]);
        assert_eq!(rcvr.fds().len(), 1);

        // The received fd is a distinct descriptor onto the same file.
        // SAFETY: the fd was just received and this test owns it.
        let mut dup = unsafe { File::from_raw_fd(rcvr.fds()[0]) };
        dup.rewind().expect("rewind");
        let mut contents = String::new();
        let _ = dup.read_to_string(&mut contents).expect("read");
        assert_eq!(contents, "payload");
    }

    #[test]
    fn more_than_two_fds_is_an_error_not_an_abort() {
        let (a, b) = UnixDatagram::pair().expect("socketpair");
        let files: Vec<File> = (0..3).map(|_| tempfile::tempfile().expect("tempfile")).collect();
        let fds: Vec<RawFd> = files.iter().map(AsRawFd::as_raw_fd).collect();

        // send_msg enforces the two-fd contract, so forge the frame the
        // way a hostile mission would.
        let payload = [0u8; 4];
        let mut iov = libc::iovec {
            iov_base: payload.as_ptr().cast_mut().cast(),
            iov_len: payload.len(),
        };
        let mut cmsg_buf = [0u8; CMSG_CAPACITY];
        // SAFETY: msghdr is plain-old-data; all pointers outlive the call.
        unsafe {
            let mut msg: libc::msghdr = mem::zeroed();
            msg.msg_iov = &raw mut iov;
            msg.msg_iovlen = 1;
            msg.msg_control = cmsg_buf.as_mut_ptr().cast();
            msg.msg_controllen = libc::CMSG_SPACE((3 * mem::size_of::<RawFd>()) as u32) as usize;
            let cmsg = libc::CMSG_FIRSTHDR(&raw const msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN((3 * mem::size_of::<RawFd>()) as u32) as usize;
            ptr::copy_nonoverlapping(fds.as_ptr(), libc::CMSG_DATA(cmsg).cast::<RawFd>(), 3);
            assert!(libc::sendmsg(a.as_raw_fd(), &raw const msg, 0) >= 0);
        }

        let mut rcvr = MsgReceiver::new(b.as_raw_fd());
        assert!(matches!(
            rcvr.receive_one(),
            Err(CommonError::TooManyFds { count: 3 })
        ));
        assert!(rcvr.fds().is_empty());
    }

    #[test]
    fn two_fds_travel_in_ancillary_data() {
        let (a, b) = UnixDatagram::pair().expect("socketpair");
        let f1 = tempfile::tempfile().expect("tempfile");
        let f2 = tempfile::tempfile().expect("tempfile");
        let _ = send_msg(a.as_raw_fd(), &[9], f1.as_raw_fd(), f2.as_raw_fd()).expect("send");

        let mut rcvr = MsgReceiver::new(b.as_raw_fd());
        rcvr.receive_one().expect("receive");
        assert_eq!(rcvr.fds().len(), 2);
        for fd in rcvr.fds() {
            // SAFETY: fds were just received and this test owns them.
            drop(unsafe { File::from_raw_fd(*fd) });
        }
    }
}
