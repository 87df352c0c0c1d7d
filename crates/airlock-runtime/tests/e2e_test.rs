//! End-to-end tests for the supervisor.
//!
//! These drive a real `CmdCenter` over real sockets with a fake scout
//! on the other end, speaking the same frames the injected agent sends,
//! and verify the replies byte-for-byte. Scenarios that need ptrace
//! rights and a built scout shared object are `#[ignore]`d; run them
//! manually with `cargo test -- --ignored` on a machine that allows
//! `PTRACE_ATTACH`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::io::Read;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;

use airlock_common::codec::{Packer, Unpacker};
use airlock_common::protocol::{
    MSG_BUF_SIZE, SCOUT_CONNECT_CMD, STOP_MSG_LOOP_CMD, ScoutCmd,
};
use airlock_common::socket::{MsgReceiver, send_msg};
use airlock_runtime::cmdcenter::CmdCenter;
use airlock_runtime::fs::HostFs;

struct Harness {
    cc: CmdCenter,
    // Mission-side end of the carrier socketpair.
    carrier_remote: UnixDatagram,
    // Keeps the supervisor-side end alive for the center.
    _carrier_local: UnixDatagram,
}

fn harness() -> Harness {
    let (local, remote) = UnixDatagram::pair().expect("carrier socketpair");
    let cc = CmdCenter::new(
        local.as_raw_fd(),
        Box::new(HostFs),
        PathBuf::from("libairlock_scout.so"),
    )
    .expect("command center");
    Harness {
        cc,
        carrier_remote: remote,
        _carrier_local: local,
    }
}

fn frame(build: impl FnOnce(&mut Packer<'_>)) -> Vec<u8> {
    let mut buf = [0u8; MSG_BUF_SIZE];
    let mut p = Packer::new(&mut buf);
    build(&mut p);
    p.finish().to_vec()
}

/// Registers a fake scout and returns its private socket.
fn connect_scout(h: &mut Harness) -> UnixDatagram {
    let (scout_end, supervisor_end) = UnixDatagram::pair().expect("scout socketpair");
    let connect = frame(|p| p.put_u32(SCOUT_CONNECT_CMD).expect("cmd"));
    let _ = send_msg(
        h.carrier_remote.as_raw_fd(),
        &connect,
        supervisor_end.as_raw_fd(),
        -1,
    )
    .expect("send connect");
    drop(supervisor_end); // the center received its own copy
    h.cc.handle_message().expect("register scout");
    assert_eq!(h.cc.num_scouts(), 1);
    scout_end
}

#[test]
fn pipeline_scout_registration() {
    let mut h = harness();
    assert_eq!(h.cc.num_scouts(), 0);
    let _scout = connect_scout(&mut h);
}

#[test]
fn pipeline_open_returns_a_working_fd() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("hosts");
    std::fs::write(&file, b"127.0.0.1 localhost\n").expect("write");

    let mut h = harness();
    let scout = connect_scout(&mut h);

    let req = frame(|p| {
        p.put_u32(ScoutCmd::Open as u32).expect("cmd");
        let c = std::ffi::CString::new(file.to_str().expect("utf8")).expect("path");
        p.put_cstr(&c).expect("path");
        p.put_i32(libc::O_RDONLY).expect("flags");
        p.put_u32(0).expect("mode");
    });
    let _ = send_msg(scout.as_raw_fd(), &req, -1, -1).expect("send open");
    h.cc.handle_message().expect("dispatch open");

    let mut rcvr = MsgReceiver::new(scout.as_raw_fd());
    rcvr.receive_one().expect("reply");
    let mut u = Unpacker::from_datagram(rcvr.data()).expect("frame");
    let ret = u.i32().expect("ret");
    assert!(ret >= 0);
    assert_eq!(rcvr.fds().len(), 1);

    // Reading through the forwarded fd must match the file exactly.
    // SAFETY: the fd was just received and the test owns it.
    let mut via_sandbox = String::new();
    let mut f = unsafe { std::fs::File::from(OwnedFd::from_raw_fd(rcvr.fds()[0])) };
    let _ = f.read_to_string(&mut via_sandbox).expect("read");
    assert_eq!(via_sandbox.as_bytes(), std::fs::read(&file).expect("direct read"));
}

#[test]
fn pipeline_access_missing_path_reports_enoent() {
    let mut h = harness();
    let scout = connect_scout(&mut h);

    let req = frame(|p| {
        p.put_u32(ScoutCmd::Access as u32).expect("cmd");
        p.put_cstr(c"/definitely/missing").expect("path");
        p.put_i32(libc::F_OK).expect("mode");
    });
    let _ = send_msg(scout.as_raw_fd(), &req, -1, -1).expect("send access");
    h.cc.handle_message().expect("dispatch access");

    let mut rcvr = MsgReceiver::new(scout.as_raw_fd());
    rcvr.receive_one().expect("reply");
    let mut u = Unpacker::from_datagram(rcvr.data()).expect("frame");
    assert_eq!(u.i32().expect("ret"), -2); // -ENOENT
}

#[test]
fn pipeline_hello_produces_no_reply_and_keeps_the_scout() {
    let mut h = harness();
    let scout = connect_scout(&mut h);

    let req = frame(|p| p.put_u32(ScoutCmd::Hello as u32).expect("cmd"));
    let _ = send_msg(scout.as_raw_fd(), &req, -1, -1).expect("send hello");
    h.cc.handle_message().expect("dispatch hello");
    assert_eq!(h.cc.num_scouts(), 1);

    // A follow-up request still round-trips on the same socket.
    let req = frame(|p| {
        p.put_u32(ScoutCmd::Unlink as u32).expect("cmd");
        p.put_cstr(c"/definitely/missing").expect("path");
    });
    let _ = send_msg(scout.as_raw_fd(), &req, -1, -1).expect("send unlink");
    h.cc.handle_message().expect("dispatch unlink");
    let mut rcvr = MsgReceiver::new(scout.as_raw_fd());
    rcvr.receive_one().expect("reply");
    let mut u = Unpacker::from_datagram(rcvr.data()).expect("frame");
    assert_eq!(u.i32().expect("ret"), -2);
}

#[test]
fn pipeline_stop_frame_ends_the_loop() {
    let mut h = harness();
    let stop = frame(|p| p.put_u32(STOP_MSG_LOOP_CMD).expect("cmd"));
    let _ = send_msg(h.carrier_remote.as_raw_fd(), &stop, -1, -1).expect("send stop");
    // Returns instead of blocking forever.
    h.cc.handle_messages();
}

#[test]
fn pipeline_hangup_removes_the_scout() {
    let mut h = harness();
    let scout = connect_scout(&mut h);
    drop(scout);
    h.cc.handle_message().expect("observe hangup");
    assert_eq!(h.cc.num_scouts(), 0);
}

/// Full sandbox round trip: fork, inject, exec `/bin/true`, expect a
/// clean exit. Needs `PTRACE_ATTACH` rights and the scout cdylib built
/// alongside the binary.
#[test]
#[ignore = "requires ptrace rights and a built libairlock_scout.so"]
fn mission_true_exits_zero() {
    use std::ffi::CString;

    use airlock_runtime::carrier::Carrier;
    use airlock_runtime::signals;

    let scout_so = PathBuf::from(env!("CARGO_TARGET_TMPDIR"))
        .parent()
        .expect("target dir")
        .join("libairlock_scout.so");

    let mut carrier = Carrier::new(Box::new(HostFs), scout_so).expect("carrier");
    let argv = vec![CString::new("/bin/true").expect("argv")];
    let pid = carrier.start_mission(&argv).expect("mission");
    signals::install_sigchld(pid).expect("sigchld");
    carrier.handle_messages();
    assert_eq!(signals::mission_status(), 0);
}
