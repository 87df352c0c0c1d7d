//! The Airlock supervisor.
//!
//! The carrier process owns a datagram socketpair whose far end sits at
//! well-known fd 73 inside every mission. The command center multiplexes
//! that carrier socket plus one private socket per sandboxed process
//! through a single-threaded blocking epoll loop, answering forwarded
//! syscalls against a pluggable [`fs::MissionFs`] backend and driving
//! ptrace handoffs around `execve`.

pub mod carrier;
pub mod cmdcenter;
pub mod fs;
pub mod signals;

mod error;

pub use error::{Result, RuntimeError};
