//! Tracee manipulation for the Airlock supervisor.
//!
//! Three layers, leaves first:
//!
//! - [`ptrace`]: a narrow surface over `ptrace(2)`: register access,
//!   text peek/poke, stop/trap waiting, and "inject and run" helpers
//!   that execute a syscall or a code block inside a stopped tracee.
//! - [`loader`]: a position-independent blob, copied verbatim into a
//!   tracee, that maps the scout shared object's segments, applies
//!   relocations, and runs its constructors.
//! - [`flightdeck`]: parses the scout's ELF, assembles the injectable
//!   shellcode around the loader, and drives the injection.

pub mod flightdeck;
pub mod loader;
pub mod ptrace;

mod error;

pub use error::{CoreError, Result};
