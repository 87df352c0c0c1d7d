//! Shared plumbing for the Airlock sandbox.
//!
//! This crate holds everything both ends of the supervisor/scout channel
//! must agree on: the numeric protocol constants, the size-prefixed frame
//! codec, and (on the supervisor side) the `SCM_RIGHTS` socket helpers.
//!
//! The scout is injected into arbitrary processes as a self-contained
//! shared object, so this crate compiles without `std` when the `std`
//! feature is disabled. The codec therefore works exclusively on
//! caller-provided buffers and never allocates.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

pub mod codec;
pub mod protocol;

#[cfg(feature = "std")]
pub mod error;
#[cfg(feature = "std")]
pub mod socket;

#[cfg(feature = "std")]
pub use error::{CommonError, Result};
