//! Multithreaded put operation machinery
//!
//! This submodule provides the put operation coordinator and the ways a caller
//! can synchronize with it, in situations where provider callbacks arrive on
//! threads other than the caller's own.
//!
//! - The callback module holds the coordinator itself, which delivers exactly
//!   one completion event to the caller-supplied callback. This is the most
//!   general synchronization mechanism, the other two are built on top of it.
//! - Blocking allows a caller to wait for the completion event, with a
//!   deadline. Easy to use and reason about, but it ties up a thread.
//! - Polling lets a caller check which phase an operation is in without ever
//!   waiting, e.g. to refresh a progress display.

pub mod blocking;
pub mod callback;
pub mod polling;
