//! Asynchronous put operations
//!
//! Picture yourself writing a value to a named channel served by some remote
//! process. The write goes through several steps: the remote side must tell
//! you which structure it expects, maybe send you its current value so that
//! you can derive the new one from it, and finally acknowledge your write.
//! Each step is reported through a callback arriving on a thread you do not
//! control, while you may decide to give up on the whole thing at any time.
//! Meanwhile, the connection can drop under your feet.
//!
//! Getting this right is harder than it sounds. Whatever the interleaving of
//! remote reports, cancellation and disconnection, the caller should hear about
//! the outcome exactly once, the value builder should run at most once, and no
//! internal lock should ever be held while calling foreign code.
//!
//! This crate implements such a put operation coordinator, along with the
//! surrounding pieces needed to use and test it: a provider abstraction, an
//! in-process loopback provider, value builders, and the logic of a small
//! command-line put tool.

pub mod bitset;
pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod loopback;
pub mod multithread;
pub mod provider;
pub mod request;
pub mod status;
pub mod tool;
pub mod value;
