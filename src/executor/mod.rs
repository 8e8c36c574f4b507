//! Asynchronous callback executors
//!
//! Whenever a provider reports progress on a sub-operation, one important
//! design issue is to decide on which thread the corresponding callback should
//! run. Network backends typically run callbacks on their own I/O threads,
//! which means that the receiving side must cope with callbacks arriving from
//! an unspecified thread, concurrently with whatever the client is doing.
//!
//! Backends in this crate delegate that decision to a callback executor:
//!
//! - The inline executor runs callbacks directly on the thread which triggered
//!   them. This has minimal overhead and makes the callback sequence easy to
//!   follow, but it means that a callback may run re-entrantly, before the
//!   call which triggered it has returned.
//! - The thread executor runs callbacks in order on a dedicated worker thread,
//!   which is how a networked provider behaves.

pub mod inline;
pub mod thread;

pub use self::inline::InlineExecutor;
pub use self::thread::ThreadExecutor;


/// Unit of work scheduled on an executor
pub type Job = Box<dyn FnOnce() + Send + 'static>;


/// Entry point to callback scheduling
pub trait CallbackExecutor: Send + Sync {
    /// Schedule a callback for execution
    fn execute(&self, job: Job);

    /// Wait until every callback scheduled so far has run
    ///
    /// Does nothing when called from within a callback of this executor.
    fn sync(&self) {}
}
