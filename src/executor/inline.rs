//! Inline callback executor, implementing synchronous callback execution
//!
//! This callback executor follows the traditional pattern of directly executing
//! callbacks on the thread which scheduled them. Callbacks therefore run
//! re-entrantly, which makes this executor a good stress test for code which
//! must not hold locks across provider calls.

use crate::executor::{CallbackExecutor, Job};


/// CallbackExecutor implementation suitable for inline callback execution
#[derive(Debug, Default)]
pub struct InlineExecutor {}
//
impl InlineExecutor {
    /// Create a new inline callback executor
    pub fn new() -> Self {
        InlineExecutor {}
    }
}
//
impl CallbackExecutor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }
}
