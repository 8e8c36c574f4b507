//! Blocking-based put operation monitoring
//!
//! This module provides a way to wait for the completion of a put operation,
//! with a deadline. The put operation itself enforces no timeout: a caller
//! which does not want to wait forever gives up on its own, and reports that
//! distinctly from a failed operation.

use crate::builder::PutValueBuilder;
use crate::client::{PutArgs, PutCallback};
use crate::error::{BuildError, PutError};
use crate::status::PutEvent;
use crate::value::Structure;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};


/// Put callback which builds values through some builder, and lets a caller
/// wait for the completion event
pub struct BlockingPut<B: PutValueBuilder> {
    /// Producer of the value to be written
    builder: B,

    /// Completion event, once it arrived (mutex-protected)
    event_lock: Mutex<Option<PutEvent>>,

    /// Condition variable used to notify waiters about completion
    done_cv: Condvar,
}
//
impl<B: PutValueBuilder> BlockingPut<B> {
    /// Wrap a value builder
    pub fn new(builder: B) -> Arc<Self> {
        Arc::new(BlockingPut {
            builder,
            event_lock: Mutex::new(None),
            done_cv: Condvar::new(),
        })
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    /// Completion event, if it already arrived
    pub fn event(&self) -> Option<PutEvent> {
        self.event_lock.lock().clone()
    }

    /// Wait for the completion event, for at most `timeout`
    pub fn wait(&self, timeout: Duration) -> Result<PutEvent, PutError> {
        let deadline = Instant::now() + timeout;
        let mut event_lock = self.event_lock.lock();

        // Spurious wakeups are possible, so check the event every time
        while event_lock.is_none() {
            if self.done_cv.wait_until(&mut event_lock, deadline).timed_out() {
                break;
            }
        }
        event_lock.clone().ok_or(PutError::Timeout(timeout))
    }
}
//
impl<B: PutValueBuilder> PutCallback for BlockingPut<B> {
    fn put_build(&self, build: &Arc<Structure>, args: &mut PutArgs) -> Result<(), BuildError> {
        self.builder.build(build, args)
    }

    fn put_done(&self, event: &PutEvent) {
        *self.event_lock.lock() = Some(event.clone());
        self.done_cv.notify_all();
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PVStructure;
    use std::thread;

    fn noop_builder(build: &Arc<Structure>, args: &mut PutArgs) -> Result<(), BuildError> {
        args.value = Some(PVStructure::new(build));
        Ok(())
    }

    /// Waiting without a completion event times out
    #[test]
    fn wait_times_out() {
        let blocking = BlockingPut::new(noop_builder);
        let start = Instant::now();
        match blocking.wait(Duration::from_millis(50)) {
            Err(PutError::Timeout(timeout)) => assert_eq!(timeout, Duration::from_millis(50)),
            other => panic!("expected a timeout, got {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(blocking.event().is_none());
    }

    /// An event which already arrived is returned immediately
    #[test]
    fn event_before_wait() {
        let blocking = BlockingPut::new(noop_builder);
        blocking.put_done(&PutEvent::success());
        assert_eq!(blocking.wait(Duration::from_millis(0)).unwrap(), PutEvent::success());
    }

    /// Waiting is woken up by a completion event from another thread
    #[test]
    fn wait_for_other_thread() {
        let blocking = BlockingPut::new(noop_builder);
        let worker_blocking = blocking.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            worker_blocking.put_done(&PutEvent::fail("Disconnect"));
        });

        let event = blocking.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(event, PutEvent::fail("Disconnect"));
        worker.join().unwrap();
    }
}
