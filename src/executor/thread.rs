//! Worker thread callback executor
//!
//! Callbacks are queued and run one after the other, in scheduling order, on a
//! dedicated thread. This mimics the I/O thread of a networked provider.

use crate::executor::{CallbackExecutor, Job};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{trace, warn};


/// CallbackExecutor which owns a worker thread
pub struct ThreadExecutor {
    /// Queue feeding the worker, `None` once shutting down
    queue: Mutex<Option<Sender<Job>>>,

    /// Worker thread, joined on drop
    worker: Option<JoinHandle<()>>,

    /// Identifier of the worker thread
    worker_id: ThreadId,
}
//
impl ThreadExecutor {
    /// Spawn a new worker thread with some name
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                // A panicking callback must not take later callbacks down
                for job in receiver {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        warn!("callback panicked, worker carries on");
                    }
                }
                trace!("callback worker exiting");
            })?;
        Ok(ThreadExecutor {
            queue: Mutex::new(Some(sender)),
            worker_id: worker.thread().id(),
            worker: Some(worker),
        })
    }

    fn on_worker(&self) -> bool {
        thread::current().id() == self.worker_id
    }
}
//
impl CallbackExecutor for ThreadExecutor {
    fn execute(&self, job: Job) {
        let queue = self.queue.lock();
        match queue.as_ref().map(|sender| sender.send(job)) {
            Some(Ok(())) => {}
            Some(Err(_)) => warn!("callback worker is gone, dropping callback"),
            None => warn!("callback executor is shutting down, dropping callback"),
        }
    }

    fn sync(&self) {
        if self.on_worker() {
            return;
        }
        let (done, wait) = mpsc::channel();
        self.execute(Box::new(move || {
            let _ = done.send(());
        }));
        let _ = wait.recv();
    }
}
//
impl Drop for ThreadExecutor {
    /// Let queued callbacks run, then stop the worker
    fn drop(&mut self) {
        self.queue.lock().take();
        if let Some(worker) = self.worker.take() {
            // The last reference may be released by one of our own callbacks
            if !self.on_worker() {
                let _ = worker.join();
            }
        }
    }
}
