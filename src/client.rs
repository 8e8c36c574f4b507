//! Client interface to put operations
//!
//! This is what callers deal with. A [`ClientProvider`] hands out
//! [`ClientChannel`]s, on which [`ClientChannel::put`] starts a put operation
//! driven by a caller-supplied [`PutCallback`]. The operation is represented by
//! an [`Operation`] handle, which is all the caller needs in order to cancel it
//! or to tell which channel it targets.
//!
//! Note that the precise semantics of cancellation are racy by nature: a
//! write which has already been sent to the remote side may or may not take
//! effect. What is guaranteed is that the callback hears about the operation
//! exactly once, whatever the interleaving of cancellation and remote reports.
//!
//! Dropping the last clone of an [`Operation`] handle cancels the operation,
//! since nobody is left to observe its outcome through that handle.

use crate::bitset::BitSet;
use crate::error::{BuildError, PutError};
use crate::multithread::callback::Putter;
use crate::multithread::polling::{PhaseBuffer, PhaseMonitor};
use crate::provider::{Channel, Provider};
use crate::request::PvRequest;
use crate::status::PutEvent;
use crate::value::{PVStructure, Structure};
use std::fmt;
use std::sync::Arc;


/// Features which all asynchronous operations are expected to share
pub trait OperationImpl: Send + Sync {
    /// Identifying name of the targeted channel
    fn name(&self) -> String;

    /// Request the termination of the operation
    fn cancel(&self);

    /// Diagnostic description
    fn show(&self, f: &mut fmt::Formatter) -> fmt::Result;
}


/// Caller-owned handle to an asynchronous operation
#[derive(Clone, Default)]
pub struct Operation {
    /// Shared by every clone of this handle, cancels the operation on drop
    external: Option<Arc<ExternalRef>>,
}
//
impl Operation {
    pub(crate) fn new(imp: Arc<dyn OperationImpl>) -> Self {
        Operation { external: Some(Arc::new(ExternalRef { imp })) }
    }

    /// Truth that this handle refers to an operation
    pub fn valid(&self) -> bool {
        self.external.is_some()
    }

    /// Name of the targeted channel, or `<dead>`
    pub fn name(&self) -> String {
        match self.external {
            Some(ref external) => external.imp.name(),
            None => "<dead>".to_owned(),
        }
    }

    /// Request cancellation. Safe to call at any time, any number of times.
    pub fn cancel(&self) {
        if let Some(ref external) = self.external {
            external.imp.cancel();
        }
    }

    /// Let go of this handle
    pub fn reset(&mut self) {
        self.external = None;
    }
}
//
impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.external {
            Some(ref external) => external.imp.show(f),
            None => f.write_str("Operation()"),
        }
    }
}
//
impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}


/// Reference held on behalf of the caller, as opposed to the references held
/// by in-flight callbacks
struct ExternalRef {
    imp: Arc<dyn OperationImpl>,
}
//
impl Drop for ExternalRef {
    fn drop(&mut self) {
        self.imp.cancel();
    }
}


/// Arguments of a put build request
///
/// The builder must store the value to be written in `value`, and mark every
/// field which should be written in `changed`.
#[derive(Debug)]
pub struct PutArgs {
    /// Value to be written
    pub value: Option<PVStructure>,

    /// Fields of `value` which should be written, starts empty
    pub changed: BitSet,

    /// Current remote value, when it was fetched
    previous: Option<PVStructure>,

    /// Fields of `previous` which carry meaningful data
    valid: BitSet,
}
//
impl PutArgs {
    pub(crate) fn new(previous: Option<PVStructure>, valid: BitSet) -> Self {
        PutArgs {
            value: None,
            changed: BitSet::new(),
            previous,
            valid,
        }
    }

    /// Current remote value, only available if the operation was started
    /// with `get_current` set
    pub fn previous(&self) -> Option<&PVStructure> {
        self.previous.as_ref()
    }

    /// Fields of the current remote value which carry meaningful data
    pub fn valid(&self) -> &BitSet {
        &self.valid
    }
}


/// Caller-supplied driver of a put operation
pub trait PutCallback: Send + Sync {
    /// Produce the value to be written, of type `build`
    ///
    /// Runs on a provider thread, without any internal lock held. The only
    /// call back into the operation which is allowed from here is
    /// [`Operation::cancel`].
    fn put_build(&self, build: &Arc<Structure>, args: &mut PutArgs) -> Result<(), BuildError>;

    /// Hear about the completion of the operation, exactly once
    fn put_done(&self, event: &PutEvent);
}


/// Entry point to a provider
#[derive(Clone)]
pub struct ClientProvider {
    provider: Arc<dyn Provider>,
}
//
impl ClientProvider {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        ClientProvider { provider }
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    /// Get a handle to a named channel
    pub fn connect(&self, channel_name: &str) -> Result<ClientChannel, PutError> {
        self.provider.connect(channel_name).map(ClientChannel::new)
    }
}


/// Client-side handle to a named channel
#[derive(Clone, Default)]
pub struct ClientChannel {
    channel: Option<Arc<dyn Channel>>,
}
//
impl ClientChannel {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        ClientChannel { channel: Some(channel) }
    }

    /// Name of the channel, or `<dead>`
    pub fn name(&self) -> String {
        self.channel.as_ref()
                    .map_or_else(|| "<dead>".to_owned(), |c| c.channel_name())
    }

    fn live_channel(&self) -> Result<&Arc<dyn Channel>, PutError> {
        self.channel.as_ref().ok_or(PutError::DeadChannel)
    }

    /// Start a put operation
    ///
    /// `request` selects the fields exposed by the remote side, defaulting to
    /// the whole structure. When `get_current` is set, the current value is
    /// fetched and handed to the builder before it runs.
    pub fn put(&self,
               callback: Arc<dyn PutCallback>,
               request: Option<&PvRequest>,
               get_current: bool) -> Result<Operation, PutError> {
        let channel = self.live_channel()?;
        let request = request.cloned().unwrap_or_default();
        let putter = Putter::start(channel, callback, &request, get_current, None);
        Ok(Operation::new(putter))
    }

    /// Start a put operation whose progress can be polled
    pub fn put_monitored(&self,
                         callback: Arc<dyn PutCallback>,
                         request: Option<&PvRequest>,
                         get_current: bool) -> Result<(Operation, PhaseMonitor), PutError> {
        let channel = self.live_channel()?;
        let request = request.cloned().unwrap_or_default();
        let (publisher, monitor) = PhaseBuffer::new().split();
        let putter = Putter::start(channel, callback, &request, get_current, Some(publisher));
        Ok((Operation::new(putter), monitor))
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Operation implementation which only counts cancellations
    struct CountingImpl {
        cancels: AtomicUsize,
    }
    //
    impl OperationImpl for CountingImpl {
        fn name(&self) -> String {
            "counted".to_owned()
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }

        fn show(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "Operation(Counting)")
        }
    }

    /// Empty handles are harmless
    #[test]
    fn empty_handle() {
        let op = Operation::default();
        assert!(!op.valid());
        assert_eq!(op.name(), "<dead>");
        op.cancel();
        assert_eq!(op.to_string(), "Operation()");
    }

    /// Only dropping the last clone cancels
    #[test]
    fn cancel_on_last_drop() {
        let imp = Arc::new(CountingImpl { cancels: AtomicUsize::new(0) });
        let op = Operation::new(imp.clone());
        let mut other = op.clone();
        assert_eq!(op.name(), "counted");
        assert_eq!(op.to_string(), "Operation(Counting)");

        other.reset();
        assert!(!other.valid());
        assert_eq!(imp.cancels.load(Ordering::SeqCst), 0);

        op.cancel();
        assert_eq!(imp.cancels.load(Ordering::SeqCst), 1);
        drop(op);
        assert_eq!(imp.cancels.load(Ordering::SeqCst), 2);
    }

    /// Dead channels refuse to start operations
    #[test]
    fn dead_channel() {
        struct Never(Mutex<usize>);
        impl PutCallback for Never {
            fn put_build(&self, _: &Arc<Structure>, _: &mut PutArgs) -> Result<(), BuildError> {
                *self.0.lock() += 1;
                Ok(())
            }
            fn put_done(&self, _: &PutEvent) {
                *self.0.lock() += 1;
            }
        }

        let channel = ClientChannel::default();
        assert_eq!(channel.name(), "<dead>");
        let callback = Arc::new(Never(Mutex::new(0)));
        assert!(matches!(channel.put(callback.clone(), None, false),
                         Err(PutError::DeadChannel)));
        assert!(matches!(channel.put_monitored(callback.clone(), None, true),
                         Err(PutError::DeadChannel)));
        assert_eq!(*callback.0.lock(), 0);
    }
}
