//! Callback-based put operation coordinator
//!
//! The [`Putter`] sits between a provider, which reports progress on a put
//! sub-operation from arbitrary threads, and a caller-supplied
//! [`PutCallback`], which builds the value to write and hears about the
//! outcome. It serializes every state change through one mutex, and follows
//! one strict rule: the mutex is never held while calling out, be it into the
//! callback or into the provider. This is what allows the callback to cancel
//! the operation from within `put_build`, and inline providers to report
//! progress before the call which triggered it has returned.
//!
//! Providers only keep weak references to the coordinator, which is owned by
//! the caller's [`Operation`](crate::client::Operation) handle. Every callback
//! entry point starts by taking a temporary strong reference, so that the
//! coordinator survives until the callback is over even if the caller lets go
//! of its handle concurrently.
//!
//! Once a write has been sent, the operation never sends another one. A
//! failure after that point is final, since re-sending an unacknowledged write
//! could duplicate its effect on the remote side.

use crate::bitset::BitSet;
use crate::client::{OperationImpl, PutArgs, PutCallback};
use crate::error::BuildError;
use crate::multithread::polling::PhasePublisher;
use crate::provider::{Channel, ChannelPut, ChannelPutRequester, Status};
use crate::request::PvRequest;
use crate::status::{PutEvent, PutOutcome, PutPhase};
use crate::value::{PVStructure, Structure};
use parking_lot::{Mutex, MutexGuard};
use std::any::Any;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace};


/// Put operation coordinator
pub struct Putter {
    /// Mutable state, only ever accessed with this lock held
    state: Mutex<PutterState>,

    /// Whether the current value is fetched before building
    get_current: bool,

    /// Weak self-reference, upgraded by callback entry points
    this: Weak<Putter>,
}


/// State shared between the provider callbacks and the caller
struct PutterState {
    /// Whether the write has been sent, after which it can't be re-tried
    started: bool,

    /// Provider sub-operation, known once created or connected
    op: Option<Arc<dyn ChannelPut>>,

    /// Structure reported by the remote side at connect
    put_type: Option<Arc<Structure>>,

    /// Caller callback, taken when the completion event is delivered
    callback: Option<Arc<dyn PutCallback>>,

    /// Message of the upcoming completion event
    message: String,

    /// Current phase of the state machine
    phase: PutPhase,

    /// Optional phase polling interface
    publisher: Option<PhasePublisher>,
}
//
impl PutterState {
    fn enter(&mut self, phase: PutPhase) {
        trace!(from = ?self.phase, to = ?phase, "put phase change");
        self.phase = phase;
        if let Some(publisher) = self.publisher.as_mut() {
            publisher.publish(phase);
        }
    }
}


/// Completion event which was decided, but not delivered yet
struct PendingEvent {
    callback: Arc<dyn PutCallback>,
    event: PutEvent,
}
//
impl PendingEvent {
    fn deliver(self) {
        debug!(event = %self.event, "put operation completed");
        self.callback.put_done(&self.event);
    }
}


impl Putter {
    /// Create a coordinator and the provider sub-operation it drives
    pub(crate) fn start(channel: &Arc<dyn Channel>,
                        callback: Arc<dyn PutCallback>,
                        request: &PvRequest,
                        get_current: bool,
                        publisher: Option<PhasePublisher>) -> Arc<Putter> {
        let putter = Arc::new_cyclic(|this| Putter {
            state: Mutex::new(PutterState {
                started: false,
                op: None,
                put_type: None,
                callback: Some(callback),
                message: String::new(),
                phase: PutPhase::Connecting,
                publisher,
            }),
            get_current,
            this: this.clone(),
        });

        let requester: Arc<dyn ChannelPutRequester> = putter.clone();
        let op = channel.create_channel_put(requester, request);

        // The connect report may have come first, in which case it already
        // recorded the sub-operation
        putter.state.lock().op.get_or_insert(op);
        putter
    }

    /// Temporary strong reference, held for the duration of a callback
    fn keepalive(&self) -> Option<Arc<Putter>> {
        self.this.upgrade()
    }

    /// Current phase of the state machine
    pub fn phase(&self) -> PutPhase {
        self.state.lock().phase
    }

    /// Decide the completion event, unless one was already decided
    fn finish(guard: &mut MutexGuard<PutterState>, outcome: PutOutcome) -> Option<PendingEvent> {
        let callback = guard.callback.take()?;
        let event = PutEvent { outcome, message: mem::take(&mut guard.message) };
        guard.enter(PutPhase::Completed(outcome));
        Some(PendingEvent { callback, event })
    }

    /// Decide the completion event, then deliver it with the lock released
    fn call_event(mut guard: MutexGuard<PutterState>, outcome: PutOutcome) {
        let pending = Putter::finish(&mut guard, outcome);
        drop(guard);
        if let Some(pending) = pending {
            pending.deliver();
        }
    }

    /// Run the builder, check its output, and send it
    fn do_put(mut guard: MutexGuard<PutterState>, mut args: PutArgs, op: Arc<dyn ChannelPut>) {
        let (callback, put_type) = match (guard.callback.clone(), guard.put_type.clone()) {
            (Some(callback), Some(put_type)) => (callback, put_type),
            _ => return,
        };
        guard.enter(PutPhase::Building);

        let built = MutexGuard::unlocked(&mut guard, || {
            build_value(&*callback, &put_type, &mut args)
        });

        // The operation may have completed while the builder ran
        match built {
            Err(message) if guard.callback.is_some() => {
                guard.message = message;
                Putter::call_event(guard, PutOutcome::Fail);
            }
            Err(message) => {
                info!("Lost error in put builder: {}", message);
            }
            Ok(value) if guard.callback.is_some() => {
                guard.started = true;
                guard.enter(PutPhase::Sent);
                drop(guard);
                op.put(value, args.changed);
            }
            Ok(_) => {
                debug!("put operation completed during build, not sending");
            }
        }
    }
}
//
impl ChannelPutRequester for Putter {
    fn channel_put_connect(&self,
                           status: Status,
                           put: Arc<dyn ChannelPut>,
                           put_type: Option<Arc<Structure>>) {
        let Some(_keepalive) = self.keepalive() else { return };
        let mut guard = self.state.lock();
        guard.op = Some(put.clone());
        guard.put_type = put_type;
        if guard.started || guard.callback.is_none() || guard.phase != PutPhase::Connecting {
            return;
        }

        guard.message = if status.is_ok() {
            String::new()
        } else {
            status.message().to_owned()
        };
        if !status.is_success() {
            Putter::call_event(guard, PutOutcome::Fail);
            return;
        }
        if guard.put_type.is_none() {
            guard.message = "No put type reported".to_owned();
            Putter::call_event(guard, PutOutcome::Fail);
            return;
        }
        guard.enter(PutPhase::Connected);

        if self.get_current {
            // Fetch the current value first
            guard.enter(PutPhase::FetchingCurrent);
            drop(guard);
            put.get();
        } else {
            // Build the value immediately
            Putter::do_put(guard, PutArgs::new(None, BitSet::new()), put);
        }
    }

    fn get_done(&self,
                status: Status,
                put: Arc<dyn ChannelPut>,
                value: Option<PVStructure>,
                valid: BitSet) {
        let Some(_keepalive) = self.keepalive() else { return };
        let mut guard = self.state.lock();
        if guard.callback.is_none() || guard.phase != PutPhase::FetchingCurrent {
            return;
        }

        if !status.is_success() {
            guard.message = status.message().to_owned();
            Putter::call_event(guard, PutOutcome::Fail);
            return;
        }
        match value {
            Some(previous) => Putter::do_put(guard, PutArgs::new(Some(previous), valid), put),
            None => {
                guard.message = "No current value provided".to_owned();
                Putter::call_event(guard, PutOutcome::Fail);
            }
        }
    }

    fn put_done(&self, status: Status, _put: Arc<dyn ChannelPut>) {
        let Some(_keepalive) = self.keepalive() else { return };
        let mut guard = self.state.lock();
        if guard.callback.is_none() {
            return;
        }
        if !guard.started {
            debug!("ignoring write report for a write which was never sent");
            return;
        }

        guard.message = if status.is_ok() {
            String::new()
        } else {
            status.message().to_owned()
        };
        let outcome = if status.is_success() {
            PutOutcome::Success
        } else {
            PutOutcome::Fail
        };
        Putter::call_event(guard, outcome);
    }

    fn channel_disconnect(&self, destroy: bool) {
        let Some(_keepalive) = self.keepalive() else { return };
        let mut guard = self.state.lock();
        if guard.callback.is_none() {
            return;
        }
        debug!(destroy, "channel disconnected during put operation");
        guard.message = "Disconnect".to_owned();
        Putter::call_event(guard, PutOutcome::Fail);
    }
}
//
impl OperationImpl for Putter {
    fn name(&self) -> String {
        let op = self.state.lock().op.clone();
        op.and_then(|op| op.channel())
          .map_or_else(|| "<dead>".to_owned(), |channel| channel.channel_name())
    }

    fn cancel(&self) {
        // An owning reference, in case the callback drops the last handle
        let Some(_keepalive) = self.keepalive() else { return };
        let mut guard = self.state.lock();
        if guard.callback.is_none() {
            return;
        }

        // Only a sent write has anything to abort on the remote side
        let op = if guard.started { guard.op.clone() } else { None };
        guard.message.clear();
        let pending = Putter::finish(&mut guard, PutOutcome::Cancel);
        drop(guard);

        if let Some(op) = op {
            op.cancel();
        }
        if let Some(pending) = pending {
            pending.deliver();
        }
    }

    fn show(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Operation(Put\"{}\")", self.name())
    }
}


/// Run the builder, turning every way it can go wrong into a message
fn build_value(callback: &dyn PutCallback,
               put_type: &Arc<Structure>,
               args: &mut PutArgs) -> Result<PVStructure, String> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback.put_build(put_type, args)));
    match outcome {
        Err(payload) => Err(panic_message(payload)),
        Ok(Err(error)) => Err(error.to_string()),
        Ok(Ok(())) => {
            let value = args.value.take().ok_or(BuildError::NoValue)
                                         .map_err(|e| e.to_string())?;
            if value.structure() != put_type {
                return Err(BuildError::WrongType.to_string());
            }
            Ok(value)
        }
    }
}


fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "put builder panicked".to_owned()
    }
}
