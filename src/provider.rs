//! Provider capabilities
//!
//! A provider is a pluggable backend which knows how to reach named channels
//! and how to run put sub-operations on them. Its callbacks may arrive on any
//! thread, at any time, including before the call which registered interest
//! in them has returned. Everything in here is therefore `Send + Sync`.
//!
//! The put sub-operation protocol goes as follows:
//!
//! 1. The client asks a [`Channel`] to create a [`ChannelPut`], handing it a
//!    [`ChannelPutRequester`] to be notified through.
//! 2. The provider calls `channel_put_connect` with the writable structure.
//! 3. The client may call `get` to fetch the current value, answered by
//!    `get_done`.
//! 4. The client calls `put` with a value and the mask of changed fields,
//!    answered by `put_done`.
//! 5. At any point, the provider may report `channel_disconnect`.

use crate::bitset::BitSet;
use crate::error::PutError;
use crate::request::PvRequest;
use crate::value::{PVStructure, Structure};
use std::fmt;
use std::sync::Arc;


/// Severity of a remote status report
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusKind {
    Ok,
    Warning,
    Error,
    Fatal,
}


/// Status report attached to every provider callback
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    kind: StatusKind,
    message: String,
}
//
impl Status {
    pub fn ok() -> Self {
        Status { kind: StatusKind::Ok, message: String::new() }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Status { kind: StatusKind::Warning, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Status { kind: StatusKind::Error, message: message.into() }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Status { kind: StatusKind::Fatal, message: message.into() }
    }

    pub fn kind(&self) -> StatusKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Truth that nothing at all went wrong
    pub fn is_ok(&self) -> bool {
        self.kind == StatusKind::Ok
    }

    /// Truth that the request went through, possibly with a warning
    pub fn is_success(&self) -> bool {
        matches!(self.kind, StatusKind::Ok | StatusKind::Warning)
    }
}
//
impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}: {}", self.kind, self.message)
        }
    }
}


/// Backend which can reach named channels
pub trait Provider: Send + Sync {
    /// Name under which this provider is known
    fn name(&self) -> &str;

    /// Get a handle to a named channel
    fn connect(&self, channel_name: &str) -> Result<Arc<dyn Channel>, PutError>;
}


/// Client-side handle to a named remote data point
pub trait Channel: Send + Sync {
    fn channel_name(&self) -> String;

    /// Truth that the channel currently reaches its remote peer
    fn is_connected(&self) -> bool;

    /// Start a put sub-operation, whose progress will be reported to the
    /// requester. The connect report may be delivered before this returns.
    fn create_channel_put(&self,
                          requester: Arc<dyn ChannelPutRequester>,
                          request: &PvRequest) -> Arc<dyn ChannelPut>;
}


/// Provider-side put sub-operation
pub trait ChannelPut: Send + Sync {
    /// Channel this sub-operation belongs to, if it is still around
    fn channel(&self) -> Option<Arc<dyn Channel>>;

    /// Fetch the current remote value, answered by `get_done`
    fn get(&self);

    /// Write some fields of a value, answered by `put_done`
    fn put(&self, value: PVStructure, changed: BitSet);

    /// Best-effort abort of whatever is in flight
    fn cancel(&self);
}


/// Receiver of put sub-operation progress reports
pub trait ChannelPutRequester: Send + Sync {
    /// The sub-operation is ready, and writes values of type `put_type`
    fn channel_put_connect(&self,
                           status: Status,
                           put: Arc<dyn ChannelPut>,
                           put_type: Option<Arc<Structure>>);

    /// The current value was fetched, `valid` tells which fields mean something
    fn get_done(&self,
                status: Status,
                put: Arc<dyn ChannelPut>,
                value: Option<PVStructure>,
                valid: BitSet);

    /// The remote side answered a write
    fn put_done(&self, status: Status, put: Arc<dyn ChannelPut>);

    /// The channel went away
    fn channel_disconnect(&self, destroy: bool);
}
