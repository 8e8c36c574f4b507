//! Facilities to represent the status of put operations
//!
//! A put operation is modeled as a state machine which starts when the client
//! asks a channel for a remote put sub-operation, waits for the remote side to
//! report the writable structure, optionally fetches the current value, lets
//! the caller build the value to write, sends it, and finally ends up in one
//! of three final states: success, failure or cancellation.
//!
//! The final state is what the caller observes, through exactly one
//! [`PutEvent`] per operation.

use std::fmt;


/// Representation of a put operation's progress
///
/// Here are the possible state transitions:
///
/// - Connecting -> Connected / Completed
/// - Connected -> FetchingCurrent / Building / Completed
/// - FetchingCurrent -> Building / Completed
/// - Building -> Sent / Completed
/// - Sent -> Completed
///
/// Once the operation is Completed, its state won't change anymore.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutPhase {
    /// The sub-operation was requested, the remote side has not answered yet
    Connecting,

    /// The remote side reported the writable structure
    Connected,

    /// The current remote value is being fetched before building
    FetchingCurrent,

    /// The caller-supplied builder is producing the value to write
    Building,

    /// The value was sent, the remote side has not acknowledged it yet
    Sent,

    /// A completion event was delivered, with the following outcome
    Completed(PutOutcome),
}
//
impl PutPhase {
    /// Check if this phase is final (i.e. won't change anymore)
    pub fn is_final(&self) -> bool {
        matches!(self, PutPhase::Completed(_))
    }
}
//
impl Default for PutPhase {
    fn default() -> Self {
        PutPhase::Connecting
    }
}


/// Final outcome of a put operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// The remote side acknowledged the write
    Success,

    /// The operation failed, see the event message for details
    Fail,

    /// The caller cancelled the operation before it completed
    Cancel,
}
//
impl fmt::Display for PutOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            PutOutcome::Success => "Success",
            PutOutcome::Fail => "Fail",
            PutOutcome::Cancel => "Cancel",
        };
        f.write_str(s)
    }
}


/// Completion event delivered once per operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutEvent {
    /// How the operation ended
    pub outcome: PutOutcome,

    /// Remote status text or local failure description, empty on a clean
    /// success
    pub message: String,
}
//
impl PutEvent {
    /// A successful completion without any remote warning
    pub fn success() -> Self {
        PutEvent { outcome: PutOutcome::Success, message: String::new() }
    }

    /// A failure with some explanation
    pub fn fail(message: impl Into<String>) -> Self {
        PutEvent { outcome: PutOutcome::Fail, message: message.into() }
    }

    /// A caller-requested cancellation
    pub fn cancel() -> Self {
        PutEvent { outcome: PutOutcome::Cancel, message: String::new() }
    }

    /// Truth that the remote write was acknowledged
    pub fn is_success(&self) -> bool {
        self.outcome == PutOutcome::Success
    }
}
//
impl fmt::Display for PutEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.outcome)
        } else {
            write!(f, "{}: {}", self.outcome, self.message)
        }
    }
}
