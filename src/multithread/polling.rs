//! Polling-based put operation monitoring
//!
//! This module provides a way to watch a put operation progress through its
//! phases by polling. It never blocks the coordinator, nor the caller, which
//! makes it suitable for refreshing progress displays while the completion
//! callback takes care of the actual outcome.

use crate::status::PutPhase;
use triple_buffer::{Input, Output, TripleBuffer};


/// Phase buffer, to be split between a coordinator and a caller
pub struct PhaseBuffer {
    /// Coordinator interface used to submit phase updates
    publisher: PhasePublisher,

    /// Caller interface used to poll the current phase
    monitor: PhaseMonitor,
}
//
impl PhaseBuffer {
    /// Create a new phase buffer, starting in the Connecting phase
    pub fn new() -> Self {
        // Setup triple buffer-based coordinator/caller communication...
        let (input, output) = TripleBuffer::new(&PutPhase::Connecting).split();

        // ...then build both ends
        PhaseBuffer {
            publisher: PhasePublisher { input },
            monitor: PhaseMonitor { output },
        }
    }

    /// Split the phase buffer into coordinator and caller ends
    pub fn split(self) -> (PhasePublisher, PhaseMonitor) {
        (self.publisher, self.monitor)
    }
}
//
impl Default for PhaseBuffer {
    fn default() -> Self {
        PhaseBuffer::new()
    }
}


/// Coordinator end, phase updates are sent through this
pub struct PhasePublisher {
    input: Input<PutPhase>,
}
//
impl PhasePublisher {
    pub(crate) fn publish(&mut self, phase: PutPhase) {
        self.input.write(phase);
    }
}


/// Caller end, used to poll the operation phase
pub struct PhaseMonitor {
    /// Latest phase will be read through this triple buffer
    output: Output<PutPhase>,
}
//
impl PhaseMonitor {
    /// Access the latest published phase
    pub fn phase(&mut self) -> PutPhase {
        *self.output.read()
    }

    /// Truth that the operation has completed
    pub fn is_final(&mut self) -> bool {
        self.phase().is_final()
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::PutOutcome;

    /// Check the initial phase
    #[test]
    fn initial_phase() {
        let (_publisher, mut monitor) = PhaseBuffer::new().split();
        assert_eq!(monitor.phase(), PutPhase::Connecting);
        assert!(!monitor.is_final());
    }

    /// Check that phase changes propagate from coordinator to caller
    #[test]
    fn phase_propagation() {
        let (mut publisher, mut monitor) = PhaseBuffer::new().split();
        publisher.publish(PutPhase::Building);
        assert_eq!(monitor.phase(), PutPhase::Building);

        // Only the latest phase is kept
        publisher.publish(PutPhase::Sent);
        publisher.publish(PutPhase::Completed(PutOutcome::Success));
        assert_eq!(monitor.phase(), PutPhase::Completed(PutOutcome::Success));
        assert!(monitor.is_final());
    }
}
