//! Per-ticket completion obligations for the pipes.
//!
//! Every accepted payload travels as a [`Claim`]. Its [`Completer`] must hand
//! an outcome to the reorder buffer exactly once; if it is dropped instead
//! (the job was discarded, the task was cancelled) it completes the ticket
//! with an error so later results are not held back behind a gap.

use std::sync::Arc;

use crate::cart::{Cart, Tagged};
use crate::error::{Error, Result};
use crate::fault::Fault;
use crate::reorder::{ReorderBuffer, Sink};
use crate::ticket::Ticket;

/// Receives the outcome for a ticket.
pub(crate) trait Deliver<U>: Send + Sync {
    fn deliver(&self, ticket: Ticket, outcome: Result<U>);
}

/// Delivery side of a pipe: reorder buffer plus the latched fault.
pub(crate) struct Completion<U, S> {
    label: String,
    reorder: ReorderBuffer<Tagged<Result<U>>, S>,
    fault: Fault,
}

impl<U, S> Completion<U, S>
where
    S: Sink<Tagged<Result<U>>>,
{
    pub fn new(label: String, max_capacity: usize, sink: S) -> Self {
        Self {
            label,
            reorder: ReorderBuffer::new(max_capacity, sink),
            fault: Fault::default(),
        }
    }

    pub fn fault(&self) -> Option<Error> {
        self.fault.get()
    }

    pub fn next_deliverable(&self) -> Ticket {
        self.reorder.next_deliverable()
    }

    #[cfg(test)]
    pub fn latch(&self, err: Error) {
        self.fault.latch(&self.label, err);
    }

    /// Give up the sink once all `issued` tickets have been delivered.
    ///
    /// # Errors
    ///
    /// The latched fault, or [`Error::Undelivered`] if a ticket never made
    /// it to the sink.
    pub fn into_sink(self, issued: u64) -> Result<S> {
        if let Some(err) = self.fault.get() {
            return Err(err);
        }
        let next_deliverable = self.reorder.next_deliverable();
        let pending = self.reorder.pending_len();
        if next_deliverable.get() != issued || pending > 0 {
            let err = Error::Undelivered {
                next_deliverable,
                issued,
                pending,
            };
            tracing::error!(pipe = %self.label, error = %err, "pipe finished with a gap");
            return Err(err);
        }
        Ok(self.reorder.into_sink())
    }
}

impl<U, S> Deliver<U> for Completion<U, S>
where
    U: Send,
    S: Sink<Tagged<Result<U>>> + Send,
{
    fn deliver(&self, ticket: Ticket, outcome: Result<U>) {
        if let Err(e) = &outcome {
            tracing::warn!(pipe = %self.label, %ticket, error = %e, "execution failed");
        }
        if let Err(e) = self.reorder.complete(Tagged::new(ticket, outcome)) {
            self.fault.latch(&self.label, e);
        }
    }
}

/// Completes one ticket, with an error if dropped unused.
pub(crate) struct Completer<U> {
    ticket: Ticket,
    target: Option<Arc<dyn Deliver<U>>>,
}

impl<U> Completer<U> {
    pub fn complete(mut self, outcome: Result<U>) {
        if let Some(target) = self.target.take() {
            target.deliver(self.ticket, outcome);
        }
    }
}

impl<U> Drop for Completer<U> {
    fn drop(&mut self) {
        if let Some(target) = self.target.take() {
            target.deliver(
                self.ticket,
                Err(Error::execution("work dropped before it completed")),
            );
        }
    }
}

/// An accepted payload and the obligation to complete its ticket.
pub(crate) struct Claim<T, U> {
    pub payload: T,
    pub completer: Completer<U>,
}

impl<T, U> Claim<T, U> {
    pub fn new(ticket: Ticket, payload: T, target: Arc<dyn Deliver<U>>) -> Self {
        Self {
            payload,
            completer: Completer {
                ticket,
                target: Some(target),
            },
        }
    }

    /// Drop the claim without completing its ticket.
    ///
    /// For payloads that were never accepted.
    pub fn cancel(self) {
        let Self { mut completer, .. } = self;
        completer.target = None;
    }
}

impl<T, U> Cart for Claim<T, U> {
    fn ticket(&self) -> Ticket {
        self.completer.ticket
    }
}
