//! Reorder buffer: releases completions to a sink in ticket order.
//!
//! Completions may arrive in any order and from any thread. A completion for
//! the ticket the buffer is waiting on is delivered straight away, together
//! with every buffered successor that is now contiguous. Anything that arrives
//! early is parked in a sparse map until its turn.
//!
//! ```
//! use ordered_pipe::{ReorderBuffer, Ticket};
//!
//! let buffer = ReorderBuffer::new(16, Vec::<Ticket>::new());
//! buffer.complete(Ticket::new(2))?;
//! buffer.complete(Ticket::new(1))?;
//! assert_eq!(buffer.pending_len(), 2);
//! buffer.complete(Ticket::new(0))?;
//!
//! let delivered = buffer.into_sink();
//! assert_eq!(delivered, vec![Ticket::new(0), Ticket::new(1), Ticket::new(2)]);
//! # Ok::<(), ordered_pipe::Error>(())
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::cart::Cart;
use crate::error::{Error, Result};
use crate::ticket::Ticket;

/// Downstream consumer of in-order completions.
///
/// Called exactly once per ticket, in increasing ticket order, while the
/// buffer's lock is held. Keep it short; a slow sink stalls every completer.
pub trait Sink<C> {
    /// Accept the next item in order.
    fn deliver(&mut self, cart: C);
}

impl<C, F> Sink<C> for F
where
    F: FnMut(C),
{
    fn deliver(&mut self, cart: C) {
        self(cart)
    }
}

impl<C> Sink<C> for Vec<C> {
    fn deliver(&mut self, cart: C) {
        self.push(cart);
    }
}

struct State<C, S> {
    next_deliverable: Ticket,
    /// Early arrivals. Every key is greater than `next_deliverable`.
    pending: HashMap<Ticket, C>,
    sink: S,
}

/// Restores ticket order over completions that finish out of order.
pub struct ReorderBuffer<C, S> {
    max_capacity: usize,
    state: Mutex<State<C, S>>,
}

impl<C, S> ReorderBuffer<C, S>
where
    C: Cart,
    S: Sink<C>,
{
    /// Create a buffer that waits for ticket zero first.
    ///
    /// `max_capacity` bounds the number of early arrivals held at once; an
    /// insertion that would bring the map up to this size fails instead.
    pub fn new(max_capacity: usize, sink: S) -> Self {
        Self {
            max_capacity,
            state: Mutex::new(State {
                next_deliverable: Ticket::default(),
                pending: HashMap::new(),
                sink,
            }),
        }
    }

    /// Hand over a completed item.
    ///
    /// Delivers it (and any buffered successors) if it is next in line,
    /// otherwise buffers it. The comparison and the insert-or-deliver happen
    /// under a single lock.
    ///
    /// # Errors
    ///
    /// - [`Error::OutOfOrder`] if the ticket was already delivered
    /// - [`Error::DuplicateTicket`] if the ticket is already buffered
    /// - [`Error::CapacityExceeded`] if buffering it would reach `max_capacity`
    ///
    /// On error the item is dropped and the buffer is left unchanged.
    pub fn complete(&self, cart: C) -> Result<()> {
        let ticket = cart.ticket();
        let mut state = self.lock();

        if ticket < state.next_deliverable {
            return Err(Error::OutOfOrder {
                ticket,
                next_deliverable: state.next_deliverable,
            });
        }

        if ticket > state.next_deliverable {
            if state.pending.contains_key(&ticket) {
                return Err(Error::DuplicateTicket(ticket));
            }
            if state.pending.len() + 1 >= self.max_capacity {
                return Err(Error::CapacityExceeded {
                    ticket,
                    next_deliverable: state.next_deliverable,
                    pending: state.pending.len(),
                    max_capacity: self.max_capacity,
                });
            }
            tracing::trace!(%ticket, next = %state.next_deliverable, "buffering early completion");
            state.pending.insert(ticket, cart);
            return Ok(());
        }

        state.deliver(cart);
        state.drain_ready();
        Ok(())
    }

    /// The ticket the buffer is waiting for.
    pub fn next_deliverable(&self) -> Ticket {
        self.lock().next_deliverable
    }

    /// Number of early arrivals currently held.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Configured bound on early arrivals.
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Consume the buffer and return the sink.
    ///
    /// Buffered early arrivals are dropped.
    pub fn into_sink(self) -> S {
        match self.state.into_inner() {
            Ok(state) => state.sink,
            Err(poisoned) => {
                let mut state = poisoned.into_inner();
                state.drain_ready();
                state.sink
            }
        }
    }

    // A sink that panics mid-drain leaves its successors parked in `pending`
    // even though they are now contiguous. The cursor was already moved past
    // the panicking item, so recovery only has to finish the drain.
    fn lock(&self) -> MutexGuard<'_, State<C, S>> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => {
                self.state.clear_poison();
                let mut state = poisoned.into_inner();
                tracing::warn!(next = %state.next_deliverable, "sink panicked, resuming delivery");
                state.drain_ready();
                state
            }
        }
    }
}

impl<C, S> State<C, S>
where
    S: Sink<C>,
{
    fn deliver(&mut self, cart: C) {
        self.next_deliverable = self.next_deliverable.next();
        self.sink.deliver(cart);
    }

    /// Deliver every parked item that is now contiguous with the cursor.
    fn drain_ready(&mut self) {
        while let Some(next) = self.pending.remove(&self.next_deliverable) {
            self.deliver(next);
        }
    }
}

impl<C, S> core::fmt::Debug for ReorderBuffer<C, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ReorderBuffer")
            .field("max_capacity", &self.max_capacity)
            .field("next_deliverable", &state.next_deliverable)
            .field("pending", &state.pending.len())
            .finish_non_exhaustive()
    }
}
