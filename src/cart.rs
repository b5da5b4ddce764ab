//! Work items carried through a pipe.

use crate::ticket::Ticket;

/// Anything that travels through a pipe tagged with its submission ticket.
///
/// The ticket must not change once assigned; the reorder buffer keys on it.
pub trait Cart {
    /// The ticket this item was issued.
    fn ticket(&self) -> Ticket;
}

/// A payload paired with its ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged<T> {
    ticket: Ticket,
    /// The caller's payload.
    pub payload: T,
}

impl<T> Tagged<T> {
    /// Tag a payload with a ticket.
    pub fn new(ticket: Ticket, payload: T) -> Self {
        Self { ticket, payload }
    }

    /// Replace the payload, keeping the ticket.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Tagged<U> {
        Tagged {
            ticket: self.ticket,
            payload: f(self.payload),
        }
    }

    /// Give the payload back.
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T> Cart for Tagged<T> {
    fn ticket(&self) -> Ticket {
        self.ticket
    }
}

impl Cart for Ticket {
    fn ticket(&self) -> Ticket {
        *self
    }
}
