//! Submission tickets and the allocator that issues them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Position of a work item in submission order.
///
/// Tickets are issued once, starting at zero, and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ticket(u64);

impl Ticket {
    /// Wrap a raw ticket value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The ticket after this one.
    pub(crate) const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for Ticket {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for Ticket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Issues strictly increasing tickets.
///
/// The counter is 64 bits wide and is not checked for wraparound: at one
/// billion tickets per second it lasts for centuries.
#[derive(Debug, Default)]
pub struct Sequencer {
    next: AtomicU64,
}

impl Sequencer {
    /// Create an allocator whose first ticket is zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next ticket.
    ///
    /// Safe to call from any number of threads without external locking.
    pub fn next_ticket(&self) -> Ticket {
        Ticket(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// The ticket the next call to [`next_ticket`](Self::next_ticket) would return.
    ///
    /// Also the number of tickets issued so far.
    pub fn peek(&self) -> Ticket {
        Ticket(self.next.load(Ordering::Relaxed))
    }

    /// Un-issue `ticket` if no later ticket has been issued since.
    ///
    /// Returns false, leaving the counter alone, if another ticket followed it.
    pub(crate) fn give_back(&self, ticket: Ticket) -> bool {
        self.next
            .compare_exchange(
                ticket.next().get(),
                ticket.get(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            )
            .is_ok()
    }
}
