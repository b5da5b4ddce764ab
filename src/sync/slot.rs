//! Blocking single-slot queue between producers and the dispatch loop.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crossbeam_queue::ArrayQueue;
use std_semaphore::Semaphore;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Open,
    Closed,
}

/// Holds at most one item. `offer` blocks while the slot is full.
///
/// `vacant` has a permit while the slot may be filled and `filled` counts
/// items to take, plus one wakeup on close. `emptied` is signalled under
/// `state` each time an item is taken.
pub(crate) struct Slot<T> {
    item: ArrayQueue<T>,
    vacant: Semaphore,
    filled: Semaphore,
    state: Mutex<SlotState>,
    emptied: Condvar,
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            item: ArrayQueue::new(1),
            vacant: Semaphore::new(1),
            filled: Semaphore::new(0),
            state: Mutex::new(SlotState::Open),
            emptied: Condvar::new(),
        }
    }

    /// Put an item in the slot, blocking until it is empty.
    ///
    /// A refused item is handed back with the reason.
    pub fn offer(&self, item: T) -> Result<(), (Error, T)> {
        self.vacant.acquire();
        {
            let state = self.lock();
            if *state == SlotState::Closed {
                drop(state);
                // Pass the wakeup on to the next blocked producer
                self.vacant.release();
                return Err((Error::Closed, item));
            }
            if let Err(item) = self.item.push(item) {
                drop(state);
                self.vacant.release();
                return Err((Error::InvalidUsage("slot already occupied".into()), item));
            }
        }
        self.filled.release();
        Ok(())
    }

    /// Take the item, blocking until there is one.
    ///
    /// Returns `None` once the slot is closed and empty. An item offered
    /// before `close` is still handed out.
    pub fn take(&self) -> Option<T> {
        loop {
            self.filled.acquire();
            if let Some(item) = self.item.pop() {
                self.vacant.release();
                drop(self.lock());
                self.emptied.notify_all();
                return Some(item);
            }
            if self.is_closed() {
                self.filled.release();
                return None;
            }
        }
    }

    /// Block until the slot is empty.
    ///
    /// Closing does not count: an item accepted before `close` must still be
    /// taken.
    pub fn wait_drained(&self) {
        let _state = self
            .emptied
            .wait_while(self.lock(), |_| !self.item.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Reject further offers and wake everyone blocked on the slot.
    ///
    /// Returns false if the slot was already closed.
    pub fn close(&self) -> bool {
        {
            let mut state = self.lock();
            if *state == SlotState::Closed {
                return false;
            }
            *state = SlotState::Closed;
        }
        self.filled.release();
        self.vacant.release();
        true
    }

    pub fn is_closed(&self) -> bool {
        *self.lock() == SlotState::Closed
    }

    pub fn len(&self) -> usize {
        self.item.len()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
