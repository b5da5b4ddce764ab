//! Async single-slot queue between producers and the dispatch task.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam_queue::ArrayQueue;
use tokio::sync::{Notify, Semaphore};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Open,
    Closed,
}

/// Holds at most one item. `offer` waits while the slot is full.
///
/// Closing closes `vacant`, which fails every pending and future offer.
/// `emptied` wakes drain waiters each time an item is taken.
pub(crate) struct Slot<T> {
    item: ArrayQueue<T>,
    vacant: Semaphore,
    filled: Semaphore,
    state: Mutex<SlotState>,
    emptied: Notify,
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            item: ArrayQueue::new(1),
            vacant: Semaphore::new(1),
            filled: Semaphore::new(0),
            state: Mutex::new(SlotState::Open),
            emptied: Notify::new(),
        }
    }

    /// A refused item is handed back with the reason.
    pub async fn offer(&self, item: T) -> Result<(), (Error, T)> {
        let Ok(permit) = self.vacant.acquire().await else {
            return Err((Error::Closed, item));
        };
        {
            let state = self.lock();
            if *state == SlotState::Closed {
                return Err((Error::Closed, item));
            }
            if let Err(item) = self.item.push(item) {
                return Err((Error::InvalidUsage("slot already occupied".into()), item));
            }
        }
        // Given back by `take`
        permit.forget();
        self.filled.add_permits(1);
        Ok(())
    }

    /// Returns `None` once the slot is closed and empty.
    pub async fn take(&self) -> Option<T> {
        loop {
            // `filled` is never closed
            if let Ok(permit) = self.filled.acquire().await {
                permit.forget();
            }
            if let Some(item) = self.item.pop() {
                self.vacant.add_permits(1);
                self.emptied.notify_waiters();
                return Some(item);
            }
            if self.is_closed() {
                self.filled.add_permits(1);
                return None;
            }
        }
    }

    /// Wait until the slot is empty. Closing does not count.
    pub async fn wait_drained(&self) {
        loop {
            // Registered before the check so a take in between is not missed
            let emptied = self.emptied.notified();
            if self.item.is_empty() {
                return;
            }
            emptied.await;
        }
    }

    /// Returns false if the slot was already closed.
    pub fn close(&self) -> bool {
        {
            let mut state = self.lock();
            if *state == SlotState::Closed {
                return false;
            }
            *state = SlotState::Closed;
        }
        self.vacant.close();
        self.filled.add_permits(1);
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
