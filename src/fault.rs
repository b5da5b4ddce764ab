//! Latched fault shared between a pipe and its workers.

use std::sync::{Mutex, PoisonError};

use crate::error::Error;

/// First fatal sequencing error seen by a pipe.
#[derive(Debug, Default)]
pub(crate) struct Fault(Mutex<Option<Error>>);

impl Fault {
    pub fn get(&self) -> Option<Error> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Record `err` unless an earlier fault is already held.
    pub fn latch(&self, label: &str, err: Error) {
        tracing::error!(pipe = %label, error = %err, "pipe faulted");
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}
