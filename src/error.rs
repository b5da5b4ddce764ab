//! Error types for ordered-pipe.

use thiserror::Error;

use crate::ticket::Ticket;

/// Result type for ordered-pipe operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for ordered-pipe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Buffering another early completion would make the pending map reach its bound.
    ///
    /// Usually means one ticket's execution has stalled and everything behind it piled up.
    #[error(
        "Reorder capacity exceeded: ticket {ticket} arrived while waiting for {next_deliverable} ({pending} pending, max {max_capacity})"
    )]
    CapacityExceeded {
        /// Ticket that could not be buffered
        ticket: Ticket,
        /// Ticket the buffer is waiting for
        next_deliverable: Ticket,
        /// Number of completions already buffered
        pending: usize,
        /// Configured bound
        max_capacity: usize,
    },

    /// A ticket that was already delivered arrived again.
    #[error("Out-of-order completion: ticket {ticket} is behind the delivery cursor {next_deliverable}")]
    OutOfOrder {
        /// Offending ticket
        ticket: Ticket,
        /// Ticket the buffer is waiting for
        next_deliverable: Ticket,
    },

    /// A ticket that is already buffered arrived again.
    #[error("Duplicate completion: ticket {0} is already pending")]
    DuplicateTicket(Ticket),

    /// A pipe finished with issued tickets that never reached the sink.
    #[error(
        "Undelivered results: {issued} tickets issued, delivery stopped at {next_deliverable} with {pending} parked"
    )]
    Undelivered {
        /// Ticket the buffer was still waiting for
        next_deliverable: Ticket,
        /// Number of tickets issued
        issued: u64,
        /// Completions parked behind the gap
        pending: usize,
    },

    /// Submission attempted after the pipe was closed
    #[error("Pipe is closed")]
    Closed,

    /// A unit of work failed or panicked
    #[error("Execution failed: {0}")]
    Execution(String),

    /// The dispatch thread could not be started
    #[error("Failed to spawn dispatch thread: {0}")]
    Spawn(String),

    /// Invalid usage (bad options, etc.)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),
}

impl Error {
    /// Build an execution failure from any displayable error.
    pub fn execution(err: impl core::fmt::Display) -> Self {
        Error::Execution(err.to_string())
    }

    /// Returns true if the error is a sequencing invariant violation.
    ///
    /// These point at a defect in ticket allocation or caller discipline,
    /// and a pipe that hits one stops accepting work.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::CapacityExceeded { .. }
                | Error::OutOfOrder { .. }
                | Error::DuplicateTicket(_)
                | Error::Undelivered { .. }
        )
    }
}

/// Turn a caught panic payload into an [`Error::Execution`].
pub(crate) fn from_panic(payload: Box<dyn core::any::Any + Send>) -> Error {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    Error::Execution(format!("panicked: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_fatal() {
        assert!(Error::DuplicateTicket(Ticket::new(3)).is_fatal());
        assert!(
            Error::OutOfOrder {
                ticket: Ticket::new(1),
                next_deliverable: Ticket::new(2),
            }
            .is_fatal()
        );
        assert!(!Error::Closed.is_fatal());
        assert!(!Error::execution("boom").is_fatal());
    }

    #[test]
    fn test_from_panic() {
        let err = from_panic(Box::new("kaput"));
        assert_eq!(err, Error::Execution("panicked: kaput".into()));
        let err = from_panic(Box::new(String::from("owned")));
        assert_eq!(err, Error::Execution("panicked: owned".into()));
        let err = from_panic(Box::new(7_u8));
        assert_eq!(
            err,
            Error::Execution("panicked: unknown panic payload".into())
        );
    }
}
