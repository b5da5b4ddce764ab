//! Blocking pipe: ticketing, dispatch and reordering wired together.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use crate::cart::Tagged;
use crate::claim::{Claim, Completion, Deliver};
use crate::error::{Error, Result, from_panic};
use crate::opts::Opts;
use crate::reorder::Sink;
use crate::ticket::{Sequencer, Ticket};

use super::dispatcher::Dispatcher;
use super::executor::Executor;

/// Runs `work` over submitted payloads one at a time and delivers the results
/// to a sink in submission order.
///
/// Each result reaches the sink as a [`Tagged`] carrying its ticket. A failed
/// or panicking execution is logged and delivered as an `Err`, so it still
/// occupies its place in the order. So is work whose job the executor drops
/// without running.
///
/// # Example
///
/// ```
/// use std::sync::mpsc;
/// use ordered_pipe::sync::{Pipe, ThreadExecutor};
/// use ordered_pipe::{Opts, Tagged};
///
/// let (tx, rx) = mpsc::channel();
/// let pipe = Pipe::new(
///     &Opts::default(),
///     ThreadExecutor::new(),
///     |n: u32| -> ordered_pipe::Result<u32> { Ok(n * 2) },
///     move |out: Tagged<ordered_pipe::Result<u32>>| {
///         let _ = tx.send(out.into_payload());
///     },
/// )?;
///
/// for n in 0..3 {
///     pipe.submit(n)?;
/// }
/// pipe.finish()?;
///
/// let doubled: Vec<u32> = rx.iter().map(|r| r.unwrap()).collect();
/// assert_eq!(doubled, vec![0, 2, 4]);
/// # Ok::<(), ordered_pipe::Error>(())
/// ```
pub struct Pipe<T, U, S> {
    label: String,
    sequencer: Sequencer,
    /// Held across ticket allocation and submission so dispatch order is ticket order.
    submit_lock: Mutex<()>,
    dispatcher: Dispatcher<Claim<T, U>>,
    completion: Arc<Completion<U, S>>,
}

impl<T, U, S> Pipe<T, U, S>
where
    T: Send + 'static,
    U: Send + 'static,
    S: Sink<Tagged<Result<U>>> + Send + 'static,
{
    /// Build a pipe running `work` on `executor` and delivering to `sink`.
    pub fn new<E, W>(opts: &Opts, executor: E, work: W, sink: S) -> Result<Self>
    where
        E: Executor,
        W: Fn(T) -> Result<U> + Send + Sync + 'static,
    {
        opts.validate()?;
        let label = opts.label().to_string();
        let completion = Arc::new(Completion::new(label.clone(), opts.max_capacity, sink));

        let handler = move |claim: Claim<T, U>| -> Result<()> {
            let Claim { payload, completer } = claim;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(payload)))
                .unwrap_or_else(|panicked| Err(from_panic(panicked)));
            completer.complete(outcome);
            Ok(())
        };

        let dispatcher = Dispatcher::new(opts, executor, handler)?;
        Ok(Self {
            label,
            sequencer: Sequencer::new(),
            submit_lock: Mutex::new(()),
            dispatcher,
            completion,
        })
    }

    /// Submit a payload and return its ticket.
    ///
    /// Blocks while an earlier payload is still waiting to be dispatched.
    /// A refused payload does not use up a ticket.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] after [`close`](Self::close), or the latched fault if
    /// the pipe has hit a sequencing error (the pipe is closed as well).
    pub fn submit(&self, payload: T) -> Result<Ticket> {
        if let Some(err) = self.completion.fault() {
            self.dispatcher.close();
            return Err(err);
        }
        let _guard = self
            .submit_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.dispatcher.is_closed() {
            return Err(Error::Closed);
        }
        let ticket = self.sequencer.next_ticket();
        let claim = Claim::<T, U>::new(ticket, payload, Arc::clone(&self.completion) as Arc<dyn Deliver<U>>);
        if let Err((err, claim)) = self.dispatcher.offer(claim) {
            claim.cancel();
            self.sequencer.give_back(ticket);
            return Err(err);
        }
        Ok(ticket)
    }

    /// Block until nothing is waiting to be dispatched.
    pub fn wait_drained(&self) {
        self.dispatcher.wait_drained();
    }

    /// Stop accepting payloads. Work already accepted still runs and is delivered.
    pub fn close(&self) {
        self.dispatcher.close();
    }

    /// Whether the pipe has been closed.
    pub fn is_closed(&self) -> bool {
        self.dispatcher.is_closed()
    }

    /// The fatal sequencing error the pipe stopped on, if any.
    pub fn fault(&self) -> Option<Error> {
        self.completion.fault()
    }

    /// Number of tickets issued so far.
    pub fn issued(&self) -> u64 {
        self.sequencer.peek().get()
    }

    /// The next ticket the sink is waiting for.
    pub fn next_deliverable(&self) -> Ticket {
        self.completion.next_deliverable()
    }

    /// Close the pipe, wait for all accepted work to be delivered, and return the sink.
    ///
    /// # Errors
    ///
    /// The latched fault if the pipe hit a sequencing error, or
    /// [`Error::Undelivered`] if an issued ticket never reached the sink.
    pub fn finish(self) -> Result<S> {
        self.dispatcher.shutdown();
        if let Some(err) = self.completion.fault() {
            return Err(err);
        }
        let issued = self.sequencer.peek().get();
        let completion = Arc::try_unwrap(self.completion).map_err(|_| {
            Error::InvalidUsage(format!(
                "{}: sink still referenced by running work",
                self.label
            ))
        })?;
        completion.into_sink(issued)
    }
}
