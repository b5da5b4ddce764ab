//! Async pipe: ticketing, dispatch and reordering wired together.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Mutex;

use crate::cart::Tagged;
use crate::claim::{Claim, Completion, Deliver};
use crate::error::{Error, Result, from_panic};
use crate::opts::Opts;
use crate::reorder::Sink;
use crate::ticket::{Sequencer, Ticket};

use super::dispatcher::Dispatcher;

/// Runs async `work` over submitted payloads one at a time and delivers the
/// results to a sink in submission order.
///
/// Same contract as the blocking [`Pipe`](crate::sync::Pipe): failures,
/// panics and cancelled work are logged and delivered as `Err` in their place.
///
/// # Example
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ordered_pipe::Result<()> {
/// use tokio::runtime::Handle;
/// use ordered_pipe::tokio::Pipe;
/// use ordered_pipe::{Opts, Tagged};
///
/// let pipe = Pipe::new(
///     &Opts::default(),
///     Handle::current(),
///     |word: &'static str| async move { Ok::<_, ordered_pipe::Error>(word.len()) },
///     Vec::<Tagged<ordered_pipe::Result<usize>>>::new(),
/// )?;
///
/// pipe.submit("one").await?;
/// pipe.submit("three").await?;
/// let lengths: Vec<usize> = pipe
///     .finish()
///     .await?
///     .into_iter()
///     .map(|out| out.into_payload().unwrap())
///     .collect();
/// assert_eq!(lengths, vec![3, 5]);
/// # Ok(())
/// # }
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
    /// Build a pipe whose work runs as tasks on `runtime`.
    pub fn new<W, Fut>(opts: &Opts, runtime: Handle, work: W, sink: S) -> Result<Self>
    where
        W: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        opts.validate()?;
        let label = opts.label().to_string();
        let completion = Arc::new(Completion::new(label.clone(), opts.max_capacity, sink));
        let work = Arc::new(work);

        let handler = {
            let runtime = runtime.clone();
            move |claim: Claim<T, U>| {
                let work = Arc::clone(&work);
                let runtime = runtime.clone();
                async move {
                    let Claim { payload, completer } = claim;
                    let task = runtime.spawn(work(payload));
                    drop(work);
                    let outcome = match task.await {
                        Ok(result) => result,
                        Err(e) if e.is_panic() => Err(from_panic(e.into_panic())),
                        Err(e) => Err(Error::execution(e)),
                    };
                    completer.complete(outcome);
                    Ok::<(), Error>(())
                }
            }
        };

        let dispatcher = Dispatcher::new(opts, runtime, handler)?;
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
    /// Waits while an earlier payload is still waiting to be dispatched.
    /// A refused payload does not use up a ticket.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] after [`close`](Self::close), or the latched fault if
    /// the pipe has hit a sequencing error.
    pub async fn submit(&self, payload: T) -> Result<Ticket> {
        if let Some(err) = self.completion.fault() {
            self.dispatcher.close();
            return Err(err);
        }
        let _guard = self.submit_lock.lock().await;
        if self.dispatcher.is_closed() {
            return Err(Error::Closed);
        }
        let ticket = self.sequencer.next_ticket();
        let claim = Claim::<T, U>::new(ticket, payload, Arc::clone(&self.completion) as Arc<dyn Deliver<U>>);
        if let Err((err, claim)) = self.dispatcher.offer(claim).await {
            claim.cancel();
            self.sequencer.give_back(ticket);
            return Err(err);
        }
        Ok(ticket)
    }

    /// Wait until nothing is waiting to be dispatched.
    pub async fn wait_drained(&self) {
        self.dispatcher.wait_drained().await;
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
    /// The latched fault, or [`Error::Undelivered`] if an issued ticket never
    /// reached the sink.
    pub async fn finish(self) -> Result<S> {
        self.dispatcher.shutdown().await;
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
