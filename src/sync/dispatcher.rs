//! Single-concurrency dispatcher.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use std_semaphore::Semaphore;

use crate::cart::Cart;
use crate::error::{Error, Result, from_panic};
use crate::opts::Opts;

use super::executor::Executor;
use super::slot::Slot;

/// Work run for each dispatched item.
///
/// Errors and panics are logged and swallowed; they never stop the
/// dispatcher.
pub trait Handler<C>: Send + Sync + 'static {
    /// Process one item.
    fn handle(&self, cart: C) -> Result<()>;
}

impl<C, F> Handler<C> for F
where
    F: Fn(C) -> Result<()> + Send + Sync + 'static,
{
    fn handle(&self, cart: C) -> Result<()> {
        self(cart)
    }
}

/// Permission to execute. One permit, shared by every job.
struct Admission {
    semaphore: Semaphore,
    in_flight: AtomicUsize,
}

impl Admission {
    fn acquire(self: &Arc<Self>) -> ExecutePermit {
        self.semaphore.acquire();
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        ExecutePermit {
            admission: Arc::clone(self),
        }
    }

    fn wait_idle(&self) {
        self.semaphore.acquire();
        self.semaphore.release();
    }
}

/// Released on drop, so every exit path of a job gives the permit back.
struct ExecutePermit {
    admission: Arc<Admission>,
}

impl Drop for ExecutePermit {
    fn drop(&mut self) {
        self.admission.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.admission.semaphore.release();
    }
}

struct Shared<C> {
    label: String,
    slot: Slot<C>,
    /// Serializes dequeue attempts. Held until the execute permit is obtained
    /// so items leave in the order they were taken.
    dequeue: Mutex<()>,
    admission: Arc<Admission>,
}

/// Runs submitted items one at a time, in submission order.
///
/// Producers on any number of threads call [`submit`](Self::submit). A
/// dispatch thread takes items out of a single-slot queue and hands them to
/// the executor, never letting two executions overlap. While one execution
/// runs the next item may already be dequeued and waiting for its turn.
pub struct Dispatcher<C> {
    shared: Arc<Shared<C>>,
    worker: Option<JoinHandle<()>>,
}

impl<C> Dispatcher<C>
where
    C: Cart + Send + 'static,
{
    /// Start a dispatcher and its dispatch thread.
    pub fn new<E, H>(opts: &Opts, executor: E, handler: H) -> Result<Self>
    where
        E: Executor,
        H: Handler<C>,
    {
        opts.validate()?;
        let shared = Arc::new(Shared {
            label: opts.label().to_string(),
            slot: Slot::new(),
            dequeue: Mutex::new(()),
            admission: Arc::new(Admission {
                semaphore: Semaphore::new(1),
                in_flight: AtomicUsize::new(0),
            }),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(format!("{}-dispatch", opts.label()))
                .spawn(move || dispatch_loop(&shared, &executor, Arc::new(handler)))
                .map_err(|e| Error::Spawn(e.to_string()))?
        };

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Queue an item, blocking while the previous one has not been dequeued.
    ///
    /// Fails with [`Error::Closed`] after [`close`](Self::close).
    pub fn submit(&self, cart: C) -> Result<()> {
        self.offer(cart).map_err(|(err, _)| err)
    }

    /// Like [`submit`](Self::submit), but hands a refused item back.
    pub(crate) fn offer(&self, cart: C) -> core::result::Result<(), (Error, C)> {
        self.shared.slot.offer(cart)
    }

    /// Block until the queue is empty.
    ///
    /// Does not wait for the execution in flight.
    pub fn wait_drained(&self) {
        self.shared.slot.wait_drained();
    }

    /// Block until no execution is in flight.
    pub fn wait_idle(&self) {
        self.shared.admission.wait_idle();
    }

    /// Stop accepting items.
    ///
    /// An item already accepted is still dispatched; running executions are
    /// not interrupted. Calling it again has no effect.
    pub fn close(&self) {
        if self.shared.slot.close() {
            tracing::debug!(pipe = %self.shared.label, "dispatcher closed");
        }
    }

    /// Close, let the dispatch thread finish, and wait for the last execution.
    pub fn shutdown(mut self) {
        self.close();
        self.join_worker();
        self.wait_idle();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.slot.is_closed()
    }

    /// Number of executions running right now (0 or 1).
    pub fn in_flight(&self) -> usize {
        self.shared.admission.in_flight.load(Ordering::Acquire)
    }

    /// Number of items waiting to be dequeued (0 or 1).
    pub fn queued(&self) -> usize {
        self.shared.slot.len()
    }
}

impl<C> Dispatcher<C> {
    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!(pipe = %self.shared.label, "dispatch thread panicked");
        }
    }
}

impl<C> Drop for Dispatcher<C> {
    fn drop(&mut self) {
        self.shared.slot.close();
        self.join_worker();
    }
}

fn dispatch_loop<C, E, H>(shared: &Shared<C>, executor: &E, handler: Arc<H>)
where
    C: Cart + Send + 'static,
    E: Executor,
    H: Handler<C>,
{
    tracing::debug!(pipe = %shared.label, "dispatch loop started");
    loop {
        let (cart, permit) = {
            let _dequeue = shared.dequeue.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(cart) = shared.slot.take() else {
                break;
            };
            (cart, shared.admission.acquire())
        };

        let assignment = Assignment {
            cart,
            handler: Arc::clone(&handler),
            label: shared.label.clone(),
            permit,
        };
        executor.execute(Box::new(move || assignment.run()));
    }
    tracing::debug!(pipe = %shared.label, "dispatch loop stopped");
}

/// Everything one job owns.
///
/// Fields drop in declaration order, so a job discarded by its executor
/// still releases the cart and the handler before the permit.
struct Assignment<C, H> {
    cart: C,
    handler: Arc<H>,
    label: String,
    permit: ExecutePermit,
}

impl<C, H> Assignment<C, H>
where
    C: Cart,
    H: Handler<C>,
{
    fn run(self) {
        let Self {
            cart,
            handler,
            label,
            permit,
        } = self;
        run_one(&label, &*handler, cart);
        // Handler first, so whoever wakes on the permit sees it gone
        drop(handler);
        drop(permit);
    }
}

fn run_one<C, H>(label: &str, handler: &H, cart: C)
where
    C: Cart,
    H: Handler<C>,
{
    let ticket = cart.ticket();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(cart)))
        .unwrap_or_else(|payload| Err(from_panic(payload)));
    if let Err(e) = outcome {
        tracing::warn!(pipe = %label, %ticket, error = %e, "execution failed");
    }
}
