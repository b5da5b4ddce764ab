//! Single-concurrency dispatcher on a tokio runtime.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;

use crate::cart::Cart;
use crate::error::{Error, Result};
use crate::opts::Opts;

use super::slot::Slot;

/// Async work run for each dispatched item.
///
/// The returned future runs as its own task. Errors are logged, and a
/// panic inside it is caught by the runtime and logged as well.
pub trait Handler<C>: Send + Sync + 'static {
    /// Process one item.
    fn handle(&self, cart: C) -> impl Future<Output = Result<()>> + Send;
}

impl<C, F, Fut> Handler<C> for F
where
    F: Fn(C) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    fn handle(&self, cart: C) -> impl Future<Output = Result<()>> + Send {
        self(cart)
    }
}

struct Shared<C> {
    label: String,
    slot: Slot<C>,
    /// Held until the execute permit is obtained so items leave in the order
    /// they were taken.
    dequeue: Mutex<()>,
    /// Single permit gating execution.
    execute: Arc<Semaphore>,
}

/// Runs submitted items one at a time, in submission order, as tokio tasks.
///
/// The dispatch loop and each execution are spawned on the runtime passed to
/// [`new`](Self::new).
pub struct Dispatcher<C> {
    shared: Arc<Shared<C>>,
    worker: Option<JoinHandle<()>>,
}

impl<C> Dispatcher<C>
where
    C: Cart + Send + 'static,
{
    /// Start a dispatcher whose loop and executions run on `runtime`.
    pub fn new<H>(opts: &Opts, runtime: Handle, handler: H) -> Result<Self>
    where
        H: Handler<C>,
    {
        opts.validate()?;
        let shared = Arc::new(Shared {
            label: opts.label().to_string(),
            slot: Slot::new(),
            dequeue: Mutex::new(()),
            execute: Arc::new(Semaphore::new(1)),
        });
        let worker = runtime.spawn(dispatch_loop(
            Arc::clone(&shared),
            runtime.clone(),
            Arc::new(handler),
        ));
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Queue an item, waiting while the previous one has not been dequeued.
    ///
    /// Fails with [`Error::Closed`] after [`close`](Self::close).
    pub async fn submit(&self, cart: C) -> Result<()> {
        self.offer(cart).await.map_err(|(err, _)| err)
    }

    /// Like [`submit`](Self::submit), but hands a refused item back.
    pub(crate) async fn offer(&self, cart: C) -> core::result::Result<(), (Error, C)> {
        self.shared.slot.offer(cart).await
    }

    /// Wait until the queue is empty. Does not wait for the execution in flight.
    pub async fn wait_drained(&self) {
        self.shared.slot.wait_drained().await;
    }

    /// Wait until no execution is in flight.
    pub async fn wait_idle(&self) {
        let _permit = self.shared.execute.acquire().await;
    }

    /// Stop accepting items. An item already accepted is still dispatched.
    pub fn close(&self) {
        if self.shared.slot.close() {
            tracing::debug!(pipe = %self.shared.label, "dispatcher closed");
        }
    }

    /// Close, let the dispatch loop finish, and wait for the last execution.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(worker) = self.worker.take()
            && let Err(e) = worker.await
        {
            tracing::error!(pipe = %self.shared.label, error = %e, "dispatch loop failed");
        }
        self.wait_idle().await;
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.slot.is_closed()
    }

    /// Number of executions running right now (0 or 1).
    pub fn in_flight(&self) -> usize {
        1 - self.shared.execute.available_permits().min(1)
    }

    /// Number of items waiting to be dequeued (0 or 1).
    pub fn queued(&self) -> usize {
        self.shared.slot.len()
    }
}

impl<C> Drop for Dispatcher<C> {
    fn drop(&mut self) {
        // The loop drains what was accepted and exits on its own.
        self.shared.slot.close();
    }
}

async fn dispatch_loop<C, H>(shared: Arc<Shared<C>>, runtime: Handle, handler: Arc<H>)
where
    C: Cart + Send + 'static,
    H: Handler<C>,
{
    tracing::debug!(pipe = %shared.label, "dispatch loop started");
    loop {
        let (cart, permit) = {
            let _dequeue = shared.dequeue.lock().await;
            let Some(cart) = shared.slot.take().await else {
                break;
            };
            match Arc::clone(&shared.execute).acquire_owned().await {
                Ok(permit) => (cart, permit),
                Err(e) => {
                    tracing::error!(pipe = %shared.label, error = %e, "execute admission closed");
                    break;
                }
            }
        };

        let ticket = cart.ticket();
        let handler = Arc::clone(&handler);
        let label = shared.label.clone();
        let inner = runtime.clone();
        runtime.spawn(async move {
            let task = inner.spawn(async move { handler.handle(cart).await });
            let outcome = match task.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(crate::error::from_panic(e.into_panic())),
                Err(e) => Err(Error::execution(e)),
            };
            if let Err(e) = outcome {
                tracing::warn!(pipe = %label, %ticket, error = %e, "execution failed");
            }
            drop(permit);
        });
    }
    tracing::debug!(pipe = %shared.label, "dispatch loop stopped");
}
