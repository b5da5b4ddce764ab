//! Ordered single-concurrency pipes.
//!
//! A pipe takes work from any number of producers, runs it one item at a
//! time, and hands the results to a sink in the order the work was
//! submitted, even when executions complete out of order.
//!
//! # Components
//!
//! - **[`Sequencer`]**: issues strictly increasing [`Ticket`]s
//! - **Dispatcher** ([`sync::Dispatcher`], [`tokio::Dispatcher`]): a single-slot
//!   queue feeding a dispatch loop that never lets two executions overlap
//! - **[`ReorderBuffer`]**: releases completions to a [`Sink`] in ticket order,
//!   parking early arrivals up to a configured bound
//! - **Pipe** ([`sync::Pipe`], [`tokio::Pipe`]): all three wired together
//!
//! # Example
//!
//! ```
//! use ordered_pipe::sync::{Pipe, ThreadExecutor};
//! use ordered_pipe::{Opts, Tagged};
//!
//! fn main() -> ordered_pipe::Result<()> {
//!     let opts = Opts::try_from("pipe://squares?max_capacity=64")?;
//!
//!     let pipe = Pipe::new(
//!         &opts,
//!         ThreadExecutor::named("squares-worker"),
//!         |n: u64| -> ordered_pipe::Result<u64> { Ok(n * n) },
//!         Vec::<Tagged<ordered_pipe::Result<u64>>>::new(),
//!     )?;
//!
//!     for n in 1..=4 {
//!         pipe.submit(n)?;
//!     }
//!
//!     let squares: Vec<u64> = pipe
//!         .finish()?
//!         .into_iter()
//!         .filter_map(|out| out.into_payload().ok())
//!         .collect();
//!     assert_eq!(squares, vec![1, 4, 9, 16]);
//!     Ok(())
//! }
//! ```

pub mod cart;
pub mod error;
pub mod opts;
pub mod reorder;
pub mod ticket;

#[cfg(any(feature = "sync", feature = "tokio"))]
mod claim;
#[cfg(any(feature = "sync", feature = "tokio"))]
mod fault;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use cart::{Cart, Tagged};
pub use error::{Error, Result};
pub use opts::Opts;
pub use reorder::{ReorderBuffer, Sink};
pub use ticket::{Sequencer, Ticket};
