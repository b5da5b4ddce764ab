//! Blocking pipe built on OS threads.

mod dispatcher;
mod executor;
mod pipe;
mod slot;

pub use dispatcher::{Dispatcher, Handler};
pub use executor::{Executor, InlineExecutor, Job, ThreadExecutor};
pub use pipe::Pipe;
