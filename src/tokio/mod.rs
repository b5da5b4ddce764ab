//! Async pipe using Tokio.

mod dispatcher;
mod pipe;
mod slot;

pub use dispatcher::{Dispatcher, Handler};
pub use pipe::Pipe;
