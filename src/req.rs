//! Request pool and queues.
//!
//! Every command submitted to the controller is tracked by a [`Request`] that
//! lives in a fixed-capacity [`Pool`]. A request is `Idle` when created or
//! completed, `Waiting` while queued for command credits, and `Busy` after it
//! is written to the transport and until its completion event, timeout, or
//! abort.

pub use {pool::*, request::*};

mod list;
mod pool;
mod request;

#[cfg(test)]
mod tests;
