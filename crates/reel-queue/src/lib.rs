//! Bounded-concurrency work queue.
//!
//! Tasks are admitted FIFO and at most `max_concurrent` of them run at once.
//! The queue is an owned value handed to whoever enqueues work; there is no
//! global instance.

pub mod error;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use queue::WorkQueue;
