//! Background jobs
//!
//! Queue names, job payloads, the in-process queue and the pause/drain fence
//! used when queued work must not overlap a schema change.

pub mod types;
pub mod traits;
pub mod queue;
pub mod fence;

pub use fence::{DrainedQueue, PausedQueue, QueueFence};
pub use queue::InMemoryJobQueue;
pub use traits::{JobHandler, JobRepository};
pub use types::*;
