//! Delayed fan-out dispatch.
//!
//! - `queue` - durable, time-ordered delay queue with atomic claiming
//! - `worker` - claims due jobs and drives per-channel delivery

pub mod queue;
pub mod worker;

pub use queue::{cancel_pending, claim_due_jobs, release_stale_claims};
pub use worker::{DispatchOutcome, DispatchWorker, dispatch_batch, dispatch_loop};
