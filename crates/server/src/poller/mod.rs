//! Status poller: detects and persists resource state transitions.
//!
//! - `scheduler` - per-resource background task registry (one task per
//!   tracked resource, never two for the same id)
//! - `check` - single-resource check logic and the driving loop

pub mod check;
pub mod scheduler;

pub use check::{CheckOutcome, check_one, poll_loop};
pub use scheduler::PollTaskManager;
