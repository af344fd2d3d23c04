//! Call session lifecycle
//!
//! Ties the queue, scoring, and routing pieces together around the life of
//! one call: claim, start, complete with an outcome, or release. Completion
//! drives the post-call follow-up (rescore, re-route, re-enqueue); when the
//! follow-up fails, the outcome is parked and drained later so no outcome is
//! ever lost and no user's outcomes are applied out of order.

pub mod coordinator;

pub use coordinator::{CallSessionCoordinator, RetryDrainResult};
