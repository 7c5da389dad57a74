//! Cooperative cancellation for pipeline runs.
//!
//! Each run owns one [`CancellationToken`]. The orchestrator cancels it on
//! `cancel()`/`reset()`; executors and the retry policy observe it between
//! attempts and during backoff sleeps.

mod token;

pub use token::CancellationToken;
