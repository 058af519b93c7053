//! Concurrent snippet curation pipeline for Curator.
//!
//! Candidates flow from a pool of fetchers through bounded queues to
//! validators and integrators. [`Pipeline`] is the control surface: it owns
//! the rate limiter, dedup store, metrics, record cache and lifecycle state,
//! and hands each run's workers a reference to that shared state.

pub mod activity;
pub mod dedup;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;
pub mod sink;
pub mod snapshot;
mod stages;
mod supervisor;

#[cfg(test)]
mod testing;

pub use activity::{ACTIVITY_LOG_CAPACITY, ActivityLog};
pub use dedup::DedupStore;
pub use metrics::{ErrorEntry, MAX_RECENT_ERRORS, MetricsCollector, MetricsSnapshot, RollingAverage};
pub use pipeline::{Collaborators, Pipeline};
pub use rate_limit::RateLimiter;
pub use sink::MemorySink;
pub use snapshot::{SNAPSHOT_VERSION, Snapshot};
pub use stages::QueueDepths;
