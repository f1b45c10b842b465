//! Periodic refresh of stale feeds.
//!
//! [`Scheduler`] runs rounds on a fixed tick; each round hands the stale
//! feeds to a [`WorkerPool`], whose workers call a [`RefreshFeed`] handler
//! once per feed. [`FeedRefresher`] is the production handler: fetch,
//! parse, record.

mod pool;
mod refresher;
mod scheduler;

pub use pool::{RoundSummary, WorkerPool};
pub use refresher::{FeedOutcome, FeedRefresher, RefreshFeed};
pub use scheduler::{stale_cutoff, Scheduler, SchedulerConfig};
