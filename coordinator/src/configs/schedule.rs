use std::{num::NonZeroU32, time::Duration};

use serde::Deserialize;

/// What to do when a worker announces an id that is already registered.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the first session, drop the newcomer.
    #[default]
    Reject,
    /// Swap in the newcomer, rounds already running keep the old session.
    Replace,
}

/// How the coordinator paces registrations and rounds.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    /// Round 0 starts as soon as this many workers are registered. Without
    /// it round 0 waits out the whole `warmup`.
    pub min_workers: Option<usize>,
    /// Upper bound on the wait before round 0.
    pub warmup: Duration,
    /// Pause between reading a registration and dialing the worker.
    pub settle_delay: Duration,
    /// A worker whose round takes longer is excluded from it.
    pub worker_timeout: Option<Duration>,
    pub duplicate_policy: DuplicatePolicy,
    pub connect_attempts: NonZeroU32,
    /// Base delay between dial attempts, grows linearly with the attempt.
    pub connect_backoff: Duration,
}
