//! Queue tuning defaults. Every value can be overridden through the
//! builder methods on [`crate::MigrationQueue`].

use std::time::Duration;

/// Total attempts a job gets before it fails terminally.
pub const MAX_ATTEMPTS: i16 = 3;

/// Base delay of the exponential retry backoff.
pub const BACKOFF_BASE: Duration = Duration::from_secs(5);

/// Worker poll interval.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Active jobs whose lock is older than this are considered stalled (their
/// worker died mid-job) and are re-queued.
pub const STALLED_LOCK_TIMEOUT: Duration = Duration::from_secs(300);

/// Completed-job bookkeeping older than this is purged to bound queue
/// storage growth.
pub const COMPLETED_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Delay before re-queuing the given failed attempt (1-based). Doubles per
/// attempt, so delays are strictly increasing.
pub fn backoff_delay(base: Duration, attempt: i16) -> Duration {
    let exponent = u32::try_from(attempt.max(1) - 1).unwrap_or(0);

    base.saturating_mul(2u32.saturating_pow(exponent))
}
