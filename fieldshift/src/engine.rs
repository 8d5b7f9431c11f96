use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dyn_clone::DynClone;
use uuid::Uuid;

use crate::{
    error::Result,
    job::{MigrationJob, QueueStatus},
};

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "pg")]
mod pg;

#[cfg(feature = "memory")]
pub use memory::*;
#[cfg(feature = "pg")]
pub use pg::*;

/// Durable backing store of the migration job queue: FIFO within priority,
/// exactly-once dequeue per worker, per-job attempt counters, time-bounded
/// retention of finished jobs.
#[async_trait]
pub trait Engine: DynClone + Send + Sync {
    /// Create the job table if it does not exist yet.
    async fn setup(&self) -> Result<()>;

    async fn push(&self, job: &MigrationJob) -> Result<()>;

    /// Claim the highest-priority ready job for this worker, marking it
    /// active and counting the attempt.
    async fn acquire(&self, worker_id: Uuid, now: DateTime<Utc>) -> Result<Option<MigrationJob>>;

    async fn find(&self, job_id: Uuid) -> Result<Option<MigrationJob>>;

    async fn complete(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<()>;

    /// Record a failed attempt. `retry_at = Some` re-queues the job for
    /// that instant; `None` makes the failure terminal.
    async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Manual retry of a terminally failed job; resets the attempt budget.
    async fn requeue(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<()>;

    /// Waiting/active/completed/failed counts scoped to one form.
    async fn status(&self, form_id: Uuid) -> Result<QueueStatus>;

    /// Not-yet-finished jobs scoped to one form, priority order.
    async fn pending(&self, form_id: Uuid) -> Result<Vec<MigrationJob>>;

    /// Drop completed bookkeeping finished before the cutoff; returns the
    /// number removed.
    async fn purge_completed(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Re-queue active jobs whose lock predates the cutoff (their worker
    /// died mid-job); returns the number released.
    async fn release_stalled(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

dyn_clone::clone_trait_object!(Engine);
