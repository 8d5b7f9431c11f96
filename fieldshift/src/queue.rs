use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dyn_clone::DynClone;
use fieldshift_engine::{
    ColumnChange, Ident, MigrationContext, MigrationPreview, MigrationRecord, Mutator,
};
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::{
        backoff_delay, BACKOFF_BASE, COMPLETED_RETENTION, MAX_ATTEMPTS, POLL_INTERVAL,
        STALLED_LOCK_TIMEOUT,
    },
    engine::Engine,
    error::Result,
    job::{MigrationJob, MigrationRequest, QueueStatus},
};

/// Best-effort channel for terminal-failure alerts. Dispatch failures are
/// logged, never escalated.
#[async_trait]
pub trait AlertDispatcher: DynClone + Send + Sync {
    async fn dispatch(&self, job: &MigrationJob) -> anyhow::Result<()>;
}

dyn_clone::clone_trait_object!(AlertDispatcher);

/// Durable migration queue in front of the schema mutation engine.
///
/// Callers enqueue a request and get a job id back immediately; a single
/// worker loop drains jobs in priority order and runs them synchronously
/// through the [`Mutator`], so no two structural changes ever execute
/// concurrently.
#[derive(Clone)]
pub struct MigrationQueue {
    engine: Box<dyn Engine>,
    mutator: Mutator,
    alert: Option<Box<dyn AlertDispatcher>>,
    id: Uuid,
    running: Arc<AtomicBool>,
    max_attempts: i16,
    backoff_base: Duration,
    poll_interval: Duration,
    stalled_lock_timeout: Duration,
    completed_retention: Duration,
}

impl MigrationQueue {
    pub fn new<E: Engine + 'static>(engine: E, mutator: Mutator) -> Self {
        Self {
            engine: Box::new(engine),
            mutator,
            alert: None,
            id: Uuid::new_v4(),
            running: Arc::new(AtomicBool::new(false)),
            max_attempts: MAX_ATTEMPTS,
            backoff_base: BACKOFF_BASE,
            poll_interval: POLL_INTERVAL,
            stalled_lock_timeout: STALLED_LOCK_TIMEOUT,
            completed_retention: COMPLETED_RETENTION,
        }
    }

    pub fn alert<A: AlertDispatcher + 'static>(mut self, alert: A) -> Self {
        self.alert = Some(Box::new(alert));
        self
    }

    pub fn max_attempts(mut self, max_attempts: i16) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn stalled_lock_timeout(mut self, timeout: Duration) -> Self {
        self.stalled_lock_timeout = timeout;
        self
    }

    pub fn completed_retention(mut self, retention: Duration) -> Self {
        self.completed_retention = retention;
        self
    }

    /// Create queue and engine bookkeeping tables if they do not exist.
    pub async fn setup(&self) -> Result<()> {
        self.engine.setup().await?;
        self.mutator.setup().await?;

        Ok(())
    }

    /// Enqueue one migration request. Returns the job id immediately; the
    /// caller polls [`Self::find_job`] or [`Self::status`] for completion.
    pub async fn request_migration(&self, request: MigrationRequest) -> Result<Uuid> {
        let job = MigrationJob::from_request(request);

        self.engine.push(&job).await?;

        debug!(
            job = %job.id,
            "queued {} on {} with priority {}",
            job.operation(),
            job.table,
            job.priority
        );

        Ok(job.id)
    }

    /// Synchronous dry-run, bypassing the queue. Mutates nothing.
    pub async fn preview(
        &self,
        table: &Ident,
        change: &ColumnChange,
    ) -> Result<MigrationPreview> {
        Ok(self.mutator.preview(table, change).await?)
    }

    pub async fn status(&self, form_id: Uuid) -> Result<QueueStatus> {
        self.engine.status(form_id).await
    }

    pub async fn pending_jobs(&self, form_id: Uuid) -> Result<Vec<MigrationJob>> {
        self.engine.pending(form_id).await
    }

    pub async fn find_job(&self, job_id: Uuid) -> Result<Option<MigrationJob>> {
        self.engine.find(job_id).await
    }

    /// Re-queue a previously failed, not-yet-completed job with a fresh
    /// attempt budget.
    pub async fn retry_job(&self, job_id: Uuid) -> Result<()> {
        self.engine.requeue(job_id, Utc::now()).await
    }

    /// Drop completed-job bookkeeping past the retention window.
    pub async fn purge_completed(&self) -> Result<u64> {
        self.engine
            .purge_completed(cutoff(Utc::now(), self.completed_retention))
            .await
    }

    /// Manual recovery: write a backup's values back to its column.
    pub async fn restore_column_data(
        &self,
        backup_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<MigrationRecord> {
        Ok(self.mutator.restore_column(backup_id, user_id).await?)
    }

    /// Spawn the single worker loop. All structural changes across the
    /// system are serialized through it.
    pub fn start(&self) {
        self.running.store(true, Ordering::Relaxed);

        let queue = self.clone();

        tokio::spawn(async move {
            info!("migration worker {} started", queue.id);

            let mut interval = interval_at(Instant::now(), queue.poll_interval);

            loop {
                interval.tick().await;

                if !queue.running.load(Ordering::Relaxed) {
                    info!("migration worker {} stopped", queue.id);
                    break;
                }

                if let Err(e) = queue.tick().await {
                    error!("{e}");
                }
            }
        });
    }

    /// Ask the worker loop to exit on its next tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    async fn tick(&self) -> Result<()> {
        let now = Utc::now();

        let stalled = self
            .engine
            .release_stalled(cutoff(now, self.stalled_lock_timeout))
            .await?;

        if stalled > 0 {
            warn!("re-queued {stalled} stalled jobs");
        }

        self.engine
            .purge_completed(cutoff(now, self.completed_retention))
            .await?;

        let Some(job) = self.engine.acquire(self.id, now).await? else {
            return Ok(());
        };

        self.run_job(job).await
    }

    async fn run_job(&self, job: MigrationJob) -> Result<()> {
        let ctx = MigrationContext {
            field_id: job.field_id,
            form_id: job.form_id,
            user_id: job.user_id,
        };

        debug!(
            job = %job.id,
            attempt = job.attempts,
            "executing {} on {}",
            job.operation(),
            job.table
        );

        match self.mutator.apply_change(&job.table, &job.change, &ctx).await {
            Ok(record) => {
                self.engine.complete(job.id, Utc::now()).await?;

                info!(
                    job = %job.id,
                    record = %record.id,
                    "completed {} on {}",
                    job.operation(),
                    job.table
                );

                Ok(())
            }
            Err(e) => {
                let retry_at = (e.is_retryable() && job.attempts < self.max_attempts).then(|| {
                    Utc::now()
                        + chrono::Duration::from_std(backoff_delay(self.backoff_base, job.attempts))
                            .unwrap_or_else(|_| chrono::Duration::zero())
                });
                let terminal = retry_at.is_none();

                self.engine
                    .fail(job.id, &e.to_string(), retry_at, Utc::now())
                    .await?;

                if terminal {
                    error!(
                        job = %job.id,
                        table = %job.table,
                        form = ?job.form_id,
                        "{} failed terminally after {} attempts: {e}",
                        job.operation(),
                        job.attempts
                    );

                    self.dispatch_alert(&job).await;
                } else {
                    warn!(
                        job = %job.id,
                        "{} on {} failed (attempt {}), will retry: {e}",
                        job.operation(),
                        job.table,
                        job.attempts
                    );
                }

                Ok(())
            }
        }
    }

    async fn dispatch_alert(&self, job: &MigrationJob) {
        let Some(alert) = self.alert.as_ref() else {
            return;
        };

        if let Err(e) = alert.dispatch(job).await {
            error!(job = %job.id, "failed to dispatch terminal-failure alert: {e}");
        }
    }
}

fn cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero())
}
