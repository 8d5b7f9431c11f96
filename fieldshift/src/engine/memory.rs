use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    engine::Engine,
    error::{QueueError, Result},
    job::{JobState, MigrationJob, QueueStatus},
    queue::MigrationQueue,
};

impl MigrationQueue {
    /// Queue backed by in-process state, running migrations against the
    /// given in-process store.
    pub fn memory(store: &fieldshift_engine::Memory) -> Self {
        Self::new(Memory::default(), store.mutator())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Memory(Arc<RwLock<HashMap<Uuid, MigrationJob>>>);

#[async_trait]
impl Engine for Memory {
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    async fn push(&self, job: &MigrationJob) -> Result<()> {
        self.0.write().await.insert(job.id, job.clone());

        Ok(())
    }

    async fn acquire(&self, worker_id: Uuid, now: DateTime<Utc>) -> Result<Option<MigrationJob>> {
        let mut jobs = self.0.write().await;

        let next = jobs
            .values()
            .filter(|job| job.state == JobState::Queued && job.available_at <= now)
            .min_by_key(|job| (job.priority, job.created_at, job.id))
            .map(|job| job.id);

        let Some(job) = next.and_then(|id| jobs.get_mut(&id)) else {
            return Ok(None);
        };

        job.state = JobState::Active;
        job.attempts += 1;
        job.locked_by = Some(worker_id);
        job.locked_at = Some(now);

        Ok(Some(job.clone()))
    }

    async fn find(&self, job_id: Uuid) -> Result<Option<MigrationJob>> {
        Ok(self.0.read().await.get(&job_id).cloned())
    }

    async fn complete(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut jobs = self.0.write().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return Err(QueueError::JobNotFound(job_id));
        };

        job.state = JobState::Completed;
        job.finished_at = Some(now);
        job.locked_by = None;
        job.locked_at = None;

        Ok(())
    }

    async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut jobs = self.0.write().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return Err(QueueError::JobNotFound(job_id));
        };

        job.last_error = Some(error.to_owned());
        job.locked_by = None;
        job.locked_at = None;

        match retry_at {
            Some(at) => {
                job.state = JobState::Queued;
                job.available_at = at;
            }
            None => {
                job.state = JobState::Failed;
                job.finished_at = Some(now);
            }
        }

        Ok(())
    }

    async fn requeue(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut jobs = self.0.write().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return Err(QueueError::JobNotFound(job_id));
        };

        if job.state != JobState::Failed {
            return Err(QueueError::NotRetryable(job_id));
        }

        job.state = JobState::Queued;
        job.attempts = 0;
        job.available_at = now;
        job.finished_at = None;

        Ok(())
    }

    async fn status(&self, form_id: Uuid) -> Result<QueueStatus> {
        let jobs = self.0.read().await;
        let mut status = QueueStatus::default();

        for job in jobs.values().filter(|job| job.form_id == Some(form_id)) {
            match job.state {
                JobState::Queued => status.waiting += 1,
                JobState::Active => status.active += 1,
                JobState::Completed => status.completed += 1,
                JobState::Failed => status.failed += 1,
            }
        }

        Ok(status)
    }

    async fn pending(&self, form_id: Uuid) -> Result<Vec<MigrationJob>> {
        let jobs = self.0.read().await;

        let mut pending: Vec<_> = jobs
            .values()
            .filter(|job| job.form_id == Some(form_id) && !job.is_finished())
            .cloned()
            .collect();

        pending.sort_by_key(|job| (job.priority, job.created_at, job.id));

        Ok(pending)
    }

    async fn purge_completed(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut jobs = self.0.write().await;
        let before = jobs.len();

        jobs.retain(|_, job| {
            !(job.state == JobState::Completed
                && job.finished_at.map(|at| at < cutoff).unwrap_or(false))
        });

        Ok((before - jobs.len()) as u64)
    }

    async fn release_stalled(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut jobs = self.0.write().await;
        let mut released = 0;

        for job in jobs.values_mut() {
            if job.state == JobState::Active
                && job.locked_at.map(|at| at < cutoff).unwrap_or(false)
            {
                job.state = JobState::Queued;
                job.locked_by = None;
                job.locked_at = None;
                released += 1;
            }
        }

        Ok(released)
    }
}
