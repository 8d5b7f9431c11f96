use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use fieldshift::{
    AlertDispatcher, ColumnChange, FieldType, Ident, JobState, MigrationJob, MigrationOp,
    MigrationQueue, MigrationRequest,
};
use uuid::Uuid;

pub fn ident(name: &str) -> Ident {
    Ident::new(name).unwrap()
}

pub fn request(table: &Ident, form_id: Uuid, change: ColumnChange) -> MigrationRequest {
    MigrationRequest {
        table: table.clone(),
        change,
        field_id: Some(Uuid::new_v4()),
        form_id: Some(form_id),
        user_id: None,
    }
}

pub fn add(column: &str) -> ColumnChange {
    ColumnChange::Add {
        column: ident(column),
        field_type: FieldType::ShortText,
    }
}

/// Collects terminally failed job ids, standing in for a real notification
/// channel.
#[derive(Clone, Default)]
pub struct RecordingAlert(Arc<Mutex<Vec<Uuid>>>);

impl RecordingAlert {
    pub fn dispatched(&self) -> Vec<Uuid> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertDispatcher for RecordingAlert {
    async fn dispatch(&self, job: &MigrationJob) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(job.id);

        Ok(())
    }
}

pub async fn wait_until_finished(
    queue: &MigrationQueue,
    job_id: Uuid,
) -> anyhow::Result<MigrationJob> {
    for _ in 0..500 {
        if let Some(job) = queue.find_job(job_id).await? {
            if job.is_finished() {
                return Ok(job);
            }
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    anyhow::bail!("job {job_id} did not finish in time")
}

pub async fn wait_until_gone(queue: &MigrationQueue, job_id: Uuid) -> anyhow::Result<()> {
    for _ in 0..500 {
        if queue.find_job(job_id).await?.is_none() {
            return Ok(());
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    anyhow::bail!("job {job_id} was never purged")
}

/// Jobs come back in operation priority order no matter the enqueue order.
pub async fn test_priority_order(queue: &MigrationQueue, table: &Ident) -> anyhow::Result<()> {
    queue.setup().await?;

    let form_id = Uuid::new_v4();

    for change in [
        ColumnChange::Drop {
            column: ident("a"),
            backup: true,
        },
        ColumnChange::Modify {
            column: ident("b"),
            old_type: fieldshift::DataType::Text,
            new_type: fieldshift::DataType::Numeric,
        },
        add("c"),
        ColumnChange::Rename {
            from: ident("d"),
            to: ident("e"),
        },
    ] {
        queue
            .request_migration(request(table, form_id, change))
            .await?;
    }

    let pending = queue.pending_jobs(form_id).await?;

    assert_eq!(
        pending.iter().map(MigrationJob::operation).collect::<Vec<_>>(),
        vec![
            MigrationOp::AddColumn,
            MigrationOp::RenameColumn,
            MigrationOp::ModifyColumn,
            MigrationOp::DropColumn,
        ]
    );

    let status = queue.status(form_id).await?;
    assert_eq!(status.waiting, 4);
    assert_eq!(status.active, 0);

    Ok(())
}

/// End to end: a queued add lands on the table and the job completes.
pub async fn test_worker_completes_job(
    queue: &MigrationQueue,
    table: &Ident,
) -> anyhow::Result<()> {
    queue.setup().await?;
    queue.start();

    let form_id = Uuid::new_v4();
    let job_id = queue
        .request_migration(request(table, form_id, add("note")))
        .await?;

    let job = wait_until_finished(queue, job_id).await?;
    queue.stop();

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 1);
    assert!(job.finished_at.is_some());
    assert_eq!(job.last_error, None);

    // the column is really there now
    let preview = queue.preview(table, &add("note")).await?;
    assert!(!preview.valid);

    let status = queue.status(form_id).await?;
    assert_eq!(status.completed, 1);

    Ok(())
}

/// Execution errors are retried with backoff until the attempt budget runs
/// out, then the job fails terminally and alerts exactly once.
pub async fn test_retryable_failure_exhausts_attempts(
    queue: &MigrationQueue,
    alerts: &RecordingAlert,
    missing_table: &Ident,
) -> anyhow::Result<()> {
    queue.setup().await?;
    queue.start();

    let form_id = Uuid::new_v4();
    let job_id = queue
        .request_migration(request(missing_table, form_id, add("note")))
        .await?;

    let job = wait_until_finished(queue, job_id).await?;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 3);
    assert!(job.last_error.is_some());

    // terminal means terminal: nothing picks the job back up
    tokio::time::sleep(Duration::from_millis(100)).await;
    queue.stop();

    let job = queue.find_job(job_id).await?.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(alerts.dispatched(), vec![job_id]);

    let status = queue.status(form_id).await?;
    assert_eq!(status.failed, 1);

    Ok(())
}

/// Precondition violations are not worth retrying; the job fails on its
/// first attempt.
pub async fn test_validation_error_fails_fast(
    queue: &MigrationQueue,
    alerts: &RecordingAlert,
    table: &Ident,
) -> anyhow::Result<()> {
    queue.setup().await?;
    queue.start();

    let form_id = Uuid::new_v4();
    let first = queue
        .request_migration(request(table, form_id, add("note")))
        .await?;
    wait_until_finished(queue, first).await?;

    // same column again: rejected before any DDL, no retries
    let job_id = queue
        .request_migration(request(table, form_id, add("note")))
        .await?;
    let job = wait_until_finished(queue, job_id).await?;
    queue.stop();

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(alerts.dispatched(), vec![job_id]);

    Ok(())
}

/// Completed bookkeeping is purged once it ages past the retention window.
pub async fn test_completed_jobs_are_purged(
    queue: &MigrationQueue,
    table: &Ident,
) -> anyhow::Result<()> {
    queue.setup().await?;
    queue.start();

    let form_id = Uuid::new_v4();
    let job_id = queue
        .request_migration(request(table, form_id, add("note")))
        .await?;

    wait_until_gone(queue, job_id).await?;
    queue.stop();

    // the work itself survived the purge
    let preview = queue.preview(table, &add("note")).await?;
    assert!(!preview.valid);

    let status = queue.status(form_id).await?;
    assert_eq!(status.completed, 0);

    Ok(())
}
