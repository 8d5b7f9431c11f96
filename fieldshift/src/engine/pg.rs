use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    engine::Engine,
    error::{QueueError, Result},
    job::{JobState, MigrationJob, QueueStatus},
    queue::MigrationQueue,
};

impl MigrationQueue {
    /// Queue and migration engine sharing one Postgres pool.
    pub fn pg(pool: &PgPool) -> Self {
        Self::new(Pg::new(pool), fieldshift_engine::Pg::new(pool))
    }

    /// Same, with prefixed bookkeeping tables (mainly for test isolation).
    pub fn pg_with_prefix(pool: &PgPool, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();

        Self::new(
            Pg::with_prefix(pool, &prefix),
            fieldshift_engine::Pg::with_prefix(pool, &prefix),
        )
    }
}

#[derive(Debug, Clone)]
pub struct Pg {
    pool: PgPool,
    prefix: Option<String>,
}

impl Pg {
    pub fn new(pool: &PgPool) -> Self {
        Self {
            pool: pool.clone(),
            prefix: None,
        }
    }

    pub fn with_prefix(pool: &PgPool, prefix: impl Into<String>) -> Self {
        Self {
            pool: pool.clone(),
            prefix: Some(prefix.into()),
        }
    }

    fn table_jobs(&self) -> String {
        format!(
            "{}_migration_job",
            self.prefix.as_ref().unwrap_or(&"fs".to_owned())
        )
    }
}

#[async_trait]
impl Engine for Pg {
    async fn setup(&self) -> Result<()> {
        let table_jobs = self.table_jobs();

        sqlx::query(
            format!(
                r#"
            CREATE TABLE IF NOT EXISTS {table_jobs} (
                id UUID PRIMARY KEY,
                table_name TEXT NOT NULL,
                change JSONB NOT NULL,
                field_id UUID,
                form_id UUID,
                user_id UUID,
                priority SMALLINT NOT NULL,
                attempts SMALLINT NOT NULL,
                state TEXT NOT NULL,
                last_error TEXT,
                available_at TIMESTAMPTZ NOT NULL,
                locked_by UUID,
                locked_at TIMESTAMPTZ,
                finished_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#
            )
            .as_str(),
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            format!(
                "CREATE INDEX IF NOT EXISTS {table_jobs}_ready_idx ON {table_jobs} (state, available_at, priority)"
            )
            .as_str(),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn push(&self, job: &MigrationJob) -> Result<()> {
        let table_jobs = self.table_jobs();

        sqlx::query(
            format!(
                r#"
            INSERT INTO {table_jobs} (
                id, table_name, change, field_id, form_id, user_id, priority,
                attempts, state, last_error, available_at, locked_by,
                locked_at, finished_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#
            )
            .as_str(),
        )
        .bind(job.id)
        .bind(job.table.as_str())
        .bind(serde_json::to_value(&job.change)?)
        .bind(job.field_id)
        .bind(job.form_id)
        .bind(job.user_id)
        .bind(job.priority)
        .bind(job.attempts)
        .bind(job.state.as_str())
        .bind(&job.last_error)
        .bind(job.available_at)
        .bind(job.locked_by)
        .bind(job.locked_at)
        .bind(job.finished_at)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn acquire(&self, worker_id: Uuid, now: DateTime<Utc>) -> Result<Option<MigrationJob>> {
        let table_jobs = self.table_jobs();

        let row = sqlx::query_as::<_, JobRow>(
            format!(
                r#"
            UPDATE {table_jobs}
            SET state = 'active', attempts = attempts + 1, locked_by = $1, locked_at = $2
            WHERE id = (
                SELECT id FROM {table_jobs}
                WHERE state = 'queued' AND available_at <= $2
                ORDER BY priority ASC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#
            )
            .as_str(),
        )
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MigrationJob::try_from).transpose()
    }

    async fn find(&self, job_id: Uuid) -> Result<Option<MigrationJob>> {
        let table_jobs = self.table_jobs();

        let row = sqlx::query_as::<_, JobRow>(
            format!("SELECT * FROM {table_jobs} WHERE id = $1").as_str(),
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MigrationJob::try_from).transpose()
    }

    async fn complete(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let table_jobs = self.table_jobs();

        let result = sqlx::query(
            format!(
                r#"
            UPDATE {table_jobs}
            SET state = 'completed', finished_at = $2, locked_by = NULL, locked_at = NULL
            WHERE id = $1
            "#
            )
            .as_str(),
        )
        .bind(job_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound(job_id));
        }

        Ok(())
    }

    async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let table_jobs = self.table_jobs();

        let result = match retry_at {
            Some(at) => {
                sqlx::query(
                    format!(
                        r#"
                    UPDATE {table_jobs}
                    SET state = 'queued', last_error = $2, available_at = $3,
                        locked_by = NULL, locked_at = NULL
                    WHERE id = $1
                    "#
                    )
                    .as_str(),
                )
                .bind(job_id)
                .bind(error)
                .bind(at)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    format!(
                        r#"
                    UPDATE {table_jobs}
                    SET state = 'failed', last_error = $2, finished_at = $3,
                        locked_by = NULL, locked_at = NULL
                    WHERE id = $1
                    "#
                    )
                    .as_str(),
                )
                .bind(job_id)
                .bind(error)
                .bind(now)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound(job_id));
        }

        Ok(())
    }

    async fn requeue(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let table_jobs = self.table_jobs();

        let state = sqlx::query_as::<_, (String,)>(
            format!("SELECT state FROM {table_jobs} WHERE id = $1").as_str(),
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match state {
            None => return Err(QueueError::JobNotFound(job_id)),
            Some((state,)) if state != JobState::Failed.as_str() => {
                return Err(QueueError::NotRetryable(job_id))
            }
            Some(_) => {}
        }

        sqlx::query(
            format!(
                r#"
            UPDATE {table_jobs}
            SET state = 'queued', attempts = 0, available_at = $2, finished_at = NULL
            WHERE id = $1 AND state = 'failed'
            "#
            )
            .as_str(),
        )
        .bind(job_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn status(&self, form_id: Uuid) -> Result<QueueStatus> {
        let table_jobs = self.table_jobs();

        let rows = sqlx::query_as::<_, (String, i64)>(
            format!(
                "SELECT state, COUNT(*) FROM {table_jobs} WHERE form_id = $1 GROUP BY state"
            )
            .as_str(),
        )
        .bind(form_id)
        .fetch_all(&self.pool)
        .await?;

        let mut status = QueueStatus::default();

        for (state, count) in rows {
            match state.parse::<JobState>()? {
                JobState::Queued => status.waiting = count,
                JobState::Active => status.active = count,
                JobState::Completed => status.completed = count,
                JobState::Failed => status.failed = count,
            }
        }

        Ok(status)
    }

    async fn pending(&self, form_id: Uuid) -> Result<Vec<MigrationJob>> {
        let table_jobs = self.table_jobs();

        let rows = sqlx::query_as::<_, JobRow>(
            format!(
                r#"
            SELECT * FROM {table_jobs}
            WHERE form_id = $1 AND state IN ('queued', 'active')
            ORDER BY priority ASC, created_at ASC
            "#
            )
            .as_str(),
        )
        .bind(form_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MigrationJob::try_from).collect()
    }

    async fn purge_completed(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let table_jobs = self.table_jobs();

        let result = sqlx::query(
            format!(
                "DELETE FROM {table_jobs} WHERE state = 'completed' AND finished_at < $1"
            )
            .as_str(),
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn release_stalled(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let table_jobs = self.table_jobs();

        let result = sqlx::query(
            format!(
                r#"
            UPDATE {table_jobs}
            SET state = 'queued', locked_by = NULL, locked_at = NULL
            WHERE state = 'active' AND locked_at < $1
            "#
            )
            .as_str(),
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    table_name: String,
    change: Value,
    field_id: Option<Uuid>,
    form_id: Option<Uuid>,
    user_id: Option<Uuid>,
    priority: i16,
    attempts: i16,
    state: String,
    last_error: Option<String>,
    available_at: DateTime<Utc>,
    locked_by: Option<Uuid>,
    locked_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for MigrationJob {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            table: fieldshift_engine::Ident::new(row.table_name)?,
            change: serde_json::from_value(row.change)?,
            field_id: row.field_id,
            form_id: row.form_id,
            user_id: row.user_id,
            priority: row.priority,
            attempts: row.attempts,
            state: row.state.parse()?,
            last_error: row.last_error,
            available_at: row.available_at,
            locked_by: row.locked_by,
            locked_at: row.locked_at,
            finished_at: row.finished_at,
            created_at: row.created_at,
        })
    }
}
