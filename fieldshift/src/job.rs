use std::{fmt, str::FromStr};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use fieldshift_engine::{ColumnChange, Ident, MigrationOp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(anyhow!("unknown job state `{s}`").into()),
        }
    }
}

/// Inbound migration request from the form-editing business logic. The
/// caller supplies the exact change; the queue decides nothing about it
/// beyond priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub table: Ident,
    pub change: ColumnChange,
    pub field_id: Option<Uuid>,
    pub form_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
}

/// One unit of work in the migration queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationJob {
    pub id: Uuid,
    pub table: Ident,
    pub change: ColumnChange,
    pub field_id: Option<Uuid>,
    pub form_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    /// Lower is served first; assigned from the operation at enqueue time.
    pub priority: i16,
    pub attempts: i16,
    pub state: JobState,
    pub last_error: Option<String>,
    /// Earliest instant the job may be picked up; pushed forward by retry
    /// backoff.
    pub available_at: DateTime<Utc>,
    pub locked_by: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MigrationJob {
    pub fn from_request(request: MigrationRequest) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            priority: request.change.operation().priority(),
            attempts: 0,
            state: JobState::Queued,
            last_error: None,
            available_at: now,
            locked_by: None,
            locked_at: None,
            finished_at: None,
            created_at: now,
            table: request.table,
            change: request.change,
            field_id: request.field_id,
            form_id: request.form_id,
            user_id: request.user_id,
        }
    }

    pub fn operation(&self) -> MigrationOp {
        self.change.operation()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, JobState::Completed | JobState::Failed)
    }
}

/// Per-form queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
}

#[cfg(test)]
mod tests {
    use fieldshift_engine::FieldType;

    use super::*;

    #[test]
    fn priority_follows_the_operation() {
        let request = |change: ColumnChange| MigrationRequest {
            table: Ident::new("orders").unwrap(),
            change,
            field_id: None,
            form_id: None,
            user_id: None,
        };

        let add = MigrationJob::from_request(request(ColumnChange::Add {
            column: Ident::new("note").unwrap(),
            field_type: FieldType::ShortText,
        }));
        let drop = MigrationJob::from_request(request(ColumnChange::Drop {
            column: Ident::new("note").unwrap(),
            backup: true,
        }));

        assert_eq!(add.priority, 1);
        assert_eq!(drop.priority, 4);
        assert_eq!(add.state, JobState::Queued);
        assert_eq!(add.attempts, 0);
    }

    #[test]
    fn state_wire_names_round_trip() {
        for state in [
            JobState::Queued,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
    }
}
