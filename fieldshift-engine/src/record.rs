use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EngineError;

/// Structural operations this engine executes and audits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationOp {
    AddColumn,
    DropColumn,
    RenameColumn,
    ModifyColumn,
}

impl MigrationOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddColumn => "ADD_COLUMN",
            Self::DropColumn => "DROP_COLUMN",
            Self::RenameColumn => "RENAME_COLUMN",
            Self::ModifyColumn => "MODIFY_COLUMN",
        }
    }

    /// Queue priority, lower served first. Non-destructive changes drain
    /// before destructive ones when many requests are pending.
    pub fn priority(&self) -> i16 {
        match self {
            Self::AddColumn => 1,
            Self::RenameColumn => 2,
            Self::ModifyColumn => 3,
            Self::DropColumn => 4,
        }
    }
}

impl fmt::Display for MigrationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationOp {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD_COLUMN" => Ok(Self::AddColumn),
            "DROP_COLUMN" => Ok(Self::DropColumn),
            "RENAME_COLUMN" => Ok(Self::RenameColumn),
            "MODIFY_COLUMN" => Ok(Self::ModifyColumn),
            _ => Err(EngineError::UnknownOperation(s.to_owned())),
        }
    }
}

/// Immutable audit entry for one executed (or attempted) structural change.
/// Written once at the end of an attempt, never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: Uuid,
    pub table_name: String,
    pub column_name: Option<String>,
    pub field_id: Option<Uuid>,
    pub form_id: Option<Uuid>,
    pub operation: MigrationOp,
    /// Small JSON descriptor of the shape before the change, not the data.
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub backup_id: Option<Uuid>,
    pub success: bool,
    pub error_message: Option<String>,
    /// Ready-to-execute inverse DDL, present on success only.
    pub rollback_statement: Option<String>,
    /// Executing user; `None` for system-initiated changes.
    pub executed_by: Option<Uuid>,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupType {
    Manual,
    AutoDelete,
    AutoModify,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "MANUAL",
            Self::AutoDelete => "AUTO_DELETE",
            Self::AutoModify => "AUTO_MODIFY",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MANUAL" => Ok(Self::Manual),
            "AUTO_DELETE" => Ok(Self::AutoDelete),
            "AUTO_MODIFY" => Ok(Self::AutoModify),
            _ => Err(EngineError::UnknownOperation(s.to_owned())),
        }
    }
}

/// One `(row id, value)` pair of a column snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub row_id: i64,
    pub value: Value,
}

/// Full snapshot of one column's values, captured before a destructive or
/// type-changing operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataBackup {
    pub id: Uuid,
    pub table_name: String,
    pub column_name: String,
    pub field_id: Option<Uuid>,
    pub form_id: Option<Uuid>,
    /// Ordered by row id, every row present at capture time.
    pub data_snapshot: Vec<SnapshotRow>,
    pub backup_type: BackupType,
    pub retention_until: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl DataBackup {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.retention_until
    }
}

/// Caller references carried into records and backups.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationContext {
    pub field_id: Option<Uuid>,
    pub form_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
}
