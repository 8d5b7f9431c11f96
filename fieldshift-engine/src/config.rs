//! Engine tuning defaults.

/// How long a column snapshot stays restorable. Backups past this window
/// are rejected by restore and become eligible for external purge.
pub const BACKUP_RETENTION_DAYS: i64 = 90;

/// Rows written per bulk conditional update during a restore.
pub const RESTORE_BATCH_SIZE: usize = 500;
