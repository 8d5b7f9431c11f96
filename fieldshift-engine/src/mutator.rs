use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    config::{BACKUP_RETENTION_DAYS, RESTORE_BATCH_SIZE},
    ddl::{ColumnChange, DdlStatement},
    engine::Engine,
    error::{EngineError, Result},
    ident::Ident,
    record::{BackupType, DataBackup, MigrationContext, MigrationOp, MigrationRecord},
    types::{conversion_rule, ConversionCheck, ConversionRule, DataType, FieldType},
};

/// Dry-run result: what would run, its inverse, and the same validity
/// computation as the live operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationPreview {
    pub operation: MigrationOp,
    pub sql: String,
    pub rollback_statement: Option<String>,
    pub requires_backup: bool,
    pub row_count: i64,
    pub valid: bool,
    pub invalid_count: i64,
    pub warnings: Vec<String>,
}

/// Executes structural changes against a live, data-bearing table.
///
/// One call is one logical attempt: preconditions are validated first
/// (validation failures leave no audit record), the DDL runs in its own
/// transaction, and the outcome is durably recorded before control returns
/// so the audit trail never diverges from actual store state.
#[derive(Clone)]
pub struct Mutator {
    engine: Box<dyn Engine>,
}

impl Mutator {
    pub fn new<E: Engine + 'static>(engine: E) -> Self {
        Self {
            engine: Box::new(engine),
        }
    }

    /// Create the bookkeeping tables if they do not exist.
    pub async fn setup(&self) -> Result<()> {
        self.engine.setup().await
    }

    /// Audit trail for one table, oldest first.
    pub async fn records(&self, table: &Ident) -> Result<Vec<MigrationRecord>> {
        self.engine.records(table).await
    }

    pub async fn find_backup(&self, id: Uuid) -> Result<Option<DataBackup>> {
        self.engine.find_backup(id).await
    }

    /// Dispatch one requested change to the matching operation.
    pub async fn apply_change(
        &self,
        table: &Ident,
        change: &ColumnChange,
        ctx: &MigrationContext,
    ) -> Result<MigrationRecord> {
        match change {
            ColumnChange::Add { column, field_type } => {
                self.add_column(table, column, *field_type, ctx).await
            }
            ColumnChange::Drop { column, backup } => {
                self.drop_column(table, column, *backup, ctx).await
            }
            ColumnChange::Rename { from, to } => self.rename_column(table, from, to, ctx).await,
            ColumnChange::Modify {
                column,
                old_type,
                new_type,
            } => {
                self.migrate_column_type(table, column, *old_type, *new_type, ctx)
                    .await
            }
        }
    }

    pub async fn add_column(
        &self,
        table: &Ident,
        column: &Ident,
        field_type: FieldType,
        ctx: &MigrationContext,
    ) -> Result<MigrationRecord> {
        if self.engine.column_exists(table, column).await? {
            return Err(EngineError::ColumnExists {
                table: table.to_string(),
                column: column.to_string(),
            });
        }

        let data_type = field_type.storage();
        let statement = DdlStatement::AddColumn {
            table: table.clone(),
            column: column.clone(),
            data_type,
        };
        let rollback = DdlStatement::DropColumn {
            table: table.clone(),
            column: column.clone(),
        }
        .to_sql();

        let outcome = self.engine.apply(&statement).await;

        self.finish(
            MigrationOp::AddColumn,
            table,
            column,
            None,
            Some(json!({ "columnName": column.as_str(), "dataType": data_type.to_string() })),
            None,
            rollback,
            outcome,
            ctx,
        )
        .await
    }

    pub async fn drop_column(
        &self,
        table: &Ident,
        column: &Ident,
        backup: bool,
        ctx: &MigrationContext,
    ) -> Result<MigrationRecord> {
        let Some(current_type) = self.engine.column_type(table, column).await? else {
            return Err(EngineError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            });
        };

        // snapshot happens-before the destructive DDL; the record links the
        // backup whether or not the DDL goes through
        let backup_id = if backup {
            Some(
                self.backup_column(table, column, BackupType::AutoDelete, ctx)
                    .await?
                    .id,
            )
        } else {
            None
        };

        let statement = DdlStatement::DropColumn {
            table: table.clone(),
            column: column.clone(),
        };
        // recreates the column, not its values; those come from the backup
        let rollback = format!("ALTER TABLE {table} ADD COLUMN {column} {current_type}");

        let outcome = self.engine.apply(&statement).await;

        self.finish(
            MigrationOp::DropColumn,
            table,
            column,
            Some(json!({ "columnName": column.as_str(), "dataType": current_type })),
            None,
            backup_id,
            rollback,
            outcome,
            ctx,
        )
        .await
    }

    pub async fn rename_column(
        &self,
        table: &Ident,
        from: &Ident,
        to: &Ident,
        ctx: &MigrationContext,
    ) -> Result<MigrationRecord> {
        if !self.engine.column_exists(table, from).await? {
            return Err(EngineError::ColumnNotFound {
                table: table.to_string(),
                column: from.to_string(),
            });
        }

        if self.engine.column_exists(table, to).await? {
            return Err(EngineError::ColumnExists {
                table: table.to_string(),
                column: to.to_string(),
            });
        }

        let statement = DdlStatement::RenameColumn {
            table: table.clone(),
            from: from.clone(),
            to: to.clone(),
        };
        let rollback = DdlStatement::RenameColumn {
            table: table.clone(),
            from: to.clone(),
            to: from.clone(),
        }
        .to_sql();

        let outcome = self.engine.apply(&statement).await;

        self.finish(
            MigrationOp::RenameColumn,
            table,
            from,
            Some(json!({ "columnName": from.as_str() })),
            Some(json!({ "columnName": to.as_str() })),
            None,
            rollback,
            outcome,
            ctx,
        )
        .await
    }

    pub async fn migrate_column_type(
        &self,
        table: &Ident,
        column: &Ident,
        old_type: DataType,
        new_type: DataType,
        ctx: &MigrationContext,
    ) -> Result<MigrationRecord> {
        if !self.engine.column_exists(table, column).await? {
            return Err(EngineError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            });
        }

        let check = self
            .conversion_check(table, column, old_type, new_type)
            .await?;

        if !check.valid {
            return Err(EngineError::InvalidConversion {
                table: table.to_string(),
                column: column.to_string(),
                from: old_type.to_string(),
                to: new_type.to_string(),
                invalid_count: check.invalid_count,
            });
        }

        let backup_id = Some(
            self.backup_column(table, column, BackupType::AutoModify, ctx)
                .await?
                .id,
        );

        let statement = DdlStatement::AlterColumnType {
            table: table.clone(),
            column: column.clone(),
            data_type: new_type,
        };
        let rollback = DdlStatement::AlterColumnType {
            table: table.clone(),
            column: column.clone(),
            data_type: old_type,
        }
        .to_sql();

        let outcome = self.engine.apply(&statement).await;

        self.finish(
            MigrationOp::ModifyColumn,
            table,
            column,
            Some(json!({ "columnName": column.as_str(), "dataType": old_type.to_string() })),
            Some(json!({ "columnName": column.as_str(), "dataType": new_type.to_string() })),
            backup_id,
            rollback,
            outcome,
            ctx,
        )
        .await
    }

    /// Validate one type conversion without touching anything. Identical
    /// between preview and the live run.
    pub async fn conversion_check(
        &self,
        table: &Ident,
        column: &Ident,
        old_type: DataType,
        new_type: DataType,
    ) -> Result<ConversionCheck> {
        let mut warnings = Vec::new();

        let (valid, invalid_count) =
            match conversion_rule(old_type.category(), new_type.category()) {
                ConversionRule::Safe => (true, 0),
                ConversionRule::Lossy => {
                    warnings.push(format!(
                        "conversion from {old_type} to {new_type} is not verified and may lose data"
                    ));
                    (true, 0)
                }
                ConversionRule::CheckRows { check, blocking } => {
                    let count = self.engine.count_invalid(table, column, check).await?;

                    if count > 0 && !blocking {
                        warnings.push(format!(
                            "{count} rows will be truncated converting {old_type} to {new_type}"
                        ));
                    }

                    (count == 0 || !blocking, count)
                }
            };

        Ok(ConversionCheck {
            valid,
            invalid_count,
            warnings,
        })
    }

    /// Dry-run: the exact SQL that would run, its inverse, whether a backup
    /// is required, the current row count, and the validity computation of
    /// the live operation. Mutates nothing.
    pub async fn preview(&self, table: &Ident, change: &ColumnChange) -> Result<MigrationPreview> {
        let row_count = self.engine.row_count(table).await?;
        let mut valid = true;
        let mut invalid_count = 0;
        let mut warnings = Vec::new();
        let mut rollback_statement = None;

        let sql = match change {
            ColumnChange::Add { column, field_type } => {
                if self.engine.column_exists(table, column).await? {
                    valid = false;
                    warnings.push(format!("column {column} already exists on {table}"));
                }

                rollback_statement = Some(
                    DdlStatement::DropColumn {
                        table: table.clone(),
                        column: column.clone(),
                    }
                    .to_sql(),
                );

                DdlStatement::AddColumn {
                    table: table.clone(),
                    column: column.clone(),
                    data_type: field_type.storage(),
                }
                .to_sql()
            }
            ColumnChange::Drop { column, .. } => {
                match self.engine.column_type(table, column).await? {
                    Some(current_type) => {
                        rollback_statement =
                            Some(format!("ALTER TABLE {table} ADD COLUMN {column} {current_type}"));
                        warnings.push(
                            "rollback recreates the column but not its values; restore from the backup afterwards"
                                .to_owned(),
                        );
                    }
                    None => {
                        valid = false;
                        warnings.push(format!("column {column} does not exist on {table}"));
                    }
                }

                DdlStatement::DropColumn {
                    table: table.clone(),
                    column: column.clone(),
                }
                .to_sql()
            }
            ColumnChange::Rename { from, to } => {
                if !self.engine.column_exists(table, from).await? {
                    valid = false;
                    warnings.push(format!("column {from} does not exist on {table}"));
                }

                if self.engine.column_exists(table, to).await? {
                    valid = false;
                    warnings.push(format!("column {to} already exists on {table}"));
                }

                rollback_statement = Some(
                    DdlStatement::RenameColumn {
                        table: table.clone(),
                        from: to.clone(),
                        to: from.clone(),
                    }
                    .to_sql(),
                );

                DdlStatement::RenameColumn {
                    table: table.clone(),
                    from: from.clone(),
                    to: to.clone(),
                }
                .to_sql()
            }
            ColumnChange::Modify {
                column,
                old_type,
                new_type,
            } => {
                if !self.engine.column_exists(table, column).await? {
                    valid = false;
                    warnings.push(format!("column {column} does not exist on {table}"));
                } else {
                    let check = self
                        .conversion_check(table, column, *old_type, *new_type)
                        .await?;

                    valid = check.valid;
                    invalid_count = check.invalid_count;
                    warnings.extend(check.warnings);
                }

                rollback_statement = Some(
                    DdlStatement::AlterColumnType {
                        table: table.clone(),
                        column: column.clone(),
                        data_type: *old_type,
                    }
                    .to_sql(),
                );

                DdlStatement::AlterColumnType {
                    table: table.clone(),
                    column: column.clone(),
                    data_type: *new_type,
                }
                .to_sql()
            }
        };

        Ok(MigrationPreview {
            operation: change.operation(),
            sql,
            rollback_statement,
            requires_backup: change.requires_backup(),
            row_count,
            valid,
            invalid_count,
            warnings,
        })
    }

    /// Snapshot every `(row id, value)` pair of a column.
    pub async fn backup_column(
        &self,
        table: &Ident,
        column: &Ident,
        backup_type: BackupType,
        ctx: &MigrationContext,
    ) -> Result<DataBackup> {
        if !self.engine.column_exists(table, column).await? {
            return Err(EngineError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            });
        }

        let data_snapshot = self.engine.read_column(table, column).await?;
        let now = Utc::now();

        let backup = DataBackup {
            id: Uuid::new_v4(),
            table_name: table.to_string(),
            column_name: column.to_string(),
            field_id: ctx.field_id,
            form_id: ctx.form_id,
            data_snapshot,
            backup_type,
            retention_until: now + Duration::days(BACKUP_RETENTION_DAYS),
            created_by: ctx.user_id,
            created_at: now,
        };

        self.engine.insert_backup(&backup).await?;

        Ok(backup)
    }

    /// Write a backup's values back to its column in bulk batches.
    ///
    /// The target column must still exist (re-add it first after a drop).
    /// The current values are snapshotted before being overwritten, so the
    /// restore itself stays reversible.
    pub async fn restore_column(
        &self,
        backup_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<MigrationRecord> {
        let Some(backup) = self.engine.find_backup(backup_id).await? else {
            return Err(EngineError::BackupNotFound(backup_id));
        };

        if backup.is_expired(Utc::now()) {
            return Err(EngineError::BackupExpired(backup_id));
        }

        let table = Ident::new(&backup.table_name)?;
        let column = Ident::new(&backup.column_name)?;

        if !self.engine.column_exists(&table, &column).await? {
            return Err(EngineError::ColumnNotFound {
                table: backup.table_name,
                column: backup.column_name,
            });
        }

        let ctx = MigrationContext {
            field_id: backup.field_id,
            form_id: backup.form_id,
            user_id,
        };
        let pre_restore = self
            .backup_column(&table, &column, BackupType::Manual, &ctx)
            .await?;

        let mut restored: u64 = 0;
        let mut outcome = Ok(());

        for batch in backup.data_snapshot.chunks(RESTORE_BATCH_SIZE) {
            match self.engine.write_column_values(&table, &column, batch).await {
                Ok(written) => restored += written,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        self.finish(
            MigrationOp::ModifyColumn,
            &table,
            &column,
            Some(json!({ "preRestoreBackupId": pre_restore.id })),
            Some(json!({ "restoredFromBackupId": backup.id, "restoredRows": restored })),
            Some(backup.id),
            format!("-- restore column data from backup {}", pre_restore.id),
            outcome.map(|_| ()),
            &ctx,
        )
        .await
    }

    /// Durably record the outcome of an attempt, then surface it. Failed
    /// attempts are never silently lost: the record is written outside the
    /// DDL transaction before the error propagates.
    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        operation: MigrationOp,
        table: &Ident,
        column: &Ident,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
        backup_id: Option<Uuid>,
        rollback: String,
        outcome: Result<()>,
        ctx: &MigrationContext,
    ) -> Result<MigrationRecord> {
        let record = MigrationRecord {
            id: Uuid::new_v4(),
            table_name: table.to_string(),
            column_name: Some(column.to_string()),
            field_id: ctx.field_id,
            form_id: ctx.form_id,
            operation,
            old_value,
            new_value,
            backup_id,
            success: outcome.is_ok(),
            error_message: outcome.as_ref().err().map(|e| e.to_string()),
            rollback_statement: outcome.is_ok().then_some(rollback),
            executed_by: ctx.user_id,
            executed_at: Utc::now(),
        };

        self.engine.insert_record(&record).await?;
        outcome?;

        Ok(record)
    }
}
