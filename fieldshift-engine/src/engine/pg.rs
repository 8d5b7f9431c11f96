use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    ddl::DdlStatement,
    engine::Engine,
    error::{EngineError, Result},
    ident::Ident,
    mutator::Mutator,
    record::{DataBackup, MigrationRecord, SnapshotRow},
    types::RowCheck,
};

#[derive(Debug, Clone)]
pub struct Pg {
    pool: PgPool,
    prefix: Option<String>,
}

impl Pg {
    pub fn new(pool: &PgPool) -> Mutator {
        Mutator::new(Self {
            pool: pool.clone(),
            prefix: None,
        })
    }

    pub fn with_prefix(pool: &PgPool, prefix: impl Into<String>) -> Mutator {
        Mutator::new(Self {
            pool: pool.clone(),
            prefix: Some(prefix.into()),
        })
    }

    fn table(&self, name: impl Into<String>) -> String {
        format!(
            "{}_{}",
            self.prefix.as_ref().unwrap_or(&"fs".to_owned()),
            name.into()
        )
    }

    fn table_records(&self) -> String {
        self.table("migration_record")
    }

    fn table_backups(&self) -> String {
        self.table("data_backup")
    }
}

#[async_trait]
impl Engine for Pg {
    async fn setup(&self) -> Result<()> {
        let table_records = self.table_records();
        let table_backups = self.table_backups();

        sqlx::query(
            format!(
                r#"
            CREATE TABLE IF NOT EXISTS {table_records} (
                id UUID PRIMARY KEY,
                table_name TEXT NOT NULL,
                column_name TEXT,
                field_id UUID,
                form_id UUID,
                operation TEXT NOT NULL,
                old_value JSONB,
                new_value JSONB,
                backup_id UUID,
                success BOOLEAN NOT NULL,
                error_message TEXT,
                rollback_statement TEXT,
                executed_by UUID,
                executed_at TIMESTAMPTZ NOT NULL
            )
            "#
            )
            .as_str(),
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            format!(
                r#"
            CREATE TABLE IF NOT EXISTS {table_backups} (
                id UUID PRIMARY KEY,
                table_name TEXT NOT NULL,
                column_name TEXT NOT NULL,
                field_id UUID,
                form_id UUID,
                data_snapshot JSONB NOT NULL,
                backup_type TEXT NOT NULL,
                retention_until TIMESTAMPTZ NOT NULL,
                created_by UUID,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#
            )
            .as_str(),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apply(&self, statement: &DdlStatement) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(statement.to_sql().as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn column_exists(&self, table: &Ident, column: &Ident) -> Result<bool> {
        let (exists,) = sqlx::query_as::<_, (bool,)>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.columns
                WHERE table_name = $1 AND column_name = $2
            )
            "#,
        )
        .bind(table.as_str())
        .bind(column.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn column_type(&self, table: &Ident, column: &Ident) -> Result<Option<String>> {
        let row = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT format_type(a.atttypid, a.atttypmod)
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            WHERE c.relname = $1 AND a.attname = $2
              AND a.attnum > 0 AND NOT a.attisdropped
            "#,
        )
        .bind(table.as_str())
        .bind(column.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(data_type,)| data_type))
    }

    async fn row_count(&self, table: &Ident) -> Result<i64> {
        let (count,) =
            sqlx::query_as::<_, (i64,)>(format!("SELECT COUNT(*) FROM {table}").as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn count_invalid(&self, table: &Ident, column: &Ident, check: RowCheck) -> Result<i64> {
        let predicate = match check {
            RowCheck::NumericFormat => {
                format!(r"{column}::text !~ '^[0-9]*\.?[0-9]+$'")
            }
            RowCheck::IsoDateFormat => {
                format!(r"{column}::text !~ '^[0-9]{{4}}-[0-9]{{2}}-[0-9]{{2}}'")
            }
            RowCheck::IntegerNarrowing => format!("{column} <> floor({column})"),
        };

        let (count,) = sqlx::query_as::<_, (i64,)>(
            format!("SELECT COUNT(*) FROM {table} WHERE {column} IS NOT NULL AND {predicate}")
                .as_str(),
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn read_column(&self, table: &Ident, column: &Ident) -> Result<Vec<SnapshotRow>> {
        let rows = sqlx::query_as::<_, (i64, Option<Value>)>(
            format!("SELECT id, to_jsonb({column}) FROM {table} ORDER BY id ASC").as_str(),
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(row_id, value)| SnapshotRow {
                row_id,
                value: value.unwrap_or(Value::Null),
            })
            .collect())
    }

    async fn write_column_values(
        &self,
        table: &Ident,
        column: &Ident,
        values: &[SnapshotRow],
    ) -> Result<u64> {
        if values.is_empty() {
            return Ok(0);
        }

        let Some(data_type) = self.column_type(table, column).await? else {
            return Err(EngineError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            });
        };

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "UPDATE {table} AS t SET {column} = (v.value #>> '{{}}')::{data_type} FROM ("
        ));

        query_builder.push_values(values, |mut b, row| {
            b.push_bind(row.row_id).push_bind(row.value.clone());
        });

        query_builder.push(") AS v(id, value) WHERE t.id = v.id");

        let result = query_builder.build().execute(&self.pool).await?;

        Ok(result.rows_affected())
    }

    async fn insert_record(&self, record: &MigrationRecord) -> Result<()> {
        let table_records = self.table_records();

        sqlx::query(
            format!(
                r#"
            INSERT INTO {table_records} (
                id, table_name, column_name, field_id, form_id, operation,
                old_value, new_value, backup_id, success, error_message,
                rollback_statement, executed_by, executed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#
            )
            .as_str(),
        )
        .bind(record.id)
        .bind(&record.table_name)
        .bind(&record.column_name)
        .bind(record.field_id)
        .bind(record.form_id)
        .bind(record.operation.as_str())
        .bind(&record.old_value)
        .bind(&record.new_value)
        .bind(record.backup_id)
        .bind(record.success)
        .bind(&record.error_message)
        .bind(&record.rollback_statement)
        .bind(record.executed_by)
        .bind(record.executed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn records(&self, table: &Ident) -> Result<Vec<MigrationRecord>> {
        let table_records = self.table_records();

        let rows = sqlx::query_as::<_, RecordRow>(
            format!(
                r#"
            SELECT * FROM {table_records}
            WHERE table_name = $1
            ORDER BY executed_at ASC
            "#
            )
            .as_str(),
        )
        .bind(table.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MigrationRecord::try_from).collect()
    }

    async fn insert_backup(&self, backup: &DataBackup) -> Result<()> {
        let table_backups = self.table_backups();

        sqlx::query(
            format!(
                r#"
            INSERT INTO {table_backups} (
                id, table_name, column_name, field_id, form_id, data_snapshot,
                backup_type, retention_until, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#
            )
            .as_str(),
        )
        .bind(backup.id)
        .bind(&backup.table_name)
        .bind(&backup.column_name)
        .bind(backup.field_id)
        .bind(backup.form_id)
        .bind(serde_json::to_value(&backup.data_snapshot)?)
        .bind(backup.backup_type.as_str())
        .bind(backup.retention_until)
        .bind(backup.created_by)
        .bind(backup.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_backup(&self, id: Uuid) -> Result<Option<DataBackup>> {
        let table_backups = self.table_backups();

        let row = sqlx::query_as::<_, BackupRow>(
            format!("SELECT * FROM {table_backups} WHERE id = $1").as_str(),
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DataBackup::try_from).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    table_name: String,
    column_name: Option<String>,
    field_id: Option<Uuid>,
    form_id: Option<Uuid>,
    operation: String,
    old_value: Option<Value>,
    new_value: Option<Value>,
    backup_id: Option<Uuid>,
    success: bool,
    error_message: Option<String>,
    rollback_statement: Option<String>,
    executed_by: Option<Uuid>,
    executed_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for MigrationRecord {
    type Error = EngineError;

    fn try_from(row: RecordRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            table_name: row.table_name,
            column_name: row.column_name,
            field_id: row.field_id,
            form_id: row.form_id,
            operation: row.operation.parse()?,
            old_value: row.old_value,
            new_value: row.new_value,
            backup_id: row.backup_id,
            success: row.success,
            error_message: row.error_message,
            rollback_statement: row.rollback_statement,
            executed_by: row.executed_by,
            executed_at: row.executed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BackupRow {
    id: Uuid,
    table_name: String,
    column_name: String,
    field_id: Option<Uuid>,
    form_id: Option<Uuid>,
    data_snapshot: Value,
    backup_type: String,
    retention_until: DateTime<Utc>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BackupRow> for DataBackup {
    type Error = EngineError;

    fn try_from(row: BackupRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            table_name: row.table_name,
            column_name: row.column_name,
            field_id: row.field_id,
            form_id: row.form_id,
            data_snapshot: serde_json::from_value(row.data_snapshot)?,
            backup_type: row.backup_type.parse()?,
            retention_until: row.retention_until,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}
