use async_trait::async_trait;
use dyn_clone::DynClone;
use uuid::Uuid;

use crate::{
    ddl::DdlStatement,
    error::Result,
    ident::Ident,
    record::{DataBackup, MigrationRecord, SnapshotRow},
    types::RowCheck,
};

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "pg")]
mod pg;

#[cfg(feature = "memory")]
pub use memory::*;
#[cfg(feature = "pg")]
pub use pg::*;

/// Relational-store boundary of the schema mutation engine.
///
/// Exactly the four DDL statement shapes, read-only catalog queries, and
/// the backup/restore row traffic cross this trait. Nothing else reaches
/// the store.
#[async_trait]
pub trait Engine: DynClone + Send + Sync {
    /// Create the migration-record and data-backup bookkeeping tables if
    /// they do not exist yet.
    async fn setup(&self) -> Result<()>;

    /// Execute one structural change in its own transaction.
    async fn apply(&self, statement: &DdlStatement) -> Result<()>;

    async fn column_exists(&self, table: &Ident, column: &Ident) -> Result<bool>;

    /// Current catalog type of a column, renderable back into DDL.
    async fn column_type(&self, table: &Ident, column: &Ident) -> Result<Option<String>>;

    async fn row_count(&self, table: &Ident) -> Result<i64>;

    /// Rows whose current value would not survive the given conversion.
    async fn count_invalid(&self, table: &Ident, column: &Ident, check: RowCheck) -> Result<i64>;

    /// Every `(row id, value)` pair of a column in one query, ordered by
    /// row id.
    async fn read_column(&self, table: &Ident, column: &Ident) -> Result<Vec<SnapshotRow>>;

    /// One bulk conditional update mapping row ids to values. Rows missing
    /// from the table are skipped; returns the number written.
    async fn write_column_values(
        &self,
        table: &Ident,
        column: &Ident,
        values: &[SnapshotRow],
    ) -> Result<u64>;

    async fn insert_record(&self, record: &MigrationRecord) -> Result<()>;

    /// Audit trail for one table, oldest first.
    async fn records(&self, table: &Ident) -> Result<Vec<MigrationRecord>>;

    async fn insert_backup(&self, backup: &DataBackup) -> Result<()>;

    async fn find_backup(&self, id: Uuid) -> Result<Option<DataBackup>>;
}

dyn_clone::clone_trait_object!(Engine);
