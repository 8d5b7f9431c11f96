use serde::{Deserialize, Serialize};

use crate::{
    ident::Ident,
    record::MigrationOp,
    types::{DataType, FieldType},
};

/// The four statement shapes this engine is allowed to emit. Identifiers
/// are validated [`Ident`]s, so rendering by interpolation is safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlStatement {
    AddColumn {
        table: Ident,
        column: Ident,
        data_type: DataType,
    },
    DropColumn {
        table: Ident,
        column: Ident,
    },
    RenameColumn {
        table: Ident,
        from: Ident,
        to: Ident,
    },
    /// Explicit `USING` cast so the store re-validates every value at
    /// conversion time instead of relying on an implicit coercion.
    AlterColumnType {
        table: Ident,
        column: Ident,
        data_type: DataType,
    },
}

impl DdlStatement {
    pub fn to_sql(&self) -> String {
        match self {
            Self::AddColumn {
                table,
                column,
                data_type,
            } => format!("ALTER TABLE {table} ADD COLUMN {column} {data_type}"),
            Self::DropColumn { table, column } => {
                format!("ALTER TABLE {table} DROP COLUMN {column}")
            }
            Self::RenameColumn { table, from, to } => {
                format!("ALTER TABLE {table} RENAME COLUMN {from} TO {to}")
            }
            Self::AlterColumnType {
                table,
                column,
                data_type,
            } => format!(
                "ALTER TABLE {table} ALTER COLUMN {column} TYPE {data_type} USING {column}::{data_type}"
            ),
        }
    }
}

/// One requested structural change, as submitted by the form editor and as
/// persisted in the job queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ColumnChange {
    Add {
        column: Ident,
        field_type: FieldType,
    },
    Drop {
        column: Ident,
        #[serde(default = "default_backup")]
        backup: bool,
    },
    Rename {
        from: Ident,
        to: Ident,
    },
    Modify {
        column: Ident,
        old_type: DataType,
        new_type: DataType,
    },
}

fn default_backup() -> bool {
    true
}

impl ColumnChange {
    pub fn operation(&self) -> MigrationOp {
        match self {
            Self::Add { .. } => MigrationOp::AddColumn,
            Self::Drop { .. } => MigrationOp::DropColumn,
            Self::Rename { .. } => MigrationOp::RenameColumn,
            Self::Modify { .. } => MigrationOp::ModifyColumn,
        }
    }

    pub fn requires_backup(&self) -> bool {
        matches!(self, Self::Drop { backup: true, .. } | Self::Modify { .. })
    }

    /// The column this change targets (the pre-change name for renames).
    pub fn column(&self) -> &Ident {
        match self {
            Self::Add { column, .. } | Self::Drop { column, .. } | Self::Modify { column, .. } => {
                column
            }
            Self::Rename { from, .. } => from,
        }
    }
}
