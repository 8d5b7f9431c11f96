use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid identifier `{0}`")]
    InvalidIdent(String),

    #[error("unknown field type token `{0}`")]
    UnknownFieldType(String),

    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    #[error("column `{table}.{column}` already exists")]
    ColumnExists { table: String, column: String },

    #[error("column `{table}.{column}` does not exist")]
    ColumnNotFound { table: String, column: String },

    #[error("converting `{table}.{column}` from {from} to {to} would corrupt {invalid_count} rows")]
    InvalidConversion {
        table: String,
        column: String,
        from: String,
        to: String,
        invalid_count: i64,
    },

    #[error("backup `{0}` not found")]
    BackupNotFound(Uuid),

    #[error("backup `{0}` is past its retention window")]
    BackupExpired(Uuid),

    #[cfg(feature = "pg")]
    #[error("sqlx `{0}`")]
    Sqlx(#[from] sqlx::Error),

    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),

    #[error("{0}`")]
    Any(#[from] anyhow::Error),
}

impl EngineError {
    /// Execution errors reported by the store may succeed on a later
    /// attempt; validation and integrity errors never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            #[cfg(feature = "pg")]
            Self::Sqlx(_) => true,
            Self::Any(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
