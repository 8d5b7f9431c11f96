#![forbid(unsafe_code)]

mod config;
mod error;
mod job;
mod queue;

pub mod engine;

pub use config::*;
pub use engine::Engine;
pub use error::*;
pub use job::*;
pub use queue::*;

pub use fieldshift_engine::{
    BackupType, ColumnChange, ConversionCheck, DataBackup, DataType, EngineError, FieldType,
    Ident, MigrationContext, MigrationOp, MigrationPreview, MigrationRecord, Mutator,
};
