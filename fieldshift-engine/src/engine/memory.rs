use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    ddl::DdlStatement,
    engine::Engine,
    error::Result,
    ident::Ident,
    mutator::Mutator,
    record::{DataBackup, MigrationRecord, SnapshotRow},
    types::{DataType, RowCheck, TypeCategory},
};

/// In-process store used by tests.
///
/// Tables are plain maps; DDL is applied structurally with the same failure
/// semantics the real store reports, so the mutator behaves identically on
/// top of either engine.
#[derive(Debug, Clone, Default)]
pub struct Memory(Arc<RwLock<State>>);

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Table>,
    records: Vec<MigrationRecord>,
    backups: HashMap<Uuid, DataBackup>,
}

#[derive(Debug, Default)]
struct Table {
    columns: Vec<(String, DataType)>,
    rows: BTreeMap<i64, HashMap<String, Value>>,
}

impl Table {
    fn column(&self, name: &str) -> Option<&DataType> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, data_type)| data_type)
    }
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mutator(&self) -> Mutator {
        Mutator::new(self.clone())
    }

    pub fn create_table(&self, name: &Ident, columns: Vec<(Ident, DataType)>) {
        self.0.write().tables.insert(
            name.to_string(),
            Table {
                columns: columns
                    .into_iter()
                    .map(|(column, data_type)| (column.to_string(), data_type))
                    .collect(),
                rows: BTreeMap::new(),
            },
        );
    }

    /// Insert one row, assigning the next row id.
    pub fn insert_row(&self, table: &Ident, values: Vec<(Ident, Value)>) -> i64 {
        let mut state = self.0.write();
        let table = state.tables.entry(table.to_string()).or_default();
        let row_id = table.rows.keys().next_back().map(|id| id + 1).unwrap_or(1);

        table.rows.insert(
            row_id,
            values
                .into_iter()
                .map(|(column, value)| (column.to_string(), value))
                .collect(),
        );

        row_id
    }

    /// Current value of one cell, `None` if the row or column is gone.
    pub fn cell(&self, table: &Ident, column: &Ident, row_id: i64) -> Option<Value> {
        let state = self.0.read();
        let table = state.tables.get(table.as_str())?;
        table.column(column.as_str())?;

        Some(
            table
                .rows
                .get(&row_id)?
                .get(column.as_str())
                .cloned()
                .unwrap_or(Value::Null),
        )
    }

    pub fn column_data_type(&self, table: &Ident, column: &Ident) -> Option<DataType> {
        self.0
            .read()
            .tables
            .get(table.as_str())?
            .column(column.as_str())
            .copied()
    }

    /// Backdate a backup's retention, for expiry tests.
    pub fn expire_backup(&self, id: Uuid) {
        if let Some(backup) = self.0.write().backups.get_mut(&id) {
            backup.retention_until = backup.created_at - chrono::Duration::days(1);
        }
    }
}

#[async_trait]
impl Engine for Memory {
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    async fn apply(&self, statement: &DdlStatement) -> Result<()> {
        let mut state = self.0.write();

        match statement {
            DdlStatement::AddColumn {
                table,
                column,
                data_type,
            } => {
                let Some(table) = state.tables.get_mut(table.as_str()) else {
                    return Err(anyhow!("relation {table} does not exist").into());
                };

                if table.column(column.as_str()).is_some() {
                    return Err(anyhow!("column {column} already exists").into());
                }

                table.columns.push((column.to_string(), *data_type));
            }
            DdlStatement::DropColumn { table, column } => {
                let Some(table) = state.tables.get_mut(table.as_str()) else {
                    return Err(anyhow!("relation {table} does not exist").into());
                };

                if table.column(column.as_str()).is_none() {
                    return Err(anyhow!("column {column} does not exist").into());
                }

                table.columns.retain(|(name, _)| name != column.as_str());

                for row in table.rows.values_mut() {
                    row.remove(column.as_str());
                }
            }
            DdlStatement::RenameColumn { table, from, to } => {
                let Some(table) = state.tables.get_mut(table.as_str()) else {
                    return Err(anyhow!("relation {table} does not exist").into());
                };

                if table.column(from.as_str()).is_none() {
                    return Err(anyhow!("column {from} does not exist").into());
                }

                if table.column(to.as_str()).is_some() {
                    return Err(anyhow!("column {to} already exists").into());
                }

                for (name, _) in table.columns.iter_mut() {
                    if name == from.as_str() {
                        *name = to.to_string();
                    }
                }

                for row in table.rows.values_mut() {
                    if let Some(value) = row.remove(from.as_str()) {
                        row.insert(to.to_string(), value);
                    }
                }
            }
            DdlStatement::AlterColumnType {
                table,
                column,
                data_type,
            } => {
                let Some(table) = state.tables.get_mut(table.as_str()) else {
                    return Err(anyhow!("relation {table} does not exist").into());
                };

                if table.column(column.as_str()).is_none() {
                    return Err(anyhow!("column {column} does not exist").into());
                }

                // cast everything first so a single bad value leaves the
                // table untouched, like a rolled-back transaction
                let mut casted = Vec::new();

                for (row_id, row) in table.rows.iter() {
                    let value = row.get(column.as_str()).cloned().unwrap_or(Value::Null);
                    casted.push((*row_id, cast_value(&value, data_type)?));
                }

                for (row_id, value) in casted {
                    if let Some(row) = table.rows.get_mut(&row_id) {
                        row.insert(column.to_string(), value);
                    }
                }

                for (name, column_type) in table.columns.iter_mut() {
                    if name == column.as_str() {
                        *column_type = *data_type;
                    }
                }
            }
        }

        Ok(())
    }

    async fn column_exists(&self, table: &Ident, column: &Ident) -> Result<bool> {
        Ok(self
            .0
            .read()
            .tables
            .get(table.as_str())
            .and_then(|table| table.column(column.as_str()))
            .is_some())
    }

    async fn column_type(&self, table: &Ident, column: &Ident) -> Result<Option<String>> {
        Ok(self
            .0
            .read()
            .tables
            .get(table.as_str())
            .and_then(|table| table.column(column.as_str()))
            .map(|data_type| data_type.to_string()))
    }

    async fn row_count(&self, table: &Ident) -> Result<i64> {
        Ok(self
            .0
            .read()
            .tables
            .get(table.as_str())
            .map(|table| table.rows.len() as i64)
            .unwrap_or(0))
    }

    async fn count_invalid(&self, table: &Ident, column: &Ident, check: RowCheck) -> Result<i64> {
        let state = self.0.read();
        let Some(table) = state.tables.get(table.as_str()) else {
            return Ok(0);
        };

        let mut count = 0;

        for row in table.rows.values() {
            let value = match row.get(column.as_str()) {
                Some(value) if !value.is_null() => value,
                _ => continue,
            };

            let invalid = match check {
                RowCheck::NumericFormat => !matches_numeric(&text_of(value)),
                RowCheck::IsoDateFormat => !matches_iso_date(&text_of(value)),
                RowCheck::IntegerNarrowing => value
                    .as_f64()
                    .map(|number| number.fract() != 0.0)
                    .unwrap_or(true),
            };

            if invalid {
                count += 1;
            }
        }

        Ok(count)
    }

    async fn read_column(&self, table: &Ident, column: &Ident) -> Result<Vec<SnapshotRow>> {
        let state = self.0.read();
        let Some(table) = state.tables.get(table.as_str()) else {
            return Ok(Vec::new());
        };

        Ok(table
            .rows
            .iter()
            .map(|(row_id, row)| SnapshotRow {
                row_id: *row_id,
                value: row.get(column.as_str()).cloned().unwrap_or(Value::Null),
            })
            .collect())
    }

    async fn write_column_values(
        &self,
        table: &Ident,
        column: &Ident,
        values: &[SnapshotRow],
    ) -> Result<u64> {
        let mut state = self.0.write();
        let Some(table) = state.tables.get_mut(table.as_str()) else {
            return Err(anyhow!("relation {table} does not exist").into());
        };

        let mut written = 0;

        for snapshot in values {
            if let Some(row) = table.rows.get_mut(&snapshot.row_id) {
                row.insert(column.to_string(), snapshot.value.clone());
                written += 1;
            }
        }

        Ok(written)
    }

    async fn insert_record(&self, record: &MigrationRecord) -> Result<()> {
        self.0.write().records.push(record.clone());

        Ok(())
    }

    async fn records(&self, table: &Ident) -> Result<Vec<MigrationRecord>> {
        Ok(self
            .0
            .read()
            .records
            .iter()
            .filter(|record| record.table_name == table.as_str())
            .cloned()
            .collect())
    }

    async fn insert_backup(&self, backup: &DataBackup) -> Result<()> {
        self.0.write().backups.insert(backup.id, backup.clone());

        Ok(())
    }

    async fn find_backup(&self, id: Uuid) -> Result<Option<DataBackup>> {
        Ok(self.0.read().backups.get(&id).cloned())
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// `^[0-9]*\.?[0-9]+$`, the same pattern the real store checks.
fn matches_numeric(text: &str) -> bool {
    match text.split_once('.') {
        Some((int_part, frac_part)) => {
            !frac_part.is_empty()
                && int_part.chars().all(|c| c.is_ascii_digit())
                && frac_part.chars().all(|c| c.is_ascii_digit())
        }
        None => !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()),
    }
}

/// `^[0-9]{4}-[0-9]{2}-[0-9]{2}` prefix.
fn matches_iso_date(text: &str) -> bool {
    let bytes = text.as_bytes();

    bytes.len() >= 10
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit)
}

fn cast_value(value: &Value, target: &DataType) -> anyhow::Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    let casted = match target.category() {
        TypeCategory::Text | TypeCategory::BoundedString => Value::String(text_of(value)),
        TypeCategory::Numeric | TypeCategory::Float => {
            let number = numeric_of(value, target)?;
            serde_json::Number::from_f64(number)
                .map(Value::Number)
                .ok_or_else(|| anyhow!("cannot represent {value} as {target}"))?
        }
        // numeric values round to the nearest integer; text must be an
        // integer literal, so "200.5" fails even though it is numeric
        TypeCategory::Integer => match value {
            Value::Number(_) => {
                let number = numeric_of(value, target)?;
                Value::from(number.round() as i64)
            }
            Value::String(text) => text
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| anyhow!("invalid input syntax for type {target}: \"{text}\""))?,
            other => return Err(anyhow!("cannot cast {other} to {target}")),
        },
        TypeCategory::DateLike => {
            let text = text_of(value);
            if !matches_iso_date(&text) {
                return Err(anyhow!("invalid input syntax for type {target}: \"{text}\""));
            }
            Value::String(text)
        }
        TypeCategory::Boolean | TypeCategory::TimeLike | TypeCategory::Json => value.clone(),
    };

    Ok(casted)
}

fn numeric_of(value: &Value, target: &DataType) -> anyhow::Result<f64> {
    match value {
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| anyhow!("cannot represent {value} as {target}")),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow!("invalid input syntax for type {target}: \"{text}\"")),
        other => Err(anyhow!("cannot cast {other} to {target}")),
    }
}
