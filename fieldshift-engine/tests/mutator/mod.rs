use async_trait::async_trait;
use fieldshift_engine::{
    BackupType, ColumnChange, DataType, EngineError, FieldType, Ident, MigrationContext,
    MigrationOp, Mutator,
};
use serde_json::{json, Value};

/// Engine-specific seeding and raw reads the scenarios need around the
/// mutator under test.
#[async_trait]
pub trait Fixture {
    fn mutator(&self) -> Mutator;

    async fn create_table(&self, table: &Ident, columns: &[(Ident, DataType)])
        -> anyhow::Result<()>;

    async fn insert_text_row(
        &self,
        table: &Ident,
        column: &Ident,
        value: &str,
    ) -> anyhow::Result<i64>;

    /// Current cell value as JSON, `None` if the row is gone.
    async fn cell(&self, table: &Ident, column: &Ident, row_id: i64)
        -> anyhow::Result<Option<Value>>;
}

pub fn ident(name: &str) -> Ident {
    Ident::new(name).unwrap()
}

async fn seed_amounts(
    fixture: &dyn Fixture,
    table: &Ident,
    values: &[&str],
) -> anyhow::Result<Vec<i64>> {
    let amount = ident("amount");

    fixture
        .create_table(table, &[(amount.clone(), DataType::Text)])
        .await?;

    let mut row_ids = Vec::new();

    for value in values {
        row_ids.push(fixture.insert_text_row(table, &amount, value).await?);
    }

    Ok(row_ids)
}

pub async fn test_add_column(fixture: &dyn Fixture, table: &Ident) -> anyhow::Result<()> {
    let mutator = fixture.mutator();
    mutator.setup().await?;
    seed_amounts(fixture, table, &[]).await?;

    let ctx = MigrationContext::default();
    let change = ColumnChange::Add {
        column: ident("note"),
        field_type: FieldType::ShortText,
    };

    let record = mutator.apply_change(table, &change, &ctx).await?;

    assert!(record.success);
    assert_eq!(record.operation, MigrationOp::AddColumn);
    assert_eq!(record.column_name.as_deref(), Some("note"));
    assert_eq!(record.backup_id, None);
    assert_eq!(record.error_message, None);
    assert_eq!(
        record.rollback_statement.as_deref(),
        Some(format!("ALTER TABLE {table} DROP COLUMN note").as_str())
    );

    // a second add of the same column is rejected before any DDL runs,
    // leaving no audit record behind
    let err = mutator.apply_change(table, &change, &ctx).await.unwrap_err();

    assert!(matches!(err, EngineError::ColumnExists { .. }), "{err}");
    assert_eq!(mutator.records(table).await?.len(), 1);

    Ok(())
}

pub async fn test_failed_attempt_is_recorded(
    fixture: &dyn Fixture,
    missing_table: &Ident,
) -> anyhow::Result<()> {
    let mutator = fixture.mutator();
    mutator.setup().await?;

    let ctx = MigrationContext::default();
    let change = ColumnChange::Add {
        column: ident("note"),
        field_type: FieldType::ShortText,
    };

    // the table was never created, so the DDL itself fails
    mutator
        .apply_change(missing_table, &change, &ctx)
        .await
        .unwrap_err();

    let records = mutator.records(missing_table).await?;

    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert!(records[0].error_message.is_some());
    assert_eq!(records[0].rollback_statement, None);

    Ok(())
}

pub async fn test_drop_column_backs_up(fixture: &dyn Fixture, table: &Ident) -> anyhow::Result<()> {
    let mutator = fixture.mutator();
    mutator.setup().await?;
    seed_amounts(fixture, table, &["100", "200.5", "abc"]).await?;

    let ctx = MigrationContext::default();
    let record = mutator
        .apply_change(
            table,
            &ColumnChange::Drop {
                column: ident("amount"),
                backup: true,
            },
            &ctx,
        )
        .await?;

    assert!(record.success);
    assert_eq!(record.operation, MigrationOp::DropColumn);

    let backup_id = record.backup_id.unwrap();
    let backup = mutator.find_backup(backup_id).await?.unwrap();

    assert_eq!(backup.backup_type, BackupType::AutoDelete);
    assert_eq!(backup.table_name, table.as_str());
    assert_eq!(backup.column_name, "amount");
    assert_eq!(
        backup
            .data_snapshot
            .iter()
            .map(|row| row.value.clone())
            .collect::<Vec<_>>(),
        vec![json!("100"), json!("200.5"), json!("abc")]
    );
    assert_eq!(
        backup.retention_until - backup.created_at,
        chrono::Duration::days(90)
    );

    // rollback recreates the column with its pre-drop type
    let rollback = record.rollback_statement.unwrap();
    assert!(
        rollback.starts_with(&format!("ALTER TABLE {table} ADD COLUMN amount")),
        "{rollback}"
    );

    let err = mutator
        .apply_change(
            table,
            &ColumnChange::Drop {
                column: ident("amount"),
                backup: true,
            },
            &ctx,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::ColumnNotFound { .. }), "{err}");

    Ok(())
}

pub async fn test_drop_without_backup(fixture: &dyn Fixture, table: &Ident) -> anyhow::Result<()> {
    let mutator = fixture.mutator();
    mutator.setup().await?;
    seed_amounts(fixture, table, &["100"]).await?;

    let record = mutator
        .apply_change(
            table,
            &ColumnChange::Drop {
                column: ident("amount"),
                backup: false,
            },
            &MigrationContext::default(),
        )
        .await?;

    assert!(record.success);
    assert_eq!(record.backup_id, None);

    Ok(())
}

pub async fn test_rename_column(fixture: &dyn Fixture, table: &Ident) -> anyhow::Result<()> {
    let mutator = fixture.mutator();
    mutator.setup().await?;

    let amount = ident("amount");
    let notes = ident("notes");

    fixture
        .create_table(
            table,
            &[
                (amount.clone(), DataType::Text),
                (notes.clone(), DataType::Text),
            ],
        )
        .await?;

    let row_id = fixture.insert_text_row(table, &amount, "100").await?;
    let ctx = MigrationContext::default();

    let err = mutator
        .apply_change(
            table,
            &ColumnChange::Rename {
                from: ident("ghost"),
                to: ident("total"),
            },
            &ctx,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ColumnNotFound { .. }), "{err}");

    let err = mutator
        .apply_change(
            table,
            &ColumnChange::Rename {
                from: amount.clone(),
                to: notes.clone(),
            },
            &ctx,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ColumnExists { .. }), "{err}");

    let record = mutator
        .apply_change(
            table,
            &ColumnChange::Rename {
                from: amount.clone(),
                to: ident("total"),
            },
            &ctx,
        )
        .await?;

    assert!(record.success);
    assert_eq!(record.operation, MigrationOp::RenameColumn);
    assert_eq!(
        record.rollback_statement.as_deref(),
        Some(format!("ALTER TABLE {table} RENAME COLUMN total TO amount").as_str())
    );

    // values follow the column under its new name
    assert_eq!(
        fixture.cell(table, &ident("total"), row_id).await?,
        Some(json!("100"))
    );

    Ok(())
}

pub async fn test_modify_blocked_by_invalid_rows(
    fixture: &dyn Fixture,
    table: &Ident,
) -> anyhow::Result<()> {
    let mutator = fixture.mutator();
    mutator.setup().await?;

    let row_ids = seed_amounts(fixture, table, &["100", "200.5", "abc"]).await?;
    let amount = ident("amount");

    let err = mutator
        .apply_change(
            table,
            &ColumnChange::Modify {
                column: amount.clone(),
                old_type: DataType::Text,
                new_type: DataType::Numeric,
            },
            &MigrationContext::default(),
        )
        .await
        .unwrap_err();

    match err {
        EngineError::InvalidConversion { invalid_count, .. } => assert_eq!(invalid_count, 1),
        other => panic!("unexpected error: {other}"),
    }

    // nothing ran, nothing was recorded, values are untouched
    assert!(mutator.records(table).await?.is_empty());
    assert_eq!(
        fixture.cell(table, &amount, row_ids[2]).await?,
        Some(json!("abc"))
    );

    Ok(())
}

pub async fn test_modify_converts_and_backs_up(
    fixture: &dyn Fixture,
    table: &Ident,
) -> anyhow::Result<()> {
    let mutator = fixture.mutator();
    mutator.setup().await?;

    let row_ids = seed_amounts(fixture, table, &["100", "200.5", "300"]).await?;
    let amount = ident("amount");

    let record = mutator
        .apply_change(
            table,
            &ColumnChange::Modify {
                column: amount.clone(),
                old_type: DataType::Text,
                new_type: DataType::Numeric,
            },
            &MigrationContext::default(),
        )
        .await?;

    assert!(record.success);
    assert_eq!(record.operation, MigrationOp::ModifyColumn);
    assert_eq!(
        record.rollback_statement.as_deref(),
        Some(
            format!("ALTER TABLE {table} ALTER COLUMN amount TYPE TEXT USING amount::TEXT")
                .as_str()
        )
    );

    let backup = mutator.find_backup(record.backup_id.unwrap()).await?.unwrap();

    assert_eq!(backup.backup_type, BackupType::AutoModify);
    assert_eq!(backup.data_snapshot.len(), 3);
    assert_eq!(backup.data_snapshot[1].value, json!("200.5"));

    let converted = fixture.cell(table, &amount, row_ids[1]).await?.unwrap();
    assert_eq!(converted.as_f64(), Some(200.5));

    Ok(())
}

pub async fn test_preview_is_pure(fixture: &dyn Fixture, table: &Ident) -> anyhow::Result<()> {
    let mutator = fixture.mutator();
    mutator.setup().await?;
    seed_amounts(fixture, table, &["100", "abc"]).await?;

    let add = ColumnChange::Add {
        column: ident("note"),
        field_type: FieldType::ShortText,
    };
    let preview = mutator.preview(table, &add).await?;

    assert_eq!(
        preview.sql,
        format!("ALTER TABLE {table} ADD COLUMN note VARCHAR(255)")
    );
    assert_eq!(
        preview.rollback_statement.as_deref(),
        Some(format!("ALTER TABLE {table} DROP COLUMN note").as_str())
    );
    assert!(!preview.requires_backup);
    assert_eq!(preview.row_count, 2);
    assert!(preview.valid);
    assert!(preview.warnings.is_empty());

    // previewing twice yields the same answer and mutates nothing
    assert_eq!(mutator.preview(table, &add).await?, preview);
    assert!(mutator.records(table).await?.is_empty());

    let drop = ColumnChange::Drop {
        column: ident("amount"),
        backup: true,
    };
    let preview = mutator.preview(table, &drop).await?;

    assert!(preview.requires_backup);
    assert!(preview.valid);
    assert_eq!(preview.warnings.len(), 1);

    let preview = mutator
        .preview(
            table,
            &ColumnChange::Drop {
                column: ident("ghost"),
                backup: true,
            },
        )
        .await?;
    assert!(!preview.valid);

    let preview = mutator
        .preview(
            table,
            &ColumnChange::Modify {
                column: ident("amount"),
                old_type: DataType::Text,
                new_type: DataType::Numeric,
            },
        )
        .await?;

    assert!(!preview.valid);
    assert_eq!(preview.invalid_count, 1);

    // the preview left the column addable
    let record = mutator
        .apply_change(table, &add, &MigrationContext::default())
        .await?;
    assert!(record.success);

    Ok(())
}

pub async fn test_restore_round_trip(fixture: &dyn Fixture, table: &Ident) -> anyhow::Result<()> {
    let mutator = fixture.mutator();
    mutator.setup().await?;

    let row_ids = seed_amounts(fixture, table, &["100", "200.5"]).await?;
    let amount = ident("amount");
    let ctx = MigrationContext::default();

    let dropped = mutator
        .apply_change(
            table,
            &ColumnChange::Drop {
                column: amount.clone(),
                backup: true,
            },
            &ctx,
        )
        .await?;
    let backup_id = dropped.backup_id.unwrap();

    // the column must exist again before a restore can fill it
    let err = mutator.restore_column(backup_id, None).await.unwrap_err();
    assert!(matches!(err, EngineError::ColumnNotFound { .. }), "{err}");

    mutator
        .apply_change(
            table,
            &ColumnChange::Add {
                column: amount.clone(),
                field_type: FieldType::LongText,
            },
            &ctx,
        )
        .await?;

    let record = mutator.restore_column(backup_id, None).await?;

    assert!(record.success);
    assert_eq!(record.backup_id, Some(backup_id));
    assert_eq!(record.new_value.as_ref().unwrap()["restoredRows"], json!(2));
    assert!(record
        .rollback_statement
        .as_deref()
        .unwrap()
        .starts_with("-- restore column data from backup"));

    assert_eq!(
        fixture.cell(table, &amount, row_ids[0]).await?,
        Some(json!("100"))
    );
    assert_eq!(
        fixture.cell(table, &amount, row_ids[1]).await?,
        Some(json!("200.5"))
    );

    // the restore snapshotted the (empty) pre-restore values, so it can
    // itself be undone
    let pre_restore_id: uuid::Uuid = serde_json::from_value(
        record.old_value.as_ref().unwrap()["preRestoreBackupId"].clone(),
    )?;
    let pre_restore = mutator.find_backup(pre_restore_id).await?.unwrap();

    assert_eq!(pre_restore.backup_type, BackupType::Manual);
    assert_eq!(pre_restore.data_snapshot.len(), 2);
    assert!(pre_restore.data_snapshot.iter().all(|row| row.value.is_null()));

    let err = mutator
        .restore_column(uuid::Uuid::new_v4(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BackupNotFound(_)), "{err}");

    Ok(())
}
