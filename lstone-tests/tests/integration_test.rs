/// End-to-end scenarios for LakestoneDB
///
/// Each test drives a fresh table through a realistic sequence of
/// transactions, constraint changes and schema evolutions.

use chrono::{Duration, Utc};
use lstone_api::{Database, RecordBuilder, Repository};
use lstone_core::{
    ChangeType, Constraint, Error, Field, FieldType, OperationType, Transaction, Value,
};
use tempfile::TempDir;

fn morning_run() -> lstone_core::Record {
    RecordBuilder::new()
        .string("name", "Morning Run")
        .string("type", "cardio")
        .int("duration", 30)
        .int("calories", 300)
        .timestamp("date", Utc::now())
        .build()
}

#[test]
fn test_insert_assigns_first_id() {
    let dir = TempDir::new().unwrap();
    let db = Database::create(dir.path()).unwrap();

    let tx = db.begin().unwrap();
    tx.insert(morning_run()).unwrap();
    db.commit(&tx).unwrap();

    let record = db.get_by_id(1).unwrap().expect("record 1 should exist");
    assert_eq!(record.id, 1);
    assert_eq!(record.name(), Some("Morning Run"));
    assert_eq!(db.engine().get_version_history().len(), 2);
}

#[test]
fn test_range_constraint_blocks_commit() {
    let dir = TempDir::new().unwrap();
    let db = Database::create(dir.path()).unwrap();
    db.engine()
        .add_constraint(Constraint::range("positive_duration", &["duration"]))
        .unwrap();

    let tx = db.begin().unwrap();
    let mut bad = morning_run();
    bad.set("duration", -5i64);
    tx.insert(bad).unwrap();

    let err = db.commit(&tx).unwrap_err();
    assert!(matches!(err, Error::ValidationFailed { .. }));
    assert_eq!(err.violated_constraint(), Some("positive_duration"));
    assert!(err.to_string().contains("positive_duration"));

    // No version was created and the transaction is finished
    assert_eq!(db.engine().current_version(), 0);
    assert!(!tx.is_active());
    assert_eq!(db.engine().active_transactions(), 0);
    assert!(db.get_all().unwrap().is_empty());
}

#[test]
fn test_disabled_constraint_is_skipped() {
    let dir = TempDir::new().unwrap();
    let db = Database::create(dir.path()).unwrap();
    let engine = db.engine();
    engine
        .add_constraint(Constraint::range("positive_duration", &["duration"]))
        .unwrap();
    engine.set_constraint_enabled("positive_duration", false).unwrap();

    let mut bad = morning_run();
    bad.set("duration", -5i64);
    db.insert(bad).unwrap();
    assert_eq!(engine.current_version(), 1);

    engine.set_constraint_enabled("positive_duration", true).unwrap();
    let mut worse = morning_run();
    worse.set("duration", 5000i64);
    assert!(db.insert(worse).is_err());
    assert_eq!(engine.current_version(), 1);
}

#[test]
fn test_add_nullable_field() {
    let dir = TempDir::new().unwrap();
    let db = Database::create(dir.path()).unwrap();
    db.insert_batch(vec![morning_run(), morning_run()]).unwrap();
    let before = db.engine().get_version_history().len();

    let proposed = db
        .engine()
        .get_current_schema()
        .with_field(Field::nullable("intensity", FieldType::String));
    let evolved = db.engine().evolve_schema(proposed).unwrap();

    assert_eq!(evolved.version, 2);
    assert!(evolved.field("intensity").is_some());
    assert_eq!(db.engine().get_version_history().len(), before + 1);
    assert_eq!(db.engine().get_schema_history().len(), 2);

    // Existing records were not rewritten
    for record in db.get_all().unwrap() {
        assert!(record.get("intensity").map_or(true, Value::is_null));
    }

    let current = db.engine().get_version(db.engine().current_version()).unwrap();
    assert_eq!(current.schema_id, evolved.id);
    assert_eq!(current.operations[0].op_type, OperationType::Schema);

    // New records may carry the field
    let mut hard = morning_run();
    hard.set("intensity", "high");
    let id = db.insert(hard).unwrap();
    assert_eq!(
        db.get_by_id(id).unwrap().unwrap().get("intensity"),
        Some(&Value::string("high"))
    );
}

#[test]
fn test_rejected_evolution_keeps_schema() {
    let dir = TempDir::new().unwrap();
    let db = Database::create(dir.path()).unwrap();
    let engine = db.engine();
    let original = engine.get_current_schema();

    // Required field without a default
    let required = original
        .clone()
        .with_field(Field::required("heart_rate", FieldType::Int));
    assert!(matches!(engine.evolve_schema(required), Err(Error::Conflict(_))));

    // Narrowing a type
    let mut narrowed = original.clone();
    for field in narrowed.fields.iter_mut() {
        if field.name == "name" {
            field.field_type = FieldType::Int;
        }
    }
    assert!(engine.validate_schema_compatibility(&narrowed).is_err());
    assert!(engine.evolve_schema(narrowed).is_err());

    assert_eq!(engine.get_current_schema(), original);
    assert_eq!(engine.get_schema_history().len(), 1);
    assert_eq!(engine.current_version(), 0);
}

#[test]
fn test_timestamp_before_table_is_empty() {
    let dir = TempDir::new().unwrap();
    let before = Utc::now() - Duration::hours(1);
    let db = Database::create(dir.path()).unwrap();
    db.insert(morning_run()).unwrap();

    let records = db.engine().get_by_timestamp(before).unwrap();
    assert!(records.is_empty());

    let now = db.engine().get_by_timestamp(Utc::now()).unwrap();
    assert_eq!(now.len(), 1);
}

#[test]
fn test_restore_previous_version() {
    let dir = TempDir::new().unwrap();
    let db = Database::create(dir.path()).unwrap();
    let engine = db.engine();

    db.insert_batch(vec![morning_run(), morning_run()]).unwrap();
    let mut changed = db.get_by_id(1).unwrap().unwrap();
    changed.set("duration", 45i64);
    db.update(changed).unwrap();
    db.delete(2).unwrap();
    assert_eq!(engine.current_version(), 3);

    let restored = engine.restore_version(1).unwrap();
    assert_eq!(restored.id, 4);
    assert_eq!(restored.parent_id, Some(3));
    assert_eq!(engine.get_all(), engine.get_by_version(1).unwrap());

    let events = engine.get_changelog(4, 4);
    let kinds: Vec<_> = events.iter().map(|e| e.change_type).collect();
    assert!(kinds.contains(&ChangeType::Update));
    assert!(kinds.contains(&ChangeType::Insert));

    assert!(matches!(engine.restore_version(99), Err(Error::NotFound(_))));
}

#[test]
fn test_table_management() {
    let dir = TempDir::new().unwrap();
    let db = Database::create(dir.path()).unwrap();
    let engine = db.engine();
    db.insert_batch(vec![morning_run(), morning_run(), morning_run()]).unwrap();

    let mut props = std::collections::BTreeMap::new();
    props.insert("owner".to_string(), "fitness".to_string());
    engine.update_table_properties(props).unwrap();
    let metadata = engine.get_table_metadata();
    assert_eq!(metadata.properties.get("owner").map(String::as_str), Some("fitness"));
    assert_eq!(metadata.record_count, 3);
    assert_eq!(engine.current_version(), 1);

    let optimized = engine
        .optimize_table(lstone_core::OptimizeOptions::new().with_z_order(vec!["date".into()]))
        .unwrap();
    assert_eq!(optimized.version, 2);
    assert_eq!(optimized.records_rewritten, 3);

    let compacted = engine.compact().unwrap();
    assert_eq!(compacted.version, 3);
    assert_eq!(engine.get_by_version(3).unwrap(), engine.get_by_version(1).unwrap());

    let partitions = engine.get_partitions();
    assert_eq!(partitions.len(), 1);
    assert_eq!(partitions[0].record_count, 3);

    engine
        .create_index("by_date", &["date"], lstone_core::IndexType::BTree)
        .unwrap();
    assert!(matches!(
        engine.create_index("by_date", &["date"], lstone_core::IndexType::BTree),
        Err(Error::Conflict(_))
    ));
    assert_eq!(engine.list_indexes().len(), 1);
    engine.drop_index("by_date").unwrap();
    assert!(matches!(engine.drop_index("by_date"), Err(Error::NotFound(_))));

    let quality = engine.get_data_quality_metrics();
    assert_eq!(quality.total_records, 3);
}
