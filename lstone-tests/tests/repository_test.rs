/// Repository contract tests
///
/// The same scenario runs against the plain in-memory repository and the
/// versioned database; both must answer identically.

use chrono::{Duration, TimeZone, Utc};
use lstone_api::{MemoryRepository, Repository};
use lstone_core::{Error, Record};
use lstone_test_utils::{ids, MockDataGenerator, TestDatabase};

fn exercise_contract(repo: &dyn Repository) -> Vec<Record> {
    let mut gen = MockDataGenerator::new();

    assert_eq!(repo.insert(gen.workout()).unwrap(), 1);
    assert_eq!(repo.insert_batch(gen.workouts(5)).unwrap(), vec![2, 3, 4, 5, 6]);

    let mut second = repo.get_by_id(2).unwrap().unwrap();
    second.set("description", "felt strong");
    repo.update(second).unwrap();
    repo.delete(4).unwrap();

    assert!(repo.get_by_id(4).unwrap().is_none());
    assert!(matches!(repo.delete(4), Err(Error::NotFound(_))));
    assert!(matches!(repo.update(Record::new(40)), Err(Error::NotFound(_))));

    let strength = repo.get_by_type("strength").unwrap();
    assert_eq!(ids(&strength), vec![3, 6]);
    assert!(repo.get_by_type("swimming").unwrap().is_empty());

    // Generated dates are one day apart from 2024-01-01 07:00
    let start = Utc.with_ymd_and_hms(2024, 1, 2, 7, 0, 0).unwrap();
    let end = start + Duration::days(2);
    assert_eq!(ids(&repo.get_by_date_range(start, end).unwrap()), vec![2, 3]);

    let all = repo.get_all().unwrap();
    assert_eq!(ids(&all), vec![1, 2, 3, 5, 6]);
    assert_eq!(
        all[1].get("description").and_then(|v| v.as_string()),
        Some("felt strong")
    );
    repo.close().unwrap();
    all
}

#[test]
fn test_memory_repository_contract() {
    let repo = MemoryRepository::new();
    exercise_contract(&repo);
}

#[test]
fn test_database_repository_contract() {
    let test_db = TestDatabase::new();
    exercise_contract(&test_db.db);
}

#[test]
fn test_implementations_agree() {
    let memory = MemoryRepository::new();
    let test_db = TestDatabase::new();

    let from_memory = exercise_contract(&memory);
    let from_db = exercise_contract(&test_db.db);
    assert_eq!(from_memory, from_db);
}

#[test]
fn test_database_keeps_history_memory_does_not() {
    let test_db = TestDatabase::new();
    exercise_contract(&test_db.db);

    // insert, batch, update, delete
    let history = test_db.db.engine().get_version_history();
    assert_eq!(history.len(), 5);
    assert_eq!(test_db.db.engine().get_by_version(2).unwrap().len(), 6);
}
