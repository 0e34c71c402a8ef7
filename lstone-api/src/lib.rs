use chrono::{DateTime, Utc};
use lstone_core::{
    Error, LakeEngine, Record, RecordId, RecordValidator, Result, TableConfig, Transaction, TxHandle,
    Validator, Value, Version,
};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub use lstone_core::{Error as LakestoneError, Value as LakestoneValue};

pub mod repository;
pub use repository::Repository;

pub mod memory;
pub use memory::MemoryRepository;

pub mod query;
pub use query::{Query, QueryResponse};

pub mod batch;
pub use batch::{BatchError, BatchResult, BulkLoadResult};

/// LakestoneDB database handle: a versioned table behind the repository contract
pub struct Database {
    engine: LakeEngine,
    validator: Arc<dyn RecordValidator>,
}

impl Database {
    /// Create a new database at the specified path
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_engine(LakeEngine::create(path)?))
    }

    /// Create a new database with custom configuration
    pub fn create_with_config(path: impl AsRef<Path>, config: TableConfig) -> Result<Self> {
        Ok(Self::from_engine(LakeEngine::create_with_config(path, config)?))
    }

    /// Open an existing database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_engine(LakeEngine::open(path)?))
    }

    /// Open the database at `path`, creating it if needed
    pub fn open_or_create(path: impl AsRef<Path>, config: TableConfig) -> Result<Self> {
        Ok(Self::from_engine(LakeEngine::open_or_create(path, config)?))
    }

    fn from_engine(engine: LakeEngine) -> Self {
        Self {
            engine,
            validator: Arc::new(Validator::exercise()),
        }
    }

    /// Replace the validator used by batch operations that validate first
    pub fn with_validator(mut self, validator: Arc<dyn RecordValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// The underlying engine, for time travel, schema, constraint, change
    /// feed and stream operations
    pub fn engine(&self) -> &LakeEngine {
        &self.engine
    }

    pub(crate) fn validator(&self) -> &dyn RecordValidator {
        self.validator.as_ref()
    }

    /// Begin an explicit transaction
    pub fn begin(&self) -> Result<TxHandle> {
        self.engine.begin()
    }

    pub fn commit(&self, tx: &TxHandle) -> Result<Version> {
        self.engine.commit(tx)
    }

    pub fn rollback(&self, tx: &TxHandle) -> Result<()> {
        self.engine.rollback(tx)
    }

    /// Run `f` inside a transaction, committing when it succeeds and rolling
    /// back when it fails
    pub fn transact<T>(&self, f: impl FnOnce(&TxHandle) -> Result<T>) -> Result<(T, Version)> {
        let tx = self.engine.begin()?;
        match f(&tx) {
            Ok(value) => {
                let version = self.engine.commit(&tx)?;
                Ok((value, version))
            }
            Err(e) => {
                if let Err(rollback_err) = self.engine.rollback(&tx) {
                    debug!("Rollback after failed transaction body: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    /// Filter the current records
    pub fn query(&self, query: Query) -> QueryResponse {
        QueryResponse::from_result(self.engine.query(&query.into_filter()))
    }

    fn ensure_exists(&self, id: RecordId) -> Result<()> {
        match self.engine.get(id) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("record {}", id))),
        }
    }
}

impl Repository for Database {
    fn insert(&self, record: Record) -> Result<RecordId> {
        let ids = self.insert_batch(vec![record])?;
        ids.first()
            .copied()
            .ok_or_else(|| Error::Internal("commit reported no written record".into()))
    }

    fn insert_batch(&self, records: Vec<Record>) -> Result<Vec<RecordId>> {
        let tx = self.engine.begin()?;
        tx.insert_batch(records)?;
        self.engine.commit(&tx)?;
        Ok(tx.committed_ids())
    }

    fn get_by_id(&self, id: RecordId) -> Result<Option<Record>> {
        Ok(self.engine.get(id))
    }

    fn get_by_date_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Record>> {
        Ok(self
            .engine
            .get_all()
            .into_iter()
            .filter(|r| repository::in_date_range(r, start, end))
            .collect())
    }

    fn get_by_type(&self, record_type: &str) -> Result<Vec<Record>> {
        Ok(self
            .engine
            .get_all()
            .into_iter()
            .filter(|r| repository::has_type(r, record_type))
            .collect())
    }

    fn get_all(&self) -> Result<Vec<Record>> {
        Ok(self.engine.get_all())
    }

    // Existence is checked after `begin`: a concurrent removal either shows
    // up in the check or makes the commit fail with a conflict.
    fn update(&self, record: Record) -> Result<()> {
        self.transact(|tx| {
            self.ensure_exists(record.id)?;
            tx.update(record)
        })
        .map(|_| ())
    }

    fn delete(&self, id: RecordId) -> Result<()> {
        self.transact(|tx| {
            self.ensure_exists(id)?;
            tx.delete(id)
        })
        .map(|_| ())
    }

    fn close(&self) -> Result<()> {
        self.engine.close()
    }
}

/// Helper to build records
pub struct RecordBuilder {
    record: Record,
}

impl RecordBuilder {
    /// Start a record whose id is assigned on insert
    pub fn new() -> Self {
        Self {
            record: Record::new(0),
        }
    }

    pub fn id(mut self, id: RecordId) -> Self {
        self.record.id = id;
        self
    }

    pub fn string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.record.set(key, Value::string(value));
        self
    }

    pub fn int(mut self, key: impl Into<String>, value: i64) -> Self {
        self.record.set(key, Value::Int(value));
        self
    }

    pub fn float(mut self, key: impl Into<String>, value: f64) -> Self {
        self.record.set(key, Value::Float(value));
        self
    }

    pub fn bool(mut self, key: impl Into<String>, value: bool) -> Self {
        self.record.set(key, Value::Bool(value));
        self
    }

    pub fn timestamp(mut self, key: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.record.set(key, Value::Ts(value));
        self
    }

    pub fn build(self) -> Record {
        self.record
    }
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lstone_core::{SortOrder, VersionId};
    use tempfile::TempDir;

    fn workout(name: &str, kind: &str, duration: i64) -> Record {
        RecordBuilder::new()
            .string("name", name)
            .string("type", kind)
            .int("duration", duration)
            .int("calories", 250)
            .timestamp("date", Utc::now())
            .build()
    }

    fn versions(db: &Database) -> VersionId {
        db.engine().current_version()
    }

    #[test]
    fn test_database_insert_and_get() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(dir.path()).unwrap();

        let id = db.insert(workout("Morning Run", "cardio", 30)).unwrap();
        assert_eq!(id, 1);

        let record = db.get_by_id(1).unwrap().unwrap();
        assert_eq!(record.name(), Some("Morning Run"));
        assert!(db.get_by_id(2).unwrap().is_none());
        assert_eq!(db.engine().get_version_history().len(), 2);
    }

    #[test]
    fn test_each_mutation_is_one_version() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(dir.path()).unwrap();

        let ids = db
            .insert_batch(vec![workout("Run", "cardio", 30), workout("Lift", "strength", 45)])
            .unwrap();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(versions(&db), 1);

        let mut lift = db.get_by_id(2).unwrap().unwrap();
        lift.set("duration", 50i64);
        db.update(lift).unwrap();
        assert_eq!(versions(&db), 2);

        db.delete(1).unwrap();
        assert_eq!(versions(&db), 3);
        assert_eq!(db.get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_update_and_delete() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(dir.path()).unwrap();

        let ghost = workout("Ghost", "cardio", 10);
        assert!(matches!(db.update(RecordBuilder::new().id(9).build()), Err(Error::NotFound(_))));
        assert!(matches!(db.delete(9), Err(Error::NotFound(_))));
        assert!(matches!(db.update(ghost), Err(Error::NotFound(_))));
        assert_eq!(versions(&db), 0);
    }

    #[test]
    fn test_delete_racing_another_delete_conflicts() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(dir.path()).unwrap();
        db.insert(workout("Run", "cardio", 30)).unwrap();

        // Checked and staged against version 1, then removed by another writer
        let tx = db.begin().unwrap();
        assert!(db.get_by_id(1).unwrap().is_some());
        tx.delete(1).unwrap();
        db.delete(1).unwrap();
        assert_eq!(versions(&db), 2);

        assert!(matches!(db.commit(&tx), Err(Error::Conflict(_))));
        assert_eq!(versions(&db), 2);
        assert!(matches!(db.delete(1), Err(Error::NotFound(_))));
        assert_eq!(versions(&db), 2);
        assert_eq!(db.engine().active_transactions(), 0);
    }

    #[test]
    fn test_lookups_by_type_and_date() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(dir.path()).unwrap();
        let start = Utc::now();
        db.insert_batch(vec![
            workout("Run", "cardio", 30),
            workout("Lift", "strength", 45),
            workout("Swim", "cardio", 60),
        ])
        .unwrap();
        let end = Utc::now();

        let cardio: Vec<_> = db.get_by_type("cardio").unwrap().iter().map(|r| r.id).collect();
        assert_eq!(cardio, vec![1, 3]);
        assert_eq!(db.get_by_date_range(start, end).unwrap().len(), 3);
        assert!(db.get_by_date_range(end + chrono::Duration::days(1), end + chrono::Duration::days(2)).unwrap().is_empty());
    }

    #[test]
    fn test_transact_rolls_back_on_error() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(dir.path()).unwrap();

        let result = db.transact(|tx| {
            tx.insert(workout("Run", "cardio", 30))?;
            tx.update(Record::new(0))
        });
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(db.engine().active_transactions(), 0);
        assert_eq!(versions(&db), 0);
    }

    #[test]
    fn test_database_query() {
        let dir = TempDir::new().unwrap();
        let db = Database::create(dir.path()).unwrap();
        db.insert_batch(vec![
            workout("Morning Run", "cardio", 30),
            workout("Evening Lift", "strength", 45),
            workout("Morning Swim", "cardio", 60),
        ])
        .unwrap();

        let response = db.query(
            Query::new()
                .begins_with("name", "Morning")
                .sort_by("duration", SortOrder::Desc)
                .limit(1),
        );
        assert_eq!(response.count, 1);
        assert_eq!(response.scanned_count, 3);
        assert_eq!(response.records[0].name(), Some("Morning Swim"));
    }

    #[test]
    fn test_close_then_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let db = Database::create(dir.path()).unwrap();
            db.insert(workout("Run", "cardio", 30)).unwrap();
            db.close().unwrap();
        }
        let db = Database::open(dir.path()).unwrap();
        assert_eq!(db.get_all().unwrap().len(), 1);
    }
}
