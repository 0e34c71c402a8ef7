/// Storage-agnostic repository contract
///
/// Callers talk to workout storage only through `Repository`, so the plain
/// in-memory store and the versioned table are interchangeable.

use chrono::{DateTime, Utc};
use lstone_core::{Record, RecordId, Result};

pub trait Repository: Send + Sync {
    /// Store a record; id 0 asks the repository to assign one. Returns the id.
    fn insert(&self, record: Record) -> Result<RecordId>;

    /// Store several records at once. Returns the ids in input order.
    fn insert_batch(&self, records: Vec<Record>) -> Result<Vec<RecordId>>;

    fn get_by_id(&self, id: RecordId) -> Result<Option<Record>>;

    /// Records whose `date` lies in `[start, end]`, ordered by id
    fn get_by_date_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Record>>;

    /// Records whose `type` equals `record_type`, ordered by id
    fn get_by_type(&self, record_type: &str) -> Result<Vec<Record>>;

    fn get_all(&self) -> Result<Vec<Record>>;

    /// Replace an existing record; `NotFound` if its id is unknown
    fn update(&self, record: Record) -> Result<()>;

    /// `NotFound` if the id is unknown
    fn delete(&self, id: RecordId) -> Result<()>;

    fn close(&self) -> Result<()>;
}

pub(crate) fn in_date_range(record: &Record, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    record.date().map_or(false, |d| d >= start && d <= end)
}

pub(crate) fn has_type(record: &Record, record_type: &str) -> bool {
    record.record_type() == Some(record_type)
}
