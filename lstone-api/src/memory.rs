/// Plain in-memory repository without versioning

use crate::repository::{has_type, in_date_range, Repository};
use chrono::{DateTime, Utc};
use lstone_core::{Error, Record, RecordId, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Default)]
struct MemoryInner {
    records: BTreeMap<RecordId, Record>,
    next_id: RecordId,
}

/// Records held in a map; ids are assigned sequentially from 1
#[derive(Default)]
pub struct MemoryRepository {
    inner: RwLock<MemoryInner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryInner {
                records: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    fn select(&self, pred: impl Fn(&Record) -> bool) -> Vec<Record> {
        self.inner
            .read()
            .records
            .values()
            .filter(|r| pred(r))
            .cloned()
            .collect()
    }
}

impl MemoryInner {
    fn insert(&mut self, mut record: Record) -> RecordId {
        self.next_id = self.next_id.max(1);
        record.id = self.next_id;
        self.next_id += 1;
        let id = record.id;
        self.records.insert(id, record);
        id
    }
}

impl Repository for MemoryRepository {
    fn insert(&self, record: Record) -> Result<RecordId> {
        Ok(self.inner.write().insert(record))
    }

    fn insert_batch(&self, records: Vec<Record>) -> Result<Vec<RecordId>> {
        let mut inner = self.inner.write();
        Ok(records.into_iter().map(|r| inner.insert(r)).collect())
    }

    fn get_by_id(&self, id: RecordId) -> Result<Option<Record>> {
        Ok(self.inner.read().records.get(&id).cloned())
    }

    fn get_by_date_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Record>> {
        Ok(self.select(|r| in_date_range(r, start, end)))
    }

    fn get_by_type(&self, record_type: &str) -> Result<Vec<Record>> {
        Ok(self.select(|r| has_type(r, record_type)))
    }

    fn get_all(&self) -> Result<Vec<Record>> {
        Ok(self.select(|_| true))
    }

    fn update(&self, record: Record) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(Error::NotFound(format!("record {}", record.id))),
        }
    }

    fn delete(&self, id: RecordId) -> Result<()> {
        self.inner
            .write()
            .records
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("record {}", id)))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn workout(name: &str, kind: &str, day: u32) -> Record {
        Record::new(0)
            .with("name", name)
            .with("type", kind)
            .with("date", Utc.with_ymd_and_hms(2024, 5, day, 6, 30, 0).unwrap())
    }

    #[test]
    fn test_ids_are_sequential() {
        let repo = MemoryRepository::new();
        assert_eq!(repo.insert(workout("Run", "cardio", 1)).unwrap(), 1);
        let ids = repo
            .insert_batch(vec![workout("Lift", "strength", 2), workout("Yoga", "flexibility", 3)])
            .unwrap();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(repo.len(), 3);
    }

    #[test]
    fn test_lookups() {
        let repo = MemoryRepository::new();
        repo.insert_batch(vec![
            workout("Run", "cardio", 1),
            workout("Lift", "strength", 2),
            workout("Swim", "cardio", 3),
        ])
        .unwrap();

        let cardio: Vec<_> = repo.get_by_type("cardio").unwrap().iter().map(|r| r.id).collect();
        assert_eq!(cardio, vec![1, 3]);

        let start = Utc.with_ymd_and_hms(2024, 5, 2, 6, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 3, 6, 30, 0).unwrap();
        let ranged: Vec<_> = repo.get_by_date_range(start, end).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ranged, vec![2, 3]);
    }

    #[test]
    fn test_missing_ids() {
        let repo = MemoryRepository::new();
        assert!(repo.get_by_id(7).unwrap().is_none());
        assert!(matches!(repo.update(Record::new(7)), Err(Error::NotFound(_))));
        assert!(matches!(repo.delete(7), Err(Error::NotFound(_))));
        repo.close().unwrap();
    }
}
