/// Version log
///
/// Append-only, parent-linked sequence of table versions. Every mutating
/// operation appends exactly one version whose parent is the previous
/// current version; time-travel reads resolve against this log.

use crate::{Error, Result, VersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Write,
    Delete,
    Schema,
    Optimize,
    Vacuum,
    Restore,
    Clone,
}

/// A single logged operation, always embedded in one version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
    pub records_read: u64,
    pub records_written: u64,
    #[serde(default)]
    pub duration_ms: u64,
}

impl Operation {
    pub fn new(op_type: OperationType) -> Self {
        Self {
            op_type,
            timestamp: Utc::now(),
            user: None,
            details: BTreeMap::new(),
            records_read: 0,
            records_written: 0,
            duration_ms: 0,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_counts(mut self, read: u64, written: u64) -> Self {
        self.records_read = read;
        self.records_written = written;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }
}

/// Immutable description of one table version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<VersionId>,
    pub schema_id: i64,
    pub record_count: u64,
    /// Size of the snapshot file in bytes
    pub size_bytes: u64,
    /// CRC32C of the snapshot file
    pub checksum: u32,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl Version {
    /// Version 0 of a freshly created table
    pub fn initial(schema_id: i64) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            description: Some("Table created".to_string()),
            parent_id: None,
            schema_id,
            record_count: 0,
            size_bytes: 0,
            checksum: 0,
            operations: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    /// The version that follows `parent`; snapshot fields are filled in by the writer
    pub fn successor(parent: &Version, schema_id: i64, description: impl Into<String>) -> Self {
        Self {
            id: parent.id + 1,
            timestamp: Utc::now(),
            description: Some(description.into()),
            parent_id: Some(parent.id),
            schema_id,
            record_count: 0,
            size_bytes: 0,
            checksum: 0,
            operations: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }
}

/// Ordered, parent-linked set of versions
#[derive(Debug, Clone)]
pub struct VersionLog {
    versions: BTreeMap<VersionId, Version>,
    current: VersionId,
}

impl VersionLog {
    pub fn new(initial: Version) -> Self {
        let current = initial.id;
        let mut versions = BTreeMap::new();
        versions.insert(initial.id, initial);
        Self { versions, current }
    }

    /// Rebuild a log from persisted versions, checking the lineage
    pub fn from_versions(list: Vec<Version>) -> Result<Self> {
        let mut versions = BTreeMap::new();
        for version in list {
            if versions.insert(version.id, version).is_some() {
                return Err(Error::Corruption("duplicate version id in metadata".into()));
            }
        }

        let mut expected = 0;
        let mut parent = None;
        for (id, version) in &versions {
            if *id != expected || version.parent_id != parent {
                return Err(Error::Corruption(format!(
                    "broken version lineage at version {}",
                    id
                )));
            }
            parent = Some(*id);
            expected += 1;
        }

        let current = parent.ok_or_else(|| Error::Corruption("metadata has no versions".into()))?;
        Ok(Self { versions, current })
    }

    pub fn current_id(&self) -> VersionId {
        self.current
    }

    pub fn current(&self) -> &Version {
        // The current id is always present: it is only advanced by `append`
        &self.versions[&self.current]
    }

    pub fn get(&self, id: VersionId) -> Option<&Version> {
        self.versions.get(&id)
    }

    pub fn contains(&self, id: VersionId) -> bool {
        self.versions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Append the successor of the current version
    pub fn append(&mut self, version: Version) -> Result<()> {
        if version.id != self.current + 1 || version.parent_id != Some(self.current) {
            return Err(Error::Internal(format!(
                "version {} does not follow current version {}",
                version.id, self.current
            )));
        }
        self.current = version.id;
        self.versions.insert(version.id, version);
        Ok(())
    }

    /// All versions, ascending by id
    pub fn history(&self) -> Vec<Version> {
        self.versions.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Version> {
        self.versions.values()
    }

    /// The version with the greatest timestamp <= `ts`; ties go to the highest id
    pub fn at_timestamp(&self, ts: DateTime<Utc>) -> Option<&Version> {
        self.versions
            .values()
            .filter(|v| v.timestamp <= ts)
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with(n: usize) -> VersionLog {
        let mut log = VersionLog::new(Version::initial(1));
        for _ in 0..n {
            let next = Version::successor(log.current(), 1, "commit");
            log.append(next).unwrap();
        }
        log
    }

    #[test]
    fn test_append_links_parent() {
        let log = log_with(3);
        assert_eq!(log.current_id(), 3);
        assert_eq!(log.len(), 4);
        for version in log.iter().skip(1) {
            assert_eq!(version.parent_id, Some(version.id - 1));
        }
    }

    #[test]
    fn test_append_rejects_gap() {
        let mut log = log_with(1);
        let mut bad = Version::successor(log.current(), 1, "x");
        bad.id += 1;
        assert!(log.append(bad).is_err());
        assert_eq!(log.current_id(), 1);
    }

    #[test]
    fn test_from_versions_checks_lineage() {
        let log = log_with(2);
        let rebuilt = VersionLog::from_versions(log.history()).unwrap();
        assert_eq!(rebuilt.current_id(), 2);

        let mut broken = log.history();
        broken.remove(1);
        assert!(matches!(VersionLog::from_versions(broken), Err(Error::Corruption(_))));
        assert!(VersionLog::from_versions(Vec::new()).is_err());
    }

    #[test]
    fn test_at_timestamp() {
        let mut log = VersionLog::new(Version::initial(1));
        let base = log.current().timestamp;

        let mut v1 = Version::successor(log.current(), 1, "a");
        v1.timestamp = base + chrono::Duration::seconds(10);
        log.append(v1).unwrap();

        let mut v2 = Version::successor(log.current(), 1, "b");
        v2.timestamp = base + chrono::Duration::seconds(10);
        log.append(v2).unwrap();

        assert!(log.at_timestamp(base - chrono::Duration::seconds(1)).is_none());
        assert_eq!(log.at_timestamp(base).map(|v| v.id), Some(0));
        // Equal timestamps resolve to the highest id
        assert_eq!(log.at_timestamp(base + chrono::Duration::seconds(30)).map(|v| v.id), Some(2));
    }

    #[test]
    fn test_operation_builder() {
        let op = Operation::new(OperationType::Write)
            .with_detail("transaction_id", "tx-1")
            .with_counts(3, 2)
            .with_user("alice");
        assert_eq!(op.records_written, 2);
        assert_eq!(op.details["transaction_id"], serde_json::json!("tx-1"));
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"type\":\"write\""));
    }
}
