/// Snapshot files
///
/// Every version owns one whole-file snapshot `part-{version:05}.json` holding
/// the complete record set, ordered by id. Files are never modified in place.

use crate::types::checksum;
use crate::{Error, Record, RecordId, Result, Version, VersionId};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// The complete record set visible at one version
pub type Snapshot = BTreeMap<RecordId, Record>;

/// What the writer learned about a snapshot it persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub record_count: u64,
    pub size_bytes: u64,
    pub checksum: u32,
}

/// Write `data` to `path` via a temporary sibling, fsync, then rename
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn file_name(version: VersionId) -> String {
        format!("part-{:05}.json", version)
    }

    pub fn path(&self, version: VersionId) -> PathBuf {
        self.dir.join(Self::file_name(version))
    }

    /// Serialize a snapshot as a pretty JSON array ordered by id
    pub fn encode(records: &Snapshot) -> Result<Vec<u8>> {
        let list: Vec<&Record> = records.values().collect();
        Ok(serde_json::to_vec_pretty(&list)?)
    }

    pub fn write(&self, version: VersionId, records: &Snapshot) -> Result<SnapshotInfo> {
        let data = Self::encode(records)?;
        write_atomic(&self.path(version), &data)?;
        Ok(SnapshotInfo {
            record_count: records.len() as u64,
            size_bytes: data.len() as u64,
            checksum: checksum::compute(&data),
        })
    }

    /// Read and verify the snapshot of `version`
    pub fn read(&self, version: &Version) -> Result<Snapshot> {
        let path = self.path(version.id);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::Corruption(format!(
                    "snapshot file {} for version {} is missing",
                    path.display(),
                    version.id
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if !checksum::verify(&data, version.checksum) {
            return Err(Error::Corruption(format!(
                "checksum mismatch in snapshot of version {}",
                version.id
            )));
        }

        let list: Vec<Record> = serde_json::from_slice(&data)
            .map_err(|e| Error::Corruption(format!("snapshot of version {}: {}", version.id, e)))?;
        Ok(list.into_iter().map(|r| (r.id, r)).collect())
    }

    /// Remove the snapshot of a version that was never published
    pub fn discard(&self, version: VersionId) {
        let _ = fs::remove_file(self.path(version));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot(ids: &[i64]) -> Snapshot {
        ids.iter()
            .map(|id| (*id, Record::new(*id).with("name", format!("r{}", id))))
            .collect()
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());

        let records = snapshot(&[3, 1, 2]);
        let info = store.write(4, &records).unwrap();
        assert_eq!(info.record_count, 3);
        assert!(store.path(4).ends_with("part-00004.json"));

        let mut version = crate::Version::initial(1);
        version.id = 4;
        version.checksum = info.checksum;
        let back = store.read(&version).unwrap();
        assert_eq!(back, records);
        assert_eq!(back.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_checksum_mismatch_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let info = store.write(0, &snapshot(&[1])).unwrap();

        let mut version = crate::Version::initial(1);
        version.checksum = info.checksum ^ 1;
        assert!(matches!(store.read(&version), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_missing_file_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let version = crate::Version::initial(1);
        assert!(matches!(store.read(&version), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_no_tmp_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.write(1, &snapshot(&[1])).unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
