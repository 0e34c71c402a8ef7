/// Metadata store
///
/// The manifest is the durable root of recovery. It holds the current schema
/// and its history, table metadata, the full version index, configuration,
/// constraints and index definitions, and is rewritten whole on every change:
///
/// ```text
/// <base>/
///   _lake_log/metadata.json
///   part-00000.json
///   part-00001.json
///   ...
/// ```

use crate::snapshot::write_atomic;
use crate::{Constraint, Error, IndexDef, Result, Schema, TableConfig, TableMetadata, Version};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const LOG_DIR: &str = "_lake_log";
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableManifest {
    pub schema: Schema,
    #[serde(default)]
    pub schema_history: Vec<Schema>,
    pub metadata: TableMetadata,
    pub versions: Vec<Version>,
    pub config: TableConfig,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl TableManifest {
    pub fn path(base: &Path) -> PathBuf {
        base.join(LOG_DIR).join(METADATA_FILE)
    }

    pub fn exists(base: &Path) -> bool {
        Self::path(base).exists()
    }

    /// Load the manifest of the table at `base`
    pub fn load(base: &Path) -> Result<Self> {
        let path = Self::path(base);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("table metadata at {}", path.display())));
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&data)
            .map_err(|e| Error::Corruption(format!("{}: {}", path.display(), e)))
    }

    /// Rewrite the manifest atomically
    pub fn save(&self, base: &Path) -> Result<()> {
        fs::create_dir_all(base.join(LOG_DIR))?;
        let data = serde_json::to_vec_pretty(self)?;
        write_atomic(&Self::path(base), &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest() -> TableManifest {
        let schema = Schema::exercise();
        TableManifest {
            schema_history: vec![schema.clone()],
            versions: vec![Version::initial(schema.id)],
            schema,
            metadata: TableMetadata::new("exercises", "/tmp/exercises"),
            config: TableConfig::default(),
            constraints: vec![Constraint::not_null("name_required", &["name"])],
            indexes: Vec::new(),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let original = manifest();
        original.save(dir.path()).unwrap();

        assert!(TableManifest::exists(dir.path()));
        assert!(dir.path().join("_lake_log/metadata.json").exists());
        assert!(!dir.path().join("_lake_log/metadata.json.tmp").exists());

        let loaded = TableManifest::load(dir.path()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(TableManifest::load(dir.path()), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_garbage_is_corruption() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(LOG_DIR)).unwrap();
        fs::write(TableManifest::path(dir.path()), b"{not json").unwrap();
        assert!(matches!(TableManifest::load(dir.path()), Err(Error::Corruption(_))));
    }
}
