/// Test utilities and helpers for LakestoneDB testing
///
/// This module provides common test utilities to simplify writing tests.

use anyhow::Context as _;
use chrono::{DateTime, Duration, TimeZone, Utc};
use lstone_api::{Database, RecordBuilder, Repository};
use lstone_core::{Record, RecordId, TableConfig};
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

static LOGGING: Once = Once::new();

/// Install a fmt subscriber honoring `RUST_LOG` (once per process)
pub fn init_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Test database wrapper that manages temporary directory lifecycle
pub struct TestDatabase {
    pub db: Database,
    pub path: PathBuf,
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Create a new test database with a temporary directory
    pub fn new() -> Self {
        Self::with_config(TableConfig::default())
    }

    pub fn with_config(config: TableConfig) -> Self {
        init_logging();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("table");
        let db = Database::create_with_config(&path, config).expect("Failed to create database");

        Self {
            db,
            path,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Open an existing test database at a specific path
    pub fn open(path: PathBuf) -> Self {
        let db = Database::open(&path).expect("Failed to open database");

        Self {
            db,
            path,
            _temp_dir: None,
        }
    }

    /// Get the database path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Close and reopen the database (for testing persistence)
    pub fn reopen(self) -> Self {
        tracing::debug!(path = %self.path.display(), "reopening test table");
        self.db.close().expect("Failed to close");
        let db = Database::open(&self.path).expect("Failed to reopen database");
        Self {
            db,
            path: self.path,
            _temp_dir: self._temp_dir,
        }
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

const NAMES: [&str; 5] = ["Morning Run", "Evening Swim", "Power Lift", "Sunset Yoga", "Hill Sprint"];
const TYPES: [&str; 3] = ["cardio", "cardio", "strength"];

/// Mock data generator for testing
pub struct MockDataGenerator {
    counter: u64,
    base: DateTime<Utc>,
}

impl MockDataGenerator {
    /// Create a new mock data generator
    pub fn new() -> Self {
        Self {
            counter: 0,
            base: Utc.with_ymd_and_hms(2024, 1, 1, 7, 0, 0).unwrap(),
        }
    }

    /// Generate a valid workout (id 0, assigned on insert)
    pub fn workout(&mut self) -> Record {
        let idx = self.counter;
        self.counter += 1;
        RecordBuilder::new()
            .string("name", NAMES[idx as usize % NAMES.len()])
            .string("type", TYPES[idx as usize % TYPES.len()])
            .int("duration", 20 + (idx % 60) as i64)
            .int("calories", 150 + (idx % 400) as i64)
            .timestamp("date", self.base + Duration::days(idx as i64))
            .build()
    }

    /// Generate `count` valid workouts
    pub fn workouts(&mut self, count: usize) -> Vec<Record> {
        (0..count).map(|_| self.workout()).collect()
    }
}

impl Default for MockDataGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Insert `count` generated workouts in a single transaction
pub fn write_batch(db: &Database, count: usize) -> Vec<RecordId> {
    let mut gen = MockDataGenerator::new();
    db.insert_batch(gen.workouts(count)).expect("Failed to write")
}

/// Write records as a bulk-load fixture file
pub fn write_fixture(path: &Path, records: &[Record]) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(records).context("encoding fixture")?;
    std::fs::write(path, data).with_context(|| format!("writing fixture {}", path.display()))?;
    Ok(())
}

/// Ids of `records`, in order
pub fn ids(records: &[Record]) -> Vec<RecordId> {
    records.iter().map(|r| r.id).collect()
}
