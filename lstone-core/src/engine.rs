/// The table engine
///
/// `LakeEngine` owns all table state behind one reader-writer lock. Mutating
/// operations (commit, rollback, schema evolution, optimize, constraint and
/// index changes) take the write lock; reads, queries and time travel take
/// the read lock. Streams live in their own registry so publish/subscribe
/// never contend with table mutation.
///
/// Every operation that creates a version follows the same publish order:
/// write the new snapshot file, rewrite the metadata file, and only then swap
/// the in-memory state. A failure before the swap leaves the previously
/// committed version visible and removes the orphaned snapshot.

use crate::changefeed::{ChangeEvent, ChangeFeed, ChangeType};
use crate::constraint::{Constraint, ConstraintSet};
use crate::manifest::TableManifest;
use crate::schema::{self, Schema, SchemaRegistry};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::stream::{StreamConfig, StreamEvent, StreamInfo, StreamRegistry, Subscription};
use crate::transaction::{Conflict, ConflictType, TxHandle, TxState, WriteKind};
use crate::{
    filter, CompactionResult, Context, DataQualityMetrics, Error, Filter, FilterResult, IndexDef, IndexType,
    Operation, OperationType, OptimizeOptions, OptimizeResult, Partition, QueryStats, Record,
    RecordId, Result, TableConfig, TableMetadata, Transaction, Version, VersionId, VersionLog,
};
use chrono::{DateTime, Utc};
use crossbeam::channel::Receiver;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Versioned table engine
#[derive(Clone)]
pub struct LakeEngine {
    inner: Arc<RwLock<EngineInner>>,
    streams: Arc<RwLock<StreamRegistry>>,
    query_stats: Arc<Mutex<QueryStats>>,
    tx_counter: Arc<AtomicU64>,
}

struct EngineInner {
    dir: PathBuf,
    config: TableConfig,
    schemas: SchemaRegistry,
    metadata: TableMetadata,
    versions: VersionLog,
    constraints: ConstraintSet,
    indexes: BTreeMap<String, IndexDef>,
    snapshots: SnapshotStore,
    /// Records visible at the current version
    records: Snapshot,
    active: BTreeMap<String, TxHandle>,
    /// Version that last inserted, updated or deleted each record id
    last_modified: HashMap<RecordId, VersionId>,
    feed: ChangeFeed,
    closed: bool,
}

impl EngineInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidState("table is closed".into()));
        }
        Ok(())
    }

    fn ensure_optimization_enabled(&self) -> Result<()> {
        if !self.config.enable_optimization {
            return Err(Error::InvalidState(format!(
                "optimization is disabled for table {}",
                self.config.table_name
            )));
        }
        Ok(())
    }

    /// Manifest describing the current in-memory state
    fn manifest(&self) -> TableManifest {
        TableManifest {
            schema: self.schemas.current().clone(),
            schema_history: self.schemas.history().to_vec(),
            metadata: self.metadata.clone(),
            versions: self.versions.history(),
            config: self.config.clone(),
            constraints: self.constraints.list().to_vec(),
            indexes: self.indexes.values().cloned().collect(),
        }
    }

    /// Snapshot of an arbitrary version
    fn snapshot_at(&self, version: &Version) -> Result<Snapshot> {
        if version.id == self.versions.current_id() {
            return Ok(self.records.clone());
        }
        self.snapshots.read(version)
    }

    /// Durably publish `version` with `records` as its snapshot, optionally
    /// installing a new schema, then swap the in-memory state.
    fn publish(&mut self, mut version: Version, records: Snapshot, schema: Option<Schema>) -> Result<Version> {
        let info = self.snapshots.write(version.id, &records)?;
        version.record_count = info.record_count;
        version.size_bytes = info.size_bytes;
        version.checksum = info.checksum;

        let mut metadata = self.metadata.clone();
        metadata.current_version = version.id;
        metadata.record_count = info.record_count;
        metadata.size_bytes = info.size_bytes;
        metadata.file_count = self.versions.len() as u64 + 1;
        metadata.last_modified = version.timestamp;

        let mut manifest = self.manifest();
        manifest.versions.push(version.clone());
        manifest.metadata = metadata.clone();
        if let Some(schema) = &schema {
            manifest.schema = schema.clone();
            manifest.schema_history.push(schema.clone());
        }

        if let Err(e) = manifest.save(&self.dir) {
            warn!("Failed to persist metadata for version {}: {}", version.id, e);
            self.snapshots.discard(version.id);
            return Err(e);
        }

        self.versions.append(version.clone())?;
        self.metadata = metadata;
        self.records = records;
        if let Some(schema) = schema {
            self.schemas.install(schema);
        }
        Ok(version)
    }

    fn next_version(&self, description: impl Into<String>) -> Version {
        Version::successor(self.versions.current(), self.schemas.current().id, description)
    }

    /// First-committer-wins check over every explicitly addressed record id
    fn detect_conflicts(&self, tx: &TxHandle, state: &TxState) -> Vec<Conflict> {
        let read_version = tx.read_version();
        let ids: BTreeSet<RecordId> = state
            .writes
            .iter()
            .map(|w| w.record.id)
            .filter(|id| *id != 0)
            .chain(state.deletes.iter().copied())
            .collect();

        ids.into_iter()
            .filter_map(|id| {
                let modified = *self.last_modified.get(&id)?;
                (modified > read_version).then(|| Conflict {
                    conflict_type: ConflictType::WriteWrite,
                    resource_id: id.to_string(),
                    conflicting_version: modified,
                    description: format!(
                        "record {} was modified by version {} after version {} was read",
                        id, modified, read_version
                    ),
                    timestamp: Utc::now(),
                })
            })
            .collect()
    }

    fn apply_commit(&mut self, tx: &TxHandle, state: &mut TxState) -> Result<(Version, usize)> {
        let conflicts = self.detect_conflicts(tx, state);
        if let Some(first) = conflicts.first() {
            let err = Error::Conflict(format!("transaction {}: {}", tx.id(), first.description));
            state.conflicts.extend(conflicts);
            return Err(err);
        }

        let mut version = self.next_version(format!("Transaction {} committed", tx.id()));
        let ts = version.timestamp;
        let mut records = self.records.clone();
        let mut events = Vec::new();
        let mut touched = Vec::new();

        for id in &state.deletes {
            if let Some(before) = records.remove(id) {
                events.push(ChangeEvent::delete(version.id, ts, before));
                touched.push(*id);
            }
        }

        // Assigned ids never collide with ids present before the commit or
        // written explicitly by this transaction
        let max_existing = self.records.keys().next_back().copied().unwrap_or(0);
        let max_explicit = state.writes.iter().map(|w| w.record.id).max().unwrap_or(0);
        let mut next_id = max_existing.max(max_explicit) + 1;

        let mut written = Vec::with_capacity(state.writes.len());
        for write in &state.writes {
            let mut record = write.record.clone();
            match write.kind {
                WriteKind::Insert if record.id == 0 => {
                    record.id = next_id;
                    next_id += 1;
                }
                WriteKind::Insert => {}
                WriteKind::Update => {
                    if !records.contains_key(&record.id) {
                        return Err(Error::NotFound(format!("record {}", record.id)));
                    }
                }
            }
            self.schemas.current().conform(&mut record)?;

            let event = match records.insert(record.id, record.clone()) {
                Some(before) => ChangeEvent::update(version.id, ts, before, record.clone()),
                None => ChangeEvent::insert(version.id, ts, record.clone()),
            };
            events.push(event);
            touched.push(record.id);
            written.push(record);
        }

        self.constraints.validate(&written)?;

        version.operations = state.operations.clone();

        let version = self.publish(version, records, None)?;
        state.committed_ids = written.iter().map(|r| r.id).collect();
        for id in touched {
            self.last_modified.insert(id, version.id);
        }
        let event_count = events.len();
        self.feed.append(events);
        Ok((version, event_count))
    }

    /// Rewrite the current snapshot under a new version (optimize, compact)
    fn rewrite(&mut self, description: &str, operation: Operation) -> Result<(Version, u64)> {
        let previous_size = self.versions.current().size_bytes;
        let version = self.next_version(description).with_operation(operation);
        let records = self.records.clone();
        let version = self.publish(version, records, None)?;
        self.feed.append(vec![ChangeEvent::table(ChangeType::Optimize, version.id, version.timestamp)
            .with_metadata("description", description)]);
        Ok((version, previous_size))
    }
}

impl LakeEngine {
    /// Create a new table with the default configuration
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_config(dir, TableConfig::default())
    }

    /// Create a new table with custom configuration
    pub fn create_with_config(dir: impl AsRef<Path>, config: TableConfig) -> Result<Self> {
        config.validate().map_err(Error::InvalidArgument)?;

        let dir = dir.as_ref();
        if TableManifest::exists(dir) {
            return Err(Error::Conflict(format!("table already exists at {}", dir.display())));
        }
        fs::create_dir_all(dir)?;

        let schema = Schema::exercise();
        let snapshots = SnapshotStore::new(dir);
        let records = Snapshot::new();

        let mut initial = Version::initial(schema.id);
        let info = snapshots.write(initial.id, &records)?;
        initial.size_bytes = info.size_bytes;
        initial.checksum = info.checksum;

        let mut metadata = TableMetadata::new(&config.table_name, dir.display().to_string());
        metadata.file_count = 1;
        metadata.size_bytes = info.size_bytes;
        metadata.partition_fields = config.partition_fields.clone();

        let inner = EngineInner {
            dir: dir.to_path_buf(),
            feed: ChangeFeed::new(config.change_feed_capacity),
            schemas: SchemaRegistry::new(schema),
            metadata,
            versions: VersionLog::new(initial),
            constraints: ConstraintSet::new(),
            indexes: BTreeMap::new(),
            snapshots,
            records,
            active: BTreeMap::new(),
            last_modified: HashMap::new(),
            closed: false,
            config,
        };
        inner.manifest().save(dir)?;

        info!("Created table {} at {}", inner.config.table_name, dir.display());
        Ok(Self::from_inner(inner))
    }

    /// Open an existing table
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let manifest = TableManifest::load(dir)?;
        manifest.config.validate().map_err(Error::InvalidArgument)?;

        let versions = VersionLog::from_versions(manifest.versions)?;
        let snapshots = SnapshotStore::new(dir);
        let records = snapshots.read(versions.current())?;

        let mut metadata = manifest.metadata;
        if metadata.current_version != versions.current_id() {
            warn!(
                "Table metadata names version {} but the version index ends at {}",
                metadata.current_version,
                versions.current_id()
            );
            metadata.current_version = versions.current_id();
        }

        let inner = EngineInner {
            dir: dir.to_path_buf(),
            feed: ChangeFeed::new(manifest.config.change_feed_capacity),
            schemas: SchemaRegistry::from_parts(manifest.schema, manifest.schema_history),
            metadata,
            versions,
            constraints: ConstraintSet::from_vec(manifest.constraints),
            indexes: manifest.indexes.into_iter().map(|i| (i.name.clone(), i)).collect(),
            snapshots,
            records,
            active: BTreeMap::new(),
            last_modified: HashMap::new(),
            closed: false,
            config: manifest.config,
        };

        info!(
            "Opened table {} at version {} ({} records)",
            inner.config.table_name,
            inner.versions.current_id(),
            inner.records.len()
        );
        Ok(Self::from_inner(inner))
    }

    /// Open the table at `dir`, creating it with `config` if it does not exist
    pub fn open_or_create(dir: impl AsRef<Path>, config: TableConfig) -> Result<Self> {
        if TableManifest::exists(dir.as_ref()) {
            Self::open(dir)
        } else {
            Self::create_with_config(dir, config)
        }
    }

    fn from_inner(inner: EngineInner) -> Self {
        Self {
            inner: Arc::new(RwLock::new(inner)),
            streams: Arc::new(RwLock::new(StreamRegistry::new())),
            query_stats: Arc::new(Mutex::new(QueryStats::default())),
            tx_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Roll back every active transaction, stop streams and end change
    /// subscriptions, then persist metadata. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Ok(());
        }

        let active = std::mem::take(&mut inner.active);
        for (id, tx) in active {
            tx.lock_state().finish();
            info!("Rolled back transaction {} on close", id);
        }

        self.streams.read().stop_all();
        inner.feed.close();
        inner.metadata.last_modified = Utc::now();
        inner.manifest().save(&inner.dir)?;
        inner.closed = true;

        info!("Closed table {}", inner.config.table_name);
        Ok(())
    }

    pub fn path(&self) -> PathBuf {
        self.inner.read().dir.clone()
    }

    pub fn config(&self) -> TableConfig {
        self.inner.read().config.clone()
    }

    pub fn current_version(&self) -> VersionId {
        self.inner.read().versions.current_id()
    }

    pub fn active_transactions(&self) -> usize {
        self.inner.read().active.len()
    }

    // Transactions

    /// Begin a read-committed transaction reading the current version
    pub fn begin(&self) -> Result<TxHandle> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;

        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = self.tx_counter.fetch_add(1, Ordering::Relaxed);
        let id = format!("tx_{}_{}", nanos, seq);

        let tx = TxHandle::begin(id.clone(), inner.versions.current_id());
        inner.active.insert(id, tx.clone());
        debug!("Began transaction {} at version {}", tx.id(), tx.read_version());
        Ok(tx)
    }

    /// Apply the transaction's pending deletes and writes as one new version.
    /// The transaction is terminal afterwards whether or not the commit succeeded.
    pub fn commit(&self, tx: &TxHandle) -> Result<Version> {
        let start = Instant::now();
        let mut inner = self.inner.write();
        let mut state = tx.lock_state();
        if !state.active {
            return Err(Error::InvalidState(format!("transaction {} is not active", tx.id())));
        }
        inner.ensure_open()?;

        let result = inner.apply_commit(tx, &mut state);
        state.finish();
        inner.active.remove(tx.id());

        match result {
            Ok((version, events)) => {
                info!(
                    version = version.id,
                    records = version.record_count,
                    events,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Committed transaction {}",
                    tx.id()
                );
                Ok(version)
            }
            Err(e) => {
                warn!("Commit of transaction {} failed: {}", tx.id(), e);
                Err(e)
            }
        }
    }

    /// Discard the transaction's pending changes
    pub fn rollback(&self, tx: &TxHandle) -> Result<()> {
        let mut inner = self.inner.write();
        let mut state = tx.lock_state();
        if !state.active {
            return Err(Error::InvalidState(format!("transaction {} is not active", tx.id())));
        }
        state.finish();
        inner.active.remove(tx.id());
        debug!("Rolled back transaction {}", tx.id());
        Ok(())
    }

    // Version log

    /// Checkpoint the current records under a new version
    pub fn create_version(&self, description: &str) -> Result<Version> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        let version = inner.next_version(description);
        let records = inner.records.clone();
        let version = inner.publish(version, records, None)?;
        info!("Created version {}: {}", version.id, description);
        Ok(version)
    }

    /// Records visible at version `id`, ordered by id
    pub fn get_by_version(&self, id: VersionId) -> Result<Vec<Record>> {
        let inner = self.inner.read();
        let version = inner
            .versions
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("version {}", id)))?;
        Ok(inner.snapshot_at(version)?.into_values().collect())
    }

    /// Records visible at the latest version not newer than `ts`.
    /// Empty when the table did not exist yet.
    pub fn get_by_timestamp(&self, ts: DateTime<Utc>) -> Result<Vec<Record>> {
        let inner = self.inner.read();
        match inner.versions.at_timestamp(ts) {
            Some(version) => Ok(inner.snapshot_at(version)?.into_values().collect()),
            None => Ok(Vec::new()),
        }
    }

    pub fn get_version(&self, id: VersionId) -> Result<Version> {
        self.inner
            .read()
            .versions
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("version {}", id)))
    }

    /// All versions, ascending by id
    pub fn get_version_history(&self) -> Vec<Version> {
        self.inner.read().versions.history()
    }

    /// Make the records of version `id` current again, as a new version
    pub fn restore_version(&self, id: VersionId) -> Result<Version> {
        let start = Instant::now();
        let mut inner = self.inner.write();
        inner.ensure_open()?;

        let target = inner
            .versions
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("version {}", id)))?;
        let restored = inner.snapshot_at(&target)?;

        let mut version = inner.next_version(format!("Restored to version {}", id));
        let ts = version.timestamp;
        let mut events = Vec::new();
        for (rid, before) in &inner.records {
            match restored.get(rid) {
                None => events.push(ChangeEvent::delete(version.id, ts, before.clone())),
                Some(after) if after != before => {
                    events.push(ChangeEvent::update(version.id, ts, before.clone(), after.clone()))
                }
                Some(_) => {}
            }
        }
        for (rid, after) in &restored {
            if !inner.records.contains_key(rid) {
                events.push(ChangeEvent::insert(version.id, ts, after.clone()));
            }
        }

        version.operations.push(
            Operation::new(OperationType::Restore)
                .with_detail("restored_version", id)
                .with_counts(restored.len() as u64, events.len() as u64)
                .with_duration(start.elapsed()),
        );

        let version = inner.publish(version, restored, None)?;
        for event in &events {
            if let Some(rid) = event.record_id {
                inner.last_modified.insert(rid, version.id);
            }
        }
        let changed = events.len();
        inner.feed.append(events);
        info!("Restored version {} as version {} ({} records changed)", id, version.id, changed);
        Ok(version)
    }

    // Schema registry

    /// Copy of the current schema
    pub fn get_current_schema(&self) -> Schema {
        self.inner.read().schemas.current().clone()
    }

    /// Every schema the table has had, oldest first
    pub fn get_schema_history(&self) -> Vec<Schema> {
        self.inner.read().schemas.history().to_vec()
    }

    pub fn validate_schema_compatibility(&self, proposed: &Schema) -> Result<()> {
        schema::validate_compatibility(self.inner.read().schemas.current(), proposed)
    }

    /// Install `proposed` as the next schema. Rejected evolutions leave the
    /// current schema untouched.
    pub fn evolve_schema(&self, proposed: Schema) -> Result<Schema> {
        let start = Instant::now();
        let mut inner = self.inner.write();
        inner.ensure_open()?;

        let (next, changes) = inner.schemas.prepare(&proposed)?;
        let operation = Operation::new(OperationType::Schema)
            .with_detail("schema_id", next.id)
            .with_detail("schema_version", next.version)
            .with_detail("added_fields", changes.added_fields.clone())
            .with_detail("removed_fields", changes.removed_fields.clone())
            .with_detail("modified_fields", changes.modified_fields.clone())
            .with_duration(start.elapsed());

        let mut version = inner.next_version(format!("Schema evolved to version {}", next.version));
        version.schema_id = next.id;
        let version = version.with_operation(operation);
        let records = inner.records.clone();
        let version = inner.publish(version, records, Some(next.clone()))?;

        inner.feed.append(vec![ChangeEvent::table(ChangeType::Schema, version.id, version.timestamp)
            .with_metadata("schema_id", next.id.to_string())]);

        info!(
            "Evolved schema to id {} (added {:?}, removed {:?}, modified {:?})",
            next.id, changes.added_fields, changes.removed_fields, changes.modified_fields
        );
        Ok(next)
    }

    // Constraints

    pub fn add_constraint(&self, constraint: Constraint) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;

        let name = constraint.name.clone();
        let mut constraints = inner.constraints.clone();
        constraints.add(constraint)?;

        let mut manifest = inner.manifest();
        manifest.constraints = constraints.list().to_vec();
        manifest.save(&inner.dir)?;
        inner.constraints = constraints;

        info!("Added constraint {}", name);
        Ok(())
    }

    pub fn remove_constraint(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;

        let mut constraints = inner.constraints.clone();
        constraints.remove(name)?;

        let mut manifest = inner.manifest();
        manifest.constraints = constraints.list().to_vec();
        manifest.save(&inner.dir)?;
        inner.constraints = constraints;

        info!("Removed constraint {}", name);
        Ok(())
    }

    pub fn set_constraint_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;

        let mut constraints = inner.constraints.clone();
        constraints.set_enabled(name, enabled)?;

        let mut manifest = inner.manifest();
        manifest.constraints = constraints.list().to_vec();
        manifest.save(&inner.dir)?;
        inner.constraints = constraints;

        debug!("Constraint {} enabled={}", name, enabled);
        Ok(())
    }

    /// Constraints in the order they were added
    pub fn list_constraints(&self) -> Vec<Constraint> {
        self.inner.read().constraints.list().to_vec()
    }

    /// Check `records` against every enabled constraint without writing them
    pub fn validate_constraints(&self, records: &[Record]) -> Result<()> {
        self.inner.read().constraints.validate(records)
    }

    /// Run the checks a commit applies to written records: the current
    /// schema, then every enabled constraint
    pub fn validate_records(&self, records: &[Record]) -> Result<()> {
        let inner = self.inner.read();
        let mut conformed = records.to_vec();
        for record in &mut conformed {
            inner.schemas.current().conform(record)?;
        }
        inner.constraints.validate(&conformed)
    }

    // Table management

    pub fn get_table_metadata(&self) -> TableMetadata {
        self.inner.read().metadata.clone()
    }

    /// Merge `properties` into the table properties; no version is created
    pub fn update_table_properties(&self, properties: BTreeMap<String, String>) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;

        let mut metadata = inner.metadata.clone();
        metadata.properties.extend(properties);
        metadata.last_modified = Utc::now();

        let mut manifest = inner.manifest();
        manifest.metadata = metadata.clone();
        manifest.save(&inner.dir)?;
        inner.metadata = metadata;
        Ok(())
    }

    /// The table is stored unpartitioned: one partition covers the current snapshot
    pub fn get_partitions(&self) -> Vec<Partition> {
        let inner = self.inner.read();
        let current = inner.versions.current();
        vec![Partition {
            values: BTreeMap::new(),
            record_count: current.record_count,
            file_count: 1,
            size_bytes: current.size_bytes,
            location: inner.snapshots.path(current.id).display().to_string(),
            last_modified: current.timestamp,
        }]
    }

    pub fn optimize_table(&self, options: OptimizeOptions) -> Result<OptimizeResult> {
        let start = Instant::now();
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        inner.ensure_optimization_enabled()?;

        let count = inner.records.len() as u64;
        let operation = Operation::new(OperationType::Optimize)
            .with_detail("operation", "optimize")
            .with_detail("z_order_columns", options.z_order_columns.clone())
            .with_detail("compact_small_files", options.compact_small_files)
            .with_detail("rewrite_large_files", options.rewrite_large_files)
            .with_counts(count, count)
            .with_duration(start.elapsed());

        let (version, previous_size) = inner.rewrite("Table optimized", operation)?;

        let mut metrics = BTreeMap::new();
        metrics.insert("z_order_columns".to_string(), serde_json::json!(options.z_order_columns));
        metrics.insert("target_file_count".to_string(), serde_json::json!(options.target_file_count));

        info!("Optimized table at version {} ({} records)", version.id, count);
        Ok(OptimizeResult {
            version: version.id,
            files_added: 1,
            files_removed: 1,
            partitions_optimized: 1,
            records_rewritten: count,
            bytes_written: version.size_bytes,
            bytes_removed: previous_size,
            duration: start.elapsed(),
            metrics,
        })
    }

    pub fn compact(&self) -> Result<CompactionResult> {
        let start = Instant::now();
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        inner.ensure_optimization_enabled()?;

        let count = inner.records.len() as u64;
        let operation = Operation::new(OperationType::Optimize)
            .with_detail("operation", "compact")
            .with_counts(count, count);

        let (version, previous_size) = inner.rewrite("Table compacted", operation)?;

        info!("Compacted table at version {}", version.id);
        Ok(CompactionResult {
            version: version.id,
            files_compacted: 1,
            files_created: 1,
            records_processed: count,
            space_reclaimed: previous_size.saturating_sub(version.size_bytes),
            duration: start.elapsed(),
        })
    }

    /// Register a metadata-only index definition
    pub fn create_index(&self, name: &str, columns: &[&str], index_type: IndexType) -> Result<IndexDef> {
        if name.trim().is_empty() || columns.is_empty() {
            return Err(Error::InvalidArgument("index needs a name and at least one column".into()));
        }

        let mut inner = self.inner.write();
        inner.ensure_open()?;
        if inner.indexes.contains_key(name) {
            return Err(Error::Conflict(format!("index {} already exists", name)));
        }

        let index = IndexDef {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            index_type,
            created_at: Utc::now(),
        };
        let mut manifest = inner.manifest();
        manifest.indexes.push(index.clone());
        manifest.save(&inner.dir)?;
        inner.indexes.insert(index.name.clone(), index.clone());

        debug!("Created index {} on {:?}", name, columns);
        Ok(index)
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        if !inner.indexes.contains_key(name) {
            return Err(Error::NotFound(format!("index {}", name)));
        }

        let mut manifest = inner.manifest();
        manifest.indexes.retain(|i| i.name != name);
        manifest.save(&inner.dir)?;
        inner.indexes.remove(name);

        debug!("Dropped index {}", name);
        Ok(())
    }

    /// Index definitions ordered by name
    pub fn list_indexes(&self) -> Vec<IndexDef> {
        self.inner.read().indexes.values().cloned().collect()
    }

    // Statistics

    pub fn get_query_stats(&self) -> QueryStats {
        self.query_stats.lock().clone()
    }

    pub fn get_data_quality_metrics(&self) -> DataQualityMetrics {
        let inner = self.inner.read();
        DataQualityMetrics::compute(inner.schemas.current(), inner.records.values())
    }

    // Reads

    pub fn get(&self, id: RecordId) -> Option<Record> {
        self.inner.read().records.get(&id).cloned()
    }

    /// Every current record, ordered by id
    pub fn get_all(&self) -> Vec<Record> {
        self.inner.read().records.values().cloned().collect()
    }

    pub fn record_count(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Full scan of the current snapshot
    pub fn query(&self, filter: &Filter) -> FilterResult {
        let start = Instant::now();
        let result = {
            let inner = self.inner.read();
            filter::apply(filter, inner.records.values())
        };
        self.query_stats.lock().record(
            result.scanned as u64,
            result.records.len() as u64,
            start.elapsed(),
        );
        result
    }

    // Change feed

    /// Buffered change events newer than `from`; the channel ends after them
    pub fn watch_changes(&self, from: DateTime<Utc>) -> Receiver<ChangeEvent> {
        self.inner.read().feed.watch(from)
    }

    /// Buffered events newer than `from`, then every later event until the
    /// receiver is dropped or the table is closed
    pub fn follow_changes(&self, from: DateTime<Utc>) -> Receiver<ChangeEvent> {
        self.inner.write().feed.follow(from)
    }

    /// Buffered events with `from <= version <= to`
    pub fn get_changelog(&self, from: VersionId, to: VersionId) -> Vec<ChangeEvent> {
        self.inner.read().feed.range(from, to)
    }

    // Streams

    pub fn start_stream(&self, config: StreamConfig) -> Result<StreamInfo> {
        let default_buffer = {
            let inner = self.inner.read();
            inner.ensure_open()?;
            inner.config.stream_buffer_size
        };
        let stream = self.streams.write().start(config, default_buffer)?;
        info!("Started stream {}", stream.name());
        Ok(stream.info())
    }

    /// Publish `records` to a stream as insert events stamped with the current version
    pub fn publish_to_stream(&self, ctx: &Context, name: &str, records: Vec<Record>) -> Result<()> {
        let version = self.current_version();
        let stream = self.streams.read().get(name)?;
        let events = records
            .into_iter()
            .map(|r| StreamEvent::insert(name, version, r))
            .collect();
        stream.publish(ctx, events)
    }

    pub fn subscribe_to_stream(&self, name: &str) -> Result<Subscription> {
        let stream = self.streams.read().get(name)?;
        stream.subscribe()
    }

    /// Active streams ordered by name
    pub fn get_active_streams(&self) -> Vec<StreamInfo> {
        self.streams.read().active()
    }

    pub fn get_stream_info(&self, name: &str) -> Result<StreamInfo> {
        Ok(self.streams.read().get(name)?.info())
    }

    pub fn stop_stream(&self, name: &str) -> Result<()> {
        self.streams.read().stop(name)
    }
}

impl std::fmt::Debug for LakeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("LakeEngine")
            .field("dir", &inner.dir)
            .field("version", &inner.versions.current_id())
            .field("records", &inner.records.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Condition, Field, FieldType, Operator, StreamType};
    use tempfile::TempDir;

    fn run(name: &str, duration: i64) -> Record {
        Record::new(0)
            .with("name", name)
            .with("type", "cardio")
            .with("duration", duration)
            .with("calories", 300i64)
            .with("date", Utc::now())
    }

    fn insert_all(engine: &LakeEngine, records: Vec<Record>) -> Version {
        let tx = engine.begin().unwrap();
        tx.insert_batch(records).unwrap();
        engine.commit(&tx).unwrap()
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let engine = LakeEngine::create(dir.path()).unwrap();
            insert_all(&engine, vec![run("Morning Run", 30), run("Evening Run", 45)]);
            engine.close().unwrap();
        }

        let engine = LakeEngine::open(dir.path()).unwrap();
        assert_eq!(engine.current_version(), 1);
        assert_eq!(engine.record_count(), 2);
        assert_eq!(engine.get(2).unwrap().name(), Some("Evening Run"));
        assert_eq!(engine.get_version_history().len(), 2);
    }

    #[test]
    fn test_create_twice_conflicts() {
        let dir = TempDir::new().unwrap();
        LakeEngine::create(dir.path()).unwrap();
        assert!(matches!(LakeEngine::create(dir.path()), Err(Error::Conflict(_))));
        assert!(LakeEngine::open_or_create(dir.path(), TableConfig::default()).is_ok());
    }

    #[test]
    fn test_open_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(LakeEngine::open(dir.path()), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_commit_rejects_records_outside_schema() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();

        let tx = engine.begin().unwrap();
        tx.insert(Record::new(0).with("duration", "abc")).unwrap();
        let err = engine.commit(&tx).unwrap_err();
        assert!(matches!(err, Error::ValidationFailed { .. }));
        assert!(!tx.is_active());
        assert_eq!(engine.current_version(), 0);
        assert_eq!(engine.record_count(), 0);

        let tx = engine.begin().unwrap();
        tx.insert(run("A", 10).with("duration", "abc")).unwrap();
        assert!(matches!(engine.commit(&tx), Err(Error::ValidationFailed { .. })));

        let mut missing = run("A", 10);
        missing.attributes.remove("type");
        assert!(engine.validate_records(&[missing]).is_err());
        assert!(engine.validate_records(&[run("A", 10)]).is_ok());
        assert_eq!(engine.current_version(), 0);
    }

    #[test]
    fn test_commit_fills_schema_defaults() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();
        let schema = engine.get_current_schema().with_field(
            Field::required("intensity", FieldType::String).with_default(crate::Value::string("moderate")),
        );
        engine.evolve_schema(schema).unwrap();

        insert_all(&engine, vec![run("A", 10)]);
        assert_eq!(
            engine.get(1).unwrap().get("intensity").and_then(|v| v.as_string()),
            Some("moderate")
        );
    }

    #[test]
    fn test_commit_assigns_ids_and_links_versions() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();

        let v1 = insert_all(&engine, vec![run("A", 10), run("B", 20)]);
        assert_eq!(v1.id, 1);
        assert_eq!(v1.parent_id, Some(0));
        assert_eq!(v1.record_count, 2);

        let v2 = insert_all(&engine, vec![run("C", 30)]);
        assert_eq!(v2.parent_id, Some(1));
        assert_eq!(engine.get(3).unwrap().name(), Some("C"));
        assert_eq!(engine.active_transactions(), 0);
    }

    #[test]
    fn test_deletes_apply_before_writes() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();
        insert_all(&engine, vec![run("A", 10), run("B", 20)]);

        let tx = engine.begin().unwrap();
        tx.delete(2).unwrap();
        tx.delete(99).unwrap();
        tx.insert(run("C", 30)).unwrap();
        engine.commit(&tx).unwrap();

        // Ids come from the pre-commit maximum, so 2 is not reused
        let ids: Vec<_> = engine.get_all().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3]);

        let changes = engine.get_changelog(2, 2);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].change_type, ChangeType::Delete);
        assert_eq!(changes[1].change_type, ChangeType::Insert);
    }

    #[test]
    fn test_update_missing_fails_without_version() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();

        let tx = engine.begin().unwrap();
        let mut ghost = run("Ghost", 10);
        ghost.id = 5;
        tx.update(ghost).unwrap();
        assert!(matches!(engine.commit(&tx), Err(Error::NotFound(_))));
        assert!(!tx.is_active());
        assert_eq!(engine.current_version(), 0);
        assert!(!dir.path().join("part-00001.json").exists());
    }

    #[test]
    fn test_rollback_twice() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();
        let tx = engine.begin().unwrap();
        tx.insert(run("A", 10)).unwrap();

        engine.rollback(&tx).unwrap();
        assert!(matches!(engine.rollback(&tx), Err(Error::InvalidState(_))));
        assert!(matches!(engine.commit(&tx), Err(Error::InvalidState(_))));
        assert_eq!(engine.record_count(), 0);
        assert_eq!(engine.current_version(), 0);
    }

    #[test]
    fn test_write_write_conflict() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();
        insert_all(&engine, vec![run("A", 10)]);

        let first = engine.begin().unwrap();
        let second = engine.begin().unwrap();
        let mut a = engine.get(1).unwrap();
        a.set("duration", 11i64);
        first.update(a.clone()).unwrap();
        a.set("duration", 12i64);
        second.update(a).unwrap();

        engine.commit(&first).unwrap();
        assert!(matches!(engine.commit(&second), Err(Error::Conflict(_))));
        assert_eq!(second.conflicts().len(), 1);
        assert_eq!(second.conflicts()[0].resource_id, "1");
        assert_eq!(engine.get(1).unwrap().get("duration").and_then(|v| v.as_int()), Some(11));
    }

    #[test]
    fn test_disjoint_transactions_both_commit() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();
        insert_all(&engine, vec![run("A", 10), run("B", 20)]);

        let first = engine.begin().unwrap();
        let second = engine.begin().unwrap();
        first.delete(1).unwrap();
        second.delete(2).unwrap();
        engine.commit(&first).unwrap();
        engine.commit(&second).unwrap();
        assert_eq!(engine.record_count(), 0);
    }

    #[test]
    fn test_constraint_violation_blocks_commit() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();
        engine.add_constraint(Constraint::range("positive_duration", &["duration"])).unwrap();

        let tx = engine.begin().unwrap();
        tx.insert(run("Bad", -5)).unwrap();
        let err = engine.commit(&tx).unwrap_err();
        assert_eq!(err.violated_constraint(), Some("positive_duration"));
        assert_eq!(engine.get_version_history().len(), 1);

        engine.set_constraint_enabled("positive_duration", false).unwrap();
        insert_all(&engine, vec![run("Bad", -5)]);
        assert_eq!(engine.record_count(), 1);
    }

    #[test]
    fn test_constraints_persist() {
        let dir = TempDir::new().unwrap();
        {
            let engine = LakeEngine::create(dir.path()).unwrap();
            engine.add_constraint(Constraint::not_null("name_required", &["name"])).unwrap();
            engine.add_constraint(Constraint::range("bounds", &["duration"])).unwrap();
            assert!(matches!(
                engine.add_constraint(Constraint::range("bounds", &["calories"])),
                Err(Error::Conflict(_))
            ));
            engine.remove_constraint("name_required").unwrap();
            assert!(matches!(engine.remove_constraint("name_required"), Err(Error::NotFound(_))));
        }
        let engine = LakeEngine::open(dir.path()).unwrap();
        let names: Vec<_> = engine.list_constraints().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["bounds"]);
    }

    #[test]
    fn test_time_travel() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();
        let before_anything = engine.get_version(0).unwrap().timestamp - chrono::Duration::seconds(1);

        let v1 = insert_all(&engine, vec![run("A", 10)]);
        insert_all(&engine, vec![run("B", 20)]);

        assert_eq!(engine.get_by_version(v1.id).unwrap().len(), 1);
        assert_eq!(engine.get_by_version(2).unwrap().len(), 2);
        assert!(engine.get_by_version(0).unwrap().is_empty());
        assert!(matches!(engine.get_by_version(9), Err(Error::NotFound(_))));

        assert!(engine.get_by_timestamp(before_anything).unwrap().is_empty());
        assert_eq!(engine.get_by_timestamp(Utc::now()).unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_snapshot_detected() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();
        insert_all(&engine, vec![run("A", 10)]);
        insert_all(&engine, vec![run("B", 20)]);

        fs::write(dir.path().join("part-00001.json"), b"[]").unwrap();
        assert!(matches!(engine.get_by_version(1), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_restore_version() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();
        insert_all(&engine, vec![run("A", 10)]);
        let tx = engine.begin().unwrap();
        tx.delete(1).unwrap();
        tx.insert(run("B", 20)).unwrap();
        engine.commit(&tx).unwrap();

        let restored = engine.restore_version(1).unwrap();
        assert_eq!(restored.id, 3);
        assert_eq!(restored.operations[0].op_type, OperationType::Restore);
        let names: Vec<_> = engine.get_all().iter().map(|r| r.name().unwrap_or_default().to_string()).collect();
        assert_eq!(names, vec!["A"]);
        assert_eq!(engine.get_changelog(3, 3).len(), 2);
        assert!(matches!(engine.restore_version(42), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_schema_evolution() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();
        insert_all(&engine, vec![run("A", 10)]);

        let before = engine.get_current_schema();
        let bad = before.clone().with_field(Field::required("intensity", FieldType::String));
        assert!(engine.evolve_schema(bad).is_err());
        assert_eq!(engine.get_current_schema(), before);

        let good = before.clone().with_field(Field::nullable("intensity", FieldType::String));
        let evolved = engine.evolve_schema(good).unwrap();
        assert_eq!(evolved.id, before.id + 1);
        assert_eq!(engine.current_version(), 2);
        assert_eq!(engine.get_version(2).unwrap().schema_id, evolved.id);
        assert!(engine.get(1).unwrap().get("intensity").is_none());
        assert_eq!(engine.get_schema_history().len(), 2);
        assert_eq!(engine.get_changelog(2, 2)[0].change_type, ChangeType::Schema);
    }

    #[test]
    fn test_optimization_can_be_disabled() {
        let dir = TempDir::new().unwrap();
        let engine =
            LakeEngine::create_with_config(dir.path(), TableConfig::new().with_optimization(false)).unwrap();
        insert_all(&engine, vec![run("A", 10)]);

        assert!(matches!(engine.optimize_table(OptimizeOptions::new()), Err(Error::InvalidState(_))));
        assert!(matches!(engine.compact(), Err(Error::InvalidState(_))));
        assert_eq!(engine.current_version(), 1);
    }

    #[test]
    fn test_optimize_and_compact_create_versions() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();
        insert_all(&engine, vec![run("A", 10), run("B", 20)]);

        let optimized = engine
            .optimize_table(OptimizeOptions::new().with_z_order(vec!["date".into()]))
            .unwrap();
        assert_eq!(optimized.version, 2);
        assert_eq!(optimized.records_rewritten, 2);

        let compacted = engine.compact().unwrap();
        assert_eq!(compacted.version, 3);
        assert_eq!(compacted.space_reclaimed, 0);
        assert_eq!(engine.get_changelog(2, 3).len(), 2);
        assert_eq!(engine.get_by_version(3).unwrap(), engine.get_all());
    }

    #[test]
    fn test_indexes_and_properties_do_not_create_versions() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();

        engine.create_index("by_date", &["date"], IndexType::BTree).unwrap();
        assert!(matches!(
            engine.create_index("by_date", &["date"], IndexType::Hash),
            Err(Error::Conflict(_))
        ));
        engine.drop_index("by_date").unwrap();
        assert!(matches!(engine.drop_index("by_date"), Err(Error::NotFound(_))));

        let mut props = BTreeMap::new();
        props.insert("owner".to_string(), "ops".to_string());
        engine.update_table_properties(props).unwrap();
        assert_eq!(engine.get_table_metadata().properties["owner"], "ops");
        assert_eq!(engine.current_version(), 0);
    }

    #[test]
    fn test_query_updates_stats() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();
        insert_all(&engine, vec![run("Morning Run", 10), run("Evening Swim", 20)]);

        let mut filter = Filter::new();
        filter.conditions.push(Condition::new("name", Operator::Like, "Morning"));
        assert_eq!(engine.query(&filter).records.len(), 1);

        let stats = engine.get_query_stats();
        assert_eq!(stats.total_queries, 1);
        assert_eq!(stats.records_scanned, 2);
        assert_eq!(stats.records_returned, 1);
    }

    #[test]
    fn test_follow_sees_later_commits() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();
        let rx = engine.follow_changes(Utc::now() - chrono::Duration::seconds(1));
        insert_all(&engine, vec![run("A", 10)]);
        engine.close().unwrap();

        let events: Vec<_> = rx.iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].record_id, Some(1));
    }

    #[test]
    fn test_close_rolls_back_active() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();
        let tx = engine.begin().unwrap();
        tx.insert(run("A", 10)).unwrap();

        engine.close().unwrap();
        assert!(!tx.is_active());
        assert_eq!(engine.active_transactions(), 0);
        assert!(matches!(engine.begin(), Err(Error::InvalidState(_))));
        engine.close().unwrap();
    }

    #[test]
    fn test_streams_round_trip() {
        let dir = TempDir::new().unwrap();
        let engine = LakeEngine::create(dir.path()).unwrap();

        let info = engine.start_stream(StreamConfig::new("ingest", StreamType::Inserts)).unwrap();
        assert!(info.is_active);
        let sub = engine.subscribe_to_stream("ingest").unwrap();
        engine
            .publish_to_stream(&Context::background(), "ingest", vec![run("A", 10)])
            .unwrap();

        let event = sub.try_recv().unwrap();
        assert_eq!(event.metadata["stream"], "ingest");
        assert_eq!(event.version, 0);

        engine.stop_stream("ingest").unwrap();
        assert!(engine.get_active_streams().is_empty());
        assert!(matches!(
            engine.publish_to_stream(&Context::background(), "ingest", vec![]),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(engine.subscribe_to_stream("missing"), Err(Error::NotFound(_))));
    }
}
