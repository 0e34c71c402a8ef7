/// Transactions
///
/// A transaction buffers writes and deletes until the engine commits or rolls
/// it back. Once terminal it accepts no further operations.

use crate::{Error, Operation, OperationType, Record, RecordId, Result, VersionId};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    WriteWrite,
    ReadWrite,
    Schema,
}

/// Why a commit was rejected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub conflict_type: ConflictType,
    pub resource_id: String,
    /// Version that modified the resource after this transaction began
    pub conflicting_version: VersionId,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
}

#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub kind: WriteKind,
    pub record: Record,
}

/// Capabilities of an open transaction
pub trait Transaction {
    fn id(&self) -> &str;
    fn start_time(&self) -> DateTime<Utc>;
    fn isolation_level(&self) -> IsolationLevel;
    /// Version that was current when the transaction began
    fn read_version(&self) -> VersionId;
    fn operations(&self) -> Vec<Operation>;
    fn is_active(&self) -> bool;
    fn conflicts(&self) -> Vec<Conflict>;

    /// Stage a new record (id 0 = assign on commit)
    fn insert(&self, record: Record) -> Result<()>;
    fn insert_batch(&self, records: Vec<Record>) -> Result<()> {
        for record in records {
            self.insert(record)?;
        }
        Ok(())
    }
    /// Stage a replacement for an existing record
    fn update(&self, record: Record) -> Result<()>;
    fn delete(&self, id: RecordId) -> Result<()>;
}

pub(crate) struct TxState {
    pub(crate) active: bool,
    pub(crate) writes: Vec<PendingWrite>,
    pub(crate) deletes: Vec<RecordId>,
    pub(crate) operations: Vec<Operation>,
    pub(crate) conflicts: Vec<Conflict>,
    /// Ids of the records written by a successful commit, in submission order
    pub(crate) committed_ids: Vec<RecordId>,
}

impl TxState {
    /// Discard buffers and mark terminal
    pub(crate) fn finish(&mut self) {
        self.active = false;
        self.writes.clear();
        self.deletes.clear();
    }
}

struct TxInner {
    id: String,
    start_time: DateTime<Utc>,
    isolation: IsolationLevel,
    read_version: VersionId,
    state: Mutex<TxState>,
}

/// Handle to a transaction; clones refer to the same transaction
#[derive(Clone)]
pub struct TxHandle {
    inner: Arc<TxInner>,
}

impl TxHandle {
    pub(crate) fn begin(id: String, read_version: VersionId) -> Self {
        Self {
            inner: Arc::new(TxInner {
                id,
                start_time: Utc::now(),
                isolation: IsolationLevel::ReadCommitted,
                read_version,
                state: Mutex::new(TxState {
                    active: true,
                    writes: Vec::new(),
                    deletes: Vec::new(),
                    operations: Vec::new(),
                    conflicts: Vec::new(),
                    committed_ids: Vec::new(),
                }),
            }),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, TxState> {
        self.inner.state.lock()
    }

    pub fn pending_writes(&self) -> usize {
        self.inner.state.lock().writes.len()
    }

    pub fn pending_deletes(&self) -> usize {
        self.inner.state.lock().deletes.len()
    }

    /// Ids the committed writes ended up with (assigned ids included)
    pub fn committed_ids(&self) -> Vec<RecordId> {
        self.inner.state.lock().committed_ids.clone()
    }

    fn stage(&self, op: OperationType, detail: &str, id: RecordId, f: impl FnOnce(&mut TxState)) -> Result<()> {
        let mut state = self.inner.state.lock();
        if !state.active {
            return Err(Error::InvalidState(format!(
                "transaction {} is not active",
                self.inner.id
            )));
        }
        f(&mut state);
        state.operations.push(
            Operation::new(op)
                .with_detail("operation", detail)
                .with_detail("record_id", id),
        );
        Ok(())
    }
}

impl Transaction for TxHandle {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn start_time(&self) -> DateTime<Utc> {
        self.inner.start_time
    }

    fn isolation_level(&self) -> IsolationLevel {
        self.inner.isolation
    }

    fn read_version(&self) -> VersionId {
        self.inner.read_version
    }

    fn operations(&self) -> Vec<Operation> {
        self.inner.state.lock().operations.clone()
    }

    fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    fn conflicts(&self) -> Vec<Conflict> {
        self.inner.state.lock().conflicts.clone()
    }

    fn insert(&self, record: Record) -> Result<()> {
        if record.id < 0 {
            return Err(Error::InvalidArgument(format!("invalid record id {}", record.id)));
        }
        let id = record.id;
        self.stage(OperationType::Write, "insert", id, |state| {
            state.writes.push(PendingWrite {
                kind: WriteKind::Insert,
                record,
            })
        })
    }

    fn update(&self, record: Record) -> Result<()> {
        if record.id <= 0 {
            return Err(Error::InvalidArgument(format!(
                "update requires an existing record id, got {}",
                record.id
            )));
        }
        let id = record.id;
        self.stage(OperationType::Write, "update", id, |state| {
            state.writes.push(PendingWrite {
                kind: WriteKind::Update,
                record,
            })
        })
    }

    fn delete(&self, id: RecordId) -> Result<()> {
        self.stage(OperationType::Delete, "delete", id, |state| state.deletes.push(id))
    }
}

impl std::fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxHandle")
            .field("id", &self.inner.id)
            .field("read_version", &self.inner.read_version)
            .field("active", &self.is_active())
            .finish()
    }
}
