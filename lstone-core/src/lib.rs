pub mod error;
pub mod types;
pub mod config;
pub mod context; // cancellation and deadlines
pub mod schema;
pub mod constraint;
pub mod validation; // record validator collaborator
pub mod version;
pub mod snapshot;
pub mod manifest; // metadata store
pub mod table;
pub mod transaction;
pub mod filter;
pub mod changefeed;
pub mod stream;
pub mod engine;

pub use error::{Error, Result};
pub use types::*;
pub use config::{
    BatchOptions, BulkLoadOptions, OptimizeOptions, TableConfig, DEFAULT_BATCH_SIZE,
    DEFAULT_BULK_BATCH_SIZE, DEFAULT_CHANGE_FEED_CAPACITY, DEFAULT_STREAM_BUFFER_SIZE,
};
pub use context::{CancelHandle, Context};
pub use schema::{Field, FieldType, Schema, SchemaChanges};
pub use constraint::{Constraint, ConstraintType};
pub use validation::{AttributeRule, AttributeType, RecordValidator, Validator, ValueConstraint};
pub use version::{Operation, OperationType, Version, VersionLog};
pub use table::{
    CompactionResult, DataQualityMetrics, IndexDef, IndexType, OptimizeResult, Partition,
    QueryStats, TableMetadata,
};
pub use transaction::{Conflict, ConflictType, IsolationLevel, Transaction, TxHandle};
pub use filter::{Condition, Filter, FilterResult, Operator, SortField, SortOrder};
pub use changefeed::{ChangeEvent, ChangeType};
pub use stream::{StreamConfig, StreamEvent, StreamEventType, StreamInfo, StreamStats, StreamType, Subscription};
pub use engine::LakeEngine;
