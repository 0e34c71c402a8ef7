/// Table configuration and per-call option sets
///
/// `TableConfig` is persisted inside the metadata file, so a reopened table
/// keeps the configuration it was created with.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_BULK_BATCH_SIZE: usize = 5000;
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 1000;
pub const DEFAULT_CHANGE_FEED_CAPACITY: usize = 10_000;

/// Table configuration for file sizing, optimization and in-memory limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Logical table name
    pub table_name: String,

    /// Upper bound for a single data file in bytes
    pub max_file_size: u64,

    /// Files below this size are compaction candidates
    pub min_file_size: u64,

    /// Allow `optimize_table` and `compact`
    pub enable_optimization: bool,

    /// Fields the table is logically partitioned by
    pub partition_fields: Vec<String>,

    /// Maximum number of change events kept in memory (oldest evicted)
    pub change_feed_capacity: usize,

    /// Buffer size for streams started without an explicit one
    pub stream_buffer_size: usize,

    /// Chunk size for batch operations started without an explicit one
    pub batch_size: usize,

    /// Deadline applied to batch operations without an explicit timeout
    pub batch_timeout_secs: u64,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            table_name: "exercises".to_string(),
            max_file_size: 100 * 1024 * 1024,
            min_file_size: 1024 * 1024,
            enable_optimization: true,
            partition_fields: Vec::new(),
            change_feed_capacity: DEFAULT_CHANGE_FEED_CAPACITY,
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout_secs: 30 * 60,
        }
    }
}

impl TableConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    pub fn with_max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    pub fn with_min_file_size(mut self, size: u64) -> Self {
        self.min_file_size = size;
        self
    }

    pub fn with_optimization(mut self, enabled: bool) -> Self {
        self.enable_optimization = enabled;
        self
    }

    pub fn with_partition_fields(mut self, fields: Vec<String>) -> Self {
        self.partition_fields = fields;
        self
    }

    /// Set the number of change events retained in memory
    pub fn with_change_feed_capacity(mut self, capacity: usize) -> Self {
        self.change_feed_capacity = capacity;
        self
    }

    pub fn with_stream_buffer_size(mut self, size: usize) -> Self {
        self.stream_buffer_size = size;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout_secs = timeout.as_secs();
        self
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.table_name.trim().is_empty() {
            return Err("table_name must not be empty".to_string());
        }

        if self.max_file_size == 0 {
            return Err("max_file_size must be greater than 0".to_string());
        }

        if self.min_file_size > self.max_file_size {
            return Err("min_file_size must not exceed max_file_size".to_string());
        }

        if self.change_feed_capacity == 0 {
            return Err("change_feed_capacity must be greater than 0".to_string());
        }

        if self.stream_buffer_size == 0 {
            return Err("stream_buffer_size must be greater than 0".to_string());
        }

        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Options for batch insert/update/delete
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Records staged per chunk (0 = table default)
    pub batch_size: usize,
    /// Deadline for the whole batch (None = table default)
    pub timeout: Option<Duration>,
    /// Collect and skip failing items instead of aborting
    pub skip_errors: bool,
    /// Run the record validator over every record before staging
    pub validate_first: bool,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_skip_errors(mut self, skip: bool) -> Self {
        self.skip_errors = skip;
        self
    }

    pub fn with_validate_first(mut self, validate: bool) -> Self {
        self.validate_first = validate;
        self
    }

    /// Chunk size, falling back to `default` when unset
    pub fn effective_batch_size(&self, default: usize) -> usize {
        if self.batch_size == 0 {
            default.max(1)
        } else {
            self.batch_size
        }
    }
}

/// Options for bulk loading record files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkLoadOptions {
    /// Records staged per chunk (0 = 5000)
    pub batch_size: usize,
    pub timeout: Option<Duration>,
    pub skip_errors: bool,
    /// Run the record validator over every loaded record
    pub validate_schema: bool,
}

impl BulkLoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_skip_errors(mut self, skip: bool) -> Self {
        self.skip_errors = skip;
        self
    }

    pub fn with_validate_schema(mut self, validate: bool) -> Self {
        self.validate_schema = validate;
        self
    }

    /// Equivalent batch options for the single insert batch a bulk load runs
    pub fn to_batch_options(&self) -> BatchOptions {
        BatchOptions {
            batch_size: if self.batch_size == 0 {
                DEFAULT_BULK_BATCH_SIZE
            } else {
                self.batch_size
            },
            timeout: self.timeout,
            skip_errors: self.skip_errors,
            validate_first: self.validate_schema,
        }
    }
}

/// Options for table optimization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizeOptions {
    pub max_file_size: Option<u64>,
    pub min_file_size: Option<u64>,
    pub target_file_count: Option<usize>,
    /// Columns to cluster on (recorded in the operation details)
    pub z_order_columns: Vec<String>,
    pub compact_small_files: bool,
    pub rewrite_large_files: bool,
}

impl OptimizeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_z_order(mut self, columns: Vec<String>) -> Self {
        self.z_order_columns = columns;
        self
    }

    pub fn with_compact_small_files(mut self) -> Self {
        self.compact_small_files = true;
        self
    }

    pub fn with_rewrite_large_files(mut self) -> Self {
        self.rewrite_large_files = true;
        self
    }
}
