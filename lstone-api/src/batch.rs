/// Batch and bulk operations
///
/// Every batch runs as one transaction. Items are staged in chunks of the
/// configured batch size and the caller's context is checked at each chunk
/// boundary (and at each file boundary for bulk loads).
///
/// Without `skip_errors` the first failing item rolls the whole batch back.
/// With it, failing items are collected as `BatchError`s and the rest commit
/// together. A batch in which every item failed is rolled back.

use crate::Database;
use lstone_core::{
    BatchOptions, BulkLoadOptions, Context, Error, Record, RecordId, Result, Transaction, TxHandle,
    VersionId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A failed batch item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchError {
    /// Position of the item in the input
    pub index: usize,
    pub error: String,
    /// Short description of the item
    pub record: String,
}

/// Outcome of a batch operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub processed_count: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<BatchError>,
    pub duration: Duration,
    /// Version the batch committed as (the unchanged current version when
    /// there was nothing to commit)
    pub version: VersionId,
    /// Ids of the records written, in input order
    pub record_ids: Vec<RecordId>,
}

impl BatchResult {
    fn new(processed_count: usize) -> Self {
        Self {
            processed_count,
            ..Default::default()
        }
    }

    fn fail(&mut self, index: usize, error: &Error, record: String) {
        self.error_count += 1;
        self.errors.push(BatchError {
            index,
            error: error.to_string(),
            record,
        });
    }
}

/// Outcome of a bulk load
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkLoadResult {
    pub files_loaded: usize,
    pub records_loaded: u64,
    pub records_errored: u64,
    pub errors: Vec<BatchError>,
    pub duration: Duration,
    pub version: VersionId,
}

fn describe(record: &Record) -> String {
    format!("ID: {}, Name: {}", record.id, record.name().unwrap_or_default())
}

fn describe_id(id: &RecordId) -> String {
    format!("ID: {}", id)
}

impl Database {
    /// Context bounded by the batch timeout (or the table default)
    fn batch_context(&self, ctx: &Context, options: &BatchOptions) -> Context {
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.engine().config().batch_timeout());
        ctx.child_with_timeout(timeout)
    }

    /// Run the record validator over every record. Failures are recorded
    /// and returned as indexes to skip when `skip_errors` is set.
    fn validate_all(
        &self,
        records: &[Record],
        options: &BatchOptions,
        result: &mut BatchResult,
    ) -> Result<BTreeSet<usize>> {
        let mut skipped = BTreeSet::new();
        if !options.validate_first {
            return Ok(skipped);
        }
        for (index, record) in records.iter().enumerate() {
            if let Err(e) = self.validator().validate(record) {
                if !options.skip_errors {
                    return Err(e.with_context(&format!("record at index {}", index)));
                }
                result.fail(index, &e, describe(record));
                skipped.insert(index);
            }
        }
        Ok(skipped)
    }

    /// Stage `items` into one transaction and commit it
    fn run_batch<T>(
        &self,
        ctx: &Context,
        items: &[T],
        options: &BatchOptions,
        mut result: BatchResult,
        skipped: &BTreeSet<usize>,
        label: fn(&T) -> String,
        stage: impl Fn(&TxHandle, &T) -> Result<()>,
    ) -> Result<BatchResult> {
        let start = Instant::now();
        let chunk_size = options.effective_batch_size(self.engine().config().batch_size);
        let tx = self.engine().begin()?;

        for (chunk_index, chunk) in items.chunks(chunk_size).enumerate() {
            if let Err(e) = ctx.check() {
                self.abandon(&tx);
                return Err(e);
            }
            debug!("Staging batch chunk {} ({} items)", chunk_index, chunk.len());

            for (offset, item) in chunk.iter().enumerate() {
                let index = chunk_index * chunk_size + offset;
                if skipped.contains(&index) {
                    continue;
                }
                match stage(&tx, item) {
                    Ok(()) => result.success_count += 1,
                    Err(e) if options.skip_errors => result.fail(index, &e, label(item)),
                    Err(e) => {
                        self.abandon(&tx);
                        return Err(e.with_context(&format!("item at index {}", index)));
                    }
                }
            }
        }

        if result.success_count == 0 {
            self.abandon(&tx);
            if result.error_count > 0 {
                return Err(Error::validation(format!(
                    "all {} items in the batch failed",
                    result.error_count
                )));
            }
            result.version = self.engine().current_version();
            result.duration = start.elapsed();
            return Ok(result);
        }

        ctx.check().map_err(|e| {
            self.abandon(&tx);
            e
        })?;
        let version = self.engine().commit(&tx)?;
        result.version = version.id;
        result.record_ids = tx.committed_ids();
        result.duration = start.elapsed();

        info!(
            "Batch committed as version {}: {} succeeded, {} failed",
            version.id, result.success_count, result.error_count
        );
        Ok(result)
    }

    fn abandon(&self, tx: &TxHandle) {
        if let Err(e) = self.engine().rollback(tx) {
            warn!("Failed to roll back batch transaction {}: {}", tx.id(), e);
        }
    }

    /// Insert records as one transaction
    pub fn insert_batch_with_options(
        &self,
        ctx: &Context,
        records: Vec<Record>,
        options: BatchOptions,
    ) -> Result<BatchResult> {
        let ctx = self.batch_context(ctx, &options);
        let mut result = BatchResult::new(records.len());
        let skipped = self.validate_all(&records, &options, &mut result)?;

        let engine = self.engine();
        self.run_batch(&ctx, &records, &options, result, &skipped, describe, |tx, record| {
            engine.validate_records(std::slice::from_ref(record))?;
            tx.insert(record.clone())
        })
    }

    /// Replace existing records as one transaction
    pub fn update_batch(&self, ctx: &Context, records: Vec<Record>, options: BatchOptions) -> Result<BatchResult> {
        let ctx = self.batch_context(ctx, &options);
        let mut result = BatchResult::new(records.len());
        let skipped = self.validate_all(&records, &options, &mut result)?;

        let engine = self.engine();
        self.run_batch(&ctx, &records, &options, result, &skipped, describe, |tx, record| {
            if engine.get(record.id).is_none() {
                return Err(Error::NotFound(format!("record {}", record.id)));
            }
            engine.validate_records(std::slice::from_ref(record))?;
            tx.update(record.clone())
        })
    }

    /// Delete records by id as one transaction
    pub fn delete_batch(&self, ctx: &Context, ids: Vec<RecordId>, options: BatchOptions) -> Result<BatchResult> {
        let ctx = self.batch_context(ctx, &options);
        let result = BatchResult::new(ids.len());

        let engine = self.engine();
        self.run_batch(&ctx, &ids, &options, result, &BTreeSet::new(), describe_id, |tx, id| {
            if engine.get(*id).is_none() {
                return Err(Error::NotFound(format!("record {}", id)));
            }
            tx.delete(*id)
        })
    }

    /// Load JSON arrays of records from `files` and insert them as one batch
    pub fn bulk_load(&self, ctx: &Context, files: &[PathBuf], options: BulkLoadOptions) -> Result<BulkLoadResult> {
        let start = Instant::now();
        let mut records = Vec::new();

        for path in files {
            ctx.check()?;
            let data = fs::read(path)?;
            let loaded: Vec<Record> = serde_json::from_slice(&data).map_err(|e| {
                Error::InvalidArgument(format!("{} is not a JSON array of records: {}", path.display(), e))
            })?;
            debug!("Read {} records from {}", loaded.len(), path.display());
            records.extend(loaded);
        }

        let batch = self.insert_batch_with_options(ctx, records, options.to_batch_options())?;
        info!(
            "Bulk loaded {} records from {} files",
            batch.success_count,
            files.len()
        );
        Ok(BulkLoadResult {
            files_loaded: files.len(),
            records_loaded: batch.success_count as u64,
            records_errored: batch.error_count as u64,
            errors: batch.errors,
            duration: start.elapsed(),
            version: batch.version,
        })
    }
}
