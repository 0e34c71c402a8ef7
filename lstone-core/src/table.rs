/// Table catalog types: metadata, partitions, index definitions, query and
/// data-quality statistics, optimize/compaction results.

use crate::{Record, Schema, VersionId, CALORIES_FIELD, DURATION_FIELD, NAME_FIELD, TYPE_FIELD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

pub const TABLE_FORMAT: &str = "lakestone";

/// Durations above this many minutes count as outliers
pub const DURATION_OUTLIER_MINUTES: i64 = 240;
/// Calorie counts above this count as outliers
pub const CALORIES_OUTLIER: i64 = 2000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub location: String,
    pub format: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub current_version: VersionId,
    pub record_count: u64,
    pub file_count: u64,
    pub size_bytes: u64,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub partition_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TableMetadata {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            location: location.into(),
            format: TABLE_FORMAT.to_string(),
            created_at: now,
            last_modified: now,
            current_version: 0,
            record_count: 0,
            file_count: 0,
            size_bytes: 0,
            properties: BTreeMap::new(),
            partition_fields: Vec::new(),
            owner: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub values: BTreeMap<String, String>,
    pub record_count: u64,
    pub file_count: u64,
    pub size_bytes: u64,
    pub location: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    BTree,
    Hash,
    Bloom,
    ZOrder,
}

/// Metadata-only index definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(rename = "type")]
    pub index_type: IndexType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    pub total_queries: u64,
    pub records_scanned: u64,
    pub records_returned: u64,
    pub average_latency: Duration,
    pub last_latency: Duration,
    pub last_updated: Option<DateTime<Utc>>,
}

impl QueryStats {
    /// Fold one finished query into the running totals
    pub fn record(&mut self, scanned: u64, returned: u64, latency: Duration) {
        let total = self.average_latency * self.total_queries as u32 + latency;
        self.total_queries += 1;
        self.average_latency = total / self.total_queries as u32;
        self.last_latency = latency;
        self.records_scanned += scanned;
        self.records_returned += returned;
        self.last_updated = Some(Utc::now());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityMetrics {
    pub total_records: u64,
    pub null_values: BTreeMap<String, u64>,
    pub unique_values: BTreeMap<String, u64>,
    pub duplicate_records: u64,
    pub data_type_mismatches: BTreeMap<String, u64>,
    pub outlier_counts: BTreeMap<String, u64>,
    pub completeness_score: f64,
    pub validity_score: f64,
    pub consistency_score: f64,
    pub last_updated: DateTime<Utc>,
}

impl DataQualityMetrics {
    /// Profile `records` against the fields of `schema`
    pub fn compute<'a>(schema: &Schema, records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut metrics = DataQualityMetrics {
            total_records: 0,
            null_values: schema.fields.iter().map(|f| (f.name.clone(), 0)).collect(),
            unique_values: BTreeMap::new(),
            duplicate_records: 0,
            data_type_mismatches: BTreeMap::new(),
            outlier_counts: BTreeMap::new(),
            completeness_score: 100.0,
            validity_score: 100.0,
            consistency_score: 100.0,
            last_updated: Utc::now(),
        };

        let mut names = HashSet::new();
        let mut types = HashSet::new();
        let mut seen = HashSet::new();
        let mut invalid_records = 0u64;

        for record in records {
            metrics.total_records += 1;
            let mut valid = true;

            for field in &schema.fields {
                match record.field(&field.name) {
                    Some(value) if !value.is_blank() => {
                        if !field.field_type.matches(&value) {
                            *metrics.data_type_mismatches.entry(field.name.clone()).or_insert(0) += 1;
                            valid = false;
                        }
                    }
                    _ => {
                        *metrics.null_values.entry(field.name.clone()).or_insert(0) += 1;
                    }
                }
            }
            if !valid {
                invalid_records += 1;
            }

            if let Some(name) = record.name().filter(|n| !n.trim().is_empty()) {
                names.insert(name.to_string());
            }
            if let Some(t) = record.record_type().filter(|t| !t.trim().is_empty()) {
                types.insert(t.to_string());
            }

            let day = record
                .date()
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            if !seen.insert((record.name().unwrap_or_default().to_string(), day)) {
                metrics.duplicate_records += 1;
            }

            if record.get(DURATION_FIELD).and_then(|v| v.as_int()).map_or(false, |d| d > DURATION_OUTLIER_MINUTES) {
                *metrics.outlier_counts.entry(DURATION_FIELD.to_string()).or_insert(0) += 1;
            }
            if record.get(CALORIES_FIELD).and_then(|v| v.as_int()).map_or(false, |c| c > CALORIES_OUTLIER) {
                *metrics.outlier_counts.entry(CALORIES_FIELD.to_string()).or_insert(0) += 1;
            }
        }

        metrics.unique_values.insert(NAME_FIELD.to_string(), names.len() as u64);
        metrics.unique_values.insert(TYPE_FIELD.to_string(), types.len() as u64);

        if metrics.total_records > 0 {
            let total = metrics.total_records as f64;
            let cells = total * schema.fields.len().max(1) as f64;
            let nulls: u64 = metrics.null_values.values().sum();
            metrics.completeness_score = (cells - nulls as f64) / cells * 100.0;
            metrics.validity_score = (total - invalid_records as f64) / total * 100.0;
            metrics.consistency_score = (total - metrics.duplicate_records as f64) / total * 100.0;
        }

        metrics
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeResult {
    pub version: VersionId,
    pub files_added: u64,
    pub files_removed: u64,
    pub partitions_optimized: u64,
    pub records_rewritten: u64,
    pub bytes_written: u64,
    pub bytes_removed: u64,
    pub duration: Duration,
    pub metrics: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionResult {
    pub version: VersionId,
    pub files_compacted: u64,
    pub files_created: u64,
    pub records_processed: u64,
    /// Bytes saved by the rewrite (0 when the new file is not smaller)
    pub space_reclaimed: u64,
    pub duration: Duration,
}
