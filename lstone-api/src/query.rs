/// Query builder
///
/// Provides a high-level API for filtering the current records of a table.

use lstone_core::{Condition, Filter, FilterResult, Operator, Record, SortField, SortOrder, Value};

/// Query builder
#[derive(Debug, Clone, Default)]
pub struct Query {
    filter: Filter,
}

impl Query {
    /// Create a query matching every record
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an arbitrary condition (AND-combined with the others)
    pub fn condition(mut self, field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        self.filter.conditions.push(Condition::new(field, operator, value));
        self
    }

    /// Field equals value
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(field, Operator::Eq, value)
    }

    /// Field does not equal value
    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(field, Operator::Ne, value)
    }

    /// Integer field greater than value
    pub fn gt(self, field: impl Into<String>, value: i64) -> Self {
        self.condition(field, Operator::Gt, value)
    }

    /// String field starts with prefix
    pub fn begins_with(self, field: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.condition(field, Operator::Like, Value::string(prefix))
    }

    /// Sort by a field. Only the first sort field is honored.
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.filter.sort_by.push(SortField {
            field: field.into(),
            order,
        });
        self
    }

    /// Set the maximum number of records to return
    pub fn limit(mut self, limit: usize) -> Self {
        self.filter.limit = Some(limit);
        self
    }

    /// Skip the first `offset` matching records
    pub fn offset(mut self, offset: usize) -> Self {
        self.filter.offset = Some(offset);
        self
    }

    /// Get the underlying filter
    pub fn into_filter(self) -> Filter {
        self.filter
    }
}

/// Query response
#[derive(Debug, Clone)]
pub struct QueryResponse {
    /// Records returned
    pub records: Vec<Record>,
    /// Number of records returned
    pub count: usize,
    /// Number of records examined
    pub scanned_count: usize,
}

impl QueryResponse {
    pub(crate) fn from_result(result: FilterResult) -> Self {
        let count = result.records.len();
        Self {
            records: result.records,
            count,
            scanned_count: result.scanned,
        }
    }
}
