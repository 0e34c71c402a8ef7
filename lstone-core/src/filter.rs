/// Query/filter engine
///
/// Full scan of a snapshot with AND-combined conditions, single-field sort
/// and offset/limit pagination.
///
/// Only `eq`, `ne`, `gt` and `like` are evaluated. Every other operator, and
/// any condition on a field the record does not have, evaluates to "no match".
/// `gt` compares integers only and `like` is a prefix match on strings.
/// Sorting compares the string rendering of values, so numbers sort lexically.

use crate::{Record, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Like,
    NotLike,
    IsNull,
    IsNotNull,
    Between,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.field(&self.field) else {
            return false;
        };

        match self.operator {
            Operator::Eq => actual == self.value,
            Operator::Ne => actual != self.value,
            Operator::Gt => match (&actual, &self.value) {
                (Value::Int(a), Value::Int(b)) => a > b,
                _ => false,
            },
            Operator::Like => match (&actual, &self.value) {
                (Value::S(s), Value::S(prefix)) => s.starts_with(prefix.as_str()),
                _ => false,
            },
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub sort_by: Vec<SortField>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }
}

/// Outcome of evaluating a filter over a snapshot
#[derive(Debug, Clone)]
pub struct FilterResult {
    pub records: Vec<Record>,
    pub scanned: usize,
}

/// Evaluate `filter` over `records` (in id order)
pub fn apply<'a>(filter: &Filter, records: impl IntoIterator<Item = &'a Record>) -> FilterResult {
    let mut scanned = 0;
    let mut matched = Vec::new();
    for record in records {
        scanned += 1;
        if filter.matches(record) {
            matched.push(record.clone());
        }
    }

    sort_records(&mut matched, &filter.sort_by);
    let records = paginate(matched, filter.limit, filter.offset);

    FilterResult { records, scanned }
}

/// Stable sort on the first sort field only
fn sort_records(records: &mut [Record], sort_by: &[SortField]) {
    let Some(sort) = sort_by.first() else { return };

    let render = |r: &Record| r.field(&sort.field).map(|v| v.to_string()).unwrap_or_default();
    records.sort_by(|a, b| {
        let ord: Ordering = render(a).cmp(&render(b));
        match sort.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
}

fn paginate(records: Vec<Record>, limit: Option<usize>, offset: Option<usize>) -> Vec<Record> {
    let start = offset.unwrap_or(0);
    if start >= records.len() {
        return Vec::new();
    }
    let end = match limit {
        Some(limit) => start.saturating_add(limit).min(records.len()),
        None => records.len(),
    };
    records.into_iter().skip(start).take(end - start).collect()
}
