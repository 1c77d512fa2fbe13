use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::model::{cmp_integer_float, ColumnType, Dataset, Record, Schema, Value};
use crate::error::{QueryError, QueryResult};

// ---------------------------------------------------------------------------
// Filter predicates
// ---------------------------------------------------------------------------

/// One condition on a column. Serialized with an `op` tag so a presentation
/// layer can send filters as JSON:
///
/// ```json
/// { "op": "range", "column": "DATE", "min": "2024-01-01", "max": "2024-12-31" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Equals {
        column: String,
        value: Value,
    },
    /// Category membership.
    OneOf {
        column: String,
        values: Vec<Value>,
    },
    /// Inclusive on both ends; nulls never match.
    Range {
        column: String,
        #[serde(default)]
        min: Option<Value>,
        #[serde(default)]
        max: Option<Value>,
    },
    NotNull {
        column: String,
    },
    IsNull {
        column: String,
    },
    /// Case-insensitive substring match on a string column.
    Contains {
        column: String,
        needle: String,
    },
}

impl Predicate {
    pub fn equals(column: &str, value: impl Into<Value>) -> Self {
        Predicate::Equals {
            column: column.to_string(),
            value: value.into(),
        }
    }

    pub fn one_of<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Predicate::OneOf {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn range(column: &str, min: Option<Value>, max: Option<Value>) -> Self {
        Predicate::Range {
            column: column.to_string(),
            min,
            max,
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Predicate::Equals { column, .. }
            | Predicate::OneOf { column, .. }
            | Predicate::Range { column, .. }
            | Predicate::NotNull { column }
            | Predicate::IsNull { column }
            | Predicate::Contains { column, .. } => column,
        }
    }
}

/// A conjunction of predicates. An empty filter selects every row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub predicates: Vec<Predicate>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Key under which the engine memoizes results. Predicates are sorted,
    /// so specs that differ only in predicate order share a key.
    pub fn canonical_key(&self) -> String {
        let mut parts: Vec<String> = self.predicates.iter().map(|p| format!("{p:?}")).collect();
        parts.sort();
        parts.dedup();
        parts.join("&")
    }
}

// ---------------------------------------------------------------------------
// Bound predicates: column resolved, literals coerced
// ---------------------------------------------------------------------------

enum Bound {
    Equals(usize, Value),
    OneOf(usize, BTreeSet<Value>),
    Range(usize, Option<Value>, Option<Value>),
    NotNull(usize),
    IsNull(usize),
    Contains(usize, String),
}

fn coerce(column: &str, ty: ColumnType, value: &Value) -> QueryResult<Value> {
    if let Some(v) = value.coerce_to(ty) {
        return Ok(v);
    }
    // fractional or out-of-range numbers still bound an integer column
    if ty == ColumnType::Integer {
        if let Some(Value::Float(f)) = value.coerce_to(ColumnType::Float) {
            if !f.is_nan() {
                return Ok(Value::Float(f));
            }
        }
    }
    Err(QueryError::TypeMismatch {
        column: column.to_string(),
        actual: ty,
        message: format!("cannot compare with '{value}'"),
    })
}

/// Order a cell against a bound, comparing integers and floats by value.
fn compare(cell: &Value, bound: &Value) -> Option<Ordering> {
    match (cell, bound) {
        (Value::Integer(i), Value::Float(f)) => cmp_integer_float(*i, *f),
        _ => Some(cell.cmp(bound)),
    }
}

fn bind(schema: &Schema, predicate: &Predicate) -> QueryResult<Bound> {
    let column = predicate.column();
    let (idx, ty) = schema.resolve(column)?;
    let bound = match predicate {
        Predicate::Equals { value, .. } => Bound::Equals(idx, coerce(column, ty, value)?),
        Predicate::OneOf { values, .. } => Bound::OneOf(
            idx,
            values
                .iter()
                .map(|v| coerce(column, ty, v))
                .collect::<QueryResult<_>>()?,
        ),
        Predicate::Range { min, max, .. } => {
            if min.is_none() && max.is_none() {
                return Err(QueryError::InvalidPredicate {
                    column: column.to_string(),
                    message: "range needs at least one bound".to_string(),
                });
            }
            let min = min.as_ref().map(|v| coerce(column, ty, v)).transpose()?;
            let max = max.as_ref().map(|v| coerce(column, ty, v)).transpose()?;
            Bound::Range(idx, min, max)
        }
        Predicate::NotNull { .. } => Bound::NotNull(idx),
        Predicate::IsNull { .. } => Bound::IsNull(idx),
        Predicate::Contains { needle, .. } => {
            if ty != ColumnType::String {
                return Err(QueryError::TypeMismatch {
                    column: column.to_string(),
                    actual: ty,
                    message: "substring match needs a string column".to_string(),
                });
            }
            Bound::Contains(idx, needle.to_lowercase())
        }
    };
    Ok(bound)
}

impl Bound {
    fn matches(&self, record: &Record) -> bool {
        match self {
            Bound::Equals(idx, value) => record.get(*idx) == value,
            Bound::OneOf(idx, values) => values.contains(record.get(*idx)),
            Bound::Range(idx, min, max) => {
                let cell = record.get(*idx);
                if cell.is_null() {
                    return false;
                }
                let above = min
                    .as_ref()
                    .map_or(true, |m| compare(cell, m).is_some_and(Ordering::is_ge));
                let below = max
                    .as_ref()
                    .map_or(true, |m| compare(cell, m).is_some_and(Ordering::is_le));
                above && below
            }
            Bound::NotNull(idx) => !record.get(*idx).is_null(),
            Bound::IsNull(idx) => record.get(*idx).is_null(),
            Bound::Contains(idx, needle) => match record.get(*idx) {
                Value::String(s) => s.to_lowercase().contains(needle.as_str()),
                _ => false,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// ViewResult – the matching rows
// ---------------------------------------------------------------------------

/// Rows of a dataset selected by a filter, as indices into the dataset.
#[derive(Debug, Clone)]
pub struct ViewResult<'a> {
    dataset: &'a Dataset,
    rows: Arc<[usize]>,
}

impl PartialEq for ViewResult<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.dataset, other.dataset) && self.rows == other.rows
    }
}

impl<'a> ViewResult<'a> {
    /// Every row of the dataset, in source order.
    pub fn all(dataset: &'a Dataset) -> Self {
        Self::from_rows(dataset, (0..dataset.len()).collect())
    }

    pub(crate) fn from_rows(dataset: &'a Dataset, rows: Arc<[usize]>) -> Self {
        ViewResult { dataset, rows }
    }

    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Positions of the selected rows in the dataset.
    pub fn row_indices(&self) -> &[usize] {
        &self.rows
    }

    pub(crate) fn shared_rows(&self) -> Arc<[usize]> {
        Arc::clone(&self.rows)
    }

    pub fn records(&self) -> impl Iterator<Item = &'a Record> + '_ {
        let dataset = self.dataset;
        self.rows.iter().map(move |&i| dataset.record(i))
    }

    /// Values of one column across the view.
    pub fn column_values(&self, column: &str) -> QueryResult<Vec<&'a Value>> {
        let (idx, _) = self.dataset.schema().resolve(column)?;
        Ok(self.records().map(|r| r.get(idx)).collect())
    }

    /// Reorder by a column (stable, nulls last in either direction) and
    /// optionally keep only the first `limit` rows.
    pub fn sorted_by(
        &self,
        column: &str,
        descending: bool,
        limit: Option<usize>,
    ) -> QueryResult<ViewResult<'a>> {
        let (idx, _) = self.dataset.schema().resolve(column)?;
        let dataset = self.dataset;
        let mut rows = self.rows.to_vec();
        rows.sort_by(|&a, &b| {
            let va = dataset.record(a).get(idx);
            let vb = dataset.record(b).get(idx);
            match (va.is_null(), vb.is_null()) {
                (true, true) => std::cmp::Ordering::Equal,
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                (false, false) if descending => vb.cmp(va),
                (false, false) => va.cmp(vb),
            }
        });
        if let Some(n) = limit {
            rows.truncate(n);
        }
        Ok(ViewResult::from_rows(dataset, rows.into()))
    }

    /// The first `n` rows of the view.
    pub fn head(&self, n: usize) -> ViewResult<'a> {
        ViewResult::from_rows(self.dataset, self.rows.iter().take(n).copied().collect())
    }

    /// Row indices in ascending source order; borrowed when already sorted.
    pub(crate) fn source_order(&self) -> Cow<'_, [usize]> {
        if self.rows.windows(2).all(|w| w[0] < w[1]) {
            Cow::Borrowed(&self.rows)
        } else {
            let mut rows = self.rows.to_vec();
            rows.sort_unstable();
            Cow::Owned(rows)
        }
    }
}

// ---------------------------------------------------------------------------
// filter
// ---------------------------------------------------------------------------

/// Return the rows that pass every predicate of `spec`, in source order.
///
/// All predicates are validated before any row is scanned, so an unknown
/// column is reported even for an empty dataset.
pub fn filter<'a>(dataset: &'a Dataset, spec: &FilterSpec) -> QueryResult<ViewResult<'a>> {
    let bound = spec
        .predicates
        .iter()
        .map(|p| bind(dataset.schema(), p))
        .collect::<QueryResult<Vec<_>>>()?;

    if bound.is_empty() {
        return Ok(ViewResult::all(dataset));
    }

    let rows: Arc<[usize]> = dataset
        .records()
        .iter()
        .enumerate()
        .filter(|(_, rec)| bound.iter().all(|b| b.matches(rec)))
        .map(|(i, _)| i)
        .collect();
    Ok(ViewResult::from_rows(dataset, rows))
}
