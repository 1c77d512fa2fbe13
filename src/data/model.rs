use std::collections::BTreeSet;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, LoadResult, QueryError, QueryResult};

// ---------------------------------------------------------------------------
// Value – a single cell
// ---------------------------------------------------------------------------

/// A dynamically-typed cell value.
///
/// Groups and distinct-value sets key on `Value`, so it is totally ordered
/// and hashable: variants compare by discriminant first, floats by
/// `total_cmp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Timestamp(NaiveDateTime),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use Value::*;
        fn discriminant(v: &Value) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
                Timestamp(_) => 5,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        }
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::String(s) => s.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Null => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
            Value::Null => write!(f, "<null>"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The column type this value belongs to; `None` for `Null`.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            Value::String(_) => Some(ColumnType::String),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
        }
    }

    /// Numeric view used by `sum`/`mean`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&NaiveDateTime> {
        match self {
            Value::Timestamp(t) => Some(t),
            _ => None,
        }
    }

    /// Convert a query literal to `ty` so it compares against cells of that
    /// column. Returns `None` when no sensible conversion exists.
    pub fn coerce_to(&self, ty: ColumnType) -> Option<Value> {
        if self.column_type() == Some(ty) || self.is_null() {
            return Some(self.clone());
        }
        match (self, ty) {
            (Value::String(s), _) => parse_cell(s.trim(), ty, &[]),
            (Value::Integer(i), ColumnType::Float) => Some(Value::Float(*i as f64)),
            (Value::Float(f), ColumnType::Integer) if is_exact_i64(*f) => {
                Some(Value::Integer(*f as i64))
            }
            (Value::Integer(0), ColumnType::Bool) => Some(Value::Bool(false)),
            (Value::Integer(1), ColumnType::Bool) => Some(Value::Bool(true)),
            (Value::Integer(_) | Value::Float(_) | Value::Bool(_), ColumnType::String) => {
                Some(Value::String(self.to_string()))
            }
            _ => None,
        }
    }
}

/// 2^63, the first float above `i64::MAX`.
const I64_END: f64 = 9_223_372_036_854_775_808.0;

/// Whether `f` is a whole number representable as `i64` without saturating.
fn is_exact_i64(f: f64) -> bool {
    f.fract() == 0.0 && (-I64_END..I64_END).contains(&f)
}

/// Exact ordering of an integer against a float; `None` for NaN.
pub(crate) fn cmp_integer_float(i: i64, f: f64) -> Option<std::cmp::Ordering> {
    use std::cmp::Ordering;
    if f.is_nan() {
        return None;
    }
    if f >= I64_END {
        return Some(Ordering::Less);
    }
    if f < -I64_END {
        return Some(Ordering::Greater);
    }
    let floor = f.floor();
    match i.cmp(&(floor as i64)) {
        Ordering::Equal if f > floor => Some(Ordering::Less),
        ord => Some(ord),
    }
}

// ---------------------------------------------------------------------------
// Cell parsing
// ---------------------------------------------------------------------------

/// Timestamp layouts tried before any user-configured ones.
const BUILTIN_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
];

/// Parse a timestamp, accepting RFC 3339, the built-in layouts, a bare
/// `YYYY-MM-DD` date (midnight) and finally any `extra` chrono formats.
///
/// RFC 3339 input keeps its local wall-clock time; the offset is dropped.
pub fn parse_timestamp(s: &str, extra: &[String]) -> Option<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for fmt in BUILTIN_TIMESTAMP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    for fmt in extra {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Parse raw cell text as `ty`. The caller has already mapped null tokens.
pub fn parse_cell(s: &str, ty: ColumnType, timestamp_formats: &[String]) -> Option<Value> {
    match ty {
        ColumnType::Bool => parse_bool(s).map(Value::Bool),
        ColumnType::Integer => s.parse::<i64>().ok().map(Value::Integer),
        ColumnType::Float => s.parse::<f64>().ok().map(Value::Float),
        ColumnType::Timestamp => parse_timestamp(s, timestamp_formats).map(Value::Timestamp),
        ColumnType::String => Some(Value::String(s.to_string())),
    }
}

/// Narrowest type that can hold `s`.
pub fn guess_type(s: &str, timestamp_formats: &[String]) -> ColumnType {
    if s.parse::<i64>().is_ok() {
        return ColumnType::Integer;
    }
    if s.parse::<f64>().is_ok() {
        return ColumnType::Float;
    }
    if parse_timestamp(s, timestamp_formats).is_some() {
        return ColumnType::Timestamp;
    }
    if parse_bool(s).is_some() {
        return ColumnType::Bool;
    }
    ColumnType::String
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Bool,
    Integer,
    Float,
    Timestamp,
    String,
}

impl ColumnType {
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    /// Common type of two observations of the same column.
    pub fn unify(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Integer, Float) | (Float, Integer) => Float,
            _ => String,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Bool => "bool",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Timestamp => "timestamp",
            ColumnType::String => "string",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

/// Ordered column list shared by every record of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> LoadResult<Self> {
        if columns.is_empty() {
            return Err(LoadError::EmptyHeader);
        }
        let mut seen = BTreeSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(LoadError::DuplicateColumn(col.name.clone()));
            }
        }
        Ok(Schema { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Resolve a column name to its position and type.
    pub fn resolve(&self, name: &str) -> QueryResult<(usize, ColumnType)> {
        self.index_of(name)
            .map(|i| (i, self.columns[i].ty))
            .ok_or_else(|| QueryError::UnknownColumn(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Record – one row
// ---------------------------------------------------------------------------

/// One row, with values in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Record { values }
    }

    pub fn get(&self, index: usize) -> &Value {
        &self.values[index]
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

// ---------------------------------------------------------------------------
// Dataset – the complete loaded table
// ---------------------------------------------------------------------------

/// The full in-memory table. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Dataset {
    schema: Schema,
    records: Vec<Record>,
}

impl Dataset {
    /// Build a dataset, checking every record against the schema.
    ///
    /// Row numbers in errors are 1-based and exclude the header.
    pub fn new(schema: Schema, records: Vec<Record>) -> LoadResult<Self> {
        for (i, rec) in records.iter().enumerate() {
            if rec.values.len() != schema.len() {
                return Err(LoadError::ColumnCount {
                    row: i + 1,
                    expected: schema.len(),
                    found: rec.values.len(),
                });
            }
            for (col, val) in schema.columns.iter().zip(&rec.values) {
                if let Some(ty) = val.column_type() {
                    if ty != col.ty {
                        return Err(LoadError::TypeMismatch {
                            row: i + 1,
                            column: col.name.clone(),
                            expected: col.ty,
                            value: val.to_string(),
                        });
                    }
                }
            }
        }
        Ok(Dataset { schema, records })
    }

    /// Convenience constructor from column specs and raw rows.
    pub fn from_rows(columns: &[(&str, ColumnType)], rows: Vec<Vec<Value>>) -> LoadResult<Self> {
        let schema = Schema::new(
            columns
                .iter()
                .map(|(name, ty)| Column {
                    name: name.to_string(),
                    ty: *ty,
                })
                .collect(),
        )?;
        Dataset::new(schema, rows.into_iter().map(Record::new).collect())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn record(&self, row: usize) -> &Record {
        &self.records[row]
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset has no rows.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sorted distinct values of a column, for category pickers.
    pub fn distinct(&self, column: &str) -> QueryResult<BTreeSet<Value>> {
        let (idx, _) = self.schema.resolve(column)?;
        Ok(self.records.iter().map(|r| r.get(idx).clone()).collect())
    }
}
