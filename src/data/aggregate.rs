use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

use super::filter::ViewResult;
use super::model::{ColumnType, Record, Schema, Value};
use crate::error::{QueryError, QueryResult};

pub const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

// ---------------------------------------------------------------------------
// Group keys
// ---------------------------------------------------------------------------

/// What rows are grouped by: a column's value, or a calendar field of a
/// timestamp column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "column", rename_all = "snake_case")]
pub enum GroupKey {
    Column(String),
    Year(String),
    /// 1 to 12.
    Month(String),
    /// 0 to 23.
    Hour(String),
    /// `"Mon"` to `"Sun"`.
    Weekday(String),
}

impl GroupKey {
    pub fn column(&self) -> &str {
        match self {
            GroupKey::Column(c)
            | GroupKey::Year(c)
            | GroupKey::Month(c)
            | GroupKey::Hour(c)
            | GroupKey::Weekday(c) => c,
        }
    }

    fn bind(&self, schema: &Schema) -> QueryResult<BoundKey> {
        let (idx, ty) = schema.resolve(self.column())?;
        if !matches!(self, GroupKey::Column(_)) && ty != ColumnType::Timestamp {
            return Err(QueryError::TypeMismatch {
                column: self.column().to_string(),
                actual: ty,
                message: format!("{self} needs a timestamp column"),
            });
        }
        Ok(BoundKey {
            idx,
            key: self.clone(),
        })
    }
}

/// Accepts `COL` or `year:COL`, `month:COL`, `hour:COL`, `weekday:COL`.
impl FromStr for GroupKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = match s.split_once(':') {
            Some(("year", c)) => GroupKey::Year(c.to_string()),
            Some(("month", c)) => GroupKey::Month(c.to_string()),
            Some(("hour", c)) => GroupKey::Hour(c.to_string()),
            Some(("weekday", c)) => GroupKey::Weekday(c.to_string()),
            _ => GroupKey::Column(s.to_string()),
        };
        if key.column().is_empty() {
            return Err(format!("missing column name in '{s}'"));
        }
        Ok(key)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Column(c) => write!(f, "{c}"),
            GroupKey::Year(c) => write!(f, "year:{c}"),
            GroupKey::Month(c) => write!(f, "month:{c}"),
            GroupKey::Hour(c) => write!(f, "hour:{c}"),
            GroupKey::Weekday(c) => write!(f, "weekday:{c}"),
        }
    }
}

struct BoundKey {
    idx: usize,
    key: GroupKey,
}

impl BoundKey {
    fn key_of(&self, record: &Record) -> Value {
        let cell = record.get(self.idx);
        if let GroupKey::Column(_) = self.key {
            return cell.clone();
        }
        let Some(ts) = cell.as_timestamp() else {
            return Value::Null;
        };
        match self.key {
            GroupKey::Year(_) => Value::Integer(ts.year().into()),
            GroupKey::Month(_) => Value::Integer(ts.month().into()),
            GroupKey::Hour(_) => Value::Integer(ts.hour().into()),
            GroupKey::Weekday(_) => {
                Value::from(WEEKDAYS[ts.weekday().num_days_from_monday() as usize])
            }
            GroupKey::Column(_) => cell.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "fn", content = "column", rename_all = "snake_case")]
pub enum Metric {
    /// Number of rows.
    Count,
    /// Sum of non-null values; integer columns stay integer.
    Sum(String),
    /// Mean of non-null values; null when there are none.
    Mean(String),
}

/// Accepts `count`, `sum:COL`, `mean:COL`.
impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s == "count" => Ok(Metric::Count),
            Some(("sum", c)) if !c.is_empty() => Ok(Metric::Sum(c.to_string())),
            Some(("mean", c)) if !c.is_empty() => Ok(Metric::Mean(c.to_string())),
            _ => Err(format!(
                "unknown metric '{s}' (expected count, sum:COL or mean:COL)"
            )),
        }
    }
}

enum BoundMetric {
    Count,
    Sum { idx: usize, ty: ColumnType, column: String },
    Mean { idx: usize },
}

impl Metric {
    fn bind(&self, schema: &Schema) -> QueryResult<BoundMetric> {
        let (column, is_sum) = match self {
            Metric::Count => return Ok(BoundMetric::Count),
            Metric::Sum(c) => (c, true),
            Metric::Mean(c) => (c, false),
        };
        let (idx, ty) = schema.resolve(column)?;
        if !ty.is_numeric() {
            return Err(QueryError::TypeMismatch {
                column: column.clone(),
                actual: ty,
                message: format!("{} needs a numeric column", if is_sum { "sum" } else { "mean" }),
            });
        }
        Ok(if is_sum {
            BoundMetric::Sum {
                idx,
                ty,
                column: column.clone(),
            }
        } else {
            BoundMetric::Mean { idx }
        })
    }
}

#[derive(Default)]
struct Accumulator {
    rows: i64,
    int_sum: i64,
    float_sum: f64,
    non_null: u64,
}

impl Accumulator {
    fn update(&mut self, metric: &BoundMetric, record: &Record) -> QueryResult<()> {
        self.rows += 1;
        match metric {
            BoundMetric::Count => {}
            BoundMetric::Sum { idx, column, .. } => match record.get(*idx) {
                Value::Integer(i) => {
                    self.int_sum = self
                        .int_sum
                        .checked_add(*i)
                        .ok_or_else(|| QueryError::Overflow(column.clone()))?;
                    self.non_null += 1;
                }
                Value::Float(f) => {
                    self.float_sum += f;
                    self.non_null += 1;
                }
                _ => {}
            },
            BoundMetric::Mean { idx } => {
                if let Some(v) = record.get(*idx).as_f64() {
                    self.float_sum += v;
                    self.non_null += 1;
                }
            }
        }
        Ok(())
    }

    fn finish(&self, metric: &BoundMetric) -> Value {
        match metric {
            BoundMetric::Count => Value::Integer(self.rows),
            BoundMetric::Sum {
                ty: ColumnType::Integer,
                ..
            } => Value::Integer(self.int_sum),
            BoundMetric::Sum { .. } => Value::Float(self.float_sum),
            BoundMetric::Mean { .. } if self.non_null == 0 => Value::Null,
            BoundMetric::Mean { .. } => Value::Float(self.float_sum / self.non_null as f64),
        }
    }
}

// ---------------------------------------------------------------------------
// aggregate
// ---------------------------------------------------------------------------

/// One output row of [`aggregate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub key: Value,
    pub value: Value,
}

impl Group {
    pub fn new(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Group {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Group the view by `group_by` and compute `metric` per group.
///
/// Groups come out in order of first appearance in the dataset. Rows whose
/// key is null form a `Null` group, so per-group counts always add up to
/// the view's length.
pub fn aggregate(
    view: &ViewResult<'_>,
    group_by: &GroupKey,
    metric: &Metric,
) -> QueryResult<Vec<Group>> {
    let dataset = view.dataset();
    let key = group_by.bind(dataset.schema())?;
    let metric = metric.bind(dataset.schema())?;

    let mut slots: HashMap<Value, usize> = HashMap::new();
    let mut groups: Vec<(Value, Accumulator)> = Vec::new();
    for &row in view.source_order().iter() {
        let record = dataset.record(row);
        let k = key.key_of(record);
        let slot = match slots.get(&k) {
            Some(&slot) => slot,
            None => {
                slots.insert(k.clone(), groups.len());
                groups.push((k, Accumulator::default()));
                groups.len() - 1
            }
        };
        groups[slot].1.update(&metric, record)?;
    }

    log::debug!(
        "aggregate {group_by} over {} rows: {} groups",
        view.len(),
        groups.len()
    );
    Ok(groups
        .into_iter()
        .map(|(key, acc)| Group {
            key,
            value: acc.finish(&metric),
        })
        .collect())
}

/// The metric over the whole view, without grouping.
pub fn aggregate_total(view: &ViewResult<'_>, metric: &Metric) -> QueryResult<Value> {
    let dataset = view.dataset();
    let metric = metric.bind(dataset.schema())?;
    let mut acc = Accumulator::default();
    for record in view.records() {
        acc.update(&metric, record)?;
    }
    Ok(acc.finish(&metric))
}

/// Largest `n` groups by value; ties keep their incoming order.
pub fn top_n(mut groups: Vec<Group>, n: usize) -> Vec<Group> {
    groups.sort_by(|a, b| b.value.cmp(&a.value));
    groups.truncate(n);
    groups
}

/// Order groups by key: calendar order for weekday keys, value order
/// otherwise. Null keys go last.
pub fn sort_groups_by_key(mut groups: Vec<Group>, group_by: &GroupKey) -> Vec<Group> {
    let rank = |v: &Value| -> (bool, usize) {
        match v {
            Value::String(s) => {
                let day = WEEKDAYS.iter().position(|d| *d == s.as_str());
                (false, day.unwrap_or(WEEKDAYS.len()))
            }
            _ => (true, 0),
        }
    };
    if let GroupKey::Weekday(_) = group_by {
        groups.sort_by_key(|g| rank(&g.key));
    } else {
        groups.sort_by(|a, b| match (a.key.is_null(), b.key.is_null()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => a.key.cmp(&b.key),
        });
    }
    groups
}

// ---------------------------------------------------------------------------
// pivot
// ---------------------------------------------------------------------------

/// Row counts over two keys, e.g. weekday × hour for a heatmap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pivot {
    pub row_labels: Vec<Value>,
    pub column_labels: Vec<Value>,
    /// `counts[r][c]` is the number of rows with both labels; 0 when absent.
    pub counts: Vec<Vec<i64>>,
}

impl Pivot {
    pub fn get(&self, row: &Value, column: &Value) -> Option<i64> {
        let r = self.row_labels.iter().position(|v| v == row)?;
        let c = self.column_labels.iter().position(|v| v == column)?;
        Some(self.counts[r][c])
    }

    pub fn row_totals(&self) -> Vec<i64> {
        self.counts.iter().map(|r| r.iter().sum()).collect()
    }

    pub fn total(&self) -> i64 {
        self.row_totals().iter().sum()
    }
}

/// Count rows by (`rows`, `columns`). Labels appear in first-appearance order.
pub fn pivot(view: &ViewResult<'_>, rows: &GroupKey, columns: &GroupKey) -> QueryResult<Pivot> {
    let dataset = view.dataset();
    let row_key = rows.bind(dataset.schema())?;
    let col_key = columns.bind(dataset.schema())?;

    let mut row_slots: HashMap<Value, usize> = HashMap::new();
    let mut col_slots: HashMap<Value, usize> = HashMap::new();
    let mut row_labels = Vec::new();
    let mut column_labels = Vec::new();
    let mut cells: Vec<(usize, usize)> = Vec::with_capacity(view.len());

    for &row in view.source_order().iter() {
        let record = dataset.record(row);
        let rk = row_key.key_of(record);
        let ck = col_key.key_of(record);
        let r = *row_slots.entry(rk.clone()).or_insert_with(|| {
            row_labels.push(rk);
            row_labels.len() - 1
        });
        let c = *col_slots.entry(ck.clone()).or_insert_with(|| {
            column_labels.push(ck);
            column_labels.len() - 1
        });
        cells.push((r, c));
    }

    let mut counts = vec![vec![0i64; column_labels.len()]; row_labels.len()];
    for (r, c) in cells {
        counts[r][c] += 1;
    }
    Ok(Pivot {
        row_labels,
        column_labels,
        counts,
    })
}

// ---------------------------------------------------------------------------
// missing values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingStat {
    pub column: String,
    pub missing: usize,
    /// Percent of the view's rows, rounded to two decimals.
    pub rate: f64,
}

/// Null count per column, highest rate first (schema order on ties).
pub fn missing_summary(view: &ViewResult<'_>) -> Vec<MissingStat> {
    let schema = view.dataset().schema();
    let mut missing = vec![0usize; schema.len()];
    for record in view.records() {
        for (i, v) in record.values().iter().enumerate() {
            if v.is_null() {
                missing[i] += 1;
            }
        }
    }

    let total = view.len();
    let mut stats: Vec<MissingStat> = schema
        .columns()
        .iter()
        .zip(missing)
        .map(|(col, missing)| {
            let rate = if total == 0 {
                0.0
            } else {
                (missing as f64 / total as f64 * 10_000.0).round() / 100.0
            };
            MissingStat {
                column: col.name.clone(),
                missing,
                rate,
            }
        })
        .collect();
    stats.sort_by(|a, b| b.rate.total_cmp(&a.rate));
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::filter::{filter, FilterSpec, Predicate};
    use crate::data::model::{parse_timestamp, Dataset};

    fn ts(s: &str) -> Value {
        Value::Timestamp(parse_timestamp(s, &[]).unwrap())
    }

    fn crimes() -> Dataset {
        Dataset::from_rows(
            &[
                ("category", ColumnType::String),
                ("date", ColumnType::Timestamp),
                ("ward", ColumnType::Integer),
                ("lat", ColumnType::Float),
            ],
            vec![
                vec![
                    "theft".into(),
                    ts("2023-01-01 10:00:00"),
                    Value::Integer(3),
                    Value::Float(41.5),
                ],
                vec!["assault".into(), ts("2023-01-02 23:00:00"), Value::Null, Value::Null],
                vec![
                    "theft".into(),
                    ts("2023-02-01 10:30:00"),
                    Value::Integer(7),
                    Value::Float(42.5),
                ],
            ],
        )
        .unwrap()
    }

    #[test]
    fn count_in_first_appearance_order() {
        let ds = crimes();
        let key = GroupKey::Column("category".into());
        let groups = aggregate(&ViewResult::all(&ds), &key, &Metric::Count).unwrap();
        assert_eq!(groups, vec![Group::new("theft", 2i64), Group::new("assault", 1i64)]);
    }

    #[test]
    fn count_after_filter() {
        let ds = crimes();
        let spec = FilterSpec::new().with(Predicate::equals("category", "theft"));
        let view = filter(&ds, &spec).unwrap();
        let key = GroupKey::Column("category".into());
        let groups = aggregate(&view, &key, &Metric::Count).unwrap();
        assert_eq!(groups, vec![Group::new("theft", 2i64)]);
    }

    #[test]
    fn first_appearance_survives_reordered_view() {
        let ds = crimes();
        let view = ViewResult::all(&ds).sorted_by("date", true, None).unwrap();
        let key = GroupKey::Column("category".into());
        let groups = aggregate(&view, &key, &Metric::Count).unwrap();
        assert_eq!(groups[0].key, Value::from("theft"));
    }

    #[test]
    fn sum_and_mean_skip_nulls() {
        let ds = crimes();
        let view = ViewResult::all(&ds);
        let key = GroupKey::Column("category".into());
        let sums = aggregate(&view, &key, &Metric::Sum("ward".into())).unwrap();
        assert_eq!(sums, vec![Group::new("theft", 10i64), Group::new("assault", 0i64)]);
        let means = aggregate(&view, &key, &Metric::Mean("lat".into())).unwrap();
        assert_eq!(means, vec![Group::new("theft", 42.0), Group::new("assault", Value::Null)]);
        let total = aggregate_total(&view, &Metric::Sum("lat".into())).unwrap();
        assert_eq!(total, Value::Float(84.0));
    }

    #[test]
    fn null_keys_form_their_own_group() {
        let ds = crimes();
        let key = GroupKey::Column("ward".into());
        let groups = aggregate(&ViewResult::all(&ds), &key, &Metric::Count).unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[1], Group::new(Value::Null, 1i64));
    }

    #[test]
    fn sorting_by_key_puts_null_last() {
        let ds = crimes();
        let key = GroupKey::Column("ward".into());
        let groups = aggregate(&ViewResult::all(&ds), &key, &Metric::Count).unwrap();
        let sorted = sort_groups_by_key(groups, &key);
        let keys: Vec<_> = sorted.into_iter().map(|g| g.key).collect();
        assert_eq!(keys, vec![Value::Integer(3), Value::Integer(7), Value::Null]);
    }

    #[test]
    fn calendar_keys_use_wall_clock_time() {
        let ds = Dataset::from_rows(
            &[("date", ColumnType::Timestamp)],
            vec![vec![ts("2023-01-01T23:30:00-06:00")]],
        )
        .unwrap();
        let view = ViewResult::all(&ds);
        let hours = aggregate(&view, &GroupKey::Hour("date".into()), &Metric::Count).unwrap();
        assert_eq!(hours, vec![Group::new(23i64, 1i64)]);
        let days = aggregate(&view, &GroupKey::Weekday("date".into()), &Metric::Count).unwrap();
        assert_eq!(days, vec![Group::new("Sun", 1i64)]);
    }

    #[test]
    fn derived_calendar_keys() {
        let ds = crimes();
        let view = ViewResult::all(&ds);
        let months = aggregate(&view, &GroupKey::Month("date".into()), &Metric::Count).unwrap();
        assert_eq!(months, vec![Group::new(1i64, 2i64), Group::new(2i64, 1i64)]);
        let hours = aggregate(&view, &GroupKey::Hour("date".into()), &Metric::Count).unwrap();
        assert_eq!(hours, vec![Group::new(10i64, 2i64), Group::new(23i64, 1i64)]);
        // 2023-01-01 was a Sunday
        let days = aggregate(&view, &GroupKey::Weekday("date".into()), &Metric::Count).unwrap();
        assert_eq!(days[0], Group::new("Sun", 1i64));
        let sorted = sort_groups_by_key(days, &GroupKey::Weekday("date".into()));
        let labels: Vec<_> = sorted.iter().map(|g| g.key.to_string()).collect();
        assert_eq!(labels, vec!["Mon", "Wed", "Sun"]);
    }

    #[test]
    fn query_errors() {
        let ds = crimes();
        let view = ViewResult::all(&ds);
        assert_eq!(
            aggregate(&view, &GroupKey::Column("nope".into()), &Metric::Count).unwrap_err(),
            QueryError::UnknownColumn("nope".into())
        );
        assert!(matches!(
            aggregate(&view, &GroupKey::Column("ward".into()), &Metric::Sum("category".into())),
            Err(QueryError::TypeMismatch { .. })
        ));
        assert!(matches!(
            aggregate(&view, &GroupKey::Year("category".into()), &Metric::Count),
            Err(QueryError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn integer_overflow_is_reported() {
        let ds = Dataset::from_rows(
            &[("n", ColumnType::Integer)],
            vec![vec![Value::Integer(i64::MAX)], vec![Value::Integer(1)]],
        )
        .unwrap();
        let err = aggregate_total(&ViewResult::all(&ds), &Metric::Sum("n".into())).unwrap_err();
        assert_eq!(err, QueryError::Overflow("n".into()));
    }

    #[test]
    fn top_n_breaks_ties_by_appearance() {
        let groups = vec![
            Group::new("a", 1i64),
            Group::new("b", 3i64),
            Group::new("c", 1i64),
            Group::new("d", 3i64),
        ];
        let top = top_n(groups, 3);
        let keys: Vec<_> = top.iter().map(|g| g.key.to_string()).collect();
        assert_eq!(keys, vec!["b", "d", "a"]);
    }

    #[test]
    fn pivot_counts_cells() {
        let ds = crimes();
        let p = pivot(
            &ViewResult::all(&ds),
            &GroupKey::Column("category".into()),
            &GroupKey::Hour("date".into()),
        )
        .unwrap();
        assert_eq!(p.row_labels, vec![Value::from("theft"), Value::from("assault")]);
        assert_eq!(p.get(&"theft".into(), &Value::Integer(10)), Some(2));
        assert_eq!(p.get(&"assault".into(), &Value::Integer(10)), Some(0));
        assert_eq!(p.row_totals(), vec![2, 1]);
        assert_eq!(p.total(), 3);
    }

    #[test]
    fn missing_summary_orders_by_rate() {
        let ds = crimes();
        let stats = missing_summary(&ViewResult::all(&ds));
        assert_eq!(stats[0].column, "ward");
        assert_eq!(stats[0].missing, 1);
        assert_eq!(stats[0].rate, 33.33);
        assert_eq!(stats[1].column, "lat");
        assert_eq!(stats[2].rate, 0.0);
    }

    #[test]
    fn missing_summary_of_empty_view_has_zero_rates() {
        let ds = crimes();
        let spec = FilterSpec::new().with(Predicate::equals("category", "arson"));
        let view = filter(&ds, &spec).unwrap();
        let stats = missing_summary(&view);
        assert_eq!(stats.len(), 4);
        assert!(stats.iter().all(|s| s.missing == 0 && s.rate == 0.0));
        let names: Vec<_> = stats.iter().map(|s| s.column.as_str()).collect();
        assert_eq!(names, vec!["category", "date", "ward", "lat"]);
    }

    #[test]
    fn keys_and_metrics_parse_from_text() {
        assert_eq!("weekday:DATE".parse(), Ok(GroupKey::Weekday("DATE".into())));
        assert_eq!("PRIMARY_TYPE".parse(), Ok(GroupKey::Column("PRIMARY_TYPE".into())));
        assert!("year:".parse::<GroupKey>().is_err());
        assert_eq!("sum:WARD".parse(), Ok(Metric::Sum("WARD".into())));
        assert_eq!("count".parse(), Ok(Metric::Count));
        assert!("median:WARD".parse::<Metric>().is_err());
    }
}
