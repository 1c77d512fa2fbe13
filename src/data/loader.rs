use std::fs::File;
use std::path::Path;

use arrow::array::timezone::Tz;
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{
    DataType, Date32Type, Date64Type, Float32Type, Float64Type, Int16Type, Int32Type,
    Int64Type, Int8Type, TimeUnit, TimestampMicrosecondType, TimestampMillisecondType,
    TimestampNanosecondType, TimestampSecondType, UInt16Type, UInt32Type, UInt64Type,
    UInt8Type,
};
use arrow::temporal_conversions::{
    date32_to_datetime, date64_to_datetime, timestamp_ms_to_datetime, timestamp_ns_to_datetime,
    timestamp_s_to_datetime, timestamp_us_to_datetime,
};
use chrono::{NaiveDateTime, TimeZone};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{guess_type, parse_cell, Column, ColumnType, Dataset, Record, Schema, Value};
use crate::config::ViewConfig;
use crate::error::{LoadError, LoadResult};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a dataset with the default [`ViewConfig`].
pub fn load(path: &Path) -> LoadResult<Dataset> {
    load_file(path, &ViewConfig::default())
}

/// Load a dataset from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.csv` / `.txt` – delimited text with a header row (`config.delimiter`)
/// * `.tsv`          – tab-separated text with a header row
/// * `.json`         – `[{ "col": value, ... }, ...]` (records orient)
/// * `.parquet`      – flat Parquet file with scalar columns
pub fn load_file(path: &Path, config: &ViewConfig) -> LoadResult<Dataset> {
    config.validate()?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let dataset = match ext.as_str() {
        "csv" | "txt" => load_csv(path, config, config.delimiter as u8)?,
        "tsv" => load_csv(path, config, b'\t')?,
        "json" => load_json(path, config)?,
        "parquet" | "pq" => load_parquet(path, config)?,
        other => return Err(LoadError::UnsupportedFormat(other.to_string())),
    };

    log::info!(
        "Loaded {} rows x {} columns from {}",
        dataset.len(),
        dataset.schema().len(),
        path.display()
    );
    for col in dataset.schema().columns() {
        log::debug!("  column '{}': {}", col.name, col.ty);
    }
    Ok(dataset)
}

// ---------------------------------------------------------------------------
// Text tables: shared inference for CSV and JSON
// ---------------------------------------------------------------------------

/// Cells as text before typing; `None` is a missing value.
type RawRow = Vec<Option<String>>;

fn normalize_header(name: &str, config: &ViewConfig) -> String {
    let name = name.trim();
    if config.uppercase_headers {
        name.to_uppercase()
    } else {
        name.to_string()
    }
}

fn raw_cell(cell: &str, config: &ViewConfig) -> Option<String> {
    let cell = cell.trim();
    if config.is_null_token(cell) {
        None
    } else {
        Some(cell.to_string())
    }
}

/// Pick a type per column from the first `infer_schema_rows` rows.
fn infer_types(headers: &[String], rows: &[RawRow], config: &ViewConfig) -> Vec<ColumnType> {
    let limit = config.infer_schema_rows.unwrap_or(rows.len()).min(rows.len());

    (0..headers.len())
        .map(|col| {
            if let Some(ty) = config.column_types.get(&headers[col]) {
                return *ty;
            }
            let mut ty: Option<ColumnType> = None;
            for row in &rows[..limit] {
                let Some(cell) = &row[col] else {
                    continue;
                };
                let guess = guess_type(cell, &config.timestamp_formats);
                let next = match ty {
                    None => guess,
                    Some(current) => current.unify(guess),
                };
                ty = Some(next);
                if next == ColumnType::String {
                    break;
                }
            }
            ty.unwrap_or(ColumnType::String)
        })
        .collect()
}

/// Type every cell and assemble the dataset.
fn build_dataset(
    headers: Vec<String>,
    rows: Vec<RawRow>,
    config: &ViewConfig,
) -> LoadResult<Dataset> {
    if headers.is_empty() {
        return Err(LoadError::EmptyHeader);
    }
    let types = infer_types(&headers, &rows, config);

    let mut records = Vec::with_capacity(rows.len());
    for (row_no, row) in rows.into_iter().enumerate() {
        let mut values = Vec::with_capacity(row.len());
        for (col, cell) in row.into_iter().enumerate() {
            let value = match cell {
                None => Value::Null,
                Some(text) => parse_cell(&text, types[col], &config.timestamp_formats).ok_or_else(
                    || LoadError::TypeMismatch {
                        row: row_no + 1,
                        column: headers[col].clone(),
                        expected: types[col],
                        value: text.clone(),
                    },
                )?,
            };
            values.push(value);
        }
        records.push(Record::new(values));
    }

    let schema = Schema::new(
        headers
            .into_iter()
            .zip(types)
            .map(|(name, ty)| Column { name, ty })
            .collect(),
    )?;
    Dataset::new(schema, records)
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, one record per line. Every
/// record must have exactly as many fields as the header.
fn load_csv(path: &Path, config: &ViewConfig, delimiter: u8) -> LoadResult<Dataset> {
    let file = File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(file);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| normalize_header(h, config))
        .collect();
    if headers.is_empty() {
        return Err(LoadError::EmptyHeader);
    }

    let mut rows = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result?;
        if record.len() != headers.len() {
            return Err(LoadError::ColumnCount {
                row: row_no + 1,
                expected: headers.len(),
                found: record.len(),
            });
        }
        rows.push(record.iter().map(|cell| raw_cell(cell, config)).collect());
    }

    build_dataset(headers, rows, config)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON shape (records orient, as returned by SODA endpoints):
///
/// ```json
/// [
///   { "id": "13311263", "date": "2025-01-01T00:00:00.000", "primary_type": "THEFT" },
///   ...
/// ]
/// ```
///
/// Every object must carry the same keys. Scalars are typed through the same
/// inference as CSV cells, since such APIs often deliver numbers as strings.
fn load_json(path: &Path, config: &ViewConfig) -> LoadResult<Dataset> {
    let text = std::fs::read_to_string(path)?;
    let root: JsonValue = serde_json::from_str(&text)?;

    let records = root
        .as_array()
        .ok_or_else(|| LoadError::Malformed("expected a top-level JSON array".to_string()))?;

    let Some(first) = records.first() else {
        return Err(LoadError::EmptyHeader);
    };
    let keys: Vec<String> = first
        .as_object()
        .ok_or_else(|| LoadError::SchemaMismatch {
            row: 1,
            message: "row is not a JSON object".to_string(),
        })?
        .keys()
        .cloned()
        .collect();

    let mut rows = Vec::with_capacity(records.len());
    for (i, rec) in records.iter().enumerate() {
        let obj = rec.as_object().ok_or_else(|| LoadError::SchemaMismatch {
            row: i + 1,
            message: "row is not a JSON object".to_string(),
        })?;
        if obj.len() != keys.len() {
            return Err(LoadError::ColumnCount {
                row: i + 1,
                expected: keys.len(),
                found: obj.len(),
            });
        }
        let mut row = Vec::with_capacity(keys.len());
        for key in &keys {
            let val = obj.get(key).ok_or_else(|| LoadError::SchemaMismatch {
                row: i + 1,
                message: format!("missing key '{key}'"),
            })?;
            row.push(json_to_raw(val, config));
        }
        rows.push(row);
    }

    let headers = keys.iter().map(|k| normalize_header(k, config)).collect();
    build_dataset(headers, rows, config)
}

fn json_to_raw(val: &JsonValue, config: &ViewConfig) -> Option<String> {
    match val {
        JsonValue::Null => None,
        JsonValue::String(s) => raw_cell(s, config),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a flat Parquet file. Column types come from the Arrow schema;
/// explicit `column_types` in the config convert values where possible.
/// Dictionary-encoded columns (pandas categoricals) are read as their value
/// type. Zoned timestamps are stored as wall-clock time in the column's zone.
/// Nested and binary columns are rejected as malformed.
fn load_parquet(path: &Path, config: &ViewConfig) -> LoadResult<Dataset> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let arrow_schema = builder.schema().clone();

    let mut columns = Vec::with_capacity(arrow_schema.fields().len());
    let mut source_types = Vec::with_capacity(arrow_schema.fields().len());
    let mut zones = Vec::with_capacity(arrow_schema.fields().len());
    for field in arrow_schema.fields() {
        let source = column_type_of(field.data_type()).ok_or_else(|| {
            LoadError::Malformed(format!(
                "column '{}' has unsupported type {:?}",
                field.name(),
                field.data_type()
            ))
        })?;
        let name = normalize_header(field.name(), config);
        let ty = config.column_types.get(&name).copied().unwrap_or(source);
        source_types.push(source);
        zones.push(column_zone(field.name(), field.data_type()));
        columns.push(Column { name, ty });
    }
    let schema = Schema::new(columns)?;

    let reader = builder.build()?;
    let mut records = Vec::new();
    for batch_result in reader {
        let batch = batch_result?;
        let arrays = batch
            .columns()
            .iter()
            .map(decode_dictionary)
            .collect::<LoadResult<Vec<_>>>()?;
        for row in 0..batch.num_rows() {
            let row_no = records.len() + 1;
            let mut values = Vec::with_capacity(schema.len());
            for (col_idx, col) in schema.columns().iter().enumerate() {
                let value = extract_value(&arrays[col_idx], row, zones[col_idx].as_ref())?;
                let value = if col.ty == source_types[col_idx] {
                    value
                } else {
                    value.coerce_to(col.ty).ok_or_else(|| LoadError::TypeMismatch {
                        row: row_no,
                        column: col.name.clone(),
                        expected: col.ty,
                        value: value.to_string(),
                    })?
                };
                values.push(value);
            }
            records.push(Record::new(values));
        }
    }

    Dataset::new(schema, records)
}

// -- Arrow helpers --

fn column_type_of(dt: &DataType) -> Option<ColumnType> {
    match dt {
        DataType::Boolean => Some(ColumnType::Bool),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => Some(ColumnType::Integer),
        DataType::Float32 | DataType::Float64 => Some(ColumnType::Float),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View | DataType::Null => {
            Some(ColumnType::String)
        }
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _) => {
            Some(ColumnType::Timestamp)
        }
        DataType::Dictionary(_, value) => column_type_of(value),
        _ => None,
    }
}

/// Unpack a dictionary-encoded array into a plain array of its value type.
fn decode_dictionary(col: &ArrayRef) -> LoadResult<ArrayRef> {
    match col.data_type() {
        DataType::Dictionary(_, value) => Ok(cast(col, value)?),
        _ => Ok(ArrayRef::clone(col)),
    }
}

/// Time zone of a zoned timestamp column. Only fixed offsets such as
/// `-06:00` are understood; other zones are read as UTC.
fn column_zone(name: &str, dt: &DataType) -> Option<Tz> {
    let tz = match dt {
        DataType::Timestamp(_, Some(tz)) => tz,
        DataType::Dictionary(_, value) => return column_zone(name, value),
        _ => return None,
    };
    match tz.parse::<Tz>() {
        Ok(tz) => Some(tz),
        Err(e) => {
            log::warn!("column '{name}': time zone {tz} not understood ({e}), reading as UTC");
            None
        }
    }
}

/// Extract a single value from an Arrow column at a given row.
fn extract_value(col: &ArrayRef, row: usize, zone: Option<&Tz>) -> LoadResult<Value> {
    if col.is_null(row) {
        return Ok(Value::Null);
    }
    let value = match col.data_type() {
        DataType::Boolean => Value::Bool(col.as_boolean().value(row)),
        DataType::Int8 => Value::Integer(col.as_primitive::<Int8Type>().value(row).into()),
        DataType::Int16 => Value::Integer(col.as_primitive::<Int16Type>().value(row).into()),
        DataType::Int32 => Value::Integer(col.as_primitive::<Int32Type>().value(row).into()),
        DataType::Int64 => Value::Integer(col.as_primitive::<Int64Type>().value(row)),
        DataType::UInt8 => Value::Integer(col.as_primitive::<UInt8Type>().value(row).into()),
        DataType::UInt16 => Value::Integer(col.as_primitive::<UInt16Type>().value(row).into()),
        DataType::UInt32 => Value::Integer(col.as_primitive::<UInt32Type>().value(row).into()),
        DataType::UInt64 => {
            let v = col.as_primitive::<UInt64Type>().value(row);
            let v = i64::try_from(v).map_err(|_| {
                LoadError::Malformed(format!(
                    "row {}: {v} does not fit in a 64-bit integer",
                    row + 1
                ))
            })?;
            Value::Integer(v)
        }
        DataType::Float32 => Value::Float(col.as_primitive::<Float32Type>().value(row).into()),
        DataType::Float64 => Value::Float(col.as_primitive::<Float64Type>().value(row)),
        DataType::Utf8 => Value::String(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => Value::String(col.as_string::<i64>().value(row).to_string()),
        DataType::Utf8View => Value::String(col.as_string_view().value(row).to_string()),
        DataType::Null => Value::Null,
        DataType::Date32 => {
            let days = col.as_primitive::<Date32Type>().value(row);
            timestamp(date32_to_datetime(days), row)?
        }
        DataType::Date64 => {
            let millis = col.as_primitive::<Date64Type>().value(row);
            timestamp(date64_to_datetime(millis), row)?
        }
        DataType::Timestamp(unit, _) => {
            let dt = match unit {
                TimeUnit::Second => {
                    let v = col.as_primitive::<TimestampSecondType>().value(row);
                    timestamp_s_to_datetime(v)
                }
                TimeUnit::Millisecond => {
                    let v = col.as_primitive::<TimestampMillisecondType>().value(row);
                    timestamp_ms_to_datetime(v)
                }
                TimeUnit::Microsecond => {
                    let v = col.as_primitive::<TimestampMicrosecondType>().value(row);
                    timestamp_us_to_datetime(v)
                }
                TimeUnit::Nanosecond => {
                    let v = col.as_primitive::<TimestampNanosecondType>().value(row);
                    timestamp_ns_to_datetime(v)
                }
            };
            let dt = match (dt, zone) {
                (Some(utc), Some(tz)) => Some(tz.from_utc_datetime(&utc).naive_local()),
                (dt, _) => dt,
            };
            timestamp(dt, row)?
        }
        other => {
            return Err(LoadError::Malformed(format!("unsupported Arrow type {other:?}")));
        }
    };
    Ok(value)
}

fn timestamp(dt: Option<NaiveDateTime>, row: usize) -> LoadResult<Value> {
    dt.map(Value::Timestamp)
        .ok_or_else(|| LoadError::Malformed(format!("row {}: timestamp out of range", row + 1)))
}
