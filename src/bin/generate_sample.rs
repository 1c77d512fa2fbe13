use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{
    BooleanArray, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use parquet::arrow::ArrowWriter;

const ROWS: usize = 5_000;

/// Crime types with relative weights and a few descriptions each.
const CRIME_TYPES: &[(&str, u32, &[&str])] = &[
    ("THEFT", 30, &["$500 AND UNDER", "OVER $500", "RETAIL THEFT"]),
    ("BATTERY", 22, &["SIMPLE", "DOMESTIC BATTERY SIMPLE", "AGGRAVATED"]),
    ("CRIMINAL DAMAGE", 12, &["TO VEHICLE", "TO PROPERTY"]),
    ("ASSAULT", 10, &["SIMPLE", "AGGRAVATED: HANDGUN"]),
    ("MOTOR VEHICLE THEFT", 8, &["AUTOMOBILE", "CYCLE, SCOOTER, BIKE WITH VIN"]),
    ("DECEPTIVE PRACTICE", 7, &["FINANCIAL IDENTITY THEFT", "CREDIT CARD FRAUD"]),
    ("BURGLARY", 6, &["FORCIBLE ENTRY", "UNLAWFUL ENTRY"]),
    ("NARCOTICS", 5, &["POSS: CANNABIS 30GMS OR LESS", "POSS: HEROIN(WHITE)"]),
];

const LOCATIONS: &[&str] = &[
    "STREET",
    "RESIDENCE",
    "APARTMENT",
    "SIDEWALK",
    "PARKING LOT/GARAGE(NON.RESID.)",
    "SMALL RETAIL STORE",
    "RESTAURANT",
];

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next_u64() % n
    }

    fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

fn pick_crime_type(rng: &mut SimpleRng) -> (&'static str, &'static [&'static str]) {
    let total: u32 = CRIME_TYPES.iter().map(|(_, w, _)| w).sum();
    let mut roll = rng.below(total as u64) as u32;
    for &(name, weight, descriptions) in CRIME_TYPES {
        if roll < weight {
            return (name, descriptions);
        }
        roll -= weight;
    }
    (CRIME_TYPES[0].0, CRIME_TYPES[0].2)
}

struct Row {
    id: i64,
    date: NaiveDateTime,
    primary_type: &'static str,
    description: &'static str,
    location: &'static str,
    arrest: bool,
    domestic: bool,
    district: i64,
    community_area: Option<i64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

fn generate_rows(rng: &mut SimpleRng) -> Result<Vec<Row>> {
    let start = NaiveDate::from_ymd_opt(2015, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .context("invalid start date")?;
    let span_minutes = 10 * 365 * 24 * 60;

    let mut rows: Vec<Row> = (0..ROWS)
        .map(|i| {
            let (primary_type, descriptions) = pick_crime_type(rng);
            let description = descriptions[rng.below(descriptions.len() as u64) as usize];
            let has_location = !rng.chance(0.03);
            Row {
                id: 10_000_000 + i as i64,
                date: start + Duration::minutes(rng.below(span_minutes) as i64),
                primary_type,
                description,
                location: LOCATIONS[rng.below(LOCATIONS.len() as u64) as usize],
                arrest: rng.chance(0.2),
                domestic: description.starts_with("DOMESTIC") || rng.chance(0.1),
                district: 1 + rng.below(25) as i64,
                community_area: (!rng.chance(0.01)).then(|| 1 + rng.below(77) as i64),
                latitude: has_location.then(|| 41.64 + rng.next_f64() * 0.38),
                longitude: has_location.then(|| -87.94 + rng.next_f64() * 0.42),
            }
        })
        .collect();
    rows.sort_by_key(|r| r.date);
    Ok(rows)
}

fn write_parquet(rows: &[Row], path: &str) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("ID", DataType::Int64, false),
        Field::new("DATE", DataType::Timestamp(TimeUnit::Microsecond, None), false),
        Field::new("PRIMARY_TYPE", DataType::Utf8, false),
        Field::new("DESCRIPTION", DataType::Utf8, false),
        Field::new("LOCATION_DESCRIPTION", DataType::Utf8, false),
        Field::new("ARREST", DataType::Boolean, false),
        Field::new("DOMESTIC", DataType::Boolean, false),
        Field::new("DISTRICT", DataType::Int64, false),
        Field::new("COMMUNITY_AREA", DataType::Int64, true),
        Field::new("YEAR", DataType::Int64, false),
        Field::new("LATITUDE", DataType::Float64, true),
        Field::new("LONGITUDE", DataType::Float64, true),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.id))),
            Arc::new(TimestampMicrosecondArray::from_iter_values(
                rows.iter().map(|r| r.date.and_utc().timestamp_micros()),
            )),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.primary_type))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.description))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.location))),
            Arc::new(BooleanArray::from(rows.iter().map(|r| r.arrest).collect::<Vec<_>>())),
            Arc::new(BooleanArray::from(rows.iter().map(|r| r.domestic).collect::<Vec<_>>())),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.district))),
            Arc::new(Int64Array::from(rows.iter().map(|r| r.community_area).collect::<Vec<_>>())),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| chrono::Datelike::year(&r.date) as i64),
            )),
            Arc::new(Float64Array::from(rows.iter().map(|r| r.latitude).collect::<Vec<_>>())),
            Arc::new(Float64Array::from(rows.iter().map(|r| r.longitude).collect::<Vec<_>>())),
        ],
    )
    .context("building record batch")?;

    let file = std::fs::File::create(path).with_context(|| format!("creating {path}"))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

/// Same rows as CSV, with dates in the city portal's export layout.
fn write_csv(rows: &[Row], path: &str) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {path}"))?;
    writer.write_record([
        "ID",
        "Date",
        "Primary Type",
        "Description",
        "Location Description",
        "Arrest",
        "Domestic",
        "District",
        "Community Area",
        "Year",
        "Latitude",
        "Longitude",
    ])?;
    let opt = |v: Option<String>| v.unwrap_or_default();
    for r in rows {
        writer.write_record([
            r.id.to_string(),
            r.date.format("%m/%d/%Y %I:%M:%S %p").to_string(),
            r.primary_type.to_string(),
            r.description.to_string(),
            r.location.to_string(),
            r.arrest.to_string(),
            r.domestic.to_string(),
            r.district.to_string(),
            opt(r.community_area.map(|v| v.to_string())),
            chrono::Datelike::year(&r.date).to_string(),
            opt(r.latitude.map(|v| format!("{v:.6}"))),
            opt(r.longitude.map(|v| format!("{v:.6}"))),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let mut rng = SimpleRng::new(42);
    let rows = generate_rows(&mut rng)?;

    let parquet_path = "sample_crimes.parquet";
    let csv_path = "sample_crimes.csv";
    write_parquet(&rows, parquet_path)?;
    write_csv(&rows, csv_path)?;

    println!("Wrote {} crime records to {parquet_path} and {csv_path}", rows.len());
    Ok(())
}
