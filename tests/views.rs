use std::io::Write;
use std::path::PathBuf;

use crimeview::{
    aggregate, filter, pivot, sort_groups_by_key, top_n, FilterSpec, Group, GroupKey, LoadError,
    Metric, Predicate, QueryError, Value, ViewConfig, ViewEngine, ViewResult,
};

const CRIMES: &str = "\
ID,Date,Primary Type,Arrest,Ward,Latitude,Longitude
1,01/01/2023 10:15:00 AM,THEFT,false,42,41.88,-87.63
2,01/02/2023 11:45:00 PM,ASSAULT,true,,41.79,-87.60
3,02/01/2023 10:05:00 AM,THEFT,false,3,,
4,02/14/2024 09:00:00 PM,BATTERY,true,42,41.90,-87.70
5,03/03/2024 10:30:00 AM,THEFT,true,7,41.75,-87.55
";

fn fixture(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}

fn open_crimes(dir: &tempfile::TempDir) -> ViewEngine {
    let path = fixture(dir, "crimes.csv", CRIMES);
    let config = ViewConfig {
        uppercase_headers: true,
        ..ViewConfig::default()
    };
    ViewEngine::open(&path, &config).unwrap()
}

fn category_key() -> GroupKey {
    GroupKey::Column("PRIMARY TYPE".into())
}

#[test]
fn theft_filter_then_count() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_crimes(&dir);
    let spec = FilterSpec::new().with(Predicate::equals("PRIMARY TYPE", "THEFT"));
    let view = engine.filter(&spec).unwrap();
    assert_eq!(view.len(), 3);
    let groups = aggregate(&view, &category_key(), &Metric::Count).unwrap();
    assert_eq!(groups, vec![Group::new("THEFT", 3i64)]);
}

#[test]
fn full_dataset_counts_keep_first_appearance() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_crimes(&dir);
    let groups = engine
        .aggregate(&FilterSpec::new(), &category_key(), &Metric::Count)
        .unwrap();
    assert_eq!(
        groups,
        vec![
            Group::new("THEFT", 3i64),
            Group::new("ASSAULT", 1i64),
            Group::new("BATTERY", 1i64),
        ]
    );
}

#[test]
fn date_range_accepts_plain_dates() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_crimes(&dir);
    let spec = FilterSpec::new().with(Predicate::range(
        "DATE",
        Some("2023-01-01".into()),
        Some("2023-12-31".into()),
    ));
    let ids: Vec<_> = engine
        .filter(&spec)
        .unwrap()
        .column_values("ID")
        .unwrap()
        .into_iter()
        .cloned()
        .collect();
    assert_eq!(ids, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
}

#[test]
fn yearly_trend_and_top_types() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_crimes(&dir);
    let view = engine.filter(&FilterSpec::new()).unwrap();

    let years = aggregate(&view, &GroupKey::Year("DATE".into()), &Metric::Count).unwrap();
    let years = sort_groups_by_key(years, &GroupKey::Year("DATE".into()));
    assert_eq!(years, vec![Group::new(2023i64, 3i64), Group::new(2024i64, 2i64)]);

    let top = top_n(aggregate(&view, &category_key(), &Metric::Count).unwrap(), 2);
    assert_eq!(top[0], Group::new("THEFT", 3i64));
    assert_eq!(top[1], Group::new("ASSAULT", 1i64));
}

#[test]
fn map_points_for_a_year() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_crimes(&dir);
    let spec = FilterSpec::new()
        .with(Predicate::range("DATE", Some("2023-01-01".into()), Some("2023-12-31".into())))
        .with(Predicate::NotNull { column: "LATITUDE".into() })
        .with(Predicate::NotNull { column: "LONGITUDE".into() });
    let view = engine.filter(&spec).unwrap();
    assert_eq!(view.len(), 2);
    let recent = view.sorted_by("DATE", true, Some(1)).unwrap();
    assert_eq!(recent.column_values("ID").unwrap(), vec![&Value::Integer(2)]);
}

#[test]
fn heatmap_rows_match_weekday_counts() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_crimes(&dir);
    let view = engine.filter(&FilterSpec::new()).unwrap();
    let weekday = GroupKey::Weekday("DATE".into());
    let heat = pivot(&view, &weekday, &GroupKey::Hour("DATE".into())).unwrap();
    let counts = aggregate(&view, &weekday, &Metric::Count).unwrap();

    let totals = heat.row_totals();
    for (label, total) in heat.row_labels.iter().zip(totals) {
        let group = counts.iter().find(|g| &g.key == label).unwrap();
        assert_eq!(group.value, Value::Integer(total));
    }
    assert_eq!(heat.total(), view.len() as i64);
}

#[test]
fn mean_of_ward_per_arrest_flag() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_crimes(&dir);
    let groups = engine
        .aggregate(
            &FilterSpec::new(),
            &GroupKey::Column("ARREST".into()),
            &Metric::Mean("WARD".into()),
        )
        .unwrap();
    // false: 42, 3 -> 22.5; true: null, 42, 7 -> 24.5
    assert_eq!(
        groups,
        vec![Group::new(Value::Bool(false), 22.5), Group::new(Value::Bool(true), 24.5)]
    );
}

#[test]
fn unknown_filter_column_fails() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_crimes(&dir);
    let spec = FilterSpec::new().with(Predicate::equals("nonexistent_column", "x"));
    assert_eq!(
        engine.filter(&spec).unwrap_err(),
        QueryError::UnknownColumn("nonexistent_column".into())
    );
}

#[test]
fn sum_on_text_column_fails() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_crimes(&dir);
    let err = engine
        .aggregate(&FilterSpec::new(), &category_key(), &Metric::Sum("PRIMARY TYPE".into()))
        .unwrap_err();
    assert!(matches!(err, QueryError::TypeMismatch { .. }));
}

#[test]
fn filter_is_idempotent_without_engine() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_crimes(&dir);
    let ds = engine.dataset();
    let spec = FilterSpec::new().with(Predicate::one_of("WARD", [42i64, 7]));
    let a = filter(ds, &spec).unwrap();
    let b = filter(ds, &spec).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.row_indices(), &[0, 3, 4]);
    assert_eq!(filter(ds, &FilterSpec::new()).unwrap(), ViewResult::all(ds));
}

#[test]
fn filter_spec_from_json_file_shape() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_crimes(&dir);
    let spec: FilterSpec = serde_json::from_str(
        r#"{ "predicates": [
            { "op": "contains", "column": "PRIMARY TYPE", "needle": "theft" },
            { "op": "equals", "column": "ARREST", "value": true }
        ] }"#,
    )
    .unwrap();
    let view = engine.filter(&spec).unwrap();
    assert_eq!(view.row_indices(), &[4]);
}

#[test]
fn schema_inconsistent_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(&dir, "ragged.csv", "ID,Primary Type\n1,THEFT\n2,ASSAULT,extra\n");
    let err = ViewEngine::open(&path, &ViewConfig::default()).err().unwrap();
    assert!(matches!(err, LoadError::ColumnCount { row: 2, expected: 2, found: 3 }));
}

#[test]
fn config_file_drives_loading() {
    let dir = tempfile::tempdir().unwrap();
    let data = fixture(&dir, "semi.csv", "beat;when\n0111;2024/05/06\n0112;-\n");
    let cfg = fixture(
        &dir,
        "cfg.json",
        r#"{ "delimiter": ";", "null_tokens": ["-"], "timestamp_formats": ["%Y/%m/%d"],
             "column_types": { "beat": "string" }, "cache": false }"#,
    );
    let config = ViewConfig::from_path(&cfg).unwrap();
    let engine = ViewEngine::open(&data, &config).unwrap();
    let ds = engine.dataset();
    assert_eq!(ds.record(0).get(0), &Value::from("0111"));
    assert!(ds.record(0).get(1).as_timestamp().is_some());
    assert!(ds.record(1).get(1).is_null());

    engine.filter(&FilterSpec::new()).unwrap();
    assert_eq!(engine.cache_len(), 0);
}
