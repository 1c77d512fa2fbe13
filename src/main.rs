use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value as JsonValue};

use crimeview::{
    missing_summary, pivot, sort_groups_by_key, top_n, FilterSpec, GroupKey, Metric, ViewConfig,
    ViewEngine, ViewResult,
};

/// Query a tabular crime dataset from the command line.
#[derive(Parser)]
#[command(name = "crimeview", version, about)]
struct Cli {
    /// JSON file with loader options.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Dataset file (.csv, .tsv, .json, .parquet).
    file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print column names and inferred types.
    Schema,
    /// Print matching rows.
    Rows {
        #[arg(long)]
        filter: Option<PathBuf>,
        /// Order rows by this column.
        #[arg(long)]
        sort: Option<String>,
        #[arg(long, requires = "sort")]
        desc: bool,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Group matching rows and compute a metric per group.
    Aggregate {
        #[arg(long)]
        filter: Option<PathBuf>,
        /// COL, or year:COL / month:COL / hour:COL / weekday:COL.
        #[arg(long)]
        group_by: GroupKey,
        /// count, sum:COL or mean:COL.
        #[arg(long, default_value = "count")]
        metric: Metric,
        /// Keep only the N largest groups.
        #[arg(long, conflicts_with = "by_key")]
        top: Option<usize>,
        /// Order groups by key instead of first appearance.
        #[arg(long)]
        by_key: bool,
    },
    /// Count matching rows over two keys.
    Pivot {
        #[arg(long)]
        filter: Option<PathBuf>,
        #[arg(long)]
        rows: GroupKey,
        #[arg(long)]
        cols: GroupKey,
    },
    /// Null count and rate per column.
    Missing {
        #[arg(long)]
        filter: Option<PathBuf>,
    },
}

fn read_filter(path: Option<&Path>) -> Result<FilterSpec> {
    let Some(path) = path else {
        return Ok(FilterSpec::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading filter {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing filter {}", path.display()))
}

fn rows_to_json(view: &ViewResult<'_>) -> Result<JsonValue> {
    let columns = view.dataset().schema().columns();
    let mut out = Vec::with_capacity(view.len());
    for record in view.records() {
        let mut obj = Map::new();
        for (col, value) in columns.iter().zip(record.values()) {
            obj.insert(col.name.clone(), serde_json::to_value(value)?);
        }
        out.push(JsonValue::Object(obj));
    }
    Ok(JsonValue::Array(out))
}

fn run(cli: Cli) -> Result<JsonValue> {
    let config = match &cli.config {
        Some(path) => ViewConfig::from_path(path)?,
        None => ViewConfig::default(),
    };
    let engine = ViewEngine::open(&cli.file, &config)
        .with_context(|| format!("loading {}", cli.file.display()))?;

    let output = match cli.command {
        Command::Schema => json!({
            "rows": engine.dataset().len(),
            "columns": engine.dataset().schema().columns(),
        }),
        Command::Rows {
            filter,
            sort,
            desc,
            limit,
        } => {
            let spec = read_filter(filter.as_deref())?;
            let view = engine.filter(&spec)?;
            let view = match sort {
                Some(column) => view.sorted_by(&column, desc, Some(limit))?,
                None => view.head(limit),
            };
            rows_to_json(&view)?
        }
        Command::Aggregate {
            filter,
            group_by,
            metric,
            top,
            by_key,
        } => {
            let spec = read_filter(filter.as_deref())?;
            let mut groups = engine.aggregate(&spec, &group_by, &metric)?;
            if let Some(n) = top {
                groups = top_n(groups, n);
            } else if by_key {
                groups = sort_groups_by_key(groups, &group_by);
            }
            serde_json::to_value(groups)?
        }
        Command::Pivot { filter, rows, cols } => {
            let spec = read_filter(filter.as_deref())?;
            let view = engine.filter(&spec)?;
            serde_json::to_value(pivot(&view, &rows, &cols)?)?
        }
        Command::Missing { filter } => {
            let spec = read_filter(filter.as_deref())?;
            let view = engine.filter(&spec)?;
            serde_json::to_value(missing_summary(&view))?
        }
    };
    Ok(output)
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let output = run(cli)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
