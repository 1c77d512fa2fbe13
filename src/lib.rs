//! In-memory view engine for tabular crime datasets.
//!
//! A dataset is loaded once from CSV, JSON or Parquet, then queried with
//! [`FilterSpec`]s and grouped with [`aggregate`]. A presentation layer
//! (dashboard, CLI) turns user interaction into these calls.

pub mod config;
pub mod data;
pub mod engine;
pub mod error;

pub use config::ViewConfig;
pub use data::aggregate::{
    aggregate, aggregate_total, missing_summary, pivot, sort_groups_by_key, top_n, Group,
    GroupKey, Metric, MissingStat, Pivot,
};
pub use data::filter::{filter, FilterSpec, Predicate, ViewResult};
pub use data::loader::{load, load_file};
pub use data::model::{Column, ColumnType, Dataset, Record, Schema, Value};
pub use engine::ViewEngine;
pub use error::{LoadError, QueryError};
