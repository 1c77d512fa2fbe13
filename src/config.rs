use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::model::ColumnType;
use crate::error::{LoadError, LoadResult};

// ---------------------------------------------------------------------------
// Loader / engine configuration
// ---------------------------------------------------------------------------

/// Options controlling how a dataset is read and queried.
///
/// Every field has a default, so a config file only needs the keys it
/// changes:
///
/// ```json
/// { "uppercase_headers": true, "column_types": { "BEAT": "string" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewConfig {
    /// Field separator for delimited text. `.tsv` files always use a tab.
    pub delimiter: char,
    /// Upper-case header names after trimming them.
    pub uppercase_headers: bool,
    /// Cell texts treated as missing values.
    pub null_tokens: Vec<String>,
    /// Extra chrono formats tried after the built-in timestamp layouts.
    pub timestamp_formats: Vec<String>,
    /// Only infer column types from the first N rows; later rows must conform.
    pub infer_schema_rows: Option<usize>,
    /// Explicit column types. Cells that do not parse are a load error.
    pub column_types: BTreeMap<String, ColumnType>,
    /// Memoize filter results in the engine.
    pub cache: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            uppercase_headers: false,
            null_tokens: ["", "NA", "N/A", "null", "NULL", "NaN"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timestamp_formats: Vec::new(),
            infer_schema_rows: None,
            column_types: BTreeMap::new(),
            cache: true,
        }
    }
}

impl ViewConfig {
    /// Read a JSON config file.
    pub fn from_path(path: &Path) -> LoadResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| LoadError::Config(format!("reading {}: {e}", path.display())))?;
        let config: ViewConfig = serde_json::from_str(&text)
            .map_err(|e| LoadError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LoadResult<()> {
        if !self.delimiter.is_ascii() {
            return Err(LoadError::Config(format!(
                "delimiter must be a single ASCII character, got '{}'",
                self.delimiter
            )));
        }
        if self.infer_schema_rows == Some(0) {
            return Err(LoadError::Config(
                "infer_schema_rows must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_null_token(&self, cell: &str) -> bool {
        self.null_tokens.iter().any(|t| t == cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let json = r#"{ "uppercase_headers": true, "column_types": { "BEAT": "string" } }"#;
        let cfg: ViewConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.uppercase_headers);
        assert_eq!(cfg.delimiter, ',');
        assert!(cfg.cache);
        assert_eq!(cfg.column_types.get("BEAT"), Some(&ColumnType::String));
        assert!(cfg.is_null_token(""));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_json::from_str::<ViewConfig>(r#"{ "delimter": ";" }"#).is_err());
    }

    #[test]
    fn from_path_reports_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "delimiter": "é" }"#).unwrap();
        assert!(matches!(ViewConfig::from_path(&path), Err(LoadError::Config(_))));

        let missing = dir.path().join("missing.json");
        assert!(matches!(ViewConfig::from_path(&missing), Err(LoadError::Config(_))));
    }
}
