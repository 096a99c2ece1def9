//! Dataset schema types and the heuristic column classifier.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-column metadata supplied with each request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnInfo {
    #[serde(default)]
    pub inferred_type: String,
    #[serde(default)]
    pub sample: String,
}

/// Mapping from column name to metadata. Ordered so prompt text is stable.
pub type Schema = BTreeMap<String, ColumnInfo>;

/// Column names grouped by their likely role in a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnCategories {
    pub numeric: Vec<String>,
    pub categorical: Vec<String>,
    pub temporal: Vec<String>,
    pub textual: Vec<String>,
    pub identifier: Vec<String>,
}

/// Infer a coarse column type from a single sample value.
pub fn infer_column_type(sample: &str) -> &'static str {
    if sample.parse::<i64>().is_ok() {
        "integer"
    } else if sample.parse::<f64>().is_ok() {
        "float"
    } else {
        "string"
    }
}

/// Classify schema columns into role buckets. Numeric types win, then name
/// hints (date/time, id), then long free-text samples; everything else is
/// treated as categorical.
pub fn identify_special_columns(schema: &Schema) -> ColumnCategories {
    let mut categories = ColumnCategories::default();

    for (name, info) in schema {
        let col_type = info.inferred_type.to_lowercase();
        let name_lower = name.to_lowercase();

        if col_type == "integer" || col_type == "float" {
            categories.numeric.push(name.clone());
        } else if name_lower.contains("date") || name_lower.contains("time") {
            categories.temporal.push(name.clone());
        } else if name_lower.contains("id") {
            categories.identifier.push(name.clone());
        } else if info.sample.split_whitespace().count() > 3 {
            categories.textual.push(name.clone());
        } else {
            categories.categorical.push(name.clone());
        }
    }

    categories
}
