//! Result-Shape Analysis
//!
//! Heuristic statistical typing of result columns over a bounded sample.
//! Thresholds are named constants so boundary behavior is testable.

use crate::execution::Row;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::HashSet;

/// Values sampled per column when inferring its type.
pub const TYPE_SAMPLE_LIMIT: usize = 25;
/// Fraction of sampled values that must parse as dates for a temporal column.
pub const TEMPORAL_RATIO: f64 = 0.60;
/// Fraction of sampled values that must be plausible years for a year column.
pub const YEAR_RATIO: f64 = 0.70;
/// Fraction of sampled values that must be numeric for a numeric column.
pub const NUMERIC_RATIO: f64 = 0.70;
/// Within a numeric column, integer share above which it counts as integer.
pub const INTEGER_RATIO: f64 = 0.80;

pub const YEAR_MIN: i64 = 1900;
pub const YEAR_MAX: i64 = 2100;

const PROFILE_SAMPLE_VALUES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    String,
    Integer,
    Float,
    /// Numeric with no dominant integer/float shape.
    Numeric,
    Year,
    Temporal,
    Null,
}

impl ColumnKind {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnKind::Integer | ColumnKind::Float | ColumnKind::Numeric)
    }

    pub fn is_categorical(&self) -> bool {
        matches!(self, ColumnKind::String | ColumnKind::Temporal)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: ColumnKind,
    pub unique_values: usize,
    pub sample_values: Vec<serde_json::Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub sum: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataStructureAnalysis {
    pub row_count: usize,
    pub columns: Vec<ColumnProfile>,
    pub likely_category_cols: Vec<String>,
    pub likely_numeric_cols: Vec<String>,
    pub has_facility: bool,
    pub has_year: bool,
}

pub fn analyze_rows(rows: &[Row]) -> DataStructureAnalysis {
    let columns: Vec<ColumnProfile> = rows
        .first()
        .map(|first| {
            first
                .keys()
                .map(|name| profile_column(name, rows))
                .collect()
        })
        .unwrap_or_default();

    let likely_category_cols: Vec<String> = columns
        .iter()
        .filter(|c| c.kind.is_categorical())
        .map(|c| c.name.clone())
        .collect();
    let likely_numeric_cols: Vec<String> = columns
        .iter()
        .filter(|c| c.kind.is_numeric())
        .map(|c| c.name.clone())
        .collect();

    let has_facility = columns.iter().any(|c| {
        let name = c.name.to_lowercase();
        name.contains("facility") || name.contains("lab") || name.contains("clinic")
    });
    let has_year = columns
        .iter()
        .any(|c| c.kind == ColumnKind::Year || c.name.eq_ignore_ascii_case("year"));

    DataStructureAnalysis {
        row_count: rows.len(),
        columns,
        likely_category_cols,
        likely_numeric_cols,
        has_facility,
        has_year,
    }
}

fn profile_column(name: &str, rows: &[Row]) -> ColumnProfile {
    let non_null: Vec<&serde_json::Value> = rows
        .iter()
        .filter_map(|row| row.get(name))
        .filter(|v| !v.is_null() && v.as_str().map(|s| !s.trim().is_empty()).unwrap_or(true))
        .collect();

    let sample: Vec<&serde_json::Value> =
        non_null.iter().take(TYPE_SAMPLE_LIMIT).copied().collect();
    let kind = classify_values(&sample);

    let unique_values = non_null
        .iter()
        .map(|v| value_text(v))
        .collect::<HashSet<_>>()
        .len();

    let numerics: Vec<f64> = non_null.iter().filter_map(|v| numeric_value(v)).collect();
    let (min, max, sum) = if kind.is_numeric() && !numerics.is_empty() {
        let min = numerics.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = numerics.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        (Some(min), Some(max), Some(numerics.iter().sum()))
    } else {
        (None, None, None)
    };

    ColumnProfile {
        name: name.to_string(),
        kind,
        unique_values,
        sample_values: sample
            .iter()
            .take(PROFILE_SAMPLE_VALUES)
            .map(|v| (*v).clone())
            .collect(),
        min,
        max,
        sum,
    }
}

fn classify_values(sample: &[&serde_json::Value]) -> ColumnKind {
    if sample.is_empty() {
        return ColumnKind::Null;
    }
    let total = sample.len() as f64;

    let temporal = sample.iter().filter(|v| is_temporal_value(v)).count() as f64;
    if temporal / total >= TEMPORAL_RATIO {
        return ColumnKind::Temporal;
    }

    let years = sample.iter().filter(|v| is_year_value(v)).count() as f64;
    if years / total >= YEAR_RATIO {
        return ColumnKind::Year;
    }

    let numeric: Vec<f64> = sample.iter().filter_map(|v| numeric_value(v)).collect();
    if numeric.len() as f64 / total >= NUMERIC_RATIO {
        let integers = numeric.iter().filter(|n| n.fract() == 0.0).count() as f64;
        let int_ratio = integers / numeric.len() as f64;
        if int_ratio >= INTEGER_RATIO {
            return ColumnKind::Integer;
        }
        if int_ratio <= 1.0 - INTEGER_RATIO {
            return ColumnKind::Float;
        }
        return ColumnKind::Numeric;
    }

    ColumnKind::String
}

pub fn is_year_value(value: &serde_json::Value) -> bool {
    let year = match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.len() == 4 {
                trimmed.parse::<i64>().ok()
            } else {
                None
            }
        }
        _ => None,
    };
    year.map(|y| (YEAR_MIN..=YEAR_MAX).contains(&y)).unwrap_or(false)
}

pub fn is_temporal_value(value: &serde_json::Value) -> bool {
    value
        .as_str()
        .map(|s| parse_date(s.trim()).is_some())
        .unwrap_or(false)
}

/// ISO and common date layouts seen in exports.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }
    // Month buckets like "2024-03".
    if let Ok(date) = NaiveDate::parse_from_str(&format!("{}-01", text), "%Y-%m-%d") {
        if text.len() == 7 {
            return Some(date);
        }
    }
    None
}

pub fn numeric_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows_from(values: Vec<serde_json::Value>) -> Vec<Row> {
        values
            .into_iter()
            .map(|v| {
                let mut row = Row::new();
                row.insert("col".to_string(), v);
                row
            })
            .collect()
    }

    fn kind_of(values: Vec<serde_json::Value>) -> ColumnKind {
        let rows = rows_from(values);
        analyze_rows(&rows).columns[0].kind
    }

    #[test]
    fn dates_classify_as_temporal_at_sixty_percent() {
        // 3 of 5 parse as dates: exactly at the 60% threshold.
        let kind = kind_of(vec![
            json!("2024-01-01"),
            json!("2024-02-15"),
            json!("2024-03-01 10:30:00"),
            json!("pending"),
            json!("n/a"),
        ]);
        assert_eq!(kind, ColumnKind::Temporal);
    }

    #[test]
    fn below_temporal_threshold_is_string() {
        // 2 of 5 parse as dates: below the 60% threshold.
        let kind = kind_of(vec![
            json!("2024-01-01"),
            json!("2024-02-15"),
            json!("pending"),
            json!("n/a"),
            json!("unknown"),
        ]);
        assert_eq!(kind, ColumnKind::String);
    }

    #[test]
    fn four_digit_values_in_range_classify_as_year() {
        let kind = kind_of(vec![json!(2021), json!(2022), json!("2023"), json!(2024)]);
        assert_eq!(kind, ColumnKind::Year);
    }

    #[test]
    fn out_of_range_four_digit_values_are_numeric() {
        let kind = kind_of(vec![json!(4521), json!(8800), json!(1234), json!(9100)]);
        assert_eq!(kind, ColumnKind::Integer);
    }

    #[test]
    fn integer_share_drives_subclassification() {
        let ints = kind_of(vec![json!(10), json!(20), json!(30), json!(40), json!(50.5)]);
        assert_eq!(ints, ColumnKind::Integer);

        let floats = kind_of(vec![json!(1.5), json!(2.5), json!(3.5), json!(4.5), json!(5.5)]);
        assert_eq!(floats, ColumnKind::Float);

        let mixed = kind_of(vec![json!(1), json!(2), json!(3.5), json!(4.5), json!(5)]);
        assert_eq!(mixed, ColumnKind::Numeric);
    }

    #[test]
    fn null_only_columns_are_null() {
        let kind = kind_of(vec![json!(null), json!(null)]);
        assert_eq!(kind, ColumnKind::Null);
    }

    #[test]
    fn numeric_stats_and_role_hints() {
        let rows: Vec<Row> = vec![
            serde_json::from_value(json!({"facility_name": "Alpha", "year": 2023, "total": 10}))
                .unwrap(),
            serde_json::from_value(json!({"facility_name": "Beta", "year": 2024, "total": 30}))
                .unwrap(),
        ];
        let analysis = analyze_rows(&rows);
        assert!(analysis.has_facility);
        assert!(analysis.has_year);
        assert_eq!(analysis.likely_numeric_cols, vec!["total".to_string()]);
        let total = analysis.columns.iter().find(|c| c.name == "total").unwrap();
        assert_eq!(total.min, Some(10.0));
        assert_eq!(total.max, Some(30.0));
        assert_eq!(total.sum, Some(40.0));
    }
}
