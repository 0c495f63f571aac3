//! Chart Series Formatting
//!
//! Turns raw result rows into chart-ready series under a chart config:
//! case-insensitive column resolution, label canonicalization, time
//! binning, per-cell aggregation, sorting, Top-N folding into "Other", and
//! percent / rate-per-k normalization.

use crate::chart::analysis::{is_year_value, numeric_value, parse_date, value_text};
use crate::error::{InsightsError, Result};
use crate::execution::Row;
use chrono::Datelike;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Rows inspected when deciding whether the X axis is temporal.
pub const TEMPORAL_DETECT_SAMPLE: usize = 20;
/// Label for folded categories beyond the Top-N cap.
pub const OTHER_LABEL: &str = "Other";

const DEFAULT_PER_K: f64 = 1000.0;

lazy_static! {
    static ref RE_WS_RUN: Regex = Regex::new(r"\s+").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    #[default]
    Sum,
    Avg,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalize {
    Percent,
    RatePerK,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Natural,
    Alpha,
    ValueAsc,
    ValueDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBin {
    Year,
    Quarter,
    Month,
    Auto,
}

/// Full parameterization of one chart rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    #[serde(default = "default_chart_type")]
    pub chart_type: String,
    pub x_axis: String,
    pub y_axis: String,
    #[serde(default)]
    pub grouping_column: Option<String>,
    #[serde(default)]
    pub aggregate: Aggregate,
    #[serde(default)]
    pub normalize: Option<Normalize>,
    #[serde(default)]
    pub top_n: Option<usize>,
    #[serde(default)]
    pub sort_by: Option<SortOrder>,
    #[serde(default)]
    pub time_bin: Option<TimeBin>,
    #[serde(default)]
    pub per_k: Option<f64>,
}

fn default_chart_type() -> String {
    "bar".to_string()
}

impl ChartConfig {
    pub fn new(chart_type: &str, x_axis: &str, y_axis: &str) -> Self {
        Self {
            chart_type: chart_type.to_string(),
            x_axis: x_axis.to_string(),
            y_axis: y_axis.to_string(),
            grouping_column: None,
            aggregate: Aggregate::Sum,
            normalize: None,
            top_n: None,
            sort_by: None,
            time_bin: None,
            per_k: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub series_type: String,
    pub data: Vec<f64>,
}

/// Chart-ready output: a flat category/value pair list, or one series per
/// group when a grouping column applies.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ChartData {
    Flat {
        categories: Vec<String>,
        values: Vec<f64>,
    },
    Grouped {
        categories: Vec<String>,
        series: Vec<SeriesEntry>,
    },
}

/// Aggregate rows into categories (X axis) and optionally grouped series.
pub fn format_category_value_data(rows: &[Row], config: &ChartConfig) -> Result<ChartData> {
    let first = rows
        .first()
        .ok_or_else(|| InsightsError::Chart("no rows to format".to_string()))?;

    let x_column = resolve_column(first, &config.x_axis)
        .ok_or_else(|| InsightsError::Chart(format!("column '{}' not in result", config.x_axis)))?;
    let y_column = resolve_column(first, &config.y_axis)
        .ok_or_else(|| InsightsError::Chart(format!("column '{}' not in result", config.y_axis)))?;
    let group_column = config
        .grouping_column
        .as_deref()
        .filter(|name| !name.is_empty() && *name != "none")
        .and_then(|name| resolve_column(first, name));

    let x_is_temporal = detect_temporal_axis(rows, &x_column);

    // Accumulate (sum, count) per (group, category) cell.
    let mut groups: Vec<String> = Vec::new();
    let mut categories: Vec<String> = Vec::new();
    let mut cells: Vec<((usize, usize), (f64, u64))> = Vec::new();

    for row in rows {
        let Some(x_value) = row.get(&x_column).filter(|v| !v.is_null()) else {
            continue;
        };
        let category = if x_is_temporal {
            bin_label(&value_text(x_value), config.time_bin)
        } else {
            canonical_label(&value_text(x_value))
        };

        let group = match &group_column {
            Some(column) => match row.get(column).filter(|v| !v.is_null()) {
                Some(value) => canonical_label(&value_text(value)),
                None => continue,
            },
            None => String::new(),
        };

        let value = row.get(&y_column).and_then(numeric_value).unwrap_or(0.0);

        let group_idx = index_of(&mut groups, &group);
        let category_idx = index_of(&mut categories, &category);
        let key = (group_idx, category_idx);
        if let Some(slot) = cells.iter_mut().find(|(k, _)| *k == key) {
            slot.1 .0 += value;
            slot.1 .1 += 1;
        } else {
            cells.push((key, (value, 1)));
        }
    }

    if categories.is_empty() {
        return Err(InsightsError::Chart("no usable values to chart".to_string()));
    }

    let cell_value = |group_idx: usize, category_idx: usize| -> Option<f64> {
        cells
            .iter()
            .find(|(k, _)| *k == (group_idx, category_idx))
            .map(|(_, (sum, count))| match config.aggregate {
                Aggregate::Sum => *sum,
                Aggregate::Avg => *sum / *count as f64,
                Aggregate::Count => *count as f64,
            })
    };

    // Per-category totals drive value-based sorting and Top-N selection.
    let totals: Vec<f64> = (0..categories.len())
        .map(|ci| {
            (0..groups.len())
                .filter_map(|gi| cell_value(gi, ci))
                .sum()
        })
        .collect();

    let mut order: Vec<usize> = (0..categories.len()).collect();
    let sort = config.sort_by.unwrap_or(if x_is_temporal {
        SortOrder::Natural
    } else {
        SortOrder::ValueDesc
    });
    match sort {
        SortOrder::Natural => order.sort_by(|&a, &b| categories[a].cmp(&categories[b])),
        SortOrder::Alpha => {
            order.sort_by(|&a, &b| categories[a].to_lowercase().cmp(&categories[b].to_lowercase()))
        }
        SortOrder::ValueAsc => {
            order.sort_by(|&a, &b| totals[a].partial_cmp(&totals[b]).unwrap_or(std::cmp::Ordering::Equal))
        }
        SortOrder::ValueDesc => {
            order.sort_by(|&a, &b| totals[b].partial_cmp(&totals[a]).unwrap_or(std::cmp::Ordering::Equal))
        }
    }

    // Fold categories beyond the Top-N cap into a trailing "Other" bucket.
    let (kept, folded): (Vec<usize>, Vec<usize>) = match config.top_n {
        Some(top_n) if order.len() > top_n => {
            (order[..top_n].to_vec(), order[top_n..].to_vec())
        }
        _ => (order, Vec::new()),
    };

    let mut out_categories: Vec<String> = kept.iter().map(|&ci| categories[ci].clone()).collect();
    if !folded.is_empty() {
        out_categories.push(OTHER_LABEL.to_string());
    }

    let mut group_order: Vec<usize> = (0..groups.len()).collect();
    group_order.sort_by(|&a, &b| groups[a].cmp(&groups[b]));

    let mut series_values: Vec<Vec<f64>> = Vec::new();
    for &gi in &group_order {
        let mut data: Vec<f64> = kept
            .iter()
            .map(|&ci| cell_value(gi, ci).unwrap_or(0.0))
            .collect();
        if !folded.is_empty() {
            data.push(folded.iter().filter_map(|&ci| cell_value(gi, ci)).sum());
        }
        series_values.push(data);
    }

    for data in &mut series_values {
        apply_normalization(data, config);
    }

    if group_column.is_none() {
        let values = series_values.into_iter().next().unwrap_or_default();
        return Ok(ChartData::Flat {
            categories: out_categories,
            values,
        });
    }

    let series: Vec<SeriesEntry> = group_order
        .iter()
        .zip(series_values)
        .map(|(&gi, data)| SeriesEntry {
            name: groups[gi].clone(),
            series_type: config.chart_type.clone(),
            data,
        })
        .collect();

    Ok(ChartData::Grouped {
        categories: out_categories,
        series,
    })
}

fn apply_normalization(data: &mut [f64], config: &ChartConfig) {
    match config.normalize {
        Some(Normalize::Percent) => {
            let total: f64 = data.iter().sum();
            if total != 0.0 {
                for value in data.iter_mut() {
                    *value = *value / total * 100.0;
                }
            }
        }
        Some(Normalize::RatePerK) => {
            let per_k = config.per_k.unwrap_or(DEFAULT_PER_K);
            if per_k != 0.0 {
                for value in data.iter_mut() {
                    *value = *value * 1000.0 / per_k;
                }
            }
        }
        None => {}
    }
}

/// Resolve a configured column name against the row's actual keys,
/// case-insensitively.
fn resolve_column(row: &Row, name: &str) -> Option<String> {
    if row.contains_key(name) {
        return Some(name.to_string());
    }
    row.keys().find(|k| k.eq_ignore_ascii_case(name)).cloned()
}

/// Canonical category label: trimmed, internal whitespace collapsed.
fn canonical_label(raw: &str) -> String {
    RE_WS_RUN.replace_all(raw.trim(), " ").to_string()
}

/// X axis is temporal when its sampled values are year-like or parse as
/// dates.
fn detect_temporal_axis(rows: &[Row], x_column: &str) -> bool {
    let sample: Vec<&serde_json::Value> = rows
        .iter()
        .take(TEMPORAL_DETECT_SAMPLE)
        .filter_map(|row| row.get(x_column))
        .filter(|v| !v.is_null())
        .collect();
    if sample.is_empty() {
        return false;
    }
    sample
        .iter()
        .all(|v| is_year_value(v) || v.as_str().map(|s| parse_date(s.trim()).is_some()).unwrap_or(false))
}

/// Bin a temporal label. Year-only labels stay as years regardless of bin.
fn bin_label(raw: &str, bin: Option<TimeBin>) -> String {
    let trimmed = canonical_label(raw);
    let Some(date) = parse_date(&trimmed) else {
        // Plain year values carry no finer grain to bin by.
        return trimmed;
    };
    match bin.unwrap_or(TimeBin::Auto) {
        TimeBin::Year | TimeBin::Auto => date.year().to_string(),
        TimeBin::Quarter => format!("{}-Q{}", date.year(), (date.month0() / 3) + 1),
        TimeBin::Month => format!("{}-{:02}", date.year(), date.month()),
    }
}

fn index_of(labels: &mut Vec<String>, label: &str) -> usize {
    if let Some(pos) = labels.iter().position(|l| l == label) {
        return pos;
    }
    labels.push(label.to_string());
    labels.len() - 1
}
