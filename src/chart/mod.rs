//! Chart Recommendation Engine
//!
//! Analyzes the shape of executed results, proposes chart configurations,
//! and formats chart-ready series.

pub mod analysis;
pub mod format;
pub mod suggest;

pub use analysis::{analyze_rows, ColumnKind, ColumnProfile, DataStructureAnalysis};
pub use format::{
    format_category_value_data, Aggregate, ChartConfig, ChartData, Normalize, SeriesEntry,
    SortOrder, TimeBin,
};
pub use suggest::{ChartAdvisor, ChartRecommendation, ChartSuggestion, ChartType};
