//! Chart Recommendation
//!
//! Proposes chart configurations for an executed result set: a generative
//! pass requesting up to six suggestions, with a deterministic heuristic
//! fallback when the model fails or returns nothing usable. Results that
//! are chart-unsuitable extremes (empty, single row, very large) yield no
//! recommendation at all.

use crate::chart::analysis::{analyze_rows, ColumnKind, DataStructureAnalysis};
use crate::chart::format::ChartConfig;
use crate::execution::ExecutionResult;
use crate::extract::extract_json;
use crate::llm::TextGenerator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Results below this row count are better read as a table or KPI.
pub const MIN_CHART_ROWS: usize = 2;
/// Results above this row count are too dense to chart.
pub const MAX_CHART_ROWS: usize = 1000;
/// Suggestions requested from and accepted out of the model.
pub const MAX_SUGGESTIONS: usize = 6;
/// Category cardinality above which a pie chart stops being readable.
pub const MAX_PIE_CATEGORIES: usize = 12;

const SUGGEST_MAX_TOKENS: u32 = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Scatter,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartSuggestion {
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub title: String,
    pub description: String,
    pub config: ChartConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartRecommendation {
    pub suitable_for_charts: bool,
    pub suggestions: Vec<ChartSuggestion>,
    pub data_analysis: DataStructureAnalysis,
}

pub struct ChartAdvisor {
    generator: Arc<dyn TextGenerator>,
}

impl ChartAdvisor {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Recommend charts for an executed result, or nothing when the result
    /// shape is unsuitable. Never fails: model errors degrade to the
    /// deterministic fallback.
    pub async fn suggest(
        &self,
        result: &ExecutionResult,
        intent: &str,
        question: &str,
    ) -> Option<ChartRecommendation> {
        if result.count < MIN_CHART_ROWS || result.count > MAX_CHART_ROWS {
            debug!(rows = result.count, "result not chart-suitable");
            return None;
        }

        let analysis = analyze_rows(&result.rows);

        let suggestions = match self.ask_model(&analysis, intent, question).await {
            Some(suggestions) if !suggestions.is_empty() => suggestions,
            _ => {
                warn!("chart model pass unusable, applying heuristic fallback");
                fallback_suggestions(&analysis)
            }
        };

        Some(ChartRecommendation {
            suitable_for_charts: !suggestions.is_empty(),
            suggestions,
            data_analysis: analysis,
        })
    }

    async fn ask_model(
        &self,
        analysis: &DataStructureAnalysis,
        intent: &str,
        question: &str,
    ) -> Option<Vec<ChartSuggestion>> {
        let prompt = build_suggestion_prompt(analysis, intent, question);
        let raw = self.generator.generate(&prompt, SUGGEST_MAX_TOKENS).await.ok()?;
        parse_suggestions(&raw)
    }
}

fn build_suggestion_prompt(
    analysis: &DataStructureAnalysis,
    intent: &str,
    question: &str,
) -> String {
    let mut prompt = String::from(
        "You advise on data visualization for a laboratory analytics platform.\n\
         Given the result profile below, propose chart configurations.\n\
         Return ONLY JSON:\n\
         {\"suggestions\": [{\"type\": \"bar\"|\"line\"|\"pie\"|\"scatter\",\n  \
         \"title\": string, \"description\": string,\n  \
         \"config\": {\"x_axis\": string, \"y_axis\": string, \"grouping_column\": string|null,\n    \
         \"aggregate\": \"sum\"|\"avg\"|\"count\", \"normalize\": \"percent\"|\"rate_per_k\"|null,\n    \
         \"top_n\": number|null, \"sort_by\": \"natural\"|\"alpha\"|\"value_asc\"|\"value_desc\"|null,\n    \
         \"time_bin\": \"year\"|\"quarter\"|\"month\"|\"auto\"|null}}]}\n",
    );
    prompt.push_str(&format!("At most {} suggestions.\n\n", MAX_SUGGESTIONS));

    if !question.is_empty() {
        prompt.push_str(&format!("USER QUESTION: {}\n", question));
    }
    if !intent.is_empty() {
        prompt.push_str(&format!("QUERY INTENT: {}\n", intent));
    }

    prompt.push_str(&format!("\nDATA PROFILE ({} rows):\n", analysis.row_count));
    for column in &analysis.columns {
        let samples: Vec<String> = column
            .sample_values
            .iter()
            .map(|v| v.to_string())
            .collect();
        prompt.push_str(&format!(
            "- {} ({:?}, {} distinct): [{}]\n",
            column.name,
            column.kind,
            column.unique_values,
            samples.join(", ")
        ));
    }
    prompt
}

#[derive(Deserialize)]
struct RawSuggestion {
    #[serde(rename = "type")]
    chart_type: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    config: Option<serde_json::Value>,
}

/// Parse the model reply, dropping malformed or unsupported suggestions.
fn parse_suggestions(raw: &str) -> Option<Vec<ChartSuggestion>> {
    let value = extract_json(raw)?;
    let items = value.get("suggestions")?.as_array()?.clone();

    let mut suggestions = Vec::new();
    for item in items.into_iter().take(MAX_SUGGESTIONS) {
        let Ok(parsed) = serde_json::from_value::<RawSuggestion>(item) else {
            continue;
        };
        let Some(chart_type) = parsed.chart_type.as_deref().and_then(parse_chart_type) else {
            continue;
        };
        let Some(config_value) = parsed.config else {
            continue;
        };
        let Ok(mut config) = serde_json::from_value::<ChartConfig>(config_value) else {
            continue;
        };
        if config.x_axis.trim().is_empty() || config.y_axis.trim().is_empty() {
            continue;
        }
        config.chart_type = chart_type_name(chart_type).to_string();

        suggestions.push(ChartSuggestion {
            chart_type,
            title: parsed.title.unwrap_or_default(),
            description: parsed.description.unwrap_or_default(),
            config,
        });
    }
    Some(suggestions)
}

fn parse_chart_type(value: &str) -> Option<ChartType> {
    match value.trim().to_lowercase().as_str() {
        "bar" => Some(ChartType::Bar),
        "line" => Some(ChartType::Line),
        "pie" => Some(ChartType::Pie),
        "scatter" => Some(ChartType::Scatter),
        _ => None,
    }
}

fn chart_type_name(chart_type: ChartType) -> &'static str {
    match chart_type {
        ChartType::Bar => "bar",
        ChartType::Line => "line",
        ChartType::Pie => "pie",
        ChartType::Scatter => "scatter",
    }
}

/// Deterministic heuristic used when the model pass fails: a bar chart over
/// the best category/numeric pair, grouped by year when present, plus a pie
/// chart when the category stays readable.
pub fn fallback_suggestions(analysis: &DataStructureAnalysis) -> Vec<ChartSuggestion> {
    let category = pick_category_column(analysis);
    let numeric = analysis.likely_numeric_cols.first();
    let (Some(category), Some(numeric)) = (category, numeric) else {
        return Vec::new();
    };

    let year_column = analysis
        .columns
        .iter()
        .find(|c| c.kind == ColumnKind::Year || c.name.eq_ignore_ascii_case("year"))
        .map(|c| c.name.clone());

    let mut suggestions = Vec::new();

    let mut bar_config = ChartConfig::new("bar", &category, numeric);
    let description = match &year_column {
        Some(year) => {
            bar_config.grouping_column = Some(year.clone());
            format!("{} by {}, grouped by {}", numeric, category, year)
        }
        None => format!("{} by {}", numeric, category),
    };
    suggestions.push(ChartSuggestion {
        chart_type: ChartType::Bar,
        title: format!("{} by {}", display_name(numeric), display_name(&category)),
        description,
        config: bar_config,
    });

    let category_cardinality = analysis
        .columns
        .iter()
        .find(|c| c.name == category)
        .map(|c| c.unique_values)
        .unwrap_or(usize::MAX);
    if category_cardinality <= MAX_PIE_CATEGORIES {
        suggestions.push(ChartSuggestion {
            chart_type: ChartType::Pie,
            title: format!("{} share by {}", display_name(numeric), display_name(&category)),
            description: format!("Distribution of {} across {}", numeric, category),
            config: ChartConfig::new("pie", &category, numeric),
        });
    }

    suggestions
}

/// Prefer a facility-like category column, else the first category column.
fn pick_category_column(analysis: &DataStructureAnalysis) -> Option<String> {
    analysis
        .likely_category_cols
        .iter()
        .find(|name| {
            let lowered = name.to_lowercase();
            lowered.contains("facility") || lowered.contains("lab") || lowered.contains("clinic")
        })
        .or_else(|| analysis.likely_category_cols.first())
        .cloned()
}

fn display_name(column: &str) -> String {
    column.replace('_', " ")
}
