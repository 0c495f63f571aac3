//! Conversation Context
//!
//! Session-scoped rolling window of completed query turns so follow-up
//! questions ("of those …", "break down by province") can be resolved into
//! filter-complete queries. Each session owns its window exclusively; there
//! is no cross-session visibility and no persistence beyond process life.

use crate::execution::{ExecutionResult, Row};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Maximum turns retained per session window.
pub const DEFAULT_MAX_TURNS: usize = 10;
/// Recent turns surfaced to prompts and carry-over analysis.
pub const RECENT_WINDOW: usize = 3;

const MAX_SAMPLE_ROWS: usize = 5;
const MAX_SAMPLE_COLS: usize = 6;
const MAX_AGGREGATE_FIELDS: usize = 3;

const PRONOUN_CUES: &[&str] = &[
    "these", "those", "them", "they", "it", "same", "above", "previous", "earlier",
];

const CONTINUATION_CUES: &[&str] = &[
    "of those",
    "among them",
    "from those",
    "filter those",
    "from the above",
    "from the previous",
    "of the above",
    "out of those",
    "within those",
    "from that",
    "of that",
];

const DRILL_DOWN_CUES: &[&str] = &[
    "break down",
    "breakdown",
    "by province",
    "by facility",
    "by region",
    "by state",
    "by district",
    "by month",
    "by year",
    "by quarter",
    "by age",
    "by sex",
    "by gender",
    "group by",
    "per facility",
    "per province",
    "per region",
    "per state",
    "per month",
];

const REFINEMENT_CUES: &[&str] = &[
    "but only", "just the", "narrow to", "narrow down", "limit to", "restrict to",
    "only the", "only for", "only in", "only from", "exclude", "except",
];

const FOLLOW_UP_CUES: &[&str] = &[
    "what about",
    "how about",
    "and also",
    "what percentage",
    "what percent",
    "what proportion",
    "furthermore",
    "additionally",
    "how many of",
    "what fraction",
    "also show",
    "also include",
    "can you also",
    "now show",
    "now give",
    "now list",
    "compare with",
    "compare to",
];

/// Test-type and table vocabulary: a short question containing one of these
/// names its own subject and is not an implicit reference.
const TABLE_KEYWORDS: &[&str] = &[
    "vl", "viral load", "eid", "early infant", "dbs", "covid", "tb", "tuberculosis",
    "hiv", "hepatitis", "form_vl", "form_eid", "form_covid", "form_tb", "recency",
    "form_recency", "generic_tests", "form_generic", "cd4", "form_cd4",
];

const SHORT_QUESTION_WORDS: usize = 6;

lazy_static! {
    static ref RE_WHERE: Regex =
        Regex::new(r"(?is)\bWHERE\s+(.+?)(?:\s+GROUP\s+BY|\s+ORDER\s+BY|\s+LIMIT|\s+HAVING|$)")
            .unwrap();
    static ref RE_TIME_INTERVAL: Regex = Regex::new(
        r"(?i)sample_tested_datetime\s*>=\s*DATE_SUB\s*\(\s*NOW\s*\(\s*\)\s*,\s*INTERVAL\s+(\d+)\s+(\w+)\s*\)"
    )
    .unwrap();
    static ref RE_TIME_START: Regex =
        Regex::new(r#"(?i)sample_tested_datetime\s*>=\s*['"]([^'"]+)['"]"#).unwrap();
    static ref RE_TIME_END: Regex =
        Regex::new(r#"(?i)sample_tested_datetime\s*<=\s*['"]([^'"]+)['"]"#).unwrap();
    static ref RE_TIME_BETWEEN: Regex = Regex::new(
        r#"(?i)sample_tested_datetime\s+BETWEEN\s+['"]([^'"]+)['"]\s+AND\s+['"]([^'"]+)['"]"#
    )
    .unwrap();
    static ref RE_TIME_YEAR: Regex =
        Regex::new(r"(?i)YEAR\s*\(\s*sample_tested_datetime\s*\)\s*=\s*(\d{4})").unwrap();
    static ref RE_FACILITY: Regex =
        Regex::new(r#"(?i)facility_name\s*=\s*['"]([^'"]+)['"]"#).unwrap();
    static ref RE_STATE: Regex =
        Regex::new(r#"(?i)facility_state\s*=\s*['"]([^'"]+)['"]"#).unwrap();
    static ref RE_PROVINCE: Regex =
        Regex::new(r#"(?i)\bprovince\s*=\s*['"]([^'"]+)['"]"#).unwrap();
    static ref RE_DISTRICT: Regex =
        Regex::new(r#"(?i)\bdistrict\s*=\s*['"]([^'"]+)['"]"#).unwrap();
    static ref RE_ANALYZER: Regex =
        Regex::new(r#"(?i)machine_used\s*=\s*['"]([^'"]+)['"]"#).unwrap();
    static ref RE_VL_CATEGORY: Regex =
        Regex::new(r#"(?i)vl_result_category\s*=\s*['"]([^'"]+)['"]"#).unwrap();
    static ref RE_VL_THRESHOLD: Regex =
        Regex::new(r"(?i)result_value_absolute\s*([><=!]+)\s*(\d+)").unwrap();
    static ref RE_SEX: Regex =
        Regex::new(r#"(?i)(?:gender|sex)\s*=\s*['"]([^'"]+)['"]"#).unwrap();
    static ref RE_AGE: Regex = Regex::new(r"(?i)\bage\s*([><=!]+)\s*(\d+)").unwrap();
    static ref RE_PATIENT_STATUS: Regex =
        Regex::new(r#"(?i)(?:patient_status|treatment_status)\s*=\s*['"]([^'"]+)['"]"#).unwrap();
    static ref RE_WORD: Regex = Regex::new(r"[a-zA-Z0-9_']+").unwrap();
}

/// One filter recovered from a prior turn's WHERE clause: a human-readable
/// name/value pair plus the SQL fragment to carry forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryFilter {
    pub name: String,
    pub value: String,
    pub sql: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub sql: String,
    pub intent: String,
    pub intent_details: Vec<String>,
    pub tables_used: Vec<String>,
    pub filters_applied: Vec<QueryFilter>,
    pub columns_returned: Vec<String>,
    pub row_count: usize,
    pub sample_rows: Vec<Row>,
    pub result_summary: String,
    pub summary: String,
}

/// Context payload accompanying a new question.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationContext {
    pub has_context: bool,
    pub references_missing_context: bool,
    pub suggested_response: Option<String>,
    pub context_summary: String,
    pub llm_context_block: String,
    pub suggested_filters: Vec<String>,
    pub common_tables: Vec<String>,
    pub recent_turns: Vec<ConversationTurn>,
}

impl ConversationContext {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Fields of a completed turn supplied by the pipeline when recording.
pub struct TurnRecord<'a> {
    pub question: &'a str,
    pub sql: &'a str,
    pub intent: &'a str,
    pub intent_details: &'a [String],
    pub tables_used: &'a [String],
}

/// Fresh session identifier for callers that don't bring their own.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Session-keyed conversation windows. Sessions never share state, so the
/// map shards are the only synchronization involved.
pub struct ConversationStore {
    sessions: DashMap<String, VecDeque<ConversationTurn>>,
    max_turns: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

impl ConversationStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_turns,
        }
    }

    /// Record a completed query turn, evicting the oldest once full.
    pub fn add_query(&self, session: &str, record: TurnRecord<'_>, db_result: Option<&ExecutionResult>) {
        let mut turn = ConversationTurn {
            timestamp: Utc::now(),
            question: record.question.to_string(),
            sql: record.sql.to_string(),
            intent: record.intent.to_string(),
            intent_details: record.intent_details.to_vec(),
            tables_used: record.tables_used.to_vec(),
            filters_applied: extract_filters(record.sql),
            columns_returned: Vec::new(),
            row_count: 0,
            sample_rows: Vec::new(),
            result_summary: String::new(),
            summary: format!(
                "Asked about {} from {}: \"{}\"",
                record.intent,
                record.tables_used.join(", "),
                record.question
            ),
        };

        if let Some(result) = db_result {
            turn.columns_returned = result.columns();
            turn.row_count = result.count;
            turn.sample_rows = sample_rows(&result.rows);
            turn.result_summary = result_summary(result, record.intent);
        }

        let mut window = self.sessions.entry(session.to_string()).or_default();
        window.push_back(turn);
        while window.len() > self.max_turns {
            window.pop_front();
        }
    }

    /// Build the context payload for a new question. No-context unless the
    /// window is non-empty and the question carries a reference cue; a cue
    /// against an empty window flags missing context instead.
    pub fn context_for_new_query(&self, session: &str, question: &str) -> ConversationContext {
        let lowered = question.trim().to_lowercase();
        let history = self.history(session);

        if history.is_empty() {
            if let Some(cue) = explicit_reference_cue(&lowered) {
                debug!(cue = %cue, "reference cue against empty conversation window");
                return ConversationContext {
                    references_missing_context: true,
                    suggested_response: Some(
                        "There are no previous results to refer back to in this conversation - \
                         please ask a complete question."
                            .to_string(),
                    ),
                    ..ConversationContext::none()
                };
            }
            return ConversationContext::none();
        }

        if reference_cue(&lowered, true).is_none() {
            return ConversationContext::none();
        }

        let start = history.len().saturating_sub(RECENT_WINDOW);
        let recent: Vec<ConversationTurn> = history[start..].to_vec();

        ConversationContext {
            has_context: true,
            references_missing_context: false,
            suggested_response: None,
            context_summary: context_summary(&recent),
            llm_context_block: llm_context_block(&recent),
            suggested_filters: continuation_filters(&recent),
            common_tables: common_tables(&recent),
            recent_turns: recent,
        }
    }

    pub fn clear_history(&self, session: &str) {
        self.sessions.remove(session);
    }

    pub fn history(&self, session: &str) -> Vec<ConversationTurn> {
        self.sessions
            .get(session)
            .map(|window| window.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn history_item(&self, session: &str, index: usize) -> Option<ConversationTurn> {
        self.sessions
            .get(session)
            .and_then(|window| window.get(index).cloned())
    }

    /// Truncate history to entries up to and including `index`.
    pub fn rewind(&self, session: &str, index: usize) {
        if let Some(mut window) = self.sessions.get_mut(session) {
            window.truncate(index + 1);
        }
    }
}

// ── Reference detection ─────────────────────────────────────────────

/// Cues that only make sense when prior results exist.
fn explicit_reference_cue(lowered: &str) -> Option<&'static str> {
    for &cue in PRONOUN_CUES {
        if word_match(lowered, cue) {
            return Some(cue);
        }
    }
    for &cue in CONTINUATION_CUES.iter().chain(FOLLOW_UP_CUES) {
        if lowered.contains(cue) {
            return Some(cue);
        }
    }
    None
}

/// Full cue list, first match wins. Drill-down and short-question cues are
/// gated on the question not naming its own table/test type.
fn reference_cue(lowered: &str, has_history: bool) -> Option<&'static str> {
    if let Some(cue) = explicit_reference_cue(lowered) {
        return Some(cue);
    }

    let names_own_subject = TABLE_KEYWORDS.iter().any(|kw| lowered.contains(kw));
    if !names_own_subject {
        for &cue in DRILL_DOWN_CUES {
            if lowered.contains(cue) {
                return Some(cue);
            }
        }
    }

    for &cue in REFINEMENT_CUES {
        if lowered.contains(cue) {
            return Some(cue);
        }
    }

    if has_history && !names_own_subject && RE_WORD.find_iter(lowered).count() < SHORT_QUESTION_WORDS
    {
        return Some("short_question");
    }

    None
}

fn word_match(text: &str, word: &str) -> bool {
    Regex::new(&format!(r"\b{}\b", regex::escape(word)))
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

// ── Filter extraction ───────────────────────────────────────────────

/// Pattern-match known filter shapes out of a statement's WHERE clause.
pub fn extract_filters(sql: &str) -> Vec<QueryFilter> {
    let Some(caps) = RE_WHERE.captures(sql) else {
        return Vec::new();
    };
    let where_clause = caps.get(1).map(|m| m.as_str()).unwrap_or("");
    let mut filters = Vec::new();

    if let Some(m) = RE_TIME_INTERVAL.captures(where_clause) {
        let (n, unit) = (&m[1], &m[2]);
        filters.push(QueryFilter {
            name: "time_period".to_string(),
            value: format!("{} {}", n, unit.to_uppercase()),
            sql: format!(
                "sample_tested_datetime >= DATE_SUB(NOW(), INTERVAL {} {})",
                n, unit
            ),
        });
    }
    if let Some(m) = RE_TIME_START.captures(where_clause) {
        filters.push(QueryFilter {
            name: "time_period".to_string(),
            value: m[1].to_string(),
            sql: format!("sample_tested_datetime >= '{}'", &m[1]),
        });
    }
    if let Some(m) = RE_TIME_END.captures(where_clause) {
        filters.push(QueryFilter {
            name: "time_end".to_string(),
            value: m[1].to_string(),
            sql: format!("sample_tested_datetime <= '{}'", &m[1]),
        });
    }
    if let Some(m) = RE_TIME_BETWEEN.captures(where_clause) {
        filters.push(QueryFilter {
            name: "time_period".to_string(),
            value: format!("{} .. {}", &m[1], &m[2]),
            sql: format!(
                "sample_tested_datetime BETWEEN '{}' AND '{}'",
                &m[1], &m[2]
            ),
        });
    }
    if let Some(m) = RE_TIME_YEAR.captures(where_clause) {
        filters.push(QueryFilter {
            name: "time_year".to_string(),
            value: m[1].to_string(),
            sql: format!("YEAR(sample_tested_datetime) = {}", &m[1]),
        });
    }
    if let Some(m) = RE_FACILITY.captures(where_clause) {
        filters.push(QueryFilter {
            name: "facility".to_string(),
            value: m[1].to_string(),
            sql: format!("facility_name = '{}'", &m[1]),
        });
    }
    if let Some(m) = RE_STATE.captures(where_clause) {
        filters.push(QueryFilter {
            name: "state".to_string(),
            value: m[1].to_string(),
            sql: format!("facility_state = '{}'", &m[1]),
        });
    }
    if let Some(m) = RE_PROVINCE.captures(where_clause) {
        filters.push(QueryFilter {
            name: "province".to_string(),
            value: m[1].to_string(),
            sql: format!("province = '{}'", &m[1]),
        });
    }
    if let Some(m) = RE_DISTRICT.captures(where_clause) {
        filters.push(QueryFilter {
            name: "district".to_string(),
            value: m[1].to_string(),
            sql: format!("district = '{}'", &m[1]),
        });
    }
    if let Some(m) = RE_ANALYZER.captures(where_clause) {
        filters.push(QueryFilter {
            name: "analyzer".to_string(),
            value: m[1].to_string(),
            sql: format!("machine_used = '{}'", &m[1]),
        });
    }
    if let Some(m) = RE_VL_CATEGORY.captures(where_clause) {
        filters.push(QueryFilter {
            name: "vl_category".to_string(),
            value: m[1].to_string(),
            sql: format!("vl_result_category = '{}'", &m[1]),
        });
    }
    if let Some(m) = RE_VL_THRESHOLD.captures(where_clause) {
        filters.push(QueryFilter {
            name: "vl_threshold".to_string(),
            value: format!("{} {}", &m[1], &m[2]),
            sql: format!("result_value_absolute {} {}", &m[1], &m[2]),
        });
    }
    if let Some(m) = RE_SEX.captures(where_clause) {
        filters.push(QueryFilter {
            name: "sex".to_string(),
            value: m[1].to_string(),
            sql: format!("gender = '{}'", &m[1]),
        });
    }
    if let Some(m) = RE_AGE.captures(where_clause) {
        filters.push(QueryFilter {
            name: "age".to_string(),
            value: format!("{} {}", &m[1], &m[2]),
            sql: format!("age {} {}", &m[1], &m[2]),
        });
    }
    if let Some(m) = RE_PATIENT_STATUS.captures(where_clause) {
        filters.push(QueryFilter {
            name: "patient_status".to_string(),
            value: m[1].to_string(),
            sql: format!("patient_status = '{}'", &m[1]),
        });
    }

    filters
}

/// Filter fragments to carry into a continuation query. Merged across the
/// recent turns; the most recent value wins per filter name.
fn continuation_filters(recent: &[ConversationTurn]) -> Vec<String> {
    let mut merged: Vec<(String, String)> = Vec::new();
    for turn in recent {
        for filter in &turn.filters_applied {
            if let Some(slot) = merged.iter_mut().find(|(name, _)| *name == filter.name) {
                slot.1 = filter.sql.clone();
            } else {
                merged.push((filter.name.clone(), filter.sql.clone()));
            }
        }
    }
    merged.into_iter().map(|(_, sql)| sql).collect()
}

/// Tables used in more than one of the recent turns.
fn common_tables(recent: &[ConversationTurn]) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for turn in recent {
        for table in &turn.tables_used {
            if let Some(slot) = counts.iter_mut().find(|(name, _)| name == table) {
                slot.1 += 1;
            } else {
                counts.push((table.clone(), 1));
            }
        }
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name)
        .collect()
}

// ── Summaries ───────────────────────────────────────────────────────

fn context_summary(recent: &[ConversationTurn]) -> String {
    let mut summary = String::from("Previous queries, SQL, and their outputs:\n");
    for (i, turn) in recent.iter().enumerate() {
        summary.push_str(&format!("Q{}: {}\n", i + 1, turn.question));
        summary.push_str(&format!("   Intent: {}\n", turn.intent));
        if !turn.sql.is_empty() {
            summary.push_str(&format!("   SQL: {}\n", truncate(&turn.sql, 200)));
        }
        if !turn.tables_used.is_empty() {
            summary.push_str(&format!("   Tables: {}\n", turn.tables_used.join(", ")));
        }
        if !turn.result_summary.is_empty() {
            summary.push_str(&format!("   Result: {}\n", turn.result_summary));
        }
        summary.push_str(&format!("   Row count: {}\n", turn.row_count));
        if !turn.columns_returned.is_empty() {
            summary.push_str(&format!("   Columns: {}\n", turn.columns_returned.join(", ")));
        }
        if !turn.filters_applied.is_empty() {
            let display: Vec<String> = turn
                .filters_applied
                .iter()
                .map(|f| format!("{}: {}", f.name, f.value))
                .collect();
            summary.push_str(&format!("   Filters: {}\n", display.join(", ")));
        }
        summary.push('\n');
    }
    summary
}

/// Prompt block instructing the model how to resolve references and carry
/// filters forward.
fn llm_context_block(recent: &[ConversationTurn]) -> String {
    let mut block = String::from(
        "CONVERSATION CONTEXT (use to resolve references like \"those\", \"these\", etc.):\n\n",
    );
    for (i, turn) in recent.iter().enumerate() {
        block.push_str(&format!("Q{}: \"{}\"\n", i + 1, turn.question));
        if !turn.sql.is_empty() {
            block.push_str(&format!("SQL: {}\n", truncate(&turn.sql, 300)));
        }
        if !turn.result_summary.is_empty() {
            block.push_str(&format!("Result: {}\n", turn.result_summary));
        }
        let mut parts: Vec<String> = turn
            .filters_applied
            .iter()
            .map(|f| format!("{}={}", f.name, f.value))
            .collect();
        if !turn.tables_used.is_empty() {
            parts.push(format!("table={}", turn.tables_used.join(", ")));
        }
        if !parts.is_empty() {
            block.push_str(&format!("Filters: {}\n", parts.join(", ")));
        }
        block.push('\n');
    }
    block.push_str(
        "If the user says \"these\", \"those\", \"of those\" etc., they mean the results from \
         the most recent query above.\n",
    );
    block.push_str("CARRY FORWARD all filters from the previous query and ADD the new conditions.\n");
    block
}

fn sample_rows(rows: &[Row]) -> Vec<Row> {
    rows.iter()
        .take(MAX_SAMPLE_ROWS)
        .map(|row| {
            row.iter()
                .take(MAX_SAMPLE_COLS)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .collect()
}

fn result_summary(result: &ExecutionResult, intent: &str) -> String {
    if result.count == 0 {
        return "No results found".to_string();
    }

    match intent {
        "count" => {
            if let Some(first) = result.rows.first() {
                for (col, value) in first {
                    if let Some(n) = value.as_f64() {
                        if n > 0.0 {
                            return format!("Found {} records ({})", format_count(n), col);
                        }
                    }
                }
            }
            format!("Found {} records", result.count)
        }
        "list" => {
            let suffix = if result.count > 10 { " (showing sample)" } else { "" };
            format!("Retrieved {} records{}", result.count, suffix)
        }
        "aggregate" => {
            if let Some(first) = result.rows.first() {
                let parts: Vec<String> = first
                    .iter()
                    .filter_map(|(col, value)| {
                        value.as_f64().map(|n| format!("{}: {:.2}", col, n))
                    })
                    .take(MAX_AGGREGATE_FIELDS)
                    .collect();
                if !parts.is_empty() {
                    return format!("Computed: {}", parts.join(", "));
                }
            }
            format!("Computed {} aggregate values", result.count)
        }
        "trend" => format!("Retrieved {} data points for trend analysis", result.count),
        "comparison" => format!("Retrieved {} rows for comparison", result.count),
        _ => format!("Returned {} results", result.count),
    }
}

fn format_count(n: f64) -> String {
    let whole = n.round() as i64;
    let raw = whole.abs().to_string();
    let mut grouped = String::new();
    for (i, ch) in raw.chars().enumerate() {
        if i > 0 && (raw.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if whole < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record<'a>(question: &'a str, sql: &'a str, tables: &'a [String]) -> TurnRecord<'a> {
        TurnRecord {
            question,
            sql,
            intent: "count",
            intent_details: &[],
            tables_used: tables,
        }
    }

    fn exec_result(rows: Vec<serde_json::Value>) -> ExecutionResult {
        let rows: Vec<Row> = rows
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();
        ExecutionResult::new(rows, 5)
    }

    #[test]
    fn window_evicts_oldest_turn_first() {
        let store = ConversationStore::new(3);
        let tables = vec!["form_vl".to_string()];
        for i in 0..4 {
            let q = format!("question {}", i);
            store.add_query("s1", record(&q, "SELECT COUNT(*) FROM form_vl", &tables), None);
        }
        let history = store.history("s1");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].question, "question 1");
        assert_eq!(history[2].question, "question 3");
    }

    #[test]
    fn fresh_session_never_returns_context() {
        let store = ConversationStore::default();
        let ctx = store.context_for_new_query("s1", "how many VL tests in 2024?");
        assert!(!ctx.has_context);
        assert!(!ctx.references_missing_context);
    }

    #[test]
    fn reference_cue_against_empty_window_flags_missing_context() {
        let store = ConversationStore::default();
        let ctx = store.context_for_new_query("s1", "how many of those are high?");
        assert!(ctx.references_missing_context);
        assert!(ctx.suggested_response.is_some());
    }

    #[test]
    fn context_requires_reference_cue() {
        let store = ConversationStore::default();
        let tables = vec!["form_vl".to_string()];
        store.add_query("s1", record("vl tests 2024", "SELECT COUNT(*) FROM form_vl", &tables), None);

        let unrelated = store.context_for_new_query("s1", "how many covid tests were run in March 2023");
        assert!(!unrelated.has_context);

        let followup = store.context_for_new_query("s1", "and how many of those were suppressed?");
        assert!(followup.has_context);
        assert_eq!(followup.recent_turns.len(), 1);
    }

    #[test]
    fn sessions_are_isolated() {
        let store = ConversationStore::default();
        let tables = vec!["form_vl".to_string()];
        store.add_query("s1", record("vl tests", "SELECT COUNT(*) FROM form_vl", &tables), None);
        assert!(store.history("s2").is_empty());
        let ctx = store.context_for_new_query("s2", "what about those?");
        assert!(ctx.references_missing_context);
    }

    #[test]
    fn extracts_time_and_category_filters() {
        let sql = "SELECT COUNT(*) FROM form_vl WHERE sample_tested_datetime >= '2024-01-01' \
                   AND vl_result_category = 'suppressed' GROUP BY lab_id";
        let filters = extract_filters(sql);
        let names: Vec<&str> = filters.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"time_period"));
        assert!(names.contains(&"vl_category"));
        let vl = filters.iter().find(|f| f.name == "vl_category").unwrap();
        assert_eq!(vl.sql, "vl_result_category = 'suppressed'");
    }

    #[test]
    fn most_recent_filter_wins_in_carry_over() {
        let store = ConversationStore::default();
        let tables = vec!["form_vl".to_string()];
        store.add_query(
            "s1",
            record("q1", "SELECT COUNT(*) FROM form_vl WHERE facility_name = 'Alpha Clinic'", &tables),
            None,
        );
        store.add_query(
            "s1",
            record("q2", "SELECT COUNT(*) FROM form_vl WHERE facility_name = 'Beta Clinic'", &tables),
            None,
        );
        let ctx = store.context_for_new_query("s1", "break down those by month");
        assert!(ctx.has_context);
        assert!(ctx
            .suggested_filters
            .contains(&"facility_name = 'Beta Clinic'".to_string()));
        assert!(!ctx
            .suggested_filters
            .contains(&"facility_name = 'Alpha Clinic'".to_string()));
    }

    #[test]
    fn common_tables_need_two_appearances() {
        let store = ConversationStore::default();
        let vl = vec!["form_vl".to_string()];
        let both = vec!["form_vl".to_string(), "facility_details".to_string()];
        store.add_query("s1", record("q1", "SELECT COUNT(*) FROM form_vl", &vl), None);
        store.add_query("s1", record("q2", "SELECT COUNT(*) FROM form_vl", &both), None);
        let ctx = store.context_for_new_query("s1", "of those, which are rejected?");
        assert_eq!(ctx.common_tables, vec!["form_vl".to_string()]);
    }

    #[test]
    fn aggregate_summary_reports_numeric_fields() {
        let result = exec_result(vec![json!({
            "avg_tat": 4.5,
            "max_tat": 12.0,
            "facility": "Alpha"
        })]);
        let summary = result_summary(&result, "aggregate");
        assert!(summary.starts_with("Computed: "));
        assert!(summary.contains("avg_tat: 4.50"));
    }

    #[test]
    fn rewind_truncates_history() {
        let store = ConversationStore::default();
        let tables = vec!["form_vl".to_string()];
        for q in ["a", "b", "c"] {
            store.add_query("s1", record(q, "SELECT COUNT(*) FROM form_vl", &tables), None);
        }
        store.rewind("s1", 0);
        let history = store.history("s1");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].question, "a");
    }
}
