//! SQL Extraction
//!
//! Pulls a single SELECT statement out of raw generative-model output.
//! Models are unreliable about markdown fencing and sometimes truncate
//! mid-statement, so extraction is an ordered cascade of strategies, each a
//! pure `&str -> Option<String>`, trading precision for recall as the list
//! descends. Also hosts the JSON-extraction helper used for structured
//! intent and chart replies.

use crate::error::{InsightsError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

lazy_static! {
    static ref RE_FENCED_BLOCK: Regex =
        Regex::new(r"(?is)```(?:sql)?\s*(select\s+.*?)\s*```").unwrap();
    static ref RE_OPEN_FENCE: Regex =
        Regex::new(r"(?is)```(?:sql)?\s*(select\s+.*)").unwrap();
    static ref RE_ANY_FENCE: Regex =
        Regex::new(r"(?is)```(?:sql)?\s*([\s\S]*?)\s*```").unwrap();
    static ref RE_KNOWN_PREFIX: Regex =
        Regex::new(r"(?i)^(mysql compatible select statement:?|sql:?|query:?)\s*").unwrap();
    static ref RE_ANCHORED_SELECT: Regex =
        Regex::new(r"(?is)^\s*select\s+.+?\s+from\s+").unwrap();
    static ref RE_SELECT_FROM_TABLE: Regex =
        Regex::new(r"(?is)select\s+.*?\bfrom\s+\w+").unwrap();
    static ref RE_HAS_FROM: Regex = Regex::new(r"(?i)\bfrom\b").unwrap();
    static ref RE_WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();
    static ref RE_FENCED_JSON: Regex =
        Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap();
}

pub type ExtractionStrategy = fn(&str) -> Option<String>;

/// Strategies in priority order. Each is independently testable.
pub const STRATEGIES: &[(&str, ExtractionStrategy)] = &[
    ("fenced_block", fenced_block),
    ("unterminated_fence", unterminated_fence),
    ("stripped_prefix", stripped_prefix),
    ("clause_tail_search", clause_tail_search),
    ("loose_select_from", loose_select_from),
];

/// Extract and normalize a SELECT statement from model output.
pub fn extract_sql(response: &str) -> Result<String> {
    for (name, strategy) in STRATEGIES {
        if let Some(sql) = strategy(response) {
            debug!(strategy = %name, "extracted SQL");
            return Ok(clean_sql(&sql));
        }
    }

    let mut snippet: String = response.chars().take(200).collect();
    if snippet.len() < response.len() {
        snippet.push('…');
    }
    Err(InsightsError::ExtractionFailure(snippet))
}

/// A complete fenced code block containing `SELECT ... FROM ...`.
pub fn fenced_block(text: &str) -> Option<String> {
    let captured = RE_FENCED_BLOCK.captures(text)?.get(1)?.as_str();
    RE_HAS_FROM.is_match(captured).then(|| captured.to_string())
}

/// A fence that was opened but never closed (generation cut off): take
/// everything after the opening fence.
pub fn unterminated_fence(text: &str) -> Option<String> {
    let captured = RE_OPEN_FENCE.captures(text)?.get(1)?.as_str();
    RE_HAS_FROM.is_match(captured).then(|| captured.to_string())
}

/// Strip fencing and known prefixes, then accept if the remainder starts
/// with a SELECT ... FROM statement.
pub fn stripped_prefix(text: &str) -> Option<String> {
    let unfenced = RE_ANY_FENCE.replace_all(text, "$1");
    let cleaned = RE_KNOWN_PREFIX.replace(unfenced.trim(), "");
    let cleaned = cleaned.trim();
    RE_ANCHORED_SELECT
        .is_match(cleaned)
        .then(|| cleaned.to_string())
}

/// Search anywhere for `SELECT ... FROM <table>` and extend through its
/// trailing clauses up to a terminator: a fence, a stray semicolon, or a
/// stray period (one that is not part of a number or qualified identifier).
pub fn clause_tail_search(text: &str) -> Option<String> {
    let m = RE_SELECT_FROM_TABLE.find(text)?;
    let rest = &text[m.end()..];
    let tail = &rest[..statement_end(rest)];
    Some(format!("{}{}", m.as_str(), tail))
}

/// Loosest fallback: the first `SELECT ... FROM <table>` substring.
pub fn loose_select_from(text: &str) -> Option<String> {
    RE_SELECT_FROM_TABLE
        .find(text)
        .map(|m| m.as_str().to_string())
}

fn statement_end(rest: &str) -> usize {
    for (i, ch) in rest.char_indices() {
        match ch {
            '`' if rest[i..].starts_with("```") => return i,
            ';' => return i,
            '.' => {
                let prev_is_digit = rest[..i]
                    .chars()
                    .next_back()
                    .map(|c| c.is_ascii_digit())
                    .unwrap_or(false);
                let next_is_break = rest[i + 1..]
                    .chars()
                    .next()
                    .map(|c| c.is_whitespace())
                    .unwrap_or(true);
                if !prev_is_digit && next_is_break {
                    return i;
                }
            }
            _ => {}
        }
    }
    rest.len()
}

/// Normalize an extracted statement: trim, drop trailing punctuation, and
/// collapse internal whitespace runs. Idempotent.
pub fn clean_sql(sql: &str) -> String {
    let trimmed = sql.trim().trim_end_matches([';', '.', ',']).trim_end();
    RE_WHITESPACE_RUN.replace_all(trimmed, " ").to_string()
}

/// Extract a JSON object from a model reply that may include markdown
/// fencing, surrounding prose, or a truncated tail (missing closing brace).
pub fn extract_json(raw: &str) -> Option<serde_json::Value> {
    let trimmed = raw.trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Some(value);
    }

    if let Some(caps) = RE_FENCED_JSON.captures(trimmed) {
        if let Some(inner) = caps.get(1) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(inner.as_str().trim()) {
                return Some(value);
            }
        }
    }

    if let Some(object) = first_balanced_object(trimmed) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(object) {
            return Some(value);
        }
    }

    // Truncated generation: repair by appending the missing closing brace.
    if trimmed.starts_with('{') {
        let repaired = format!("{}}}", trimmed.trim_end_matches(','));
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&repaired) {
            return Some(value);
        }
    }

    None
}

fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_block_extracts_complete_statement() {
        let raw = "```sql\nSELECT sample_code FROM form_vl WHERE sample_tested_datetime >= '2024-01-01'\n```";
        assert_eq!(
            extract_sql(raw).unwrap(),
            "SELECT sample_code FROM form_vl WHERE sample_tested_datetime >= '2024-01-01'"
        );
    }

    #[test]
    fn fenced_block_requires_from_clause() {
        assert_eq!(fenced_block("```sql\nSELECT 1\n```"), None);
    }

    #[test]
    fn unterminated_fence_recovers_truncated_output() {
        let raw = "Here is the query:\n```sql\nSELECT COUNT(*) AS total FROM form_vl WHERE lab_id = 4";
        let sql = unterminated_fence(raw).unwrap();
        assert!(sql.starts_with("SELECT COUNT(*)"));
        assert!(sql.ends_with("lab_id = 4"));
    }

    #[test]
    fn stripped_prefix_handles_sql_label() {
        let raw = "SQL: SELECT facility_name FROM facility_details LIMIT 10";
        assert_eq!(
            stripped_prefix(raw).unwrap(),
            "SELECT facility_name FROM facility_details LIMIT 10"
        );
    }

    #[test]
    fn clause_tail_stops_at_stray_period() {
        let raw = "The answer is SELECT COUNT(*) FROM form_tb WHERE result_value > 1.5 GROUP BY lab_id. Hope that helps!";
        assert_eq!(
            clause_tail_search(raw).unwrap(),
            "SELECT COUNT(*) FROM form_tb WHERE result_value > 1.5 GROUP BY lab_id"
        );
    }

    #[test]
    fn clause_tail_stops_at_semicolon_and_fence() {
        assert_eq!(
            clause_tail_search("SELECT a FROM t WHERE b = 2; trailing").unwrap(),
            "SELECT a FROM t WHERE b = 2"
        );
        assert_eq!(
            clause_tail_search("SELECT a FROM t ORDER BY a``` suffix").unwrap(),
            "SELECT a FROM t ORDER BY a"
        );
    }

    #[test]
    fn loose_fallback_finds_minimal_statement() {
        assert_eq!(
            loose_select_from("noise SELECT x FROM y noise").unwrap(),
            "SELECT x FROM y"
        );
    }

    #[test]
    fn extraction_is_idempotent_on_clean_output() {
        let raw = "```sql\nSELECT  lab_id,\n  COUNT(*) AS total\nFROM form_vl\nGROUP BY lab_id;\n```";
        let first = extract_sql(raw).unwrap();
        let second = extract_sql(&first).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "SELECT lab_id, COUNT(*) AS total FROM form_vl GROUP BY lab_id");
    }

    #[test]
    fn no_sql_is_an_extraction_failure() {
        let err = extract_sql("I cannot answer that question.").unwrap_err();
        assert!(matches!(err, InsightsError::ExtractionFailure(_)));
    }

    #[test]
    fn json_direct_and_fenced() {
        assert!(extract_json(r#"{"type": "single"}"#).is_some());
        assert!(extract_json("```json\n{\"type\": \"single\"}\n```").is_some());
    }

    #[test]
    fn json_repair_appends_closing_brace() {
        let value = extract_json(r#"{"type": "single", "intents": ["count"]"#).unwrap();
        assert_eq!(value["type"], "single");
    }

    #[test]
    fn json_embedded_in_prose() {
        let value = extract_json("Sure! {\"a\": {\"b\": 1}} done").unwrap();
        assert_eq!(value["a"]["b"], 1);
    }
}
