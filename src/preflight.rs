//! Pre-flight Query Validation
//!
//! Fast, stateless screening of the raw question before any model call:
//! configured reject patterns (DDL/administrative vocabulary, UNION/EXECUTE,
//! schema introspection, privilege management) and overly-broad requests.
//! Failure is terminal for the turn.

use crate::error::{InsightsError, Result};
use crate::rules::BusinessRules;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref BROAD_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)^(show|list|get|select)?\s*(all|everything|\*)\s*$").unwrap(),
        Regex::new(r"(?i)^(dump|export)\s").unwrap(),
        Regex::new(r"(?i)^(select\s+\*|all\s+data)").unwrap(),
    ];
}

pub fn validate_question(question: &str, rules: &BusinessRules) -> Result<()> {
    for pattern in rules.reject_regexes() {
        if pattern.is_match(question) {
            return Err(InsightsError::RejectedQuery(
                "query contains disallowed operations".to_string(),
            ));
        }
    }

    let lowered = question.trim().to_lowercase();
    for pattern in BROAD_PATTERNS.iter() {
        if pattern.is_match(&lowered) {
            return Err(InsightsError::RejectedQuery(
                "query is too broad - please be more specific about what data you need".to_string(),
            ));
        }
    }

    Ok(())
}
