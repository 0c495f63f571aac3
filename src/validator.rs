//! SQL Safety Validation
//!
//! The data-governance gate on extracted SQL: SELECT-only, no forbidden
//! column anywhere, every FROM/JOIN table in the schema allowlist. Purely
//! textual - it does not parse SQL into an AST, so it is defense in depth,
//! not a sandbox boundary. Violations are never downgraded.

use crate::error::{InsightsError, Result};
use crate::rules::BusinessRules;
use crate::schema::SchemaCatalog;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    static ref RE_SELECT: Regex = Regex::new(r"(?i)^\s*select\s").unwrap();
    static ref RE_FROM: Regex = Regex::new(r"(?i)\bFROM\s+([a-zA-Z0-9_]+)").unwrap();
    static ref RE_FROM_JOIN: Regex =
        Regex::new(r"(?i)\b(?:from|join)\s+([a-zA-Z0-9_]+)").unwrap();
    static ref RE_SINGLE_QUOTED: Regex = Regex::new(r"'(?:''|\\'|[^'])*'").unwrap();
    static ref RE_DOUBLE_QUOTED: Regex = Regex::new(r#""(?:\\"|[^"])*""#).unwrap();
}

pub struct SqlSafetyValidator {
    forbidden: Vec<(String, Regex)>,
    allowed_tables: HashSet<String>,
}

impl SqlSafetyValidator {
    pub fn new(rules: &BusinessRules, schema: &SchemaCatalog) -> Result<Self> {
        let forbidden = rules
            .forbidden_columns()
            .iter()
            .map(|column| {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(column));
                Regex::new(&pattern)
                    .map(|re| (column.clone(), re))
                    .map_err(|e| {
                        InsightsError::Config(format!("Invalid forbidden column '{}': {}", column, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            forbidden,
            allowed_tables: schema.allowed_tables().iter().cloned().collect(),
        })
    }

    /// Validate an extracted statement. Returns the statement unchanged so
    /// callers can treat validation as a pass-through.
    pub fn validate<'a>(&self, sql: &'a str) -> Result<&'a str> {
        if !RE_SELECT.is_match(sql) {
            return Err(InsightsError::SchemaViolation(
                "non-SELECT SQL returned by model".to_string(),
            ));
        }

        // Literals are stripped first so a quoted value cannot trip the
        // column ban; identifiers cannot hide inside literals.
        let scrubbed = strip_string_literals(sql);
        for (column, pattern) in &self.forbidden {
            if pattern.is_match(&scrubbed) {
                return Err(InsightsError::PrivacyViolation {
                    column: column.clone(),
                });
            }
        }

        if !RE_FROM.is_match(sql) {
            return Err(InsightsError::SchemaViolation(format!(
                "missing FROM clause in generated SQL: {}",
                sql
            )));
        }

        for table in extract_tables(sql) {
            if !self.allowed_tables.contains(&table) {
                return Err(InsightsError::SchemaViolation(format!(
                    "disallowed table: {}",
                    table
                )));
            }
        }

        Ok(sql)
    }
}

/// Identifiers following FROM or JOIN, deduplicated in order of appearance.
pub fn extract_tables(sql: &str) -> Vec<String> {
    RE_FROM_JOIN
        .captures_iter(sql)
        .map(|caps| caps[1].to_string())
        .unique()
        .collect()
}

fn strip_string_literals(sql: &str) -> String {
    let stripped = RE_SINGLE_QUOTED.replace_all(sql, "''");
    RE_DOUBLE_QUOTED.replace_all(&stripped, "\"\"").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SqlSafetyValidator {
        let rules = BusinessRules::from_json(
            r#"{
                "global_rules": {
                    "privacy": {
                        "forbidden_columns": ["patient_first_name", "patient_id", "system_patient_code"],
                        "allow_aggregated_distinct": ["patient_id"]
                    }
                }
            }"#,
        )
        .unwrap();
        let schema = SchemaCatalog::from_json(
            r#"{"tables": {
                "form_vl": {"columns": [{"name": "sample_code", "type": "varchar"}]},
                "facility_details": {"columns": [{"name": "facility_id", "type": "int"}]}
            }}"#,
        )
        .unwrap();
        SqlSafetyValidator::new(&rules, &schema).unwrap()
    }

    #[test]
    fn accepts_clean_select() {
        let v = validator();
        assert!(v
            .validate("SELECT sample_code FROM form_vl JOIN facility_details ON 1=1")
            .is_ok());
    }

    #[test]
    fn rejects_non_select() {
        let v = validator();
        let err = v.validate("DELETE FROM form_vl").unwrap_err();
        assert!(matches!(err, InsightsError::SchemaViolation(_)));
    }

    #[test]
    fn rejects_forbidden_column_and_names_it() {
        let v = validator();
        let err = v.validate("SELECT patient_first_name FROM form_vl").unwrap_err();
        match err {
            InsightsError::PrivacyViolation { column } => {
                assert_eq!(column, "patient_first_name");
            }
            other => panic!("expected privacy violation, got {:?}", other),
        }
    }

    #[test]
    fn forbidden_scan_is_case_insensitive_whole_word() {
        let v = validator();
        assert!(v.validate("SELECT Patient_ID FROM form_vl").is_err());
        // A longer identifier that merely contains the name is not a match.
        assert!(v
            .validate("SELECT patient_identifier_hash FROM form_vl")
            .is_ok());
    }

    #[test]
    fn aggregated_distinct_gets_no_exception() {
        // The rule store allows patient_id inside COUNT(DISTINCT ...), but
        // the validator applies a flat ban.
        let v = validator();
        assert!(v
            .validate("SELECT COUNT(DISTINCT patient_id) FROM form_vl")
            .is_err());
    }

    #[test]
    fn forbidden_name_inside_string_literal_is_ignored() {
        let v = validator();
        assert!(v
            .validate("SELECT sample_code FROM form_vl WHERE note = 'patient_id'")
            .is_ok());
    }

    #[test]
    fn rejects_missing_from() {
        let v = validator();
        let err = v.validate("SELECT 1").unwrap_err();
        assert!(matches!(err, InsightsError::SchemaViolation(_)));
    }

    #[test]
    fn rejects_disallowed_table() {
        let v = validator();
        let err = v.validate("SELECT * FROM secret_table").unwrap_err();
        match err {
            InsightsError::SchemaViolation(message) => {
                assert!(message.contains("secret_table"));
            }
            other => panic!("expected schema violation, got {:?}", other),
        }
    }

    #[test]
    fn join_tables_are_checked_too() {
        let v = validator();
        assert!(v
            .validate("SELECT sample_code FROM form_vl JOIN hidden_table ON 1=1")
            .is_err());
    }

    #[test]
    fn extract_tables_dedupes_in_order() {
        let tables = extract_tables(
            "SELECT a FROM form_vl fv JOIN facility_details fd ON fv.lab_id = fd.facility_id \
             JOIN form_vl f2 ON 1=1",
        );
        assert_eq!(tables, vec!["form_vl".to_string(), "facility_details".to_string()]);
    }
}
