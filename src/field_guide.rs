//! Field Guide Store
//!
//! Domain terminology and column semantics: test-type synonyms, clinical
//! thresholds, per-test-type column defaults, and column meaning text used
//! to ground SQL generation. Read-only after load.

use crate::error::{InsightsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One terminology synonym group: a `|`-separated list of user phrasings
/// and the column/table/expression they map to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermMapping {
    pub terms: String,
    pub maps_to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdDef {
    pub condition: String,
    pub description: String,
    #[serde(default)]
    pub clinical_meaning: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClinicalThresholds {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdDef>,
    #[serde(default)]
    pub default_filters: BTreeMap<String, String>,
}

/// Per-test-type table and column defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestTypeLogic {
    pub table: String,
    #[serde(default)]
    pub lab_id_col: Option<String>,
    #[serde(default)]
    pub primary_result_column: Option<String>,
    #[serde(default)]
    pub text_result_column: Option<String>,
    #[serde(default)]
    pub category_column: Option<String>,
    #[serde(default)]
    pub date_tested_column: Option<String>,
    #[serde(default)]
    pub date_collected_column: Option<String>,
    #[serde(default)]
    pub sample_id_column: Option<String>,
    #[serde(default)]
    pub default_description: Option<String>,
    #[serde(default)]
    pub display_lab_name: Option<String>,
    #[serde(default)]
    pub common_groupings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeaning {
    pub column: String,
    pub meaning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldGuide {
    #[serde(default)]
    pub terminology_mapping: Vec<TermMapping>,
    #[serde(default)]
    pub clinical_thresholds: BTreeMap<String, ClinicalThresholds>,
    #[serde(default)]
    pub test_type_logic: BTreeMap<String, TestTypeLogic>,
    #[serde(default)]
    pub column_semantics: BTreeMap<String, Vec<ColumnMeaning>>,
    /// Test type assumed when a question names no specific test.
    #[serde(default = "default_test_type")]
    pub default_test_type: String,
}

fn default_test_type() -> String {
    "vl".to_string()
}

impl FieldGuide {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| InsightsError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| InsightsError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    pub fn table_for_test_type(&self, test_type: &str) -> Option<&str> {
        self.test_type_logic
            .get(test_type)
            .map(|logic| logic.table.as_str())
    }

    pub fn test_type_for_table(&self, table: &str) -> Option<&str> {
        self.test_type_logic
            .iter()
            .find(|(_, logic)| logic.table == table)
            .map(|(name, _)| name.as_str())
    }

    /// Table backing the default test type, used as the last-resort target
    /// for generic patient/test/sample questions.
    pub fn default_test_table(&self) -> &str {
        self.table_for_test_type(&self.default_test_type)
            .unwrap_or("form_vl")
    }

    /// All test-form tables known to the guide.
    pub fn test_form_tables(&self) -> Vec<&str> {
        self.test_type_logic
            .values()
            .map(|logic| logic.table.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_guide() -> FieldGuide {
        serde_json::from_str(
            r#"{
                "test_type_logic": {
                    "vl": {"table": "form_vl", "primary_result_column": "result_value_absolute"},
                    "tb": {"table": "form_tb"}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn maps_test_types_and_tables_both_ways() {
        let guide = sample_guide();
        assert_eq!(guide.table_for_test_type("tb"), Some("form_tb"));
        assert_eq!(guide.test_type_for_table("form_vl"), Some("vl"));
        assert_eq!(guide.default_test_table(), "form_vl");
    }
}
