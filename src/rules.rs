//! Business Rule Store
//!
//! Process-wide governance configuration: privacy rules, default
//! assumptions, scope limits, per-intent query rules, pre-flight reject
//! patterns, and response-formatting guidance. Loaded once from JSON at
//! startup into an immutable typed structure; reject patterns are compiled
//! here so a malformed pattern fails startup rather than a query.

use crate::error::{InsightsError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleGroup {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyRules {
    #[serde(default)]
    pub description: String,
    pub forbidden_columns: Vec<String>,
    /// Identifier columns the rules permit inside COUNT(DISTINCT ...).
    /// Kept as configuration data; the safety validator applies a flat ban.
    #[serde(default)]
    pub allow_aggregated_distinct: Vec<String>,
    #[serde(default)]
    pub forbidden_patterns: Vec<String>,
    #[serde(default)]
    pub privacy_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalRules {
    pub privacy: PrivacyRules,
    #[serde(default)]
    pub default_assumptions: RuleGroup,
    #[serde(default)]
    pub query_scope_limits: RuleGroup,
    #[serde(default)]
    pub data_security: RuleGroup,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentRuleSet {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub default_behavior: Vec<String>,
    #[serde(default)]
    pub default_limit: Option<u32>,
    #[serde(default)]
    pub essential_columns: Vec<String>,
    #[serde(default)]
    pub default_order: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeLimits {
    #[serde(default = "default_max_tables")]
    pub max_tables_per_query: usize,
    #[serde(default)]
    pub max_result_limit: Option<u64>,
    #[serde(default)]
    pub require_meaningful_filters: bool,
    #[serde(default)]
    pub require_domain_relevance: bool,
}

fn default_max_tables() -> usize {
    3
}

impl Default for ScopeLimits {
    fn default() -> Self {
        Self {
            max_tables_per_query: default_max_tables(),
            max_result_limit: None,
            require_meaningful_filters: false,
            require_domain_relevance: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default)]
    pub reject_patterns: Vec<String>,
    #[serde(default)]
    pub reject_intents: Vec<String>,
    #[serde(default)]
    pub scope_limits: ScopeLimits,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseFormatting {
    #[serde(default)]
    pub column_aliases: RuleGroup,
    #[serde(default)]
    pub data_presentation: RuleGroup,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextualRules {
    #[serde(default)]
    pub temporal: RuleGroup,
    #[serde(default)]
    pub geographic: RuleGroup,
    #[serde(default)]
    pub clinical: RuleGroup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessRules {
    pub global_rules: GlobalRules,
    #[serde(default)]
    pub intent_rules: BTreeMap<String, IntentRuleSet>,
    #[serde(default)]
    pub validation_rules: ValidationRules,
    #[serde(default)]
    pub response_formatting: ResponseFormatting,
    #[serde(default)]
    pub contextual_rules: ContextualRules,

    #[serde(skip)]
    compiled_reject: Vec<Regex>,
}

impl BusinessRules {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| InsightsError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&content)
            .map_err(|e| InsightsError::Config(format!("Failed to load {}: {}", path.display(), e)))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let mut rules: BusinessRules = serde_json::from_str(content)?;
        rules.compiled_reject = rules
            .validation_rules
            .reject_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    InsightsError::Config(format!("Invalid reject pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(rules)
    }

    pub fn reject_regexes(&self) -> &[Regex] {
        &self.compiled_reject
    }

    pub fn intent_rules_for(&self, intent: &str) -> Option<&IntentRuleSet> {
        self.intent_rules.get(intent)
    }

    pub fn forbidden_columns(&self) -> &[String] {
        &self.global_rules.privacy.forbidden_columns
    }

    pub fn max_tables_per_query(&self) -> usize {
        self.validation_rules.scope_limits.max_tables_per_query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_compiles_reject_patterns() {
        let rules = BusinessRules::from_json(
            r#"{
                "global_rules": {
                    "privacy": {"forbidden_columns": ["patient_id"]}
                },
                "validation_rules": {
                    "reject_patterns": ["(?i)\\b(drop|delete)\\b"]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(rules.reject_regexes().len(), 1);
        assert!(rules.reject_regexes()[0].is_match("please DROP the table"));
    }

    #[test]
    fn malformed_pattern_fails_at_load() {
        let err = BusinessRules::from_json(
            r#"{
                "global_rules": {"privacy": {"forbidden_columns": []}},
                "validation_rules": {"reject_patterns": ["(unclosed"]}
            }"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn scope_limits_default_to_three_tables() {
        let rules = BusinessRules::from_json(
            r#"{"global_rules": {"privacy": {"forbidden_columns": []}}}"#,
        )
        .unwrap();
        assert_eq!(rules.max_tables_per_query(), 3);
    }
}
