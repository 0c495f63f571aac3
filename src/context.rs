//! Prompt Context Assembly
//!
//! Merges schema, relationships, reference samples, business rules, field
//! guide, conversation context, and intent guidance into one structured
//! bundle of labeled text sections. Pure concatenation of already-loaded
//! data: no I/O and no model calls happen here.

use crate::conversation::ConversationContext;
use crate::field_guide::FieldGuide;
use crate::intent::IntentAnalysis;
use crate::rules::BusinessRules;
use crate::schema::SchemaCatalog;
use serde::Serialize;

const MAX_SCHEMA_COLUMNS: usize = 20;
const MAX_REFERENCE_ROWS: usize = 5;
const MAX_REFERENCE_COLS: usize = 3;
const MAX_FORBIDDEN_LISTED: usize = 8;
const MAX_ASSUMPTIONS_LISTED: usize = 3;

/// Assembled prompt sections, keyed by name. Discarded after generation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptContext {
    pub schema: String,
    pub relationships: String,
    pub reference_data: String,
    pub business_rules: String,
    pub field_guide: String,
    pub conversation: String,
    pub intent_guidance: String,
}

impl PromptContext {
    /// Concatenate the non-empty sections into one generation input.
    pub fn render(&self) -> String {
        [
            &self.schema,
            &self.relationships,
            &self.reference_data,
            &self.business_rules,
            &self.field_guide,
            &self.conversation,
            &self.intent_guidance,
        ]
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
    }
}

pub fn assemble_context(
    rules: &BusinessRules,
    guide: &FieldGuide,
    schema: &SchemaCatalog,
    analysis: &IntentAnalysis,
    tables: &[String],
    conversation: &ConversationContext,
) -> PromptContext {
    let intent = analysis.primary_intent().as_str();
    PromptContext {
        schema: schema_section(schema, tables),
        relationships: relationships_section(schema, tables),
        reference_data: reference_data_section(schema, tables),
        business_rules: business_rules_section(rules, intent),
        field_guide: field_guide_section(guide, tables),
        conversation: conversation_section(conversation),
        intent_guidance: intent_guidance_section(rules, intent),
    }
}

fn schema_section(schema: &SchemaCatalog, tables: &[String]) -> String {
    let mut info = String::from("TABLES AND COLUMNS:\n");

    for table in tables {
        let Some(table_info) = schema.table(table) else {
            continue;
        };
        info.push_str(&format!("\n{} ({}):\n", table, table_info.table_type));
        for column in table_info.columns.iter().take(MAX_SCHEMA_COLUMNS) {
            let nullable = if column.nullable { "NULL" } else { "NOT NULL" };
            let key = column
                .key
                .as_deref()
                .filter(|k| !k.is_empty())
                .map(|k| format!(" [{}]", k))
                .unwrap_or_default();
            info.push_str(&format!(
                "  - {} ({}, {}){}",
                column.name, column.data_type, nullable, key
            ));
            if column.name.eq_ignore_ascii_case("lab_id") {
                info.push_str(" // JOIN facility_details ON lab_id for lab names");
            }
            if let Some(comment) = column.comment.as_deref().filter(|c| !c.is_empty()) {
                info.push_str(&format!(" // {}", comment));
            }
            info.push('\n');
        }
    }

    info
}

fn relationships_section(schema: &SchemaCatalog, tables: &[String]) -> String {
    let relevant: Vec<_> = schema
        .relationships
        .iter()
        .filter(|r| {
            tables.iter().any(|t| *t == r.from_table) || tables.iter().any(|t| *t == r.to_table)
        })
        .collect();

    if relevant.is_empty() {
        return String::new();
    }

    let mut info = String::from("TABLE RELATIONSHIPS:\n");
    for rel in relevant {
        info.push_str(&format!(
            "- {}.{} -> {}.{}\n",
            rel.from_table, rel.from_column, rel.to_table, rel.to_column
        ));
    }
    info
}

fn reference_data_section(schema: &SchemaCatalog, tables: &[String]) -> String {
    let mut info = String::new();

    for table in tables {
        let Some(reference) = schema.reference_data.get(table) else {
            continue;
        };
        if reference.data.is_empty() {
            continue;
        }

        if info.is_empty() {
            info.push_str("REFERENCE DATA (Sample values for lookup tables):\n");
        }
        info.push_str(&format!(
            "\n{} (showing {} of {} rows):\n",
            table, reference.sample_rows, reference.total_rows
        ));
        for row in reference.data.iter().take(MAX_REFERENCE_ROWS) {
            let values: Vec<String> = row
                .iter()
                .take(MAX_REFERENCE_COLS)
                .map(|(key, value)| match value.as_str() {
                    Some(s) => format!("{}: '{}'", key, s),
                    None => format!("{}: {}", key, value),
                })
                .collect();
            info.push_str(&format!("  - {}\n", values.join(", ")));
        }
    }

    info
}

fn business_rules_section(rules: &BusinessRules, intent: &str) -> String {
    let mut context = String::from("BUSINESS RULES:\n");

    let forbidden = rules.forbidden_columns();
    if !forbidden.is_empty() {
        context.push_str("Privacy Requirements:\n");
        let listed: Vec<&str> = forbidden
            .iter()
            .take(MAX_FORBIDDEN_LISTED)
            .map(String::as_str)
            .collect();
        context.push_str(&format!(
            "- NEVER add these in select query: {}\n",
            listed.join(", ")
        ));
    }

    if let Some(intent_rules) = rules.intent_rules_for(intent) {
        if !intent_rules.rules.is_empty() {
            context.push_str(&format!("\n{} Query Rules:\n", intent));
            for rule in &intent_rules.rules {
                context.push_str(&format!("- {}\n", rule));
            }
        }
    }

    let assumptions = &rules.global_rules.default_assumptions.rules;
    if !assumptions.is_empty() {
        context.push_str("\nDefault Assumptions:\n");
        for assumption in assumptions.iter().take(MAX_ASSUMPTIONS_LISTED) {
            context.push_str(&format!("- {}\n", assumption));
        }
    }

    context
}

fn field_guide_section(guide: &FieldGuide, tables: &[String]) -> String {
    let mut context = String::from("TERMINOLOGY MAPPING:\n");
    for mapping in &guide.terminology_mapping {
        context.push_str(&format!("- \"{}\" = {}\n", mapping.terms, mapping.maps_to));
    }

    for table in tables {
        let Some(test_type) = guide.test_type_for_table(table) else {
            continue;
        };
        let Some(thresholds) = guide.clinical_thresholds.get(test_type) else {
            continue;
        };
        context.push_str(&format!(
            "\n{} CLINICAL THRESHOLDS:\n",
            test_type.to_uppercase()
        ));
        for (name, threshold) in &thresholds.thresholds {
            context.push_str(&format!(
                "- {}: {} // {}\n",
                name, threshold.condition, threshold.description
            ));
        }
    }

    let mut meanings = String::new();
    for table in tables {
        let Some(semantics) = guide.column_semantics.get(table) else {
            continue;
        };
        meanings.push_str(&format!("{} columns:\n", table));
        for entry in semantics {
            meanings.push_str(&format!("  - {}: {}\n", entry.column, entry.meaning));
        }
    }
    if !meanings.is_empty() {
        context.push_str("\nCOLUMN MEANINGS:\n");
        context.push_str(&meanings);
    }

    context
}

fn conversation_section(conversation: &ConversationContext) -> String {
    if !conversation.has_context {
        return String::new();
    }

    let mut context = String::from("CONVERSATION CONTEXT:\n");
    context.push_str(&conversation.context_summary);
    if !conversation.suggested_filters.is_empty() {
        context.push_str("\nFilters from previous queries that may apply:\n");
        for filter in &conversation.suggested_filters {
            context.push_str(&format!("- {}\n", filter));
        }
    }
    context
}

fn intent_guidance_section(rules: &BusinessRules, intent: &str) -> String {
    let mut guidance = format!("QUERY TYPE GUIDANCE ({}):\n", intent);

    if let Some(intent_rules) = rules.intent_rules_for(intent) {
        for rule in &intent_rules.rules {
            guidance.push_str(&format!("- {}\n", rule));
        }
        if let Some(limit) = intent_rules.default_limit {
            guidance.push_str(&format!("- Default LIMIT: {}\n", limit));
        }
        if !intent_rules.essential_columns.is_empty() {
            guidance.push_str(&format!(
                "- Essential columns: {}\n",
                intent_rules.essential_columns.join(", ")
            ));
        }
    }

    guidance
}
