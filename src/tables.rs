//! Table Selection
//!
//! Maps recognized domain vocabulary to a bounded set of candidate tables.
//! Falls back to conversational continuity when no vocabulary matches, then
//! to a generic default. Order reflects vocabulary-group iteration order,
//! not relevance ranking.

use crate::conversation::ConversationContext;
use crate::field_guide::FieldGuide;
use crate::rules::BusinessRules;
use crate::schema::SchemaCatalog;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

lazy_static! {
    static ref RE_VL: Regex = Regex::new(
        r"\b(vl|viral load|hiv|hiv vl|suppression|suppressed|turnaround|tat|test volume|rejection rate|sample)\b"
    )
    .unwrap();
    static ref RE_COVID: Regex = Regex::new(r"\b(covid|coronavirus|covid19|covid-19)\b").unwrap();
    static ref RE_EID: Regex = Regex::new(r"\b(eid|infant|early infant diagnosis)\b").unwrap();
    static ref RE_TB: Regex = Regex::new(r"\b(tb|tuberculosis)\b").unwrap();
    static ref RE_HEPATITIS: Regex = Regex::new(r"\b(hepatitis|hep)\b").unwrap();
    static ref RE_FACILITY: Regex = Regex::new(r"\b(facility|facilities|clinic|lab)\b").unwrap();
    static ref RE_BATCH: Regex = Regex::new(r"\b(batch|batches)\b").unwrap();
    static ref RE_USER: Regex = Regex::new(r"\b(user|users|staff)\b").unwrap();
    static ref RE_LABS: Regex = Regex::new(r"\blab(s)?\b").unwrap();
    static ref RE_GEOGRAPHY: Regex =
        Regex::new(r"\b(province|state|district|county|region|zone)\b").unwrap();
    static ref RE_GENERIC_TEST: Regex =
        Regex::new(r"\b(patient|test|testing|tests|sample|result|results)\b").unwrap();
    static ref RE_METRIC_WORDS: Regex = Regex::new(
        r"\b(turnaround|average|count|total|rate|volume|monthly|yearly|trend|how many|number of)\b"
    )
    .unwrap();
}

pub fn select_tables(
    question: &str,
    guide: &FieldGuide,
    rules: &BusinessRules,
    schema: &SchemaCatalog,
    context: &ConversationContext,
) -> Vec<String> {
    let lowered = question.to_lowercase();
    let mut selected: Vec<String> = Vec::new();

    let vl_table = guide.table_for_test_type("vl").unwrap_or("form_vl").to_string();
    let covid_table = guide
        .table_for_test_type("covid19")
        .unwrap_or("form_covid19")
        .to_string();
    let eid_table = guide.table_for_test_type("eid").unwrap_or("form_eid").to_string();

    let groups: [(&Regex, &str); 8] = [
        (&RE_VL, vl_table.as_str()),
        (&RE_COVID, covid_table.as_str()),
        (&RE_EID, eid_table.as_str()),
        (&RE_TB, "form_tb"),
        (&RE_HEPATITIS, "form_hepatitis"),
        (&RE_FACILITY, "facility_details"),
        (&RE_BATCH, "batch_details"),
        (&RE_USER, "user_details"),
    ];

    for (pattern, table) in groups {
        if pattern.is_match(&lowered) {
            push_unique(&mut selected, table);
        }
    }

    if RE_LABS.is_match(&lowered) {
        push_unique(&mut selected, "facility_details");
    }
    if RE_GEOGRAPHY.is_match(&lowered) {
        push_unique(&mut selected, "geographical_divisions");
    }

    // No domain vocabulary matched: lean on tables the conversation keeps
    // coming back to.
    if selected.is_empty() && context.has_context {
        for table in &context.common_tables {
            push_unique(&mut selected, table);
        }
    }

    selected.retain(|table| schema.is_allowed_table(table));

    if selected.is_empty() {
        let fallback = if RE_GENERIC_TEST.is_match(&lowered) {
            guide.default_test_table()
        } else {
            "facility_details"
        };
        debug!(table = %fallback, "no vocabulary match, applying default table");
        selected.push(fallback.to_string());
    }

    // A facility-only selection for a question that clearly asks about test
    // metrics still needs a test form to aggregate over.
    let test_forms = guide.test_form_tables();
    let has_test_form = selected.iter().any(|t| test_forms.contains(&t.as_str()));
    if !has_test_form && RE_METRIC_WORDS.is_match(&lowered) {
        let default = guide.default_test_table().to_string();
        if !selected.contains(&default) {
            selected.insert(0, default);
        }
    }

    selected.truncate(rules.max_tables_per_query());
    selected
}

fn push_unique(tables: &mut Vec<String>, table: &str) {
    if !tables.iter().any(|t| t == table) {
        tables.push(table.to_string());
    }
}
