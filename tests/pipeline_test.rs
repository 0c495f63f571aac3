use lims_insights::chart::{format_category_value_data, ChartData};
use lims_insights::error::InsightsError;
use lims_insights::execution::{ExecutionResult, Row};
use lims_insights::field_guide::FieldGuide;
use lims_insights::llm::ScriptedGenerator;
use lims_insights::pipeline::QueryPipeline;
use lims_insights::rules::BusinessRules;
use lims_insights::schema::SchemaCatalog;
use serde_json::json;
use std::sync::Arc;

const INTENT_COUNT_REPLY: &str = r#"{"type": "single", "intents": ["count"],
    "test_types": ["vl"], "tables": ["form_vl"], "domain_relevance": "high",
    "references_previous": false, "assumptions": []}"#;

const SQL_BY_LAB_REPLY: &str = "```sql\nSELECT fd.facility_name AS `Testing Lab`, \
    COUNT(*) AS `Total Tests` FROM form_vl JOIN facility_details fd \
    ON form_vl.lab_id = fd.facility_id WHERE YEAR(sample_tested_datetime) = 2024 \
    GROUP BY fd.facility_name\n```";

fn pipeline_with(responses: Vec<&str>) -> QueryPipeline {
    let rules = Arc::new(BusinessRules::load("config/business-rules.json").unwrap());
    let guide = Arc::new(FieldGuide::load("config/field-guide.json").unwrap());
    let schema = Arc::new(SchemaCatalog::load("config/schema.sample.json").unwrap());
    let generator = Arc::new(ScriptedGenerator::new(responses));
    QueryPipeline::new(rules, guide, schema, generator).unwrap()
}

fn rows(values: Vec<serde_json::Value>) -> ExecutionResult {
    let rows: Vec<Row> = values
        .into_iter()
        .map(|v| serde_json::from_value(v).unwrap())
        .collect();
    ExecutionResult::new(rows, 12)
}

#[tokio::test]
async fn full_pipeline_produces_validated_sql() {
    let pipeline = pipeline_with(vec![INTENT_COUNT_REPLY, SQL_BY_LAB_REPLY]);
    let outcome = pipeline
        .process_query("How many VL tests were tested in 2024 by lab?", Some("s1"))
        .await
        .unwrap();

    assert!(outcome.sql.to_lowercase().starts_with("select"));
    assert_eq!(outcome.intent, "count");
    assert_eq!(outcome.intent_details, vec!["count".to_string()]);
    assert_eq!(
        outcome.tables_used,
        vec!["form_vl".to_string(), "facility_details".to_string()]
    );
    assert!(outcome.tables_selected.contains(&"form_vl".to_string()));
    assert!(!outcome.conversation_context.has_context);
    assert!(outcome.context.schema.contains("form_vl"));
    // The lab join is present, so no lab hint concern is raised.
    assert!(!outcome.concerns.iter().any(|c| c.contains("lab_id JOIN")));
}

#[tokio::test]
async fn follow_up_carries_conversation_context() {
    let pipeline = pipeline_with(vec![
        INTENT_COUNT_REPLY,
        SQL_BY_LAB_REPLY,
        INTENT_COUNT_REPLY,
        "```sql\nSELECT COUNT(*) AS `Suppressed Tests` FROM form_vl WHERE \
         YEAR(sample_tested_datetime) = 2024 AND vl_result_category = 'suppressed'\n```",
    ]);

    let first = pipeline
        .process_query("How many VL tests were tested in 2024 by lab?", Some("s1"))
        .await
        .unwrap();
    let result = rows(vec![
        json!({"Testing Lab": "Central Reference Laboratory", "Total Tests": 1200}),
        json!({"Testing Lab": "District Hospital Alpha", "Total Tests": 340}),
    ]);
    pipeline.record_result(Some("s1"), "How many VL tests were tested in 2024 by lab?", &first, Some(&result));

    let history = pipeline.get_history(Some("s1"));
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].row_count, 2);

    let second = pipeline
        .process_query("Of those, how many were suppressed?", Some("s1"))
        .await
        .unwrap();
    assert!(second.conversation_context.has_context);
    assert!(second
        .conversation_context
        .suggested_filters
        .contains(&"YEAR(sample_tested_datetime) = 2024".to_string()));
    assert!(second.context.conversation.contains("CONVERSATION CONTEXT"));
}

#[tokio::test]
async fn sessions_do_not_share_history() {
    let pipeline = pipeline_with(vec![INTENT_COUNT_REPLY, SQL_BY_LAB_REPLY]);
    let outcome = pipeline
        .process_query("How many VL tests in 2024?", Some("s1"))
        .await
        .unwrap();
    pipeline.record_result(Some("s1"), "How many VL tests in 2024?", &outcome, None);

    assert_eq!(pipeline.get_history(Some("s1")).len(), 1);
    assert!(pipeline.get_history(Some("s2")).is_empty());

    let err = pipeline
        .process_query("Of those, how many were suppressed?", Some("s2"))
        .await
        .unwrap_err();
    assert!(matches!(err, InsightsError::MissingContext(_)));
}

#[tokio::test]
async fn preflight_rejects_administrative_questions() {
    let pipeline = pipeline_with(vec!["unused"]);
    let err = pipeline
        .process_query("drop table form_vl", None)
        .await
        .unwrap_err();
    assert!(matches!(err, InsightsError::RejectedQuery(_)));
}

#[tokio::test]
async fn low_domain_relevance_fails_the_turn() {
    let reply = r#"{"type": "single", "intents": ["general"], "test_types": [],
        "tables": [], "domain_relevance": "low", "references_previous": false,
        "assumptions": []}"#;
    let pipeline = pipeline_with(vec![reply]);
    let err = pipeline
        .process_query("What is the weather like in Douala?", None)
        .await
        .unwrap_err();
    assert!(matches!(err, InsightsError::UnrelatedDomain(_)));
}

#[tokio::test]
async fn privacy_violation_names_the_column() {
    let pipeline = pipeline_with(vec![
        INTENT_COUNT_REPLY,
        "SELECT patient_first_name FROM form_vl",
    ]);
    let err = pipeline
        .process_query("List VL tests with patient details", None)
        .await
        .unwrap_err();
    match err {
        InsightsError::PrivacyViolation { column } => assert_eq!(column, "patient_first_name"),
        other => panic!("expected privacy violation, got {:?}", other),
    }
}

#[tokio::test]
async fn disallowed_table_is_a_schema_violation() {
    let pipeline = pipeline_with(vec![INTENT_COUNT_REPLY, "SELECT * FROM secret_table"]);
    let err = pipeline
        .process_query("How many VL tests were done?", None)
        .await
        .unwrap_err();
    match err {
        InsightsError::SchemaViolation(message) => assert!(message.contains("secret_table")),
        other => panic!("expected schema violation, got {:?}", other),
    }
}

#[tokio::test]
async fn unusable_model_output_is_an_extraction_failure() {
    let pipeline = pipeline_with(vec![
        INTENT_COUNT_REPLY,
        "I am unable to produce a query for this question.",
    ]);
    let err = pipeline
        .process_query("How many VL tests were done?", None)
        .await
        .unwrap_err();
    assert!(matches!(err, InsightsError::ExtractionFailure(_)));
}

#[tokio::test]
async fn chart_suggestion_guard_and_fallback() {
    let pipeline = pipeline_with(vec!["not json"]);

    let single_row = rows(vec![json!({"total": 5})]);
    assert!(pipeline
        .suggest_chart(&single_row, "count", "how many?")
        .await
        .is_none());

    let result = rows(vec![
        json!({"facility_name": "Central Reference Laboratory", "total_tests": 1200}),
        json!({"facility_name": "District Hospital Alpha", "total_tests": 340}),
        json!({"facility_name": "Rural Health Centre Beta", "total_tests": 95}),
    ]);
    let recommendation = pipeline
        .suggest_chart(&result, "count", "tests by facility")
        .await
        .unwrap();
    assert!(recommendation.suitable_for_charts);

    let config = &recommendation.suggestions[0].config;
    match format_category_value_data(&result.rows, config).unwrap() {
        ChartData::Flat { categories, values } => {
            assert_eq!(categories.len(), 3);
            assert_eq!(values[0], 1200.0);
        }
        _ => panic!("expected flat chart data"),
    }
}
