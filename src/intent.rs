//! Intent Classification
//!
//! Determines query type (single vs multi-part) and intent tags for a
//! question, using the generative model with a deterministic regex fallback.
//! The model is given the business-rule defaults and, when the question
//! references prior turns, a summary of the conversation window.

use crate::conversation::ConversationContext;
use crate::error::{InsightsError, Result};
use crate::extract::extract_json;
use crate::field_guide::FieldGuide;
use crate::llm::TextGenerator;
use crate::rules::BusinessRules;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const INTENT_MAX_TOKENS: u32 = 300;

lazy_static! {
    static ref RE_COUNT: Regex = Regex::new(r"\b(how many|count|number of|total)\b").unwrap();
    static ref RE_LIST: Regex = Regex::new(r"\b(list|show|display|all|get)\b").unwrap();
    static ref RE_AGGREGATE: Regex = Regex::new(r"\b(average|mean|sum|max|min)\b").unwrap();
    static ref RE_MULTI_PART: Regex =
        Regex::new(r"\b(how many|count|number of).*\b(and|how many|what is|how much)\b").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Single,
    MultiPart,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Single => "single",
            QueryType::MultiPart => "multi_part",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainRelevance {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Count,
    List,
    Aggregate,
    Filter,
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Count => "count",
            Intent::List => "list",
            Intent::Aggregate => "aggregate",
            Intent::Filter => "filter",
            Intent::General => "general",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "count" => Some(Intent::Count),
            "list" => Some(Intent::List),
            "aggregate" => Some(Intent::Aggregate),
            "filter" => Some(Intent::Filter),
            "general" => Some(Intent::General),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    Model,
    RegexFallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentAnalysis {
    #[serde(rename = "type")]
    pub query_type: QueryType,
    pub intents: Vec<Intent>,
    pub test_types: Vec<String>,
    pub tables: Vec<String>,
    pub domain_relevance: DomainRelevance,
    pub references_previous: bool,
    pub assumptions: Vec<String>,
    pub method: ClassificationMethod,
}

impl IntentAnalysis {
    /// Primary intent used for rule lookup and guidance sections.
    pub fn primary_intent(&self) -> Intent {
        self.intents.first().copied().unwrap_or(Intent::General)
    }

    pub fn intent_names(&self) -> Vec<String> {
        self.intents.iter().map(|i| i.as_str().to_string()).collect()
    }
}

/// Classify a question. Fails with `MissingContext` when the question
/// references prior turns none of which exist; degrades to the regex
/// fallback on any model or parse failure.
pub async fn classify_intent(
    generator: &dyn TextGenerator,
    rules: &BusinessRules,
    guide: &FieldGuide,
    question: &str,
    context: &ConversationContext,
) -> Result<IntentAnalysis> {
    if context.references_missing_context {
        let message = context
            .suggested_response
            .clone()
            .unwrap_or_else(|| "The question references previous results, but this conversation has none.".to_string());
        return Err(InsightsError::MissingContext(message));
    }

    let prompt = build_classification_prompt(rules, question, context);

    match generator.generate(&prompt, INTENT_MAX_TOKENS).await {
        Ok(raw) => match parse_model_reply(&raw, guide) {
            Some(analysis) => {
                debug!(query_type = %analysis.query_type.as_str(), "classified intent");
                Ok(analysis)
            }
            None => {
                warn!("intent reply unparseable, using regex fallback");
                Ok(fallback_intent_detection(question))
            }
        },
        Err(e) => {
            warn!("intent model call failed ({}), using regex fallback", e);
            Ok(fallback_intent_detection(question))
        }
    }
}

fn build_classification_prompt(
    rules: &BusinessRules,
    question: &str,
    context: &ConversationContext,
) -> String {
    let mut prompt = String::from(
        "You classify a medical lab analytics question. If the question is unrelated to \
         laboratory or medical data, set domain_relevance=\"low\".\n\
         Return ONLY JSON:\n\
         {\n  \"type\": \"single\" | \"multi_part\",\n  \"intents\": string[],\n  \
         \"test_types\": string[],\n  \"tables\": string[],\n  \
         \"domain_relevance\": \"high\" | \"medium\" | \"low\",\n  \
         \"references_previous\": true | false,\n  \"assumptions\": string[]\n}\n\n",
    );

    prompt.push_str("BUSINESS CONTEXT:\nDefault Assumptions, DONT IGNORE THESE:\n");
    for assumption in &rules.global_rules.default_assumptions.rules {
        prompt.push_str(&format!("- {}\n", assumption));
    }
    prompt.push_str("\nQuery Scope Guidelines:\n");
    for limit in &rules.global_rules.query_scope_limits.rules {
        prompt.push_str(&format!("- {}\n", limit));
    }

    if context.has_context {
        prompt.push_str("\nCONVERSATION CONTEXT:\n");
        prompt.push_str(&context.context_summary);
        if !context.suggested_filters.is_empty() {
            prompt.push_str("Previous filters that may apply:\n");
            for filter in &context.suggested_filters {
                prompt.push_str(&format!("- {}\n", filter));
            }
        }
    }

    prompt.push_str(&format!("\nQUESTION: {}\n", question));
    prompt
}

fn parse_model_reply(raw: &str, guide: &FieldGuide) -> Option<IntentAnalysis> {
    let value = extract_json(raw)?;
    let object = value.as_object()?;

    let query_type = match object.get("type").and_then(|v| v.as_str()) {
        Some("multi_part") => QueryType::MultiPart,
        _ => QueryType::Single,
    };

    let mut intents: Vec<Intent> = string_list(object.get("intents"))
        .iter()
        .filter_map(|s| Intent::parse(s))
        .collect();
    if intents.is_empty() {
        intents.push(Intent::General);
    }

    let test_types = string_list(object.get("test_types"));
    let mut tables = string_list(object.get("tables"));
    if tables.is_empty() && !test_types.is_empty() {
        tables = test_types
            .iter()
            .filter_map(|tt| guide.table_for_test_type(tt).map(String::from))
            .collect();
    }

    let domain_relevance = match object.get("domain_relevance").and_then(|v| v.as_str()) {
        Some("high") => DomainRelevance::High,
        Some("low") => DomainRelevance::Low,
        _ => DomainRelevance::Medium,
    };

    Some(IntentAnalysis {
        query_type,
        intents,
        test_types,
        tables,
        domain_relevance,
        references_previous: object
            .get("references_previous")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        assumptions: string_list(object.get("assumptions")),
        method: ClassificationMethod::Model,
    })
}

fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Deterministic classifier used when the model reply is missing or
/// malformed. Conservatively reports medium domain relevance.
pub fn fallback_intent_detection(question: &str) -> IntentAnalysis {
    let lowered = question.to_lowercase();
    let mut intents = Vec::new();

    if RE_COUNT.is_match(&lowered) {
        intents.push(Intent::Count);
    }
    if RE_LIST.is_match(&lowered) {
        intents.push(Intent::List);
    }
    if RE_AGGREGATE.is_match(&lowered) {
        intents.push(Intent::Aggregate);
    }

    let query_type = if RE_MULTI_PART.is_match(&lowered) || intents.len() > 1 {
        QueryType::MultiPart
    } else {
        QueryType::Single
    };

    if intents.is_empty() {
        intents.push(Intent::General);
    }

    IntentAnalysis {
        query_type,
        intents,
        test_types: Vec::new(),
        tables: Vec::new(),
        domain_relevance: DomainRelevance::Medium,
        references_previous: false,
        assumptions: Vec::new(),
        method: ClassificationMethod::RegexFallback,
    }
}
